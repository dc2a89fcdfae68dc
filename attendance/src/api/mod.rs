pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;
pub mod ws;

pub use routes::routes;
pub use state::AppState;
