use axum::{Json, Router, response::IntoResponse, routing::get};

use crate::api::response::ApiResponse;
use crate::api::state::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::success("OK", "Health check passed"))
}
