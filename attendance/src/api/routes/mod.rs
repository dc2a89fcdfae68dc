//! HTTP entry points.
//!
//! - `/health` → liveness probe
//! - `/api/courses/{course_id}/session` → session lifecycle, scans and overrides
//! - `/ws/courses/{course_id}` → live session events

use axum::{Router, routing::get};

use super::state::AppState;
use super::ws::course_ws_handler;

pub mod health;
pub mod session;

pub fn routes(app_state: AppState) -> Router {
    Router::new()
        .nest("/health", health::health_routes())
        .nest("/api/courses/{course_id}/session", session::session_routes())
        .route("/ws/courses/{course_id}", get(course_ws_handler))
        .with_state(app_state)
}
