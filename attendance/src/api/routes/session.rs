use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{post, put},
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::api::response::{ApiResponse, failure};
use crate::api::state::AppState;
use crate::coordinator::{EndSummary, ScanOutcome, SessionView};
use crate::types::{AttendanceRecord, AttendanceStatus, CourseId, StudentId};

type Reply<T> = (StatusCode, Json<ApiResponse<Option<T>>>);

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(start_session).get(get_session).delete(end_session))
        .route("/scan", post(scan))
        .route("/students/{student_id}", put(override_status))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionReq {
    pub grace_minutes: Option<u32>,
    pub hard_timeout_minutes: Option<u32>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ScanReq {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideReq {
    pub status: AttendanceStatus,
}

/// POST /api/courses/{course_id}/session
///
/// Body fields are optional; missing values fall back to the configured
/// defaults and today's date.
pub async fn start_session(
    State(state): State<AppState>,
    Path(course_id): Path<CourseId>,
    body: Option<Json<StartSessionReq>>,
) -> Reply<SessionView> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let registry = state.registry();
    let date = body
        .date
        .unwrap_or_else(|| registry.wall().now().date_naive());
    let config = registry
        .config()
        .session_config(date, body.grace_minutes, body.hard_timeout_minutes);

    match registry.start(course_id, config).await {
        Ok(view) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(Some(view), "Session started")),
        ),
        Err(e) => failure(e),
    }
}

/// GET /api/courses/{course_id}/session
pub async fn get_session(
    State(state): State<AppState>,
    Path(course_id): Path<CourseId>,
) -> Reply<SessionView> {
    match state.registry().status(course_id).await {
        Ok(view) => (
            StatusCode::OK,
            Json(ApiResponse::success(Some(view), "Session status")),
        ),
        Err(e) => failure(e),
    }
}

/// POST /api/courses/{course_id}/session/scan
pub async fn scan(
    State(state): State<AppState>,
    Path(course_id): Path<CourseId>,
    Json(body): Json<ScanReq>,
) -> Reply<ScanOutcome> {
    match state.registry().scan(course_id, body.token).await {
        Ok(outcome) => {
            let message = match &outcome {
                ScanOutcome::Classified { .. } => "Scan accepted",
                ScanOutcome::Ignored { .. } => "No live session; scan ignored",
            };
            (StatusCode::OK, Json(ApiResponse::success(Some(outcome), message)))
        }
        Err(e) => failure(e),
    }
}

/// PUT /api/courses/{course_id}/session/students/{student_id}
pub async fn override_status(
    State(state): State<AppState>,
    Path((course_id, student_id)): Path<(CourseId, StudentId)>,
    Json(body): Json<OverrideReq>,
) -> Reply<AttendanceRecord> {
    match state
        .registry()
        .override_status(course_id, student_id, body.status)
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(Some(record), "Status updated")),
        ),
        Err(e) => failure(e),
    }
}

/// DELETE /api/courses/{course_id}/session
///
/// Responds once every classification is committed, or with 503 while the
/// final commit keeps failing. 409 when the course has no session.
pub async fn end_session(
    State(state): State<AppState>,
    Path(course_id): Path<CourseId>,
) -> Reply<EndSummary> {
    match state.registry().end(course_id).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(ApiResponse::success(Some(summary), "Session ended")),
        ),
        Err(e) => failure(e),
    }
}
