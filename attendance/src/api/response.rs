use axum::{Json, http::StatusCode};
use serde::Serialize;

use crate::error::AttendanceError;

/// Standardized API response wrapper for all outgoing JSON responses.
///
/// ```json
/// {
///   "success": true,
///   "data": { ... },
///   "message": "Session started"
/// }
/// ```
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub success: bool,
    pub data: T,
    pub message: String,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
        }
    }

    /// Error response with default `data`.
    pub fn error(message: impl Into<String>) -> Self
    where
        T: Default,
    {
        Self {
            success: false,
            data: T::default(),
            message: message.into(),
        }
    }
}

impl AttendanceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::ScanNotRecognized { .. } | AttendanceError::UnknownStudent(_) => {
                StatusCode::NOT_FOUND
            }
            AttendanceError::AlreadyClassified { .. }
            | AttendanceError::SessionEnded
            | AttendanceError::SessionAlreadyLive(_)
            | AttendanceError::SessionNotLive(_) => StatusCode::CONFLICT,
            AttendanceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AttendanceError::PersistenceFailure(_) | AttendanceError::CoordinatorUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AttendanceError::SessionStateCorrupted(_)
            | AttendanceError::Roster(_)
            | AttendanceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Maps an error onto its status code and an error envelope.
pub fn failure<T>(err: AttendanceError) -> (StatusCode, Json<ApiResponse<T>>)
where
    T: Serialize + Default,
{
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!("request failed: {}", err);
    }
    (status, Json(ApiResponse::error(err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(
            AttendanceError::ScanNotRecognized { token: "9999".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AttendanceError::SessionEnded.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AttendanceError::PersistenceFailure(PersistenceError::Unavailable("down".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
