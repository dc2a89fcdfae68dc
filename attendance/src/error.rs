//! Error taxonomy for the attendance core.
//!
//! Per-scan errors (`ScanNotRecognized`, `AlreadyClassified`, `SessionEnded`)
//! are reported to the operator and never terminate a session.

use thiserror::Error;

use crate::types::{AttendanceStatus, CourseId, SessionState, StudentId};

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("scan '{token}' does not match any student on the roster")]
    ScanNotRecognized { token: String },

    #[error("student {student_id} is already marked {status}")]
    AlreadyClassified {
        student_id: StudentId,
        status: AttendanceStatus,
    },

    #[error("session has ended; scan rejected")]
    SessionEnded,

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] PersistenceError),

    #[error("stored session state is corrupted: {0}")]
    SessionStateCorrupted(String),

    #[error("course {0} already has a live session")]
    SessionAlreadyLive(CourseId),

    #[error("no live session (state: {0})")]
    SessionNotLive(SessionState),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("student {0} is not on the session roster")]
    UnknownStudent(StudentId),

    #[error("roster could not be loaded: {0}")]
    Roster(String),

    #[error("session state store error: {0}")]
    Store(String),

    #[error("session coordinator is no longer running")]
    CoordinatorUnavailable,
}

impl AttendanceError {
    /// True for errors that are reported back to the operator but leave the
    /// session untouched.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AttendanceError::ScanNotRecognized { .. }
                | AttendanceError::AlreadyClassified { .. }
                | AttendanceError::SessionEnded
        )
    }
}

/// Failure reported by a [`PersistenceGateway`](crate::gateway::PersistenceGateway).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("backing store rejected batch: {0}")]
    Rejected(String),
}

impl From<sea_orm::DbErr> for PersistenceError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err.sql_err() {
            Some(sea_orm::SqlErr::ForeignKeyConstraintViolation(msg))
            | Some(sea_orm::SqlErr::UniqueConstraintViolation(msg)) => PersistenceError::Rejected(msg),
            _ => PersistenceError::Unavailable(err.to_string()),
        }
    }
}

pub type AttendanceResult<T> = Result<T, AttendanceError>;
