//! The present/late rule.

use chrono::{DateTime, Utc};

use crate::error::AttendanceError;
use crate::types::{AttendanceStatus, Session, StudentId};

/// Classifies a scan received at `scan_time`.
///
/// `[start, grace)` is present, `[grace, hard)` is late, anything at or past
/// the hard deadline is rejected.
pub fn classify(
    scan_time: DateTime<Utc>,
    session: &Session,
) -> Result<AttendanceStatus, AttendanceError> {
    if scan_time >= session.hard_deadline() {
        return Err(AttendanceError::SessionEnded);
    }
    if scan_time < session.grace_deadline() {
        Ok(AttendanceStatus::Present)
    } else {
        Ok(AttendanceStatus::Late)
    }
}

/// Rejects a scan for a student who already holds a status this session.
pub fn ensure_unclassified(
    student_id: StudentId,
    current: AttendanceStatus,
) -> Result<(), AttendanceError> {
    if current.is_classified() {
        return Err(AttendanceError::AlreadyClassified {
            student_id,
            status: current,
        });
    }
    Ok(())
}
