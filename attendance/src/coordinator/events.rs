use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::types::{AttendanceRecord, AttendanceStatus, CourseId, SessionState, StudentId, StudentIdentity};

/// Why a session reached `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Manual,
    Timeout,
}

/// Broadcast to every subscriber of a course's coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        course_id: CourseId,
        date: NaiveDate,
        started_at: DateTime<Utc>,
        grace_deadline: DateTime<Utc>,
        hard_deadline: DateTime<Utc>,
        recovered: bool,
    },
    ScanAccepted {
        course_id: CourseId,
        student_id: StudentId,
        display_name: String,
        status: AttendanceStatus,
        at: DateTime<Utc>,
    },
    ScanRejected {
        course_id: CourseId,
        token: String,
        reason: String,
    },
    StatusOverridden {
        course_id: CourseId,
        student_id: StudentId,
        status: AttendanceStatus,
    },
    GraceEnded {
        course_id: CourseId,
    },
    FlushSucceeded {
        course_id: CourseId,
        count: usize,
    },
    FlushFailed {
        course_id: CourseId,
        attempt: u32,
        retry_in_ms: u64,
        error: String,
    },
    /// Retries reached the escalation threshold. The coordinator keeps retrying.
    PersistenceStalled {
        course_id: CourseId,
        attempts: u32,
        pending: usize,
    },
    SessionEnded {
        course_id: CourseId,
        reason: EndReason,
        absent_count: usize,
    },
}

impl SessionEvent {
    /// Event name used on the websocket envelope.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "attendance.session_started",
            SessionEvent::ScanAccepted { .. } => "attendance.scan_accepted",
            SessionEvent::ScanRejected { .. } => "attendance.scan_rejected",
            SessionEvent::StatusOverridden { .. } => "attendance.status_overridden",
            SessionEvent::GraceEnded { .. } => "attendance.grace_ended",
            SessionEvent::FlushSucceeded { .. } => "attendance.flush_succeeded",
            SessionEvent::FlushFailed { .. } => "attendance.flush_failed",
            SessionEvent::PersistenceStalled { .. } => "attendance.persistence_stalled",
            SessionEvent::SessionEnded { .. } => "attendance.session_ended",
        }
    }
}

/// Result of a scan that was not rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Classified {
        student: StudentIdentity,
        status: AttendanceStatus,
    },
    /// No live session; the scan was dropped without a lookup.
    Ignored { state: SessionState },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub not_set: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub excused: usize,
}

impl StatusCounts {
    pub fn tally(statuses: impl IntoIterator<Item = AttendanceStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                AttendanceStatus::NotSet => counts.not_set += 1,
                AttendanceStatus::Present => counts.present += 1,
                AttendanceStatus::Late => counts.late += 1,
                AttendanceStatus::Absent => counts.absent += 1,
                AttendanceStatus::Excused => counts.excused += 1,
            }
        }
        counts
    }
}

/// Point-in-time view of a coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub course_id: CourseId,
    pub state: SessionState,
    pub date: Option<NaiveDate>,
    pub started_at: Option<DateTime<Utc>>,
    pub grace_deadline: Option<DateTime<Utc>>,
    pub hard_deadline: Option<DateTime<Utc>>,
    pub grace_remaining_secs: u64,
    pub remaining_secs: u64,
    pub roster_size: usize,
    /// Students whose scan is still waiting for its batch to commit.
    pub cooldown_held: usize,
    pub counts: StatusCounts,
    pub pending_updates: usize,
    pub in_flight_updates: usize,
    pub consecutive_failures: u32,
    pub records: Vec<AttendanceRecord>,
}

impl SessionView {
    /// View of a course with no coordinator running.
    pub fn inactive(course_id: CourseId) -> Self {
        Self {
            course_id,
            state: SessionState::Inactive,
            date: None,
            started_at: None,
            grace_deadline: None,
            hard_deadline: None,
            grace_remaining_secs: 0,
            remaining_secs: 0,
            roster_size: 0,
            cooldown_held: 0,
            counts: StatusCounts::default(),
            pending_updates: 0,
            in_flight_updates: 0,
            consecutive_failures: 0,
            records: Vec::new(),
        }
    }
}

/// Returned by `end` once every classification has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndSummary {
    pub course_id: CourseId,
    pub date: NaiveDate,
    pub counts: StatusCounts,
}
