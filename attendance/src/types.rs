//! Domain types shared by every stage of the scan pipeline.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub type CourseId = i64;
pub type StudentId = i64;

/// Lifecycle of an attendance session. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Inactive,
    Grace,
    Active,
    Ended,
}

impl SessionState {
    /// Grace and active sessions accept scans; everything else ignores them.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Grace | SessionState::Active)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AttendanceStatus {
    #[default]
    NotSet,
    Present,
    Late,
    Absent,
    Excused,
}

impl AttendanceStatus {
    /// Whether a scan may still classify a student currently holding this status.
    pub fn is_classified(self) -> bool {
        !matches!(self, AttendanceStatus::NotSet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordSource {
    Scan,
    Timeout,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub id: StudentId,
    pub display_name: String,
    pub rfid_code: String,
}

/// A completed token as handed over by the reader, stamped on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub raw_token: String,
    pub normalized_token: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub classified_at: DateTime<Utc>,
    pub source: RecordSource,
}

/// A classification waiting for the next batch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub timestamp: DateTime<Utc>,
    pub source: RecordSource,
}

impl From<&PendingUpdate> for AttendanceRecord {
    fn from(u: &PendingUpdate) -> Self {
        AttendanceRecord {
            student_id: u.student_id,
            status: u.status,
            classified_at: u.timestamp,
            source: u.source,
        }
    }
}

/// Parameters an operator supplies when opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub date: NaiveDate,
    pub grace_minutes: u32,
    pub hard_timeout_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub course_id: CourseId,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub grace_duration_minutes: u32,
    pub hard_timeout_minutes: u32,
    pub state: SessionState,
}

impl Session {
    pub fn grace_deadline(&self) -> DateTime<Utc> {
        self.started_at + Duration::minutes(i64::from(self.grace_duration_minutes))
    }

    pub fn hard_deadline(&self) -> DateTime<Utc> {
        self.started_at + Duration::minutes(i64::from(self.hard_timeout_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn deadlines_are_offsets_from_start() {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let session = Session {
            course_id: 1,
            date: started_at.date_naive(),
            started_at,
            grace_duration_minutes: 5,
            hard_timeout_minutes: 30,
            state: SessionState::Grace,
        };
        assert_eq!(session.grace_deadline(), started_at + Duration::minutes(5));
        assert_eq!(session.hard_deadline(), started_at + Duration::minutes(30));
    }

    #[test]
    fn status_strings_round_trip_through_strum() {
        assert_eq!(AttendanceStatus::NotSet.to_string(), "not_set");
        assert_eq!(AttendanceStatus::from_str("EXCUSED").unwrap(), AttendanceStatus::Excused);
        assert!(!AttendanceStatus::NotSet.is_classified());
        assert!(AttendanceStatus::Absent.is_classified());
    }
}
