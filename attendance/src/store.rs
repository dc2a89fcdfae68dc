//! Durable snapshot of the live session, used only to rebuild the clock after
//! a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AttendanceError, AttendanceResult};
use crate::types::{CourseId, Session, SessionState};

/// Allowed clock skew for a `startedAt` slightly ahead of now.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

/// Persisted shape: `{startedAt, graceDurationMinutes, isInGrace}` plus
/// optional extensions that older snapshots may lack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub started_at: DateTime<Utc>,
    pub grace_duration_minutes: f64,
    pub is_in_grace: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_timeout_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

/// Clock parameters recovered from a snapshot that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredSession {
    pub started_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub grace_minutes: u32,
    pub hard_timeout_minutes: u32,
    pub in_grace: bool,
}

impl SessionSnapshot {
    pub fn from_session(session: &Session) -> Self {
        Self {
            started_at: session.started_at,
            grace_duration_minutes: f64::from(session.grace_duration_minutes),
            is_in_grace: session.state == SessionState::Grace,
            hard_timeout_minutes: Some(session.hard_timeout_minutes),
            date: Some(session.date),
        }
    }

    pub fn to_json(&self) -> AttendanceResult<String> {
        serde_json::to_string(self).map_err(|e| AttendanceError::Store(e.to_string()))
    }

    pub fn from_json(raw: &str) -> AttendanceResult<Self> {
        serde_json::from_str(raw).map_err(|e| AttendanceError::SessionStateCorrupted(e.to_string()))
    }

    /// Checks internal consistency against `now`.
    ///
    /// `default_hard_timeout` fills in snapshots written without the hard
    /// timeout extension.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        default_hard_timeout: u32,
    ) -> AttendanceResult<RecoveredSession> {
        let corrupted = |msg: String| Err(AttendanceError::SessionStateCorrupted(msg));

        let grace = self.grace_duration_minutes;
        if !grace.is_finite() || grace < 0.0 || grace.fract() != 0.0 || grace > f64::from(u32::MAX) {
            return corrupted(format!("invalid graceDurationMinutes {grace}"));
        }
        let grace_minutes = grace as u32;
        let hard_timeout_minutes = self.hard_timeout_minutes.unwrap_or(default_hard_timeout);
        if grace_minutes > hard_timeout_minutes {
            return corrupted(format!(
                "grace {grace_minutes}m exceeds hard timeout {hard_timeout_minutes}m"
            ));
        }
        if self.started_at > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
            return corrupted(format!("startedAt {} is in the future", self.started_at));
        }
        let grace_deadline = self.started_at + Duration::minutes(i64::from(grace_minutes));
        if !self.is_in_grace && now < grace_deadline {
            return corrupted("grace marked over before its deadline".into());
        }

        Ok(RecoveredSession {
            started_at: self.started_at,
            date: self.date.unwrap_or_else(|| self.started_at.date_naive()),
            grace_minutes,
            hard_timeout_minutes,
            in_grace: self.is_in_grace,
        })
    }
}

#[async_trait]
pub trait SessionStateStore: Send + Sync {
    async fn save(&self, course_id: CourseId, snapshot: &SessionSnapshot) -> AttendanceResult<()>;

    /// `Ok(None)` when nothing is stored; `SessionStateCorrupted` when the
    /// stored payload does not parse.
    async fn load(&self, course_id: CourseId) -> AttendanceResult<Option<SessionSnapshot>>;

    async fn clear(&self, course_id: CourseId) -> AttendanceResult<()>;

    /// Courses with a stored snapshot.
    async fn courses(&self) -> AttendanceResult<Vec<CourseId>>;
}

/// Process-local store keeping raw JSON, for tests and embedding.
#[derive(Clone, Default)]
pub struct MemorySessionStateStore {
    inner: Arc<Mutex<HashMap<CourseId, String>>>,
}

impl MemorySessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an arbitrary payload, bypassing serialization.
    pub async fn put_raw(&self, course_id: CourseId, raw: impl Into<String>) {
        self.inner.lock().await.insert(course_id, raw.into());
    }

    pub async fn raw(&self, course_id: CourseId) -> Option<String> {
        self.inner.lock().await.get(&course_id).cloned()
    }
}

#[async_trait]
impl SessionStateStore for MemorySessionStateStore {
    async fn save(&self, course_id: CourseId, snapshot: &SessionSnapshot) -> AttendanceResult<()> {
        let raw = snapshot.to_json()?;
        self.inner.lock().await.insert(course_id, raw);
        Ok(())
    }

    async fn load(&self, course_id: CourseId) -> AttendanceResult<Option<SessionSnapshot>> {
        match self.inner.lock().await.get(&course_id) {
            Some(raw) => SessionSnapshot::from_json(raw).map(Some),
            None => Ok(None),
        }
    }

    async fn clear(&self, course_id: CourseId) -> AttendanceResult<()> {
        self.inner.lock().await.remove(&course_id);
        Ok(())
    }

    async fn courses(&self) -> AttendanceResult<Vec<CourseId>> {
        let mut ids: Vec<CourseId> = self.inner.lock().await.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Store backed by the `attendance_session_snapshots` table.
#[derive(Clone)]
pub struct DbSessionStateStore {
    db: DatabaseConnection,
}

impl DbSessionStateStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStateStore for DbSessionStateStore {
    async fn save(&self, course_id: CourseId, snapshot: &SessionSnapshot) -> AttendanceResult<()> {
        let raw = snapshot.to_json()?;
        db::models::session_snapshot::Model::put(&self.db, course_id, &raw)
            .await
            .map_err(|e| AttendanceError::Store(e.to_string()))
    }

    async fn load(&self, course_id: CourseId) -> AttendanceResult<Option<SessionSnapshot>> {
        let row = db::models::session_snapshot::Model::get(&self.db, course_id)
            .await
            .map_err(|e| AttendanceError::Store(e.to_string()))?;
        row.map(|r| SessionSnapshot::from_json(&r.payload)).transpose()
    }

    async fn clear(&self, course_id: CourseId) -> AttendanceResult<()> {
        db::models::session_snapshot::Model::delete(&self.db, course_id)
            .await
            .map_err(|e| AttendanceError::Store(e.to_string()))
    }

    async fn courses(&self) -> AttendanceResult<Vec<CourseId>> {
        db::models::session_snapshot::Model::course_ids(&self.db)
            .await
            .map_err(|e| AttendanceError::Store(e.to_string()))
    }
}
