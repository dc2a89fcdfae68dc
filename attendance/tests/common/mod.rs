#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use attendance::clock::WallClock;
use attendance::coordinator::{CoordinatorConfig, SessionCoordinator, SessionDeps, SessionHandle};
use attendance::error::PersistenceError;
use attendance::gateway::PersistenceGateway;
use attendance::roster::StaticRoster;
use attendance::store::MemorySessionStateStore;
use attendance::types::{AttendanceRecord, AttendanceStatus, CourseId, SessionConfig, StudentIdentity};
use attendance::SessionEvent;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio::time::Duration;

pub const COURSE: CourseId = 1;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn date() -> NaiveDate {
    t0().date_naive()
}

pub fn session_config(grace_minutes: u32, hard_timeout_minutes: u32) -> SessionConfig {
    SessionConfig {
        date: date(),
        grace_minutes,
        hard_timeout_minutes,
    }
}

/// Ada (0001), Ben (0002), Cyd (0003).
pub fn roster() -> Vec<StudentIdentity> {
    [(1, "Ada", "0001"), (2, "Ben", "0002"), (3, "Cyd", "0003")]
        .into_iter()
        .map(|(id, name, code)| StudentIdentity {
            id,
            display_name: name.into(),
            rfid_code: code.into(),
        })
        .collect()
}

/// Gateway double that records every commit and can fail or block on demand.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    pub committed: Arc<Mutex<Vec<Vec<AttendanceRecord>>>>,
    pub attempts: Arc<AtomicUsize>,
    fail_remaining: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` commits.
    pub fn failing(n: usize) -> Self {
        let gw = Self::default();
        gw.fail_next(n);
        gw
    }

    /// Commits wait for a permit from the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: Some(gate.clone()),
                ..Self::default()
            },
            gate,
        )
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub async fn commits(&self) -> Vec<Vec<AttendanceRecord>> {
        self.committed.lock().await.clone()
    }

    /// Last committed status per student.
    pub async fn final_status(&self, student_id: i64) -> Option<AttendanceStatus> {
        self.committed
            .lock()
            .await
            .iter()
            .flatten()
            .filter(|r| r.student_id == student_id)
            .last()
            .map(|r| r.status)
    }
}

#[async_trait]
impl PersistenceGateway for RecordingGateway {
    async fn commit(
        &self,
        _course_id: CourseId,
        _date: NaiveDate,
        records: &[AttendanceRecord],
    ) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if fail {
            return Err(PersistenceError::Unavailable("database is down".into()));
        }
        self.committed.lock().await.push(records.to_vec());
        Ok(())
    }
}

pub struct Harness {
    pub handle: SessionHandle,
    pub gateway: RecordingGateway,
    pub store: MemorySessionStateStore,
}

pub fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
}

pub fn spawn_with(
    gateway: RecordingGateway,
    store: MemorySessionStateStore,
    config: CoordinatorConfig,
    now: DateTime<Utc>,
) -> Harness {
    let deps = SessionDeps {
        gateway: Arc::new(gateway.clone()),
        roster: Arc::new(StaticRoster::new(roster())),
        store: Arc::new(store.clone()),
    };
    let handle = SessionCoordinator::spawn(COURSE, config, deps, WallClock::anchored_at(now));
    Harness {
        handle,
        gateway,
        store,
    }
}

pub fn spawn(gateway: RecordingGateway) -> Harness {
    spawn_with(gateway, MemorySessionStateStore::new(), coordinator_config(), t0())
}

/// Waits for the first event matching `pred`.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), wait)
        .await
        .expect("timed out waiting for event")
}
