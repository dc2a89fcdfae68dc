//! One coordinator per course while it has a session to run.
//!
//! Coordinators are spawned by `start` and `recover_all` only. Reads for a
//! course without one answer as inactive. An idle coordinator exits on its
//! own and its entry is pruned on the next spawn.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::clock::WallClock;
use crate::coordinator::{
    CoordinatorConfig, EndSummary, ScanOutcome, SessionCoordinator, SessionDeps, SessionHandle, SessionView,
};
use crate::error::{AttendanceError, AttendanceResult};
use crate::types::{AttendanceRecord, AttendanceStatus, CourseId, SessionConfig, SessionState, StudentId};

/// Called with every newly spawned coordinator.
pub type SpawnObserver = Arc<dyn Fn(&SessionHandle) + Send + Sync>;

#[derive(Clone)]
pub struct SessionRegistry {
    coordinators: Arc<RwLock<HashMap<CourseId, SessionHandle>>>,
    config: CoordinatorConfig,
    deps: SessionDeps,
    wall: WallClock,
    observer: Option<SpawnObserver>,
}

impl SessionRegistry {
    pub fn new(config: CoordinatorConfig, deps: SessionDeps) -> Self {
        Self::with_clock(config, deps, WallClock::system())
    }

    pub fn with_clock(config: CoordinatorConfig, deps: SessionDeps, wall: WallClock) -> Self {
        Self {
            coordinators: Arc::new(RwLock::new(HashMap::new())),
            config,
            deps,
            wall,
            observer: None,
        }
    }

    /// Registers a callback run for each coordinator this registry spawns,
    /// e.g. to bridge its events elsewhere.
    pub fn with_observer(mut self, observer: SpawnObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn wall(&self) -> &WallClock {
        &self.wall
    }

    /// Existing coordinator for `course_id`, if one is running.
    pub async fn get(&self, course_id: CourseId) -> Option<SessionHandle> {
        self.coordinators
            .read()
            .await
            .get(&course_id)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// Returns the course's coordinator, spawning one (which attempts
    /// recovery) when none is running.
    async fn ensure(&self, course_id: CourseId) -> SessionHandle {
        if let Some(handle) = self.get(course_id).await {
            return handle;
        }
        let mut map = self.coordinators.write().await;
        match map.get(&course_id) {
            Some(handle) if !handle.is_closed() => handle.clone(),
            _ => self.spawn_into(&mut map, course_id),
        }
    }

    pub async fn status(&self, course_id: CourseId) -> AttendanceResult<SessionView> {
        let missing = || Ok(SessionView::inactive(course_id));
        match self.get(course_id).await {
            Some(handle) => or_missing(handle.status().await, missing),
            None => missing(),
        }
    }

    /// Scans for a course without a coordinator are ignored like any scan
    /// outside a live session.
    pub async fn scan(&self, course_id: CourseId, token: String) -> AttendanceResult<ScanOutcome> {
        let missing = || {
            Ok(ScanOutcome::Ignored {
                state: SessionState::Inactive,
            })
        };
        match self.get(course_id).await {
            Some(handle) => or_missing(handle.scan(token).await, missing),
            None => missing(),
        }
    }

    pub async fn override_status(
        &self,
        course_id: CourseId,
        student_id: StudentId,
        status: AttendanceStatus,
    ) -> AttendanceResult<AttendanceRecord> {
        let missing = || Err(AttendanceError::SessionNotLive(SessionState::Inactive));
        match self.get(course_id).await {
            Some(handle) => or_missing(handle.override_status(student_id, status).await, missing),
            None => missing(),
        }
    }

    pub async fn end(&self, course_id: CourseId) -> AttendanceResult<EndSummary> {
        let missing = || Err(AttendanceError::SessionNotLive(SessionState::Inactive));
        match self.get(course_id).await {
            Some(handle) => or_missing(handle.end().await, missing),
            None => missing(),
        }
    }

    /// Starts a session, replacing a coordinator whose previous session has
    /// ended and been fully committed. A live session for the course is
    /// reported as `SessionAlreadyLive`; an ended one with uncommitted
    /// classifications as `PersistenceFailure`.
    pub async fn start(&self, course_id: CourseId, config: SessionConfig) -> AttendanceResult<SessionView> {
        let handle = self.ensure(course_id).await;
        match handle.start(config).await {
            Err(AttendanceError::SessionNotLive(SessionState::Ended))
            | Err(AttendanceError::CoordinatorUnavailable) => {
                let fresh = {
                    let mut map = self.coordinators.write().await;
                    let current = map.get(&course_id).filter(|h| !h.is_closed()).cloned();
                    match current {
                        // Someone else already replaced it.
                        Some(h) if !h.same_channel(&handle) => h,
                        _ => self.spawn_into(&mut map, course_id),
                    }
                };
                tracing::debug!(course_id, "replaced ended coordinator");
                fresh.start(config).await
            }
            other => other,
        }
    }

    /// Spawns coordinators for every course with a stored snapshot so their
    /// timers resume without waiting for a request.
    pub async fn recover_all(&self) -> AttendanceResult<Vec<CourseId>> {
        let courses = self.deps.store.courses().await?;
        for &course_id in &courses {
            self.ensure(course_id).await;
        }
        if !courses.is_empty() {
            tracing::info!(count = courses.len(), "resuming stored sessions");
        }
        Ok(courses)
    }

    pub async fn course_ids(&self) -> Vec<CourseId> {
        let mut ids: Vec<CourseId> = self
            .coordinators
            .read()
            .await
            .iter()
            .filter(|(_, h)| !h.is_closed())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Spawns a coordinator for `course_id` into `map`, dropping entries
    /// whose coordinator has exited.
    fn spawn_into(&self, map: &mut HashMap<CourseId, SessionHandle>, course_id: CourseId) -> SessionHandle {
        map.retain(|_, h| !h.is_closed());
        let observer = self.observer.clone();
        let handle = SessionCoordinator::spawn_observed(course_id, self.config, self.deps.clone(), self.wall, |h| {
            if let Some(observer) = observer {
                observer(h);
            }
        });
        map.insert(course_id, handle.clone());
        handle
    }
}

/// A coordinator that exited between lookup and reply counts as absent.
fn or_missing<T>(
    result: AttendanceResult<T>,
    missing: impl FnOnce() -> AttendanceResult<T>,
) -> AttendanceResult<T> {
    match result {
        Err(AttendanceError::CoordinatorUnavailable) => missing(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PersistenceGateway;
    use crate::roster::StaticRoster;
    use crate::store::{MemorySessionStateStore, SessionStateStore};
    use crate::types::{AttendanceRecord, StudentIdentity};
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    struct OkGateway;

    #[async_trait]
    impl PersistenceGateway for OkGateway {
        async fn commit(
            &self,
            _course_id: CourseId,
            _date: NaiveDate,
            _records: &[AttendanceRecord],
        ) -> Result<(), crate::error::PersistenceError> {
            Ok(())
        }
    }

    fn registry(store: MemorySessionStateStore) -> SessionRegistry {
        let deps = SessionDeps {
            gateway: Arc::new(OkGateway),
            roster: Arc::new(StaticRoster::new(vec![StudentIdentity {
                id: 1,
                display_name: "Ada".into(),
                rfid_code: "77".into(),
            }])),
            store: Arc::new(store),
        };
        SessionRegistry::new(CoordinatorConfig::default(), deps)
    }

    fn config() -> SessionConfig {
        CoordinatorConfig::default().session_config(Utc::now().date_naive(), None, None)
    }

    #[tokio::test]
    async fn one_live_session_per_course() {
        let registry = registry(MemorySessionStateStore::new());
        registry.start(1, config()).await.unwrap();
        assert!(matches!(
            registry.start(1, config()).await,
            Err(AttendanceError::SessionAlreadyLive(1))
        ));
        registry.start(2, config()).await.unwrap();
        assert_eq!(registry.course_ids().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn ended_coordinator_is_replaced_on_start() {
        let registry = registry(MemorySessionStateStore::new());
        registry.start(1, config()).await.unwrap();
        let first = registry.get(1).await.unwrap();
        first.end().await.unwrap();

        let view = registry.start(1, config()).await.unwrap();
        assert_eq!(view.state, SessionState::Grace);
        assert!(!registry.get(1).await.unwrap().same_channel(&first));
    }

    #[tokio::test]
    async fn recover_all_spawns_stored_courses() {
        let store = MemorySessionStateStore::new();
        let snapshot = crate::store::SessionSnapshot {
            started_at: Utc::now(),
            grace_duration_minutes: 5.0,
            is_in_grace: true,
            hard_timeout_minutes: Some(30),
            date: None,
        };
        store.save(4, &snapshot).await.unwrap();

        let registry = registry(store);
        assert_eq!(registry.recover_all().await.unwrap(), vec![4]);
        let view = registry.status(4).await.unwrap();
        assert_eq!(view.state, SessionState::Grace);
    }

    #[tokio::test]
    async fn unknown_courses_do_not_spawn_coordinators() {
        let registry = registry(MemorySessionStateStore::new());
        for course_id in 100..600 {
            let view = registry.status(course_id).await.unwrap();
            assert_eq!(view.state, SessionState::Inactive);
        }
        assert!(matches!(
            registry.scan(100, "77".into()).await,
            Ok(ScanOutcome::Ignored {
                state: SessionState::Inactive
            })
        ));
        assert!(matches!(
            registry.end(100).await,
            Err(AttendanceError::SessionNotLive(SessionState::Inactive))
        ));
        assert!(matches!(
            registry.override_status(100, 1, AttendanceStatus::Excused).await,
            Err(AttendanceError::SessionNotLive(SessionState::Inactive))
        ));
        assert!(registry.course_ids().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_coordinators_exit_and_are_pruned() {
        let registry = registry(MemorySessionStateStore::new());
        registry.start(1, config()).await.unwrap();
        registry.end(1).await.unwrap();
        assert_eq!(registry.course_ids().await, vec![1]);

        tokio::time::sleep(registry.config().idle_timeout + std::time::Duration::from_secs(1)).await;
        assert!(registry.course_ids().await.is_empty());
        assert_eq!(registry.status(1).await.unwrap().state, SessionState::Inactive);

        registry.start(2, config()).await.unwrap();
        assert_eq!(registry.coordinators.read().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observer_sees_recovery_events() {
        let store = MemorySessionStateStore::new();
        let snapshot = crate::store::SessionSnapshot {
            started_at: Utc::now(),
            grace_duration_minutes: 5.0,
            is_in_grace: true,
            hard_timeout_minutes: Some(30),
            date: None,
        };
        store.save(6, &snapshot).await.unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let registry = registry(store).with_observer(Arc::new(move |handle: &SessionHandle| {
            sink.lock().unwrap().push(handle.subscribe());
        }));
        registry.recover_all().await.unwrap();

        let mut events = seen.lock().unwrap().pop().unwrap();
        let first = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            first,
            crate::coordinator::SessionEvent::SessionStarted { recovered: true, .. }
        ));
    }
}
