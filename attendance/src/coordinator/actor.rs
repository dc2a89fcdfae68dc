use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use super::events::{EndReason, EndSummary, ScanOutcome, SessionEvent, SessionView, StatusCounts};
use super::handle::{Command, Reply, SessionHandle};
use super::{CoordinatorConfig, SessionDeps};
use crate::classify::{classify, ensure_unclassified};
use crate::clock::{ClockEvent, SessionClock, WallClock};
use crate::error::{AttendanceError, AttendanceResult, PersistenceError};
use crate::queue::{FlushOutcome, PendingUpdateQueue};
use crate::scan::{CooldownGuard, ScanMatcher, normalize_token};
use crate::store::SessionSnapshot;
use crate::types::{
    AttendanceRecord, AttendanceStatus, CourseId, PendingUpdate, RecordSource, ScanEvent, Session,
    SessionConfig, SessionState, StudentId,
};

const EVENT_BUFFER: usize = 256;

struct FlushResult {
    batch_id: u64,
    students: Vec<StudentId>,
    result: Result<(), PersistenceError>,
}

/// A stored session that could not be rebuilt yet.
struct PendingRecovery {
    attempt: u32,
    retry_at: Instant,
}

async fn sleep_until_or_never(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Single owner of one course's session state.
///
/// Commands, timer events and flush completions are all handled on this task,
/// so state transitions never interleave.
pub struct SessionCoordinator {
    course_id: CourseId,
    config: CoordinatorConfig,
    deps: SessionDeps,
    state: SessionState,
    session: Option<Session>,
    matcher: ScanMatcher,
    records: HashMap<StudentId, AttendanceRecord>,
    queue: PendingUpdateQueue,
    cooldown: CooldownGuard,
    clock: SessionClock,
    clock_rx: mpsc::Receiver<ClockEvent>,
    flush_tx: mpsc::Sender<FlushResult>,
    flush_rx: mpsc::Receiver<FlushResult>,
    events: broadcast::Sender<SessionEvent>,
    end_waiters: Vec<Reply<EndSummary>>,
    stall_reported: bool,
    recovery: Option<PendingRecovery>,
}

impl SessionCoordinator {
    /// Spawns the coordinator task and returns its handle.
    ///
    /// The task first tries to recover a live session from the state store.
    pub fn spawn(
        course_id: CourseId,
        config: CoordinatorConfig,
        deps: SessionDeps,
        wall: WallClock,
    ) -> SessionHandle {
        Self::spawn_observed(course_id, config, deps, wall, |_| {})
    }

    /// Like [`spawn`](Self::spawn), but hands the handle to `observe` before
    /// the task runs, so subscriptions made there also see recovery events.
    pub fn spawn_observed(
        course_id: CourseId,
        config: CoordinatorConfig,
        deps: SessionDeps,
        wall: WallClock,
        observe: impl FnOnce(&SessionHandle),
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (clock_tx, clock_rx) = mpsc::channel(4);
        let (flush_tx, flush_rx) = mpsc::channel(4);

        let coordinator = SessionCoordinator {
            course_id,
            queue: PendingUpdateQueue::new(config.queue),
            cooldown: CooldownGuard::new(config.cooldown_max_hold),
            config,
            deps,
            state: SessionState::Inactive,
            session: None,
            matcher: ScanMatcher::new(Vec::new()),
            records: HashMap::new(),
            clock: SessionClock::new(wall, clock_tx),
            clock_rx,
            flush_tx,
            flush_rx,
            events: events.clone(),
            end_waiters: Vec::new(),
            stall_reported: false,
            recovery: None,
        };

        let handle = SessionHandle::new(course_id, cmd_tx, events, wall);
        observe(&handle);
        tokio::spawn(coordinator.run(cmd_rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.try_recover().await;
        let mut accepting = true;
        let mut idle_since: Option<Instant> = None;

        loop {
            self.settle_end_waiters();
            let idle = self.is_idle();
            if !accepting && idle {
                break;
            }
            let linger_until = if idle {
                Some(*idle_since.get_or_insert_with(Instant::now) + self.config.idle_timeout)
            } else {
                idle_since = None;
                None
            };

            let flush_due = sleep_until_or_never(self.queue.next_deadline());
            let recovery_due = sleep_until_or_never(self.recovery.as_ref().map(|r| r.retry_at));
            let linger_over = sleep_until_or_never(linger_until);

            tokio::select! {
                cmd = commands.recv(), if accepting => match cmd {
                    Some(cmd) => {
                        self.handle_command(cmd).await;
                        idle_since = None;
                    }
                    None => {
                        tracing::debug!(course_id = self.course_id, "all handles dropped");
                        accepting = false;
                    }
                },
                Some(event) = self.clock_rx.recv() => self.on_clock(event).await,
                Some(done) = self.flush_rx.recv() => self.on_flush_result(done),
                _ = flush_due => self.start_flush(),
                _ = recovery_due => {
                    self.try_recover().await;
                }
                _ = linger_over => {
                    if commands.is_empty() {
                        tracing::debug!(course_id = self.course_id, state = %self.state, "idle coordinator stopping");
                        break;
                    }
                }
            }
        }

        tracing::info!(course_id = self.course_id, "coordinator stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { config, reply } => {
                let result = self.start(config).await;
                let _ = reply.send(result);
            }
            Command::Scan {
                token,
                received_at,
                reply,
            } => {
                let result = self.scan(&token, received_at);
                if let Err(e) = &result {
                    self.publish(SessionEvent::ScanRejected {
                        course_id: self.course_id,
                        token,
                        reason: e.to_string(),
                    });
                }
                let _ = reply.send(result);
            }
            Command::Override {
                student_id,
                status,
                reply,
            } => {
                let _ = reply.send(self.override_status(student_id, status));
            }
            Command::End { reply } => match self.state {
                SessionState::Inactive => {
                    let _ = reply.send(Err(AttendanceError::SessionNotLive(self.state)));
                }
                SessionState::Ended => {
                    self.end_waiters.push(reply);
                    self.queue.request_flush(Instant::now());
                    self.start_flush();
                }
                SessionState::Grace | SessionState::Active => {
                    self.end_waiters.push(reply);
                    self.end_session(EndReason::Manual).await;
                }
            },
            Command::Status { reply } => {
                let _ = reply.send(Ok(self.view()));
            }
        }
    }

    /// Nothing left to do until a new command arrives.
    fn is_idle(&self) -> bool {
        !self.state.is_live()
            && !self.queue.has_work()
            && self.recovery.is_none()
            && self.end_waiters.is_empty()
    }

    /// Runs one recovery attempt. A failure keeps the stored snapshot and
    /// schedules another attempt with the queue's retry backoff.
    async fn try_recover(&mut self) -> Option<AttendanceError> {
        match self.recover().await {
            Ok(()) => {
                self.recovery = None;
                None
            }
            Err(e) => {
                let attempt = self.recovery.as_ref().map_or(1, |r| r.attempt + 1);
                let retry_in = self.queue.backoff(attempt);
                tracing::warn!(
                    course_id = self.course_id,
                    attempt,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "session recovery failed: {}",
                    e
                );
                self.recovery = Some(PendingRecovery {
                    attempt,
                    retry_at: Instant::now() + retry_in,
                });
                Some(e)
            }
        }
    }

    /// Rebuilds a live session from the state store. `Ok` covers an empty
    /// store and a discarded snapshot as well as a resumed session.
    async fn recover(&mut self) -> AttendanceResult<()> {
        let snapshot = match self.deps.store.load(self.course_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(()),
            Err(AttendanceError::SessionStateCorrupted(reason)) => {
                self.discard_snapshot(&reason).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let recovered = match snapshot.validate(self.clock.now(), self.config.default_hard_timeout_minutes) {
            Ok(recovered) => recovered,
            Err(e) => {
                self.discard_snapshot(&e.to_string()).await;
                return Ok(());
            }
        };

        self.load_day(recovered.date).await?;

        let session = self.clock.resume(
            self.course_id,
            recovered.date,
            recovered.started_at,
            recovered.grace_minutes,
            recovered.hard_timeout_minutes,
            recovered.in_grace,
        );
        tracing::info!(
            course_id = self.course_id,
            started_at = %session.started_at,
            in_grace = recovered.in_grace,
            remaining_secs = self.clock.remaining().as_secs(),
            "recovered live session"
        );
        self.state = session.state;
        self.publish(SessionEvent::SessionStarted {
            course_id: self.course_id,
            date: session.date,
            started_at: session.started_at,
            grace_deadline: session.grace_deadline(),
            hard_deadline: session.hard_deadline(),
            recovered: true,
        });
        self.session = Some(session);
        Ok(())
    }

    async fn discard_snapshot(&mut self, reason: &str) {
        tracing::warn!(
            course_id = self.course_id,
            "discarding corrupted session snapshot: {}",
            reason
        );
        if let Err(e) = self.deps.store.clear(self.course_id).await {
            tracing::error!(course_id = self.course_id, "failed to clear session snapshot: {}", e);
        }
    }

    /// Loads the roster and any records already committed for `date`.
    async fn load_day(&mut self, date: NaiveDate) -> AttendanceResult<()> {
        let roster = self.deps.roster.load(self.course_id, date).await?;
        let existing = self
            .deps
            .gateway
            .existing(self.course_id, date)
            .await
            .map_err(AttendanceError::PersistenceFailure)?;

        self.matcher = ScanMatcher::new(roster);
        self.records = existing
            .into_iter()
            .filter(|r| r.status.is_classified() && self.matcher.student(r.student_id).is_some())
            .map(|r| (r.student_id, r))
            .collect();
        Ok(())
    }

    async fn start(&mut self, config: SessionConfig) -> AttendanceResult<SessionView> {
        // A stored session takes precedence over a new one.
        if self.recovery.is_some() {
            if let Some(e) = self.try_recover().await {
                return Err(e);
            }
        }
        match self.state {
            SessionState::Grace | SessionState::Active => {
                return Err(AttendanceError::SessionAlreadyLive(self.course_id));
            }
            SessionState::Ended if self.queue.has_work() => {
                return Err(AttendanceError::PersistenceFailure(PersistenceError::Unavailable(
                    format!(
                        "previous session still has {} uncommitted classifications",
                        self.queue.len() + self.queue.in_flight_len()
                    ),
                )));
            }
            SessionState::Ended => return Err(AttendanceError::SessionNotLive(self.state)),
            SessionState::Inactive => {}
        }
        if config.hard_timeout_minutes == 0 {
            return Err(AttendanceError::InvalidRequest(
                "hard timeout must be at least one minute".into(),
            ));
        }
        if config.grace_minutes > config.hard_timeout_minutes {
            return Err(AttendanceError::InvalidRequest(format!(
                "grace period ({}m) exceeds hard timeout ({}m)",
                config.grace_minutes, config.hard_timeout_minutes
            )));
        }

        self.load_day(config.date).await?;
        let session = self.clock.start(self.course_id, config);
        self.state = session.state;
        self.session = Some(session.clone());
        self.save_snapshot().await;

        tracing::info!(
            course_id = self.course_id,
            date = %session.date,
            roster = self.matcher.len(),
            grace_minutes = session.grace_duration_minutes,
            hard_timeout_minutes = session.hard_timeout_minutes,
            "session started"
        );
        self.publish(SessionEvent::SessionStarted {
            course_id: self.course_id,
            date: session.date,
            started_at: session.started_at,
            grace_deadline: session.grace_deadline(),
            hard_deadline: session.hard_deadline(),
            recovered: false,
        });
        Ok(self.view())
    }

    fn scan(&mut self, token: &str, received_at: DateTime<Utc>) -> AttendanceResult<ScanOutcome> {
        if !self.state.is_live() {
            tracing::debug!(course_id = self.course_id, state = %self.state, "scan ignored");
            return Ok(ScanOutcome::Ignored { state: self.state });
        }
        let Some(session) = self.session.as_ref() else {
            return Err(AttendanceError::SessionStateCorrupted(
                "live state without a session".into(),
            ));
        };

        let event = ScanEvent {
            raw_token: token.to_string(),
            normalized_token: normalize_token(token),
            received_at,
        };
        let student = self
            .matcher
            .resolve(&event.normalized_token)
            .cloned()
            .ok_or_else(|| AttendanceError::ScanNotRecognized {
                token: event.raw_token.clone(),
            })?;

        let current = self.current_status(student.id);
        let now = Instant::now();
        if !self.cooldown.acquire(student.id, now) {
            tracing::debug!(course_id = self.course_id, student_id = student.id, "cooldown hold active");
            return Err(AttendanceError::AlreadyClassified {
                student_id: student.id,
                status: current,
            });
        }
        let checked = ensure_unclassified(student.id, current).and_then(|()| classify(event.received_at, session));
        let status = match checked {
            Ok(status) => status,
            Err(e) => {
                self.cooldown.release(student.id);
                return Err(e);
            }
        };

        self.record(student.id, status, event.received_at, RecordSource::Scan, now);
        tracing::info!(
            course_id = self.course_id,
            student_id = student.id,
            status = %status,
            "scan classified"
        );
        self.publish(SessionEvent::ScanAccepted {
            course_id: self.course_id,
            student_id: student.id,
            display_name: student.display_name.clone(),
            status,
            at: event.received_at,
        });
        Ok(ScanOutcome::Classified { student, status })
    }

    fn override_status(
        &mut self,
        student_id: StudentId,
        status: AttendanceStatus,
    ) -> AttendanceResult<AttendanceRecord> {
        if !self.state.is_live() {
            return Err(AttendanceError::SessionNotLive(self.state));
        }
        if !status.is_classified() {
            return Err(AttendanceError::InvalidRequest(
                "a status cannot be reset to not_set".into(),
            ));
        }
        if self.matcher.student(student_id).is_none() {
            return Err(AttendanceError::UnknownStudent(student_id));
        }

        let at = self.clock.now();
        let record = self.record(student_id, status, at, RecordSource::Manual, Instant::now());
        tracing::info!(course_id = self.course_id, student_id, status = %status, "status overridden");
        self.publish(SessionEvent::StatusOverridden {
            course_id: self.course_id,
            student_id,
            status,
        });
        Ok(record)
    }

    fn record(
        &mut self,
        student_id: StudentId,
        status: AttendanceStatus,
        at: DateTime<Utc>,
        source: RecordSource,
        now: Instant,
    ) -> AttendanceRecord {
        let record = AttendanceRecord {
            student_id,
            status,
            classified_at: at,
            source,
        };
        self.records.insert(student_id, record.clone());
        self.queue.enqueue(
            PendingUpdate {
                student_id,
                status,
                timestamp: at,
                source,
            },
            now,
        );
        record
    }

    fn current_status(&self, student_id: StudentId) -> AttendanceStatus {
        self.records
            .get(&student_id)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    async fn on_clock(&mut self, event: ClockEvent) {
        if !self.clock.is_current(event) {
            tracing::debug!(course_id = self.course_id, ?event, "stale clock event");
            return;
        }
        match event {
            ClockEvent::GraceEnded { .. } => {
                if self.state != SessionState::Grace {
                    return;
                }
                self.clock.clear_grace();
                self.state = SessionState::Active;
                if let Some(session) = self.session.as_mut() {
                    session.state = SessionState::Active;
                }
                self.save_snapshot().await;
                tracing::info!(course_id = self.course_id, "grace period over");
                self.publish(SessionEvent::GraceEnded {
                    course_id: self.course_id,
                });
            }
            ClockEvent::TimedOut { .. } => {
                if self.state.is_live() {
                    self.end_session(EndReason::Timeout).await;
                }
            }
        }
    }

    /// Closes the session: unscanned students become absent, timers stop and
    /// the queue is flushed immediately.
    async fn end_session(&mut self, reason: EndReason) {
        let now = Instant::now();
        let at = self.clock.now();
        let unscanned: Vec<StudentId> = self
            .matcher
            .students()
            .iter()
            .map(|s| s.id)
            .filter(|id| !self.current_status(*id).is_classified())
            .collect();
        for &student_id in &unscanned {
            self.record(student_id, AttendanceStatus::Absent, at, RecordSource::Timeout, now);
        }

        self.clock.cancel();
        self.state = SessionState::Ended;
        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Ended;
        }
        if let Err(e) = self.deps.store.clear(self.course_id).await {
            tracing::error!(course_id = self.course_id, "failed to clear session snapshot: {}", e);
        }

        tracing::info!(
            course_id = self.course_id,
            ?reason,
            absent = unscanned.len(),
            "session ended"
        );
        self.publish(SessionEvent::SessionEnded {
            course_id: self.course_id,
            reason,
            absent_count: unscanned.len(),
        });

        self.queue.request_flush(now);
        self.start_flush();
    }

    fn start_flush(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(batch) = self.queue.begin_flush() else {
            return;
        };

        let course_id = self.course_id;
        let date = session.date;
        let students: Vec<StudentId> = batch.updates.iter().map(|u| u.student_id).collect();
        let records: Vec<AttendanceRecord> = batch.updates.iter().map(AttendanceRecord::from).collect();
        let gateway = self.deps.gateway.clone();
        let timeout = self.config.commit_timeout;
        let done = self.flush_tx.clone();
        tracing::debug!(course_id, batch_id = batch.id, size = records.len(), "flushing batch");

        tokio::spawn(async move {
            let commit = tokio::spawn(async move {
                tokio::time::timeout(timeout, gateway.commit(course_id, date, &records)).await
            });
            let result = match commit.await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(PersistenceError::Unavailable(format!(
                    "commit timed out after {}ms",
                    timeout.as_millis()
                ))),
                Err(join) => Err(PersistenceError::Unavailable(format!("commit task failed: {join}"))),
            };
            let _ = done
                .send(FlushResult {
                    batch_id: batch.id,
                    students,
                    result,
                })
                .await;
        });
    }

    fn on_flush_result(&mut self, done: FlushResult) {
        let now = Instant::now();
        let outcome = self.queue.complete(done.batch_id, &done.result, now);
        self.cooldown.release_all(done.students.iter().copied());
        let expired = self.cooldown.expire(now);
        if expired > 0 {
            tracing::warn!(course_id = self.course_id, expired, "dropped cooldown holds past their max hold");
        }

        match (outcome, done.result) {
            (FlushOutcome::Committed { batch_size }, _) => {
                tracing::info!(course_id = self.course_id, batch_size, "batch committed");
                self.stall_reported = false;
                self.publish(SessionEvent::FlushSucceeded {
                    course_id: self.course_id,
                    count: batch_size,
                });
            }
            (
                FlushOutcome::Failed {
                    attempt,
                    retry_in,
                    exhausted,
                },
                result,
            ) => {
                let error = result.err().unwrap_or_else(|| {
                    PersistenceError::Unavailable("commit failed".into())
                });
                tracing::warn!(
                    course_id = self.course_id,
                    attempt,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "batch commit failed: {}",
                    error
                );
                self.publish(SessionEvent::FlushFailed {
                    course_id: self.course_id,
                    attempt,
                    retry_in_ms: retry_in.as_millis() as u64,
                    error: error.to_string(),
                });
                if exhausted {
                    if !self.stall_reported {
                        self.stall_reported = true;
                        tracing::error!(
                            course_id = self.course_id,
                            attempts = attempt,
                            pending = self.queue.len(),
                            "persistence stalled; classifications are held in memory and retries continue"
                        );
                        self.publish(SessionEvent::PersistenceStalled {
                            course_id: self.course_id,
                            attempts: attempt,
                            pending: self.queue.len(),
                        });
                    }
                    for waiter in self.end_waiters.drain(..) {
                        let _ = waiter.send(Err(AttendanceError::PersistenceFailure(error.clone())));
                    }
                }
            }
            (FlushOutcome::Stale, _) => {
                tracing::debug!(course_id = self.course_id, batch_id = done.batch_id, "stale flush result");
            }
        }
    }

    /// Answers `end` callers once an ended session has nothing left to commit.
    fn settle_end_waiters(&mut self) {
        if self.state != SessionState::Ended || self.queue.has_work() || self.end_waiters.is_empty() {
            return;
        }
        let Some(summary) = self.summary() else {
            return;
        };
        for waiter in self.end_waiters.drain(..) {
            let _ = waiter.send(Ok(summary.clone()));
        }
    }

    fn summary(&self) -> Option<EndSummary> {
        let session = self.session.as_ref()?;
        Some(EndSummary {
            course_id: self.course_id,
            date: session.date,
            counts: self.counts(),
        })
    }

    fn counts(&self) -> StatusCounts {
        StatusCounts::tally(
            self.matcher
                .students()
                .iter()
                .map(|s| self.current_status(s.id)),
        )
    }

    fn view(&self) -> SessionView {
        let session = self.session.as_ref();
        let mut records: Vec<AttendanceRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.student_id);
        SessionView {
            course_id: self.course_id,
            state: self.state,
            date: session.map(|s| s.date),
            started_at: session.map(|s| s.started_at),
            grace_deadline: session.map(Session::grace_deadline),
            hard_deadline: session.map(Session::hard_deadline),
            grace_remaining_secs: if self.state == SessionState::Grace {
                self.clock.grace_remaining().as_secs()
            } else {
                0
            },
            remaining_secs: if self.state.is_live() {
                self.clock.remaining().as_secs()
            } else {
                0
            },
            roster_size: self.matcher.len(),
            cooldown_held: self.cooldown.held_count(),
            counts: self.counts(),
            pending_updates: self.queue.len(),
            in_flight_updates: self.queue.in_flight_len(),
            consecutive_failures: self.queue.consecutive_failures(),
            records,
        }
    }

    async fn save_snapshot(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let snapshot = SessionSnapshot::from_session(session);
        if let Err(e) = self.deps.store.save(self.course_id, &snapshot).await {
            tracing::error!(course_id = self.course_id, "failed to save session snapshot: {}", e);
        }
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
