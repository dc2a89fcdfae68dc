//! Session timestamps and the grace / hard-timeout timers.
//!
//! Timers are spawned tasks that sleep until their deadline and post a
//! [`ClockEvent`] to the owning coordinator; cancelling aborts them.

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::types::{CourseId, Session, SessionConfig, SessionState};

/// UTC clock pinned to tokio's monotonic clock.
///
/// Wall timestamps and timer deadlines come from the same source, so a paused
/// runtime in tests moves both together.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    anchor_utc: DateTime<Utc>,
    anchor_instant: Instant,
}

impl WallClock {
    pub fn system() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// A clock that reads `now` at this instant and advances from there.
    pub fn anchored_at(now: DateTime<Utc>) -> Self {
        Self {
            anchor_utc: now,
            anchor_instant: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor_instant);
        self.anchor_utc + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }

    /// Monotonic instant corresponding to a wall-clock time. Past times map to
    /// past instants, which tokio treats as already elapsed.
    pub fn instant_for(&self, at: DateTime<Utc>) -> Instant {
        match (at - self.anchor_utc).to_std() {
            Ok(ahead) => self.anchor_instant + ahead,
            Err(_) => {
                let behind = (self.anchor_utc - at).to_std().unwrap_or_default();
                self.anchor_instant
                    .checked_sub(behind)
                    .unwrap_or(self.anchor_instant)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    GraceEnded { generation: u64 },
    TimedOut { generation: u64 },
}

impl ClockEvent {
    pub fn generation(self) -> u64 {
        match self {
            ClockEvent::GraceEnded { generation } | ClockEvent::TimedOut { generation } => generation,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadlines {
    grace_deadline: DateTime<Utc>,
    hard_deadline: DateTime<Utc>,
}

pub struct SessionClock {
    wall: WallClock,
    events: mpsc::Sender<ClockEvent>,
    deadlines: Option<Deadlines>,
    grace_timer: Option<JoinHandle<()>>,
    hard_timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl SessionClock {
    pub fn new(wall: WallClock, events: mpsc::Sender<ClockEvent>) -> Self {
        Self {
            wall,
            events,
            deadlines: None,
            grace_timer: None,
            hard_timer: None,
            generation: 0,
        }
    }

    pub fn wall(&self) -> &WallClock {
        &self.wall
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.wall.now()
    }

    /// Starts a fresh session now and arms both timers.
    pub fn start(&mut self, course_id: CourseId, config: SessionConfig) -> Session {
        let session = Session {
            course_id,
            date: config.date,
            started_at: self.wall.now(),
            grace_duration_minutes: config.grace_minutes,
            hard_timeout_minutes: config.hard_timeout_minutes,
            state: SessionState::Grace,
        };
        self.arm(&session, true);
        session
    }

    /// Rebuilds a session from persisted parameters.
    ///
    /// Remaining time is derived from `started_at` and the current wall clock,
    /// so downtime counts against the session. Deadlines already in the past
    /// fire on the next scheduler tick.
    pub fn resume(
        &mut self,
        course_id: CourseId,
        date: NaiveDate,
        started_at: DateTime<Utc>,
        grace_minutes: u32,
        hard_timeout_minutes: u32,
        in_grace: bool,
    ) -> Session {
        let session = Session {
            course_id,
            date,
            started_at,
            grace_duration_minutes: grace_minutes,
            hard_timeout_minutes,
            state: if in_grace {
                SessionState::Grace
            } else {
                SessionState::Active
            },
        };
        self.arm(&session, in_grace);
        session
    }

    fn arm(&mut self, session: &Session, with_grace: bool) {
        self.cancel();
        let deadlines = Deadlines {
            grace_deadline: session.grace_deadline(),
            hard_deadline: session.hard_deadline(),
        };
        self.deadlines = Some(deadlines);
        let generation = self.generation;

        if with_grace {
            self.grace_timer = Some(self.schedule(
                deadlines.grace_deadline,
                ClockEvent::GraceEnded { generation },
            ));
        }
        self.hard_timer = Some(self.schedule(
            deadlines.hard_deadline,
            ClockEvent::TimedOut { generation },
        ));
    }

    fn schedule(&self, at: DateTime<Utc>, event: ClockEvent) -> JoinHandle<()> {
        let when = self.wall.instant_for(at);
        let tx = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(when).await;
            let _ = tx.send(event).await;
        })
    }

    /// Time left until the hard deadline; zero once it has passed or when no
    /// session is running.
    pub fn remaining(&self) -> Duration {
        self.until(|d| d.hard_deadline)
    }

    /// Time left in the grace window.
    pub fn grace_remaining(&self) -> Duration {
        self.until(|d| d.grace_deadline)
    }

    fn until(&self, pick: impl Fn(&Deadlines) -> DateTime<Utc>) -> Duration {
        self.deadlines
            .map(|d| (pick(&d) - self.wall.now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO)
    }

    /// Whether `event` belongs to the currently armed timers.
    pub fn is_current(&self, event: ClockEvent) -> bool {
        self.deadlines.is_some() && event.generation() == self.generation
    }

    /// Aborts both timers. Events already queued from them become stale.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.grace_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.hard_timer.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// Cancels only the grace timer (after it has fired or on end).
    pub fn clear_grace(&mut self) {
        if let Some(handle) = self.grace_timer.take() {
            handle.abort();
        }
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.cancel();
    }
}
