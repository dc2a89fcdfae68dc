use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::events::{EndSummary, ScanOutcome, SessionEvent, SessionView};
use crate::clock::WallClock;
use crate::error::{AttendanceError, AttendanceResult};
use crate::scan::pump_tokens;
use crate::types::{AttendanceRecord, AttendanceStatus, CourseId, SessionConfig, StudentId};

pub(crate) type Reply<T> = oneshot::Sender<AttendanceResult<T>>;

pub(crate) enum Command {
    Start {
        config: SessionConfig,
        reply: Reply<SessionView>,
    },
    Scan {
        token: String,
        received_at: DateTime<Utc>,
        reply: Reply<ScanOutcome>,
    },
    Override {
        student_id: StudentId,
        status: AttendanceStatus,
        reply: Reply<AttendanceRecord>,
    },
    End {
        reply: Reply<EndSummary>,
    },
    Status {
        reply: Reply<SessionView>,
    },
}

/// Cheap, cloneable front door to one course's coordinator.
#[derive(Clone)]
pub struct SessionHandle {
    course_id: CourseId,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    wall: WallClock,
}

impl SessionHandle {
    pub(crate) fn new(
        course_id: CourseId,
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<SessionEvent>,
        wall: WallClock,
    ) -> Self {
        Self {
            course_id,
            commands,
            events,
            wall,
        }
    }

    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    pub async fn start(&self, config: SessionConfig) -> AttendanceResult<SessionView> {
        self.request(|reply| Command::Start { config, reply }).await
    }

    /// Submits a completed token. The receive time is taken here, before the
    /// command waits in the coordinator's mailbox.
    pub async fn scan(&self, token: impl Into<String>) -> AttendanceResult<ScanOutcome> {
        let token = token.into();
        let received_at = self.wall.now();
        self.request(|reply| Command::Scan {
            token,
            received_at,
            reply,
        })
        .await
    }

    pub async fn override_status(
        &self,
        student_id: StudentId,
        status: AttendanceStatus,
    ) -> AttendanceResult<AttendanceRecord> {
        self.request(|reply| Command::Override {
            student_id,
            status,
            reply,
        })
        .await
    }

    /// Ends the session and waits until every classification is committed.
    ///
    /// Returns `PersistenceFailure` once retries reach the escalation
    /// threshold; the coordinator keeps retrying in the background.
    pub async fn end(&self) -> AttendanceResult<EndSummary> {
        self.request(|reply| Command::End { reply }).await
    }

    pub async fn status(&self) -> AttendanceResult<SessionView> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The coordinator task has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn same_channel(&self, other: &SessionHandle) -> bool {
        self.commands.same_channel(&other.commands)
    }

    /// Wires a character stream from a reader into this coordinator.
    ///
    /// Characters are assembled into tokens on terminators or after `quiet` of
    /// silence. The task ends when the character stream closes.
    pub fn spawn_reader(&self, chars: mpsc::Receiver<char>, quiet: Duration) -> JoinHandle<()> {
        let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
        let handle = self.clone();
        tokio::spawn(async move {
            let pump = tokio::spawn(pump_tokens(chars, token_tx, quiet));
            while let Some(token) = token_rx.recv().await {
                match handle.scan(token.clone()).await {
                    Ok(outcome) => tracing::debug!(course_id = handle.course_id, ?outcome, "reader scan"),
                    Err(AttendanceError::CoordinatorUnavailable) => break,
                    Err(e) if e.is_transient() => {
                        tracing::info!(course_id = handle.course_id, token = %token, "scan rejected: {}", e)
                    }
                    Err(e) => tracing::warn!(course_id = handle.course_id, token = %token, "scan failed: {}", e),
                }
            }
            pump.abort();
        })
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> AttendanceResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| AttendanceError::CoordinatorUnavailable)?;
        rx.await.map_err(|_| AttendanceError::CoordinatorUnavailable)?
    }
}
