//! Per-course session coordinator.
//!
//! Each course gets one actor task that owns the session, the in-memory
//! classifications and the pending commit queue. Callers talk to it through a
//! [`SessionHandle`].

mod actor;
pub mod events;
mod handle;

use std::sync::Arc;

use tokio::time::Duration;
use util::config::AppConfig;

use crate::gateway::PersistenceGateway;
use crate::queue::QueueConfig;
use crate::roster::RosterProvider;
use crate::store::SessionStateStore;
use crate::types::SessionConfig;

pub use actor::SessionCoordinator;
pub use events::{EndReason, EndSummary, ScanOutcome, SessionEvent, SessionView, StatusCounts};
pub use handle::SessionHandle;

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub queue: QueueConfig,
    pub cooldown_max_hold: Duration,
    /// Upper bound on a single gateway commit before it counts as failed.
    pub commit_timeout: Duration,
    pub default_grace_minutes: u32,
    /// Used when a stored snapshot predates the hard timeout field.
    pub default_hard_timeout_minutes: u32,
    pub command_buffer: usize,
    pub scan_quiet_period: Duration,
    /// How long a coordinator with no live session and nothing to commit
    /// waits for a command before its task exits.
    pub idle_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            cooldown_max_hold: Duration::from_secs(30),
            commit_timeout: Duration::from_secs(30),
            default_grace_minutes: 5,
            default_hard_timeout_minutes: 30,
            command_buffer: 64,
            scan_quiet_period: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            queue: QueueConfig {
                batch_window: Duration::from_millis(cfg.batch_window_ms),
                retry_base: Duration::from_millis(cfg.retry_base_ms),
                retry_max: Duration::from_millis(cfg.retry_max_ms),
                retry_max_attempts: cfg.retry_max_attempts.max(1),
            },
            cooldown_max_hold: Duration::from_secs(cfg.cooldown_max_hold_secs),
            default_grace_minutes: cfg.grace_minutes,
            default_hard_timeout_minutes: cfg.hard_timeout_minutes,
            scan_quiet_period: Duration::from_millis(cfg.scan_quiet_ms),
            ..Self::default()
        }
    }
}

impl CoordinatorConfig {
    /// Session parameters for `date`, falling back to the configured defaults.
    pub fn session_config(
        &self,
        date: chrono::NaiveDate,
        grace_minutes: Option<u32>,
        hard_timeout_minutes: Option<u32>,
    ) -> SessionConfig {
        SessionConfig {
            date,
            grace_minutes: grace_minutes.unwrap_or(self.default_grace_minutes),
            hard_timeout_minutes: hard_timeout_minutes.unwrap_or(self.default_hard_timeout_minutes),
        }
    }
}

/// External collaborators shared by every coordinator.
#[derive(Clone)]
pub struct SessionDeps {
    pub gateway: Arc<dyn PersistenceGateway>,
    pub roster: Arc<dyn RosterProvider>,
    pub store: Arc<dyn SessionStateStore>,
}
