//! RFID attendance session coordinator.
//!
//! A reader delivers raw tokens; each course's [`coordinator`] resolves them
//! against the roster, classifies the student as present or late, and commits
//! classifications in debounced batches. The session clock survives restarts
//! through a small snapshot in the [`store`].

pub mod api;
pub mod classify;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod registry;
pub mod roster;
pub mod scan;
pub mod store;
pub mod types;

pub use coordinator::{CoordinatorConfig, SessionDeps, SessionEvent, SessionHandle};
pub use error::{AttendanceError, AttendanceResult, PersistenceError};
pub use registry::SessionRegistry;
