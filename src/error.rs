//! Crate-level error types.
//!
//! The public operation contracts in [`crate::scheduler`] return status codes
//! or `Option` handles (per the scheduler's specified surface), but every
//! failure mode is also reachable as a typed [`SchedulerError`] through the
//! `try_*` counterparts for callers that prefer `Result`-based flow.

use thiserror::Error;

/// All errors [`crate::Scheduler`] operations can report.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SchedulerError {
    /// A submission or cancellation was attempted while the scheduler was not
    /// in the `RUNNING` state.
    #[error("scheduler is not running")]
    NotRunning,

    /// `start()` was called while the scheduler was not `STOPPED`.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// `stop()` was called while the scheduler was not `RUNNING`.
    #[error("scheduler is not running")]
    NotStarted,

    /// `cancel_recurring` referenced an id that is not (or no longer)
    /// registered.
    #[error("no recurring event registered with id {0}")]
    RecurringNotFound(u64),

    /// `enter_recurring` was called with a non-positive interval.
    #[error("recurring interval must be > 0, got {0}")]
    InvalidInterval(f64),
}

/// A convenience alias for results produced by the `try_*` operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
