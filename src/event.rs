//! The scheduling record and its ordering.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use crate::clock::Time;

/// An action bound with whatever arguments the caller closed over.
///
/// Rust closures already carry their bound positional/keyword state, so
/// unlike the scheduler this crate's contract is modeled on, there is no
/// separate `arguments`/`kwargs` parameter in the public API — `enter`,
/// `enterabs`, and `enter_recurring` simply take `impl FnMut() + Send`.
///
/// Wrapped in an `Arc` (rather than owned outright by one [`ScheduledEvent`])
/// because a recurring event's action must survive being moved from the
/// popped occurrence into the freshly rescheduled one — see
/// `reschedule_recurring_locked` in [`crate::scheduler`].
pub(crate) type Action = Arc<Mutex<Box<dyn FnMut() + Send + 'static>>>;

/// Priority reserved for the sentinel terminator enqueued by `stop()`.
///
/// Guaranteed to sort after every caller-submitted event at the same time,
/// per §3 Invariant 1 and §4.2 step 4 of this scheduler's contract.
pub const SENTINEL_PRIORITY: i64 = i64::MAX;

/// A handle returned by a submission operation, usable with
/// [`crate::Scheduler::cancel`] to remove the corresponding queued event.
///
/// Equality and ordering are defined on `(time, priority)` only, matching
/// the scheduling key — two events submitted for the same instant at the
/// same priority compare equal. Cancellation, however, targets the exact
/// submission via a private serial number so that two such same-key events
/// can still be told apart (see the removal-by-identity design note in this
/// crate's design record).
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub time: Time,
    pub priority: i64,
    pub(crate) serial: u64,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.priority == other.priority
    }
}
impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .partial_cmp(&other.time)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.priority.cmp(&other.priority))
    }
}

/// The internal heap element: an [`Event`]'s scheduling key plus its action,
/// recurring id, and internal serial.
///
/// `action` is `None` exactly for the sentinel terminator (§3 Invariant 1).
pub(crate) struct ScheduledEvent {
    pub time: Time,
    pub priority: i64,
    pub serial: u64,
    /// 0 denotes a non-recurring event; nonzero is a recurring event's id.
    pub id: u64,
    pub action: Option<Action>,
}

impl ScheduledEvent {
    pub fn sentinel(time: Time, serial: u64) -> Self {
        Self {
            time,
            priority: SENTINEL_PRIORITY,
            serial,
            id: 0,
            action: None,
        }
    }

    pub fn handle(&self) -> Event {
        Event {
            time: self.time,
            priority: self.priority,
            serial: self.serial,
        }
    }
}

// `action`, `id`, and `serial` are deliberately excluded from ordering and
// equality (§3: "action, arguments, and id are NOT part of ordering").
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.priority == other.priority
    }
}
impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    // Reversed so that `BinaryHeap` (a max-heap) pops the smallest
    // `(time, priority)` first — i.e. this type's "greatest" element is the
    // one due soonest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .partial_cmp(&self.time)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.priority.cmp(&self.priority))
    }
}
