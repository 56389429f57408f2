//! A manually-advanced clock and timer fixture for deterministic tests.
//!
//! Mirrors the reference test fixture's `TestTimer`/`TestGlobalClock`: time
//! only moves when [`VirtualClock::advance_time`] is called, and virtual
//! timers "fire" by having their deadlines compared against the current
//! virtual time rather than sleeping on a real thread.
//!
//! The original fixture detects that the dispatcher is parked on its
//! condition variable by reaching into `threading.Condition`'s private
//! `_waiters` deque. Rust exposes no such introspection, so this fixture
//! uses an explicit [`crate::scheduler::ParkSignal`] that the dispatcher
//! updates immediately before and after it blocks.

use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, Time};
use crate::scheduler::Scheduler;
use crate::timer::{Timer, TimerCallback, TimerFactory};

struct PendingTimer {
    deadline: Time,
    serial: u64,
    callback: Mutex<Option<TimerCallback>>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl PartialEq for PendingTimer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.serial == other.serial
    }
}
impl Eq for PendingTimer {}
impl PartialOrd for PendingTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .partial_cmp(&self.deadline)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.serial.cmp(&self.serial))
    }
}

struct Shared {
    now: Time,
    next_serial: u64,
    pending: BinaryHeap<PendingTimer>,
}

/// A virtual clock and timer source, for tests that need to assert ordering
/// and drift-free rescheduling without sleeping in real time.
///
/// Create one, bind it to a fresh [`Scheduler`] with
/// [`VirtualClock::new_scheduler`], then drive execution with
/// [`VirtualClock::advance_time`].
pub struct VirtualClock {
    shared: Arc<Mutex<Shared>>,
}

impl VirtualClock {
    /// Creates a virtual clock starting at time `0`.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                now: 0.0,
                next_serial: 0,
                pending: BinaryHeap::new(),
            })),
        }
    }

    /// The virtual clock's current reading.
    pub fn monotonic(&self) -> Time {
        self.shared.lock().unwrap().now
    }

    /// Resets the clock to time `0` and discards any pending virtual timers.
    /// Intended for reuse between test cases.
    pub fn reset(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.now = 0.0;
        shared.next_serial = 0;
        shared.pending.clear();
    }

    /// Builds a [`Scheduler`] backed by this clock and this clock's timer
    /// factory. The returned scheduler's dispatcher thread parks on a real
    /// condition variable, same as [`Scheduler::new`]'s — only the *notion*
    /// of time is virtual.
    pub fn new_scheduler(&self, thread_name: impl Into<String>) -> Scheduler {
        Scheduler::with_collaborators(
            thread_name,
            Arc::new(self.as_clock()),
            Arc::new(self.as_timer_factory()),
        )
    }

    fn as_clock(&self) -> ClockHandle {
        ClockHandle { shared: Arc::clone(&self.shared) }
    }

    fn as_timer_factory(&self) -> TimerFactoryHandle {
        TimerFactoryHandle { shared: Arc::clone(&self.shared) }
    }

    /// Advances virtual time by `delta` seconds and fires every virtual
    /// timer whose deadline is now due, in deadline order.
    ///
    /// Optionally synchronizes with a scheduler's dispatcher thread via
    /// `bound_to`: waits for the dispatcher to be parked before advancing
    /// (so a timer armed by a just-processed event is guaranteed visible),
    /// and waits for it to re-park afterward (so the caller observes the
    /// effects of every timer this call fired before returning). This
    /// mirrors the reference fixture's `_wait_for_scheduler` protocol, with
    /// the `_waiters` introspection replaced by [`crate::scheduler::ParkSignal`].
    pub fn advance_time(&self, delta: Time, bound_to: Option<&Scheduler>) {
        assert!(delta >= 0.0, "VirtualClock::advance_time: delta must be >= 0, got {delta}");
        let generation_before = if let Some(scheduler) = bound_to {
            let inner = scheduler.binding();
            inner.park.wait_parked(Duration::from_secs(1));
            Some(inner.park.generation())
        } else {
            None
        };

        let due: Vec<(Arc<std::sync::atomic::AtomicBool>, TimerCallback)> = {
            let mut shared = self.shared.lock().unwrap();
            shared.now += delta;
            let now = shared.now;
            let mut due = Vec::new();
            while let Some(top) = shared.pending.peek() {
                if top.deadline > now {
                    break;
                }
                let pending = shared.pending.pop().unwrap();
                if pending.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                    continue;
                }
                if let Some(callback) = pending.callback.lock().unwrap().take() {
                    due.push((pending.cancelled, callback));
                }
            }
            due
        };

        let fired_any = !due.is_empty();
        for (cancelled, callback) in due {
            if !cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                callback();
            }
        }

        if let (Some(scheduler), Some(generation_before)) = (bound_to, generation_before) {
            if fired_any {
                scheduler.binding().park.wait_reparked_after(generation_before);
            }
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct ClockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl Clock for ClockHandle {
    fn now(&self) -> Time {
        self.shared.lock().unwrap().now
    }
}

#[derive(Clone)]
struct TimerFactoryHandle {
    shared: Arc<Mutex<Shared>>,
}

impl TimerFactory for TimerFactoryHandle {
    fn make_timer(&self, delay: Time, callback: TimerCallback) -> Box<dyn Timer> {
        Box::new(VirtualTimer {
            shared: Arc::clone(&self.shared),
            delay,
            callback: Some(callback),
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }
}

/// A [`Timer`] whose deadline is measured against a [`VirtualClock`] instead
/// of real wall-clock time. Only fires when [`VirtualClock::advance_time`]
/// is called with a sufficient `delta`.
struct VirtualTimer {
    shared: Arc<Mutex<Shared>>,
    delay: Time,
    callback: Option<TimerCallback>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl Timer for VirtualTimer {
    fn start(&mut self) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        let mut shared = self.shared.lock().unwrap();
        let deadline = shared.now + self.delay.max(0.0);
        let serial = shared.next_serial;
        shared.next_serial += 1;
        shared.pending.push(PendingTimer {
            deadline,
            serial,
            callback: Mutex::new(Some(callback)),
            cancelled: Arc::clone(&self.cancelled),
        });
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    #[test]
    #[should_panic(expected = "delta must be >= 0")]
    fn advance_time_rejects_negative_delta() {
        let clock = VirtualClock::new();
        clock.advance_time(-1.0, None);
    }

    #[test]
    fn virtual_clock_starts_at_zero_and_advances() {
        let clock = VirtualClock::new();
        assert_eq!(clock.monotonic(), 0.0);
        clock.advance_time(3.8, None);
        assert_eq!(clock.monotonic(), 3.8);
    }

    #[test]
    fn virtual_timer_fires_only_once_delta_covers_delay() {
        let clock = VirtualClock::new();
        let factory = clock.as_timer_factory();
        let (tx, rx) = mpsc::channel();
        let mut timer = factory.make_timer(5.0, Box::new(move || tx.send(()).unwrap()));
        timer.start();
        clock.advance_time(2.0, None);
        assert!(rx.try_recv().is_err());
        clock.advance_time(3.0, None);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn cancelled_virtual_timer_does_not_fire() {
        let clock = VirtualClock::new();
        let factory = clock.as_timer_factory();
        let (tx, rx) = mpsc::channel::<()>();
        let mut timer = factory.make_timer(1.0, Box::new(move || tx.send(()).unwrap()));
        timer.start();
        timer.cancel();
        clock.advance_time(5.0, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn bound_scheduler_executes_deterministically_across_advances() {
        let clock = VirtualClock::new();
        let scheduler = clock.new_scheduler("virtual-test");
        scheduler.start();

        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        scheduler.enter(10.0, 1, move || tx2.send("ten").unwrap());
        let tx1 = tx.clone();
        scheduler.enter(3.0, 1, move || tx1.send("three").unwrap());

        clock.advance_time(3.0, Some(&scheduler));
        assert_eq!(rx.recv_timeout(StdDuration::from_secs(1)).unwrap(), "three");
        assert!(rx.try_recv().is_err());

        clock.advance_time(7.0, Some(&scheduler));
        assert_eq!(rx.recv_timeout(StdDuration::from_secs(1)).unwrap(), "ten");

        scheduler.stop(false);
    }

    #[test]
    fn recurring_event_reschedules_drift_free_on_virtual_time() {
        let clock = VirtualClock::new();
        let scheduler = clock.new_scheduler("virtual-recurring-test");
        scheduler.start();

        let (tx, rx) = mpsc::channel();
        scheduler.enter_recurring(2.0, 0, move || tx.send(()).unwrap());

        clock.advance_time(2.0, Some(&scheduler));
        rx.recv_timeout(StdDuration::from_secs(1)).expect("first tick");
        clock.advance_time(2.0, Some(&scheduler));
        rx.recv_timeout(StdDuration::from_secs(1)).expect("second tick");

        scheduler.stop(true);
    }
}
