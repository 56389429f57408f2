//! The scheduler itself: priority queue, dispatcher loop, lifecycle state
//! machine, and recurring-event bookkeeping.
//!
//! See the crate-level documentation for the overall contract. This module
//! follows the teacher-idiom convention of colocating each public type with
//! its `#[cfg(test)] mod tests` block rather than a separate test crate.

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::clock::{Clock, SystemClock, Time};
use crate::error::{SchedulerError, SchedulerResult};
use crate::event::{Action, Event, ScheduledEvent, SENTINEL_PRIORITY};
use crate::timer::{SystemTimerFactory, Timer, TimerFactory};

/// The scheduler's three-state lifecycle (§3 Data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
struct RecurringEntry {
    time: Time,
    priority: i64,
    serial: u64,
    interval: Time,
}

struct State {
    lifecycle: Lifecycle,
    queue: BinaryHeap<ScheduledEvent>,
    recurring: HashMap<u64, RecurringEntry>,
    next_serial: u64,
    next_id: u64,
    pending_timer: Option<Box<dyn Timer>>,
}

impl State {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Stopped,
            queue: BinaryHeap::new(),
            recurring: HashMap::new(),
            next_serial: 0,
            next_id: 0,
            pending_timer: None,
        }
    }

    fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }
}

/// Bookkeeping that lets [`crate::virtual_clock::VirtualClock`] detect that
/// the dispatcher is parked on the condition variable, without relying on
/// interpreter-private waiter-count introspection (see the design note in
/// this crate's design record).
pub(crate) struct ParkSignal {
    state: Mutex<ParkInfo>,
    cv: Condvar,
}

struct ParkInfo {
    parked: bool,
    /// Incremented every time the dispatcher transitions into `parked`.
    /// Lets a caller distinguish "still parked from before" from "parked
    /// again after doing a unit of work".
    generation: u64,
}

impl ParkSignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(ParkInfo { parked: false, generation: 0 }),
            cv: Condvar::new(),
        }
    }

    fn mark_parked(&self) {
        let mut info = self.state.lock().unwrap();
        info.parked = true;
        info.generation += 1;
        self.cv.notify_all();
    }

    fn mark_unparked(&self) {
        self.state.lock().unwrap().parked = false;
    }

    /// Current generation, for callers that need to observe a *later* park
    /// (as opposed to the dispatcher still being parked from before).
    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    /// Blocks (up to `timeout`) until the dispatcher is parked. Mirrors the
    /// reference fixture's `cv.wait_for(lambda: waiters, 1)`.
    pub(crate) fn wait_parked(&self, timeout: std::time::Duration) {
        let guard = self.state.lock().unwrap();
        let _ = self
            .cv
            .wait_timeout_while(guard, timeout, |info| !info.parked)
            .unwrap();
    }

    /// Blocks until the dispatcher parks at a generation strictly after
    /// `after`. Unbounded, mirroring the reference fixture's plain
    /// `cv.wait()` once a virtual timer has actually fired.
    pub(crate) fn wait_reparked_after(&self, after: u64) {
        let guard = self.state.lock().unwrap();
        let _ = self
            .cv
            .wait_while(guard, |info| !(info.parked && info.generation > after))
            .unwrap();
    }
}

pub(crate) struct Inner {
    state: Mutex<State>,
    cv: Condvar,
    pub(crate) park: ParkSignal,
    clock: Arc<dyn Clock>,
    timer_factory: Arc<dyn TimerFactory>,
    thread_name: String,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Inner {
    fn notify_dispatcher(&self) {
        self.cv.notify_all();
    }
}

/// An always-on, in-process event scheduler.
///
/// Cheaply cloneable: clones share the same dispatcher thread and queue.
/// Submitters and cancellers may call from any thread; exactly one
/// dispatcher thread executes actions, serially, per scheduler (§5).
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new("event-scheduler")
    }
}

impl Scheduler {
    /// Creates a scheduler backed by the real system clock and OS timers.
    /// The scheduler starts `STOPPED`; call [`Scheduler::start`] to launch
    /// the dispatcher thread.
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self::with_collaborators(thread_name, Arc::new(SystemClock), Arc::new(SystemTimerFactory))
    }

    /// Creates a scheduler with injected [`Clock`] and [`TimerFactory`]
    /// collaborators — the seam [`crate::virtual_clock::VirtualClock`] uses
    /// to make dispatch deterministic in tests.
    pub fn with_collaborators(
        thread_name: impl Into<String>,
        clock: Arc<dyn Clock>,
        timer_factory: Arc<dyn TimerFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                cv: Condvar::new(),
                park: ParkSignal::new(),
                clock,
                timer_factory,
                thread_name: thread_name.into(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// The scheduler's current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().unwrap().lifecycle
    }

    // -- start/stop ---------------------------------------------------

    /// Launches the dispatcher thread. Returns `0` on success, `-1` if the
    /// scheduler was not `STOPPED`.
    pub fn start(&self) -> i32 {
        status_code(self.try_start())
    }

    /// `Result`-returning counterpart of [`Scheduler::start`].
    pub fn try_start(&self) -> SchedulerResult<()> {
        {
            let mut guard = self.inner.state.lock().unwrap();
            if guard.lifecycle != Lifecycle::Stopped {
                return Err(SchedulerError::AlreadyRunning);
            }
            guard.lifecycle = Lifecycle::Running;
        }
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(self.inner.thread_name.clone())
            .spawn(move || dispatcher_loop(inner))
            .expect("failed to spawn dispatcher thread");
        *self.inner.worker.lock().unwrap() = Some(handle);
        tracing::info!(thread = %self.inner.thread_name, "scheduler started");
        Ok(())
    }

    /// Transitions `RUNNING` → `STOPPING` → `STOPPED`, draining the queue
    /// (or discarding it, if `hard_stop`) before the dispatcher exits.
    /// Blocks until the dispatcher thread has joined. Returns `0` on
    /// success, `-1` if the scheduler was not `RUNNING`.
    pub fn stop(&self, hard_stop: bool) -> i32 {
        status_code(self.try_stop(hard_stop))
    }

    /// `Result`-returning counterpart of [`Scheduler::stop`].
    pub fn try_stop(&self, hard_stop: bool) -> SchedulerResult<()> {
        {
            let mut guard = self.inner.state.lock().unwrap();
            if guard.lifecycle != Lifecycle::Running {
                return Err(SchedulerError::NotStarted);
            }
            guard.lifecycle = Lifecycle::Stopping;
            if hard_stop {
                clear_all_locked(&mut guard);
            }
            let now = self.inner.clock.now();
            let existing_max = guard.queue.peek().map(|e| e.time).unwrap_or(now);
            let sentinel_time = now.max(existing_max);
            let serial = guard.next_serial();
            guard.queue.push(ScheduledEvent::sentinel(sentinel_time, serial));
            self.inner.cv.notify_all();
        }
        // Yield so the dispatcher gets a chance to run before we block on
        // join (§4.1: "notifies the dispatcher, yields so it can run, then
        // joins the worker").
        thread::yield_now();
        let handle = self.inner.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.join().expect("dispatcher thread panicked");
        }
        self.inner.state.lock().unwrap().lifecycle = Lifecycle::Stopped;
        tracing::info!(hard_stop, "scheduler stopped");
        Ok(())
    }

    // -- submission -----------------------------------------------------

    /// Schedules a non-recurring `action` at absolute `time`, breaking ties
    /// at equal `time` by ascending `priority`. Returns a handle usable with
    /// [`Scheduler::cancel`], or `None` if the scheduler is not `RUNNING`.
    pub fn enterabs(
        &self,
        time: Time,
        priority: i64,
        action: impl FnMut() + Send + 'static,
    ) -> Option<Event> {
        self.try_enterabs(time, priority, action).ok()
    }

    /// `Result`-returning counterpart of [`Scheduler::enterabs`].
    pub fn try_enterabs(
        &self,
        time: Time,
        priority: i64,
        action: impl FnMut() + Send + 'static,
    ) -> SchedulerResult<Event> {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.lifecycle != Lifecycle::Running {
            return Err(SchedulerError::NotRunning);
        }
        let serial = guard.next_serial();
        let scheduled = ScheduledEvent {
            time,
            priority,
            serial,
            id: 0,
            action: Some(wrap_action(action)),
        };
        let handle = scheduled.handle();
        guard.queue.push(scheduled);
        drop(guard);
        self.inner.cv.notify_all();
        Ok(handle)
    }

    /// Equivalent to `enterabs(clock.now() + delay, ...)`. `delay` may be
    /// negative or zero, scheduling the action at or before `now`.
    pub fn enter(
        &self,
        delay: Time,
        priority: i64,
        action: impl FnMut() + Send + 'static,
    ) -> Option<Event> {
        let time = self.inner.clock.now() + delay;
        self.enterabs(time, priority, action)
    }

    /// Registers a recurring action, first firing at `clock.now() +
    /// interval` and subsequently at `previous_firing_time + interval`
    /// (drift-free: anchored on the prior *scheduled* time, never on
    /// execution latency). Returns the recurring id, usable with
    /// [`Scheduler::cancel_recurring`], or `None` if not `RUNNING`.
    ///
    /// `interval` must be `> 0`; this is enforced (unlike the scheduler this
    /// crate's contract is modeled on, where it is merely undefined
    /// behavior) because rejecting it costs nothing and a non-positive
    /// interval would otherwise busy-loop the dispatcher.
    pub fn enter_recurring(
        &self,
        interval: Time,
        priority: i64,
        action: impl FnMut() + Send + 'static,
    ) -> Option<u64> {
        self.try_enter_recurring(interval, priority, action).ok()
    }

    /// `Result`-returning counterpart of [`Scheduler::enter_recurring`].
    pub fn try_enter_recurring(
        &self,
        interval: Time,
        priority: i64,
        action: impl FnMut() + Send + 'static,
    ) -> SchedulerResult<u64> {
        if !(interval > 0.0) {
            return Err(SchedulerError::InvalidInterval(interval));
        }
        let mut guard = self.inner.state.lock().unwrap();
        if guard.lifecycle != Lifecycle::Running {
            return Err(SchedulerError::NotRunning);
        }
        guard.next_id += 1;
        let id = guard.next_id;
        let time = self.inner.clock.now() + interval;
        let serial = guard.next_serial();
        guard
            .recurring
            .insert(id, RecurringEntry { time, priority, serial, interval });
        guard.queue.push(ScheduledEvent {
            time,
            priority,
            serial,
            id,
            action: Some(wrap_action(action)),
        });
        drop(guard);
        self.inner.cv.notify_all();
        Ok(id)
    }

    // -- cancellation -----------------------------------------------------

    /// Removes the queued occurrence corresponding to `event`, if still
    /// present. A no-op (not an error) if it already fired or was already
    /// cancelled — only "scheduler not running" is reported as a failure.
    pub fn cancel(&self, event: Event) -> i32 {
        status_code(self.try_cancel(event))
    }

    /// `Result`-returning counterpart of [`Scheduler::cancel`].
    pub fn try_cancel(&self, event: Event) -> SchedulerResult<()> {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.lifecycle != Lifecycle::Running {
            return Err(SchedulerError::NotRunning);
        }
        guard.queue.retain(|e| e.serial != event.serial);
        drop(guard);
        self.inner.cv.notify_all();
        Ok(())
    }

    /// Removes a recurring registration and its currently queued occurrence.
    /// Returns `0` on success, `-1` if `id` is unknown or the scheduler is
    /// not `RUNNING`.
    pub fn cancel_recurring(&self, id: u64) -> i32 {
        status_code(self.try_cancel_recurring(id))
    }

    /// `Result`-returning counterpart of [`Scheduler::cancel_recurring`].
    pub fn try_cancel_recurring(&self, id: u64) -> SchedulerResult<()> {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.lifecycle != Lifecycle::Running {
            return Err(SchedulerError::NotRunning);
        }
        if guard.recurring.remove(&id).is_none() {
            return Err(SchedulerError::RecurringNotFound(id));
        }
        guard.queue.retain(|e| e.id != id);
        drop(guard);
        self.inner.cv.notify_all();
        Ok(())
    }

    /// Clears the queue and the recurring registry, and cancels the pending
    /// sleep timer if one is armed. Returns `0` on success, `-1` if not
    /// `RUNNING`.
    pub fn cancel_all(&self) -> i32 {
        status_code(self.try_cancel_all())
    }

    /// `Result`-returning counterpart of [`Scheduler::cancel_all`].
    pub fn try_cancel_all(&self) -> SchedulerResult<()> {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.lifecycle != Lifecycle::Running {
            return Err(SchedulerError::NotRunning);
        }
        clear_all_locked(&mut guard);
        drop(guard);
        self.inner.cv.notify_all();
        Ok(())
    }

    /// A snapshot of upcoming events in the order the dispatcher would pop
    /// them, or `None` if the scheduler is not `RUNNING`.
    pub fn queue_snapshot(&self) -> Option<Vec<Event>> {
        let guard = self.inner.state.lock().unwrap();
        if guard.lifecycle != Lifecycle::Running {
            return None;
        }
        let mut events: Vec<Event> = guard.queue.iter().map(|e| e.handle()).collect();
        drop(guard);
        events.sort();
        Some(events)
    }

    /// Exposes this scheduler's internal synchronization handle to
    /// [`crate::virtual_clock::VirtualClock`]. Not part of the public
    /// operation contract (§4.1) — a test-only binding seam (§4.4).
    pub(crate) fn binding(&self) -> Arc<Inner> {
        Arc::clone(&self.inner)
    }
}

fn wrap_action(action: impl FnMut() + Send + 'static) -> Action {
    Arc::new(Mutex::new(Box::new(action) as Box<dyn FnMut() + Send + 'static>))
}

fn status_code(result: SchedulerResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

fn clear_all_locked(state: &mut State) {
    state.queue.clear();
    state.recurring.clear();
    if let Some(mut timer) = state.pending_timer.take() {
        timer.cancel();
    }
}

/// Reschedules a just-popped recurring event, anchored on its *previous
/// scheduled* time (not `now`), per §4.2 step 6. Runs before the action is
/// invoked, so a recurring action that cancels its own id or calls
/// `cancel_all` observes — and can undo — the freshly pushed next
/// occurrence (§4.2 "reschedule first, then invoke").
fn reschedule_recurring_locked(state: &mut State, popped: &ScheduledEvent) {
    if state.lifecycle != Lifecycle::Running {
        return;
    }
    let Some(entry) = state.recurring.get(&popped.id).cloned() else {
        return;
    };
    let new_time = popped.time + entry.interval;
    let new_serial = state.next_serial();
    state.recurring.insert(
        popped.id,
        RecurringEntry {
            time: new_time,
            priority: popped.priority,
            serial: new_serial,
            interval: entry.interval,
        },
    );
    if let Some(action) = popped.action.clone() {
        state.queue.push(ScheduledEvent {
            time: new_time,
            priority: popped.priority,
            serial: new_serial,
            id: popped.id,
            action: Some(action),
        });
    }
}

/// The dispatcher loop (§4.2). Runs on its own thread for the scheduler's
/// entire `RUNNING`/`STOPPING` lifetime, from `start()` until it pops the
/// sentinel terminator enqueued by `stop()`.
fn dispatcher_loop(inner: Arc<Inner>) {
    loop {
        let mut guard = inner.state.lock().unwrap();

        // Step 1: wait if there's nothing to do, or we're already sleeping
        // toward a future deadline.
        if guard.queue.is_empty() || guard.pending_timer.is_some() {
            inner.park.mark_parked();
            guard = inner.cv.wait(guard).unwrap();
            inner.park.mark_unparked();
        }

        // Step 2: a pending sleep timer served its purpose (or we were
        // woken for an unrelated reason) — clear it either way.
        if let Some(mut timer) = guard.pending_timer.take() {
            timer.cancel();
        }

        // Step 3: spurious wakeup with nothing queued.
        if guard.queue.is_empty() {
            continue;
        }

        // Step 4: the sentinel always sorts last, so seeing it at the head
        // means every real event has already been processed.
        let head_priority = guard.queue.peek().expect("checked non-empty").priority;
        if head_priority == SENTINEL_PRIORITY {
            guard.queue.pop();
            inner.cv.notify_all();
            tracing::debug!("dispatcher drained queue, exiting");
            break;
        }

        // Step 5: not due yet — arm a timer for the remaining delay and go
        // back to sleep rather than busy-waiting.
        let now = inner.clock.now();
        let head_time = guard.queue.peek().expect("checked non-empty").time;
        if head_time > now {
            let delay = head_time - now;
            let callback_inner = Arc::clone(&inner);
            let mut timer = inner
                .timer_factory
                .make_timer(delay, Box::new(move || callback_inner.notify_dispatcher()));
            timer.start();
            guard.pending_timer = Some(timer);
            inner.cv.notify_all();
            continue;
        }

        // Step 6: due now. Pop, reschedule if recurring, then release the
        // lock before invoking the action.
        let mut scheduled = guard.queue.pop().expect("checked non-empty");
        if scheduled.id != 0 {
            reschedule_recurring_locked(&mut guard, &scheduled);
        }
        drop(guard);

        // Step 7: invoke, unlocked, so a reentrant `enter`/`cancel` from
        // inside the action does not deadlock against this same thread.
        if let Some(action) = scheduled.action.take() {
            // `lock().unwrap()` would poison this `Mutex` forever on the very
            // first panic: for a recurring event the same `Action` Arc is
            // cloned into every rescheduled occurrence
            // (`reschedule_recurring_locked`), so every later firing would
            // re-panic on the poisoned lock before the action body ever ran
            // again. Recover the guard instead: a panicking action should
            // cost this one occurrence, not all future ones.
            let invoked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut guard = action.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                (guard)();
            }));
            if invoked.is_err() {
                tracing::warn!("scheduled action panicked; dispatcher continues");
            }
        }
        inner.cv.notify_all();
    }
}
