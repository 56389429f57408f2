//! One-shot delayed-callback primitive.
//!
//! The dispatcher never sleeps while holding the scheduler lock: it arms a
//! [`Timer`] for the delay until the head-of-queue deadline and waits on the
//! condition variable instead. The real implementation ([`SystemTimer`])
//! sleeps on its own background thread; [`crate::virtual_clock::VirtualClock`]
//! substitutes a fixture that is driven manually for deterministic tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::clock::Time;

/// A callback bound for exactly one future invocation.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// A started one-shot timer.
///
/// `start()` must eventually invoke the callback exactly once unless
/// [`Timer::cancel`] is called first. Cancelling after the callback has
/// already fired is a harmless no-op.
pub trait Timer: Send {
    /// Arms the timer. Implementations may choose to arm eagerly at
    /// construction time; `start` exists for symmetry with [`Timer::cancel`]
    /// and implementations that prefer to defer spawning until here.
    fn start(&mut self);

    /// Prevents the callback from firing, if it has not fired already.
    fn cancel(&mut self);
}

/// Constructs [`Timer`] instances. Injected into [`crate::Scheduler`] so
/// tests can swap in [`crate::virtual_clock::VirtualClock`]'s timer factory.
pub trait TimerFactory: Send + Sync {
    /// Builds (but does not necessarily start) a timer that will invoke
    /// `callback` after `delay` has elapsed, measured against this factory's
    /// associated clock.
    fn make_timer(&self, delay: Time, callback: TimerCallback) -> Box<dyn Timer>;
}

/// The default [`TimerFactory`], backed by a detached OS thread per timer —
/// mirroring `threading.Timer` in the system this crate's contract is
/// modeled on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimerFactory;

impl TimerFactory for SystemTimerFactory {
    fn make_timer(&self, delay: Time, callback: TimerCallback) -> Box<dyn Timer> {
        Box::new(SystemTimer::new(delay, callback))
    }
}

/// A [`Timer`] that sleeps on a dedicated background thread.
///
/// Cancellation is best-effort: the sleeping thread cannot be woken early,
/// so `cancel()` only suppresses the callback if it has not fired yet. This
/// matches `threading.Timer.cancel()` semantics exactly.
pub struct SystemTimer {
    delay: Duration,
    callback: Option<TimerCallback>,
    cancelled: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SystemTimer {
    fn new(delay: Time, callback: TimerCallback) -> Self {
        Self {
            delay: Duration::from_secs_f64(delay.max(0.0)),
            callback: Some(callback),
            cancelled: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Timer for SystemTimer {
    fn start(&mut self) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        let delay = self.delay;
        let cancelled = Arc::clone(&self.cancelled);
        self.handle = Some(
            thread::Builder::new()
                .name("event-scheduler-timer".into())
                .spawn(move || {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    if !cancelled.load(Ordering::SeqCst) {
                        callback();
                    }
                })
                .expect("failed to spawn timer thread"),
        );
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let (tx, rx) = mpsc::channel();
        let mut timer = SystemTimerFactory.make_timer(0.02, Box::new(move || tx.send(()).unwrap()));
        timer.start();
        rx.recv_timeout(Duration::from_secs(1))
            .expect("timer did not fire");
    }

    #[test]
    fn cancel_before_fire_suppresses_callback() {
        let (tx, rx) = mpsc::channel::<()>();
        let mut timer = SystemTimerFactory.make_timer(0.2, Box::new(move || tx.send(()).unwrap()));
        timer.start();
        timer.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }

    #[test]
    fn zero_delay_fires_promptly() {
        let (tx, rx) = mpsc::channel();
        let mut timer = SystemTimerFactory.make_timer(0.0, Box::new(move || tx.send(()).unwrap()));
        timer.start();
        rx.recv_timeout(Duration::from_millis(200))
            .expect("zero-delay timer did not fire");
    }
}
