//! An always-on, in-process event scheduler.
//!
//! A [`Scheduler`] runs a single background dispatcher thread that executes
//! caller-submitted actions in `(time, priority)` order — at most one action
//! runs at a time, and actions may themselves submit or cancel other events
//! without deadlocking. Non-recurring events run once; recurring events
//! reschedule themselves drift-free, anchored on their previous scheduled
//! time rather than on when they happened to execute.
//!
//! ```
//! use event_scheduler::Scheduler;
//!
//! let scheduler = Scheduler::new("demo");
//! scheduler.start();
//! scheduler.enter(0.0, 0, || println!("ran"));
//! scheduler.stop(false);
//! ```
//!
//! For deterministic tests, [`VirtualClock`] replaces the real clock and OS
//! timers with a manually-advanced fixture.

mod clock;
mod error;
mod event;
mod scheduler;
mod timer;
mod virtual_clock;

pub use clock::{Clock, SystemClock, Time};
pub use error::{SchedulerError, SchedulerResult};
pub use event::Event;
pub use scheduler::{Lifecycle, Scheduler};
pub use timer::{SystemTimer, SystemTimerFactory, Timer, TimerCallback, TimerFactory};
pub use virtual_clock::VirtualClock;
