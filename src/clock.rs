//! Session Clock and Tick Scheduling
//!
//! Time in a recording session is a monotonic `Duration` since session
//! start, supplied by a [`Clock`]. The production [`SystemClock`] wraps a
//! monotonic instant; [`ManualClock`] is a hand-advanced clock that makes
//! scheduler and session behavior fully deterministic in tests, where its
//! `sleep` advances time instead of blocking.
//!
//! [`TickScheduler`] paces the control loop at a fixed rate. Deadlines
//! form a fixed ladder spaced one period apart, so small sleep jitter
//! does not drift the long-run rate. A tick whose work runs past its
//! successor's deadline is an overrun: it is logged and counted, the
//! ladder re-anchors at the current time, and the loop carries on. Ticks
//! are never skipped to catch up.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source for a session
pub trait Clock: Send + Sync {
    /// Time since session start
    fn now(&self) -> Duration;

    /// Block until `duration` has passed
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time relative to construction
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Hand-advanced clock for deterministic tests
///
/// `sleep` advances the clock instead of blocking, so a loop paced by a
/// [`TickScheduler`] runs to completion instantly with exact timestamps.
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration;
    }

    /// Jump to an absolute session time
    pub fn set(&self, at: Duration) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// One control-loop tick as handed out by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Tick number within the session, starting at 0
    pub index: u64,
    /// Session time when the tick actually started
    pub at: Duration,
    /// How far past the deadline the previous tick's work ran
    pub late_by: Option<Duration>,
}

/// Fixed-rate pacing for the control loop
pub struct TickScheduler {
    clock: Arc<dyn Clock>,
    period: Duration,
    /// Deadline of the next tick; `None` until the first `wait`
    next_deadline: Option<Duration>,
    next_index: u64,
    overruns: u64,
    total_lateness: Duration,
}

impl TickScheduler {
    pub fn new(clock: Arc<dyn Clock>, period: Duration) -> Self {
        Self {
            clock,
            period,
            next_deadline: None,
            next_index: 0,
            overruns: 0,
            total_lateness: Duration::ZERO,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks handed out so far
    pub fn ticks(&self) -> u64 {
        self.next_index
    }

    /// Ticks whose predecessor ran past the deadline
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Accumulated lateness across all overruns
    pub fn total_lateness(&self) -> Duration {
        self.total_lateness
    }

    /// Block until the next tick is due and return it
    ///
    /// The first call returns immediately and anchors the deadline
    /// ladder. Later calls sleep out the remainder of the period, or
    /// record an overrun when the caller's work already consumed it.
    pub fn wait(&mut self) -> Tick {
        let now = self.clock.now();

        let (at, late_by) = match self.next_deadline {
            None => (now, None),
            Some(deadline) => {
                if now < deadline {
                    self.clock.sleep(deadline - now);
                    (self.clock.now().max(deadline), None)
                } else if now == deadline {
                    (now, None)
                } else {
                    let lateness = now - deadline;
                    self.overruns += 1;
                    self.total_lateness += lateness;
                    tracing::warn!(
                        "Tick {} overran its deadline by {:.1}ms",
                        self.next_index,
                        lateness.as_secs_f64() * 1000.0
                    );
                    (now, Some(lateness))
                }
            }
        };

        // On-time ticks keep the fixed ladder; overruns re-anchor it so
        // the loop does not burst to catch up
        self.next_deadline = match late_by {
            None => Some(self.next_deadline.unwrap_or(at) + self.period),
            Some(_) => Some(at + self.period),
        };

        let tick = Tick {
            index: self.next_index,
            at,
            late_by,
        };
        self.next_index += 1;
        tick
    }
}
