//! Timing helpers for the worker threads: a cooperative stop signal that
//! wakes sleepers immediately, and a fixed-rate tick schedule.

use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

/// Nominal rate of the waveform and VU ticks.
pub const TICK_HZ: u32 = 60;

/// Stop flag paired with a wake-up signal.
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every thread blocked in
    /// [`StopSignal::wait_timeout`].
    pub fn raise(&self) {
        *self.flag() = true;
        self.wake.notify_all();
    }

    /// Returns `true` once [`StopSignal::raise`] was called.
    pub fn is_raised(&self) -> bool {
        *self.flag()
    }

    /// Sleeps up to `timeout`, returning early once the signal is raised.
    /// Returns `true` if the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.flag();
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            raised = match self.wake.wait_timeout(raised, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *raised
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        // A bool cannot be left half-written.
        match self.raised.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Fixed-rate schedule that does not drift with the time spent per tick.
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    next: Instant,
}

impl Cadence {
    /// Schedules the first tick one `interval` from now.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    /// Returns a cadence ticking `hz` times per second.
    pub fn from_hz(hz: u32) -> Self {
        Self::new(Duration::from_secs(1) / hz.max(1))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time left until the next tick is due.
    pub fn remaining(&self) -> Duration {
        self.next.saturating_duration_since(Instant::now())
    }

    /// Moves to the following deadline. A schedule that fell more than one
    /// interval behind restarts from now instead of bursting.
    pub fn advance(&mut self) {
        self.next += self.interval;
        let now = Instant::now();
        if self.next + self.interval < now {
            self.next = now + self.interval;
        }
    }
}
