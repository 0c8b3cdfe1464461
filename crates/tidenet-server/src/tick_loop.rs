//! Fixed-rate server loop.
//!
//! Unlike a client frame loop there is nothing to interpolate: the server
//! runs one tick, then sleeps whatever is left of the interval. A tick that
//! overruns is logged; falling further behind than [`MAX_LAG`] drops the
//! missed ticks rather than running them back to back.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

/// Lag after which the schedule is reset instead of caught up.
pub const MAX_LAG: Duration = Duration::from_millis(250);

/// Fixed-rate tick scheduler.
pub struct TickLoop {
    interval: Duration,
    next_tick: Instant,
    tick_count: u64,
    overruns: u64,
}

impl TickLoop {
    /// Creates a loop running at `tick_rate` Hz (minimum 1).
    pub fn new(tick_rate: u32) -> Self {
        Self::starting_at(tick_rate, Instant::now())
    }

    fn starting_at(tick_rate: u32, start: Instant) -> Self {
        Self {
            interval: Self::interval_for(tick_rate),
            next_tick: start,
            tick_count: 0,
            overruns: 0,
        }
    }

    fn interval_for(tick_rate: u32) -> Duration {
        Duration::from_secs(1) / tick_rate.max(1)
    }

    /// Time between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the rate. Takes effect from the next tick.
    pub fn set_tick_rate(&mut self, tick_rate: u32) {
        self.interval = Self::interval_for(tick_rate);
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Ticks that finished after their successor was due.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Run `tick_fn` at the fixed rate until it returns `Break`.
    pub fn run<B>(&mut self, mut tick_fn: impl FnMut(&mut Self) -> ControlFlow<B>) -> B {
        loop {
            if let ControlFlow::Break(value) = tick_fn(self) {
                return value;
            }
            let sleep = self.advance(Instant::now());
            if !sleep.is_zero() {
                std::thread::sleep(sleep);
            }
        }
    }

    /// Record a finished tick at `now` and return how long to sleep before
    /// the next one.
    fn advance(&mut self, now: Instant) -> Duration {
        self.tick_count += 1;
        self.next_tick += self.interval;

        if now <= self.next_tick {
            return self.next_tick - now;
        }

        let behind = now - self.next_tick;
        self.overruns += 1;
        if behind > MAX_LAG {
            tracing::warn!(
                "Tick {} is {:.1}ms behind schedule, skipping missed ticks",
                self.tick_count,
                behind.as_secs_f64() * 1000.0
            );
            self.next_tick = now;
        } else {
            tracing::debug!(
                "Tick {} overran by {:.1}ms",
                self.tick_count,
                behind.as_secs_f64() * 1000.0
            );
        }
        Duration::ZERO
    }
}
