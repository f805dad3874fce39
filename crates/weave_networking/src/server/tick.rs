//! # Server Tick Loop
//!
//! Fixed-timestep pacing for the server binary.
//!
//! The loop accumulates wall time and releases one tick per elapsed tick
//! duration. Late ticks are counted, not skipped: a slow tick is followed by
//! back-to-back ticks until the accumulator drains.

use std::time::{Duration, Instant};

/// Fixed-timestep tick controller.
#[derive(Debug)]
pub struct TickLoop {
    tick_duration: Duration,
    last_poll: Instant,
    accumulator: Duration,
    tick_count: u64,
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug)]
pub struct TickStats {
    /// Shortest tick body observed, in microseconds.
    pub min_tick_us: u64,
    /// Longest tick body observed, in microseconds.
    pub max_tick_us: u64,
    /// Rolling average tick body, in microseconds.
    pub avg_tick_us: u64,
    /// Ticks whose body took longer than the tick duration.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(tick_duration: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(tick_duration),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_us(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

impl TickLoop {
    /// Creates a loop running `tick_rate` ticks per second. A rate of zero
    /// is treated as one.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            last_poll: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Returns true if a tick is due. Call until it returns false.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_poll);
        self.last_poll = now;
        self.accumulator >= self.tick_duration
    }

    /// Consumes one tick from the accumulator and returns the body start.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Records how long the tick body starting at `start` took.
    pub fn end_tick(&mut self, start: Instant) {
        let elapsed = start.elapsed();
        let us = duration_us(elapsed);

        let stats = &mut self.stats;
        stats.total_ticks += 1;
        stats.min_tick_us = stats.min_tick_us.min(us);
        stats.max_tick_us = stats.max_tick_us.max(us);
        stats.avg_tick_us = (stats.avg_tick_us * 15 + us) / 16;
        if elapsed > self.tick_duration {
            stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let owed = self.accumulator + self.last_poll.elapsed();
        if owed < self.tick_duration {
            std::thread::sleep(self.tick_duration - owed);
        }
    }

    /// Ticks begun so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_duration_from_rate() {
        assert_eq!(TickLoop::new(60).tick_duration(), Duration::from_micros(16_666));
        assert_eq!(TickLoop::new(0).tick_duration(), Duration::from_secs(1));
    }

    #[test]
    fn ticks_become_due() {
        let mut tick_loop = TickLoop::new(1000);
        std::thread::sleep(Duration::from_millis(5));

        assert!(tick_loop.should_tick());
        let start = tick_loop.begin_tick();
        tick_loop.end_tick(start);

        assert_eq!(tick_loop.tick_count(), 1);
        assert_eq!(tick_loop.stats().total_ticks, 1);
    }

    #[test]
    fn wait_releases_next_tick() {
        let mut tick_loop = TickLoop::new(200);
        tick_loop.wait_for_next_tick();
        assert!(tick_loop.should_tick());
    }
}
