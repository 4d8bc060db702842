//! Fixed-rate scheduler (§4.8) — a direct transliteration of the original's
//! `delay()` async generator: record each tick's nominal start, sleep
//! `max(0, interval - elapsed)` before the next, so cadence stays steady and
//! a slow tick is caught up on rather than compounding drift.

use tokio::time::{Duration, Instant};

/// Yields tick numbers 0, 1, 2, … at a steady cadence. Built on
/// `tokio::time::sleep`, which honors `tokio::time::pause()`/`advance()` —
/// the deterministic-clock test harness spec.md §9 calls for.
pub struct FixedRateScheduler {
    interval: Duration,
    last_start: Option<Instant>,
    tick_num: u64,
}

impl FixedRateScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_start: None, tick_num: 0 }
    }

    /// Sleep until the next tick is due, then return its number.
    pub async fn tick(&mut self) -> u64 {
        if let Some(last_start) = self.last_start {
            let elapsed = last_start.elapsed();
            let remaining = self.interval.saturating_sub(elapsed);
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }
        }
        self.last_start = Some(Instant::now());
        let tick = self.tick_num;
        self.tick_num += 1;
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_advance_by_exactly_one_interval() {
        let mut scheduler = FixedRateScheduler::new(Duration::from_secs(1));
        let start = Instant::now();

        assert_eq!(scheduler.tick().await, 0);
        assert_eq!(scheduler.tick().await, 1);
        assert_eq!(scheduler.tick().await, 2);

        assert_eq!(Instant::now() - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tick_does_not_accumulate_drift() {
        let mut scheduler = FixedRateScheduler::new(Duration::from_secs(1));
        scheduler.tick().await;

        // Simulate tick-body work taking 1.5x the interval.
        tokio::time::advance(Duration::from_millis(1500)).await;
        let start = Instant::now();
        scheduler.tick().await;
        // Already past due: no additional sleep.
        assert_eq!(Instant::now() - start, Duration::ZERO);
    }
}
