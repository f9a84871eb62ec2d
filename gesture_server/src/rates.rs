//! Processed and streamed frame rates.
//!
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Frames counted since the last [`FrameCounters::take_rates`].
#[derive(Debug, Default)]
pub struct FrameCounters {
    processed: AtomicU64,
    streamed: AtomicU64,
}

/// Frames per second over one measuring period.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameRates {
    pub processed_fps: f32,
    pub streamed_fps: f32,
}

impl FrameCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_streamed(&self) {
        self.streamed.fetch_add(1, Ordering::Relaxed);
    }

    /// Rates over `elapsed`, restarting both counts.
    pub fn take_rates(&self, elapsed: Duration) -> FrameRates {
        let secs = elapsed.as_secs_f32().max(f32::EPSILON);

        FrameRates {
            processed_fps: self.processed.swap(0, Ordering::Relaxed) as f32 / secs,
            streamed_fps: self.streamed.swap(0, Ordering::Relaxed) as f32 / secs,
        }
    }
}

impl FrameRates {
    pub fn log(&self) {
        if self.processed_fps > 0.0 {
            log::info!("Processed frames per second: {:.2}", self.processed_fps);
        }
        if self.streamed_fps > 0.0 {
            log::info!("Streamed frames per second: {:.2}", self.streamed_fps);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_take_rates_restarts_counts() {
        let counters = FrameCounters::new();
        counters.count_processed();
        counters.count_processed();
        counters.count_streamed();

        let rates = counters.take_rates(Duration::from_millis(500));
        assert_eq!(rates.processed_fps, 4.0);
        assert_eq!(rates.streamed_fps, 2.0);

        let rates = counters.take_rates(Duration::from_secs(1));
        assert_eq!(rates.processed_fps, 0.0);
        assert_eq!(rates.streamed_fps, 0.0);
    }

    #[test]
    fn test_take_rates_over_zero_period() {
        let counters = FrameCounters::new();
        counters.count_processed();
        assert!(counters.take_rates(Duration::ZERO).processed_fps.is_finite());
    }
}
