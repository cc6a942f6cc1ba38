//! Temporal gate for periodic re-detection.

use std::time::{Duration, Instant};

/// Interval between full-frame detections inside the video loop.
pub const AUTO_DETECTION_INTERVAL: Duration = Duration::from_millis(3_000);

/// Interval used by the standalone detection service outside the video loop.
pub const SERVICE_DETECTION_INTERVAL: Duration = Duration::from_millis(2_000);

/// Fires at most once per interval, independent of how often it is polled.
///
/// `due` resets the timer whenever it returns true, so call it exactly once
/// per evaluation tick.
#[derive(Clone, Debug)]
pub struct DetectionScheduler {
    interval: Duration,
    last_run: Option<Instant>,
}

impl DetectionScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true (and restarts the interval) when detection should run now.
    /// The first call after construction or `reset` is always due.
    pub fn due(&mut self, now: Instant) -> bool {
        let ready = match self.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if ready {
            self.last_run = Some(now);
        }
        ready
    }

    pub fn reset(&mut self) {
        self.last_run = None;
    }
}

impl Default for DetectionScheduler {
    fn default() -> Self {
        Self::new(AUTO_DETECTION_INTERVAL)
    }
}
