//! Health window tracking for the refresh loop.
//!
//! Fetch failures are tolerated for a configured trailing duration; once
//! failures persist past the window, the rollout is actively retracted to
//! 0.0 rather than coasting on a stale value.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::fetch::FetchError;

/// Tracks how long it has been since the last successful fetch.
#[derive(Debug)]
pub struct HealthWindow {
    last_healthy: Instant,
    threshold: Duration,
}

impl HealthWindow {
    /// Create a window that tolerates failures for `threshold`.
    ///
    /// The baseline starts at the current instant, so a source that never
    /// succeeds degrades once `threshold` has elapsed from construction.
    pub fn new(threshold: Duration) -> Self {
        Self {
            last_healthy: Instant::now(),
            threshold,
        }
    }

    /// Mark the current instant as healthy.
    pub fn record_success(&mut self) {
        self.last_healthy = Instant::now();
    }

    /// Time elapsed since the last healthy instant.
    pub fn unhealthy_for(&self) -> Duration {
        self.last_healthy.elapsed()
    }

    /// Whether failures have persisted past the tolerated window.
    pub fn is_degraded(&self) -> bool {
        self.unhealthy_for() > self.threshold
    }
}

/// Maps each fetch outcome to a publish decision.
///
/// Successes always publish the fresh value and reset the window. Failures
/// publish 0.0 only once the window is exceeded; inside the window the
/// previously published value is left untouched. The window is reset only
/// by successes, never by a forced-zero iteration.
#[derive(Debug)]
pub struct RefreshState {
    window: HealthWindow,
    degraded: bool,
}

impl RefreshState {
    /// Create the state for a loop with the given unhealthy threshold.
    pub fn new(unhealthy_after: Duration) -> Self {
        Self {
            window: HealthWindow::new(unhealthy_after),
            degraded: false,
        }
    }

    /// Record one fetch outcome.
    ///
    /// Returns the value to publish for this iteration, or `None` when the
    /// previously published value should be kept.
    pub fn record(&mut self, outcome: &Result<f64, FetchError>) -> Option<f64> {
        match outcome {
            Ok(fraction) => {
                if self.degraded {
                    debug!(value = *fraction, "fetches recovered");
                    self.degraded = false;
                }
                self.window.record_success();
                Some(*fraction)
            }
            Err(_) => {
                if !self.window.is_degraded() {
                    return None;
                }
                if !self.degraded {
                    warn!(
                        unhealthy_for = ?self.window.unhealthy_for(),
                        "fetches unhealthy past threshold, rollout dropped to 0.0"
                    );
                    self.degraded = true;
                }
                Some(0.0)
            }
        }
    }
}
