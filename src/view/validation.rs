//! Periodic check that outstanding tiles keep arriving.

use std::time::Duration;

use tracing::{debug, warn};

/// Default interval between validation ticks.
pub const DEFAULT_VALIDATION_INTERVAL: Duration = Duration::from_millis(1000);

/// Default number of update retriggers before giving up.
pub const DEFAULT_VALIDATION_RETRY_LIMIT: u32 = 2;

/// Loads slower than this multiple of the mean load time count as stalled.
const STALL_FACTOR: u32 = 4;

/// Load counters sampled at a validation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadProgress {
    /// Tiles loading or parked
    pub outstanding: usize,
    /// Tiles whose load failed
    pub failed: usize,
    pub mean_load_time: Option<Duration>,
    /// Age of the oldest running load
    pub oldest_in_flight: Option<Duration>,
}

/// Decision of a validation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationAction {
    /// Nothing outstanding
    Idle,
    /// Loads are progressing
    Wait,
    /// Re-run the view update for failed or stalled tiles
    Retrigger { attempt: u32 },
    /// Retries exhausted; report once
    GiveUp { outstanding: usize, failed: usize },
}

/// Bounded retry of stalled view updates.
#[derive(Debug, Clone)]
pub struct ViewValidator {
    interval: Duration,
    retry_limit: u32,
    retries: u32,
    last_outstanding: Option<usize>,
    gave_up: bool,
}

impl ViewValidator {
    pub fn new(interval: Duration, retry_limit: u32) -> Self {
        Self {
            interval,
            retry_limit,
            retries: 0,
            last_outstanding: None,
            gave_up: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start a fresh retry budget, after the user changed the view.
    pub fn reset(&mut self) {
        self.retries = 0;
        self.last_outstanding = None;
        self.gave_up = false;
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    /// Retriggers still available to the current view.
    pub fn has_pending_retries(&self, progress: &LoadProgress) -> bool {
        progress.failed > 0 && !self.gave_up
    }

    /// Time after which a running load counts as stalled.
    fn stall_after(&self, mean: Option<Duration>) -> Duration {
        mean.map(|m| m * STALL_FACTOR)
            .unwrap_or(self.interval)
            .max(self.interval)
    }

    pub fn tick(&mut self, progress: LoadProgress) -> ValidationAction {
        let previous = self.last_outstanding.replace(progress.outstanding);

        if progress.outstanding == 0 && progress.failed == 0 {
            return ValidationAction::Idle;
        }
        if self.gave_up {
            return ValidationAction::Wait;
        }

        let stalled = if progress.outstanding == 0 {
            // Only failures left
            true
        } else {
            let no_progress = previous.is_some_and(|p| progress.outstanding >= p);
            let slow = progress
                .oldest_in_flight
                .is_some_and(|age| age > self.stall_after(progress.mean_load_time));
            no_progress && slow
        };
        if !stalled {
            return ValidationAction::Wait;
        }

        if self.retries < self.retry_limit {
            self.retries += 1;
            debug!(
                attempt = self.retries,
                outstanding = progress.outstanding,
                failed = progress.failed,
                "retriggering view update"
            );
            return ValidationAction::Retrigger {
                attempt: self.retries,
            };
        }

        self.gave_up = true;
        warn!(
            outstanding = progress.outstanding,
            failed = progress.failed,
            "tiles still unresolved after retries"
        );
        ValidationAction::GiveUp {
            outstanding: progress.outstanding,
            failed: progress.failed,
        }
    }
}
