//! Exponential backoff with a 1.5 multiplier, clamped to `[min, max]`.
//!
//! Structurally this mirrors `journal-client::read::uncommitted::retry::ExponentialBackoff` (a
//! small struct wrapping numeric state behind `reset`/`next_backoff`), but it is hand-rolled
//! rather than wrapping the `exponential-backoff` crate: that crate's `Backoff` only accepts an
//! integer `factor`, and this policy's `1.5` multiplier and exact `1000/1500/2250` escalation
//! can't be expressed through it.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Multiplier applied to the current delay after each failure. Not representable as an
/// `exponential_backoff::Backoff` integer `factor`.
const MULTIPLIER: f64 = 1.5;

#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.min_backoff,
            config,
        }
    }

    /// The delay to use for the next scheduled retry, then advance internal state by multiplying
    /// the delay by 1.5 (clamped to `max_backoff`) for the retry after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let scaled = self.current.as_secs_f64() * MULTIPLIER;
        let scaled = Duration::from_secs_f64(scaled);
        self.current = scaled.min(self.config.max_backoff);
        delay
    }

    /// Reset to `min_backoff`, as happens whenever a refresh succeeds.
    pub fn reset(&mut self) {
        self.current = self.config.min_backoff;
    }
}
