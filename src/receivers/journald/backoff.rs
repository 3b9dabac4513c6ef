// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Capped exponential backoff: starts at `initial_backoff`, doubles on every
/// failure up to `max_backoff`, and starts over after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_backoff,
            config,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.config.max_backoff);
        self.current = self
            .current
            .saturating_mul(2)
            .min(self.config.max_backoff);
        self.attempts += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial_backoff;
        self.attempts = 0;
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Sleep for `delay` unless cancelled first. Returns false if cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
