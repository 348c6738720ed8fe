/**
 * Configuration constants and tuning for resource watchers
 */
use std::time::Duration;

/// Initial backoff time in seconds before retrying a failed resync
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Maximum backoff time in seconds between resync attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Polling period for kinds served without a watch verb (metrics.k8s.io)
pub const METRICS_POLL_SECONDS: u64 = 15;

/// Bound of the per-session outbound queue before the oldest message is dropped
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

/// Tuning shared by every watcher created by one registry
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub watch_timeout_secs: u32,
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECONDS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECONDS),
            watch_timeout_secs: WATCH_TIMEOUT_SECONDS,
            poll_interval: Duration::from_secs(METRICS_POLL_SECONDS),
        }
    }
}

/// Exponential backoff between resync attempts, reset after a successful listing
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one, capped at `max`
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub const fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(MAX_BACKOFF_SECONDS > 0, "MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS <= MAX_BACKOFF_SECONDS, "INITIAL_BACKOFF_SECONDS must not exceed MAX_BACKOFF_SECONDS");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(METRICS_POLL_SECONDS > 0, "METRICS_POLL_SECONDS must be greater than 0");
    assert!(SUBSCRIBER_QUEUE_CAPACITY > 0, "SUBSCRIBER_QUEUE_CAPACITY must be greater than 0");
};
