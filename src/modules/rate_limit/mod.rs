//! Minimum inter-request spacing shared by every attempt of a client.
//!
//! All concurrent extractions on one client instance interleave through this
//! single gate; the spacing invariant holds per instance, not per logical
//! request.

use std::cmp;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Fixed spacing between successive outbound attempts.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

/// Serializes attempt release times across concurrent callers.
///
/// `acquire` reserves the next release slot inside the critical section and
/// sleeps outside of it, so the lock is only ever held for the
/// read-modify-write of the timestamp, never across the wait.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_release: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_interval(MIN_REQUEST_INTERVAL)
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_release: Mutex::new(None),
        }
    }

    /// Block the calling operation until the spacing has elapsed since the
    /// previous release, then record the new release instant. Never fails.
    pub async fn acquire(&self) {
        let release_at = {
            let mut last = self.last_release.lock().expect("rate limiter lock poisoned");
            let now = Instant::now();
            let release_at = match *last {
                Some(previous) => cmp::max(now, previous + self.min_interval),
                None => now,
            };
            *last = Some(release_at);
            release_at
        };

        if release_at > Instant::now() {
            sleep_until(release_at).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
