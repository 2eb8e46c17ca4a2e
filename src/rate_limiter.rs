//! Enforces the minimum interval between consecutive `GenerativeModel`
//! extract calls (spec §4.5, §5). One instance is shared process-wide
//! across all sessions' concurrent ingests.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct ExtractRateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl ExtractRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Blocks the caller until at least `min_interval` has elapsed since the
    /// previous call returned, then records this call's start time.
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}
