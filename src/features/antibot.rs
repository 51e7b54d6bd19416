use std::time::Duration;

use tracing::debug;

/// Randomized pause between requests so pacing never settles into a
/// fixed rhythm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDelay {
    /// Minimum delay in milliseconds
    pub min_ms: u64,
    /// Maximum delay in milliseconds
    pub max_ms: u64,
}

impl RequestDelay {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// No pause at all.
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Draw a delay from the configured range.
    pub fn random_delay(&self) -> u64 {
        use rand::prelude::*;
        if self.max_ms <= self.min_ms {
            return self.min_ms;
        }
        let mut rng = rand::rng();
        rng.random_range(self.min_ms..=self.max_ms)
    }

    pub fn random_duration(&self) -> Duration {
        Duration::from_millis(self.random_delay())
    }

    /// Sleep for a freshly drawn delay and return how long that was.
    pub async fn pause(&self) -> Duration {
        let delay = self.random_duration();
        if !delay.is_zero() {
            debug!("pacing: sleeping {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

/// Wait out a cooldown in 10-second slices so the operator sees it tick down.
pub async fn cooldown(total: Duration, reason: &str) {
    tracing::warn!("❄️  Cooldown {}s: {}", total.as_secs(), reason);
    let slice = Duration::from_secs(10);
    let mut remaining = total;
    while !remaining.is_zero() {
        tracing::info!("⏳ {}s remaining...", remaining.as_secs());
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    tracing::info!("✅ Cooldown finished, retrying");
}
