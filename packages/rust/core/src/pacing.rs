//! Fixed-interval pacing for calls to the generative service.
//!
//! One [`Pacer`] is shared by everything in a batch that calls out. It
//! admits at most one call per configured interval, and a quota penalty
//! pushes the next admission back by the cooldown.

use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use larder_shared::PacingConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared limiter gating every outbound enrichment call.
pub struct Pacer {
    /// `None` when the interval is zero (unpaced).
    limiter: Option<DefaultDirectRateLimiter>,
    penalty_until: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(config: &PacingConfig) -> Self {
        // Burst of one: the first call passes, each later call waits a full period
        let limiter = Quota::with_period(config.item_interval).map(RateLimiter::direct);
        Self {
            limiter,
            penalty_until: Mutex::new(None),
        }
    }

    /// A pacer that never waits.
    pub fn unpaced() -> Self {
        Self::new(&PacingConfig::unpaced())
    }

    /// Wait until the next call may go out.
    pub async fn wait(&self) {
        let penalty = self.penalty_until.lock().await.take();
        if let Some(until) = penalty.filter(|u| *u > Instant::now()) {
            tracing::debug!(wait = ?(until - Instant::now()), "quota cooldown");
            tokio::time::sleep_until(until).await;
        }

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Delay the next admission by `cooldown` from now.
    pub async fn penalize(&self, cooldown: Duration) {
        if cooldown.is_zero() {
            return;
        }
        let until = Instant::now() + cooldown;
        let mut penalty = self.penalty_until.lock().await;
        *penalty = Some(match *penalty {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unpaced_never_blocks() {
        let pacer = Pacer::unpaced();
        let start = std::time::Instant::now();
        for _ in 0..5 {
            pacer.wait().await;
        }
        pacer.penalize(Duration::ZERO).await;
        pacer.wait().await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn interval_spaces_calls() {
        let pacer = Pacer::new(&PacingConfig {
            item_interval: Duration::from_millis(100),
            quota_cooldown: Duration::ZERO,
        });
        let start = std::time::Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn penalty_delays_next_call_once() {
        let pacer = Pacer::unpaced();
        pacer.penalize(Duration::from_millis(120)).await;

        let start = std::time::Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(100));

        let again = std::time::Instant::now();
        pacer.wait().await;
        assert!(again.elapsed() < Duration::from_millis(100));
    }
}
