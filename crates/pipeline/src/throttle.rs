//! Minimum spacing between calls to one rate-limited provider

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

/// Lets one call through per `period`. The first call is never delayed.
#[derive(Clone)]
pub struct Throttle {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl Throttle {
    /// A zero period disables throttling
    pub fn new(period: Duration) -> Self {
        let limiter = Quota::with_period(period).map(|quota| Arc::new(RateLimiter::direct(quota)));
        Self { limiter }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait until the next call is allowed
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_disabled_never_waits() {
        let throttle = Throttle::disabled();
        let start = Instant::now();
        for _ in 0..100 {
            throttle.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_calls_are_spaced() {
        let throttle = Throttle::new(Duration::from_millis(40));
        let start = Instant::now();

        throttle.wait().await;
        assert!(start.elapsed() < Duration::from_millis(20));

        throttle.wait().await;
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(70));
    }
}
