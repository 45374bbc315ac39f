//! Rate limiting for run triggers using a token bucket

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use scholarlink_common::errors::AppError;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Shared limiter; `None` means triggers are not limited
pub type TriggerLimiter = Option<Arc<DefaultDirectRateLimiter>>;

/// Create a limiter admitting `per_minute` triggers, all of which may arrive at once
pub fn create_trigger_limiter(per_minute: u32) -> TriggerLimiter {
    NonZeroU32::new(per_minute).map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))))
}

/// Reject the request with 429 when the bucket is empty
pub async fn limit_triggers(
    State(limiter): State<TriggerLimiter>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(limiter) = limiter {
        if limiter.check().is_err() {
            tracing::warn!(path = %request.uri().path(), "Trigger rate limit exceeded");
            return AppError::RateLimited {
                message: "too many run triggers, try again later".to_string(),
            }
            .into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_disables_limit() {
        assert!(create_trigger_limiter(0).is_none());
    }

    #[test]
    fn test_limiter_admits_burst_then_rejects() {
        let limiter = create_trigger_limiter(2).unwrap();
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
