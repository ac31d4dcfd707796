//! Per-client rate limiting for the webhook surface.
//!
//! Webhook endpoints are reachable without the bearer key (they carry
//! their own signatures), so they get a keyed limiter per client.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

/// Webhook deliveries allowed per client per minute.
pub const WEBHOOK_REQUESTS_PER_MINUTE: u32 = 120;

pub type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<KeyedLimiter>,
}

impl RateLimitState {
    pub fn new() -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(WEBHOOK_REQUESTS_PER_MINUTE).expect("nonzero quota"),
        );
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    pub fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    /// Limiter key for a request. Proxy headers win over everything else
    /// (`x-forwarded-for` takes its first hop, then `x-real-ip`); requests
    /// with neither share one `unknown` bucket, which throttles unproxied
    /// floods as a group rather than not at all.
    pub fn client_key(&self, headers: &HeaderMap) -> String {
        headers
            .get("x-forwarded-for")
            .and_then(|hops| hops.to_str().ok())
            .and_then(|hops| hops.split(',').next())
            .or_else(|| headers.get("x-real-ip").and_then(|ip| ip.to_str().ok()))
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .unwrap_or("unknown")
            .to_string()
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let client = state.client_key(request.headers());

    if !state.check(&client) {
        warn!(client = %client, path = %request.uri().path(), "rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn limiter_allows_within_quota() {
        let state = RateLimitState::new();
        assert!(state.check("10.0.0.1"));
    }

    #[test]
    fn limiter_blocks_after_quota_and_keys_are_independent() {
        let state = RateLimitState::new();
        for _ in 0..WEBHOOK_REQUESTS_PER_MINUTE {
            state.check("10.0.0.2");
        }
        assert!(!state.check("10.0.0.2"));
        // Another client is unaffected.
        assert!(state.check("10.0.0.3"));
    }

    #[test]
    fn client_key_prefers_first_forwarded_hop() {
        let state = RateLimitState::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(state.client_key(&headers), "203.0.113.7");
    }

    #[test]
    fn client_key_falls_back_to_real_ip_then_unknown() {
        let state = RateLimitState::new();

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(state.client_key(&headers), "10.0.0.9");

        assert_eq!(state.client_key(&HeaderMap::new()), "unknown");
    }
}
