//! Per-API-key HTTP rate limiting.
//!
//! Each key gets its own governor limiter, created on first use.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovRateLimiter,
};
use serde_json::json;
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, RwLock},
};

use crate::app::AppState;
use crate::extractors::api_key::ApiKeyAuth;

type KeyRateLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const FALLBACK_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

/// Limiters keyed by API key ID.
pub struct RateLimiterState {
    limiters: RwLock<HashMap<i64, Arc<KeyRateLimiter>>>,
    rate_limit_per_minute: u32,
}

impl RateLimiterState {
    pub fn new(rate_limit_per_minute: u32) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            rate_limit_per_minute,
        }
    }

    pub fn rate_limit_per_minute(&self) -> u32 {
        self.rate_limit_per_minute
    }

    fn get_or_create_limiter(&self, key_id: i64) -> Arc<KeyRateLimiter> {
        if let Ok(limiters) = self.limiters.read() {
            if let Some(limiter) = limiters.get(&key_id) {
                return limiter.clone();
            }
        }

        let quota = Quota::per_minute(
            NonZeroU32::new(self.rate_limit_per_minute).unwrap_or(FALLBACK_PER_MINUTE),
        );

        match self.limiters.write() {
            Ok(mut limiters) => limiters
                .entry(key_id)
                .or_insert_with(|| Arc::new(GovRateLimiter::direct(quota)))
                .clone(),
            // A poisoned map still limits, just without sharing state
            Err(_) => Arc::new(GovRateLimiter::direct(quota)),
        }
    }

    /// Ok when the request may proceed, otherwise the seconds to wait.
    pub fn check(&self, key_id: i64) -> Result<(), u64> {
        let limiter = self.get_or_create_limiter(key_id);

        match limiter.check() {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(DefaultClock::default().now());
                Err(wait_time.as_secs().max(1))
            }
        }
    }

    fn active_limiters(&self) -> usize {
        self.limiters.read().map(|l| l.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for RateLimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterState")
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("active_limiters", &self.active_limiters())
            .finish()
    }
}

/// Applies the per-key limit. Must run after authentication.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key_id = match req.extensions().get::<ApiKeyAuth>() {
        Some(auth) => auth.api_key_id,
        None => return next.run(req).await,
    };

    if let Some(ref rate_limiter) = state.rate_limiter {
        if let Err(retry_after) = rate_limiter.check(key_id) {
            tracing::warn!(api_key_id = key_id, retry_after, "API key rate limited");
            return rate_limited_response(rate_limiter.rate_limit_per_minute(), retry_after);
        }
    }

    next.run(req).await
}

fn rate_limited_response(limit: u32, retry_after: u64) -> Response {
    let body = json!({
        "error": "rate_limit_exceeded",
        "message": format!("Rate limit of {} requests/minute exceeded", limit),
        "retry_after": retry_after
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));

    response
}
