//! Outbound send limits.
//!
//! - [`SlidingWindowLimiter`] admits at most `max_requests` within a rolling
//!   window.
//! - [`ChannelRateLimiter`] keeps one window per notification channel.
//! - [`AdaptiveRateLimiter`] moves a channel's limit with observed vendor
//!   success rates.
//!
//! Waiting suspends the task with `tokio::time::sleep`; no thread blocks.

use domain::models::Channel;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{AdaptiveSettings, ChannelLimitsConfig};

/// Upper bound on a single sleep while waiting for a slot.
const MAX_POLL_SLEEP: Duration = Duration::from_secs(1);
/// Sleep used when the window is empty but the limit still refuses.
const EMPTY_POLL_SLEEP: Duration = Duration::from_millis(100);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock leaves the queue usable
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Sliding window
// ============================================================================

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: u32,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&self, requests: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = requests.front() {
            if now.duration_since(*oldest) > self.window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }

    /// Takes a slot if one is free.
    pub fn is_allowed(&self) -> bool {
        let now = Instant::now();
        let mut requests = lock(&self.requests);
        self.prune(&mut requests, now);

        if (requests.len() as u64) < self.max_requests as u64 {
            requests.push_back(now);
            true
        } else {
            false
        }
    }

    /// Polls until a slot is taken or `timeout` elapses.
    ///
    /// Returns false on timeout, without taking a slot.
    pub async fn wait_if_needed(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.is_allowed() {
                return true;
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return false;
            }

            let sleep_for = self.next_poll_delay().min(timeout - waited);
            tokio::time::sleep(sleep_for).await;
        }
    }

    fn next_poll_delay(&self) -> Duration {
        let now = Instant::now();
        let requests = lock(&self.requests);
        match requests.front() {
            Some(oldest) => {
                let frees_at = *oldest + self.window;
                frees_at
                    .saturating_duration_since(now)
                    .clamp(Duration::from_millis(1), MAX_POLL_SLEEP)
            }
            None => EMPTY_POLL_SLEEP,
        }
    }

    /// Free slots in the current window.
    pub fn remaining(&self) -> u32 {
        let now = Instant::now();
        let mut requests = lock(&self.requests);
        self.prune(&mut requests, now);
        self.max_requests.saturating_sub(requests.len() as u32)
    }

    pub fn reset(&self) {
        lock(&self.requests).clear();
    }
}

// ============================================================================
// Per-channel limits
// ============================================================================

/// Snapshot of one channel's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub max_requests: u32,
    pub window_secs: u64,
    pub remaining: u32,
}

#[derive(Debug, Default)]
pub struct ChannelRateLimiter {
    limiters: Mutex<HashMap<Channel, Arc<SlidingWindowLimiter>>>,
}

impl ChannelRateLimiter {
    /// A limiter with no channels configured; every send is allowed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults per minute: sms 100, whatsapp 80, email 200, push 500.
    pub fn with_defaults() -> Self {
        Self::from_config(&ChannelLimitsConfig::default())
    }

    pub fn from_config(limits: &ChannelLimitsConfig) -> Self {
        let limiter = Self::new();
        for channel in Channel::ALL {
            limiter.configure_limit(channel, limits.limit_for(channel), limits.window());
        }
        limiter
    }

    /// Replaces a channel's window. Slots already taken are forgotten.
    pub fn configure_limit(&self, channel: Channel, max_requests: u32, window: Duration) {
        lock(&self.limiters).insert(
            channel,
            Arc::new(SlidingWindowLimiter::new(max_requests, window)),
        );
        info!(
            channel = %channel,
            max_requests,
            window_secs = window.as_secs(),
            "Configured rate limit"
        );
    }

    fn limiter(&self, channel: Channel) -> Option<Arc<SlidingWindowLimiter>> {
        lock(&self.limiters).get(&channel).cloned()
    }

    pub fn is_allowed(&self, channel: Channel) -> bool {
        match self.limiter(channel) {
            Some(limiter) => limiter.is_allowed(),
            None => {
                warn!(channel = %channel, "No rate limiter configured for channel");
                true
            }
        }
    }

    pub async fn wait_if_needed(&self, channel: Channel, timeout: Duration) -> bool {
        match self.limiter(channel) {
            Some(limiter) => {
                let allowed = limiter.wait_if_needed(timeout).await;
                if !allowed {
                    warn!(
                        channel = %channel,
                        timeout_secs = timeout.as_secs_f64(),
                        "Rate limit wait timed out"
                    );
                }
                allowed
            }
            None => {
                warn!(channel = %channel, "No rate limiter configured for channel");
                true
            }
        }
    }

    pub fn stats(&self) -> BTreeMap<Channel, LimiterStats> {
        let limiters: Vec<(Channel, Arc<SlidingWindowLimiter>)> = lock(&self.limiters)
            .iter()
            .map(|(channel, limiter)| (*channel, limiter.clone()))
            .collect();

        limiters
            .into_iter()
            .map(|(channel, limiter)| {
                (
                    channel,
                    LimiterStats {
                        max_requests: limiter.max_requests(),
                        window_secs: limiter.window().as_secs(),
                        remaining: limiter.remaining(),
                    },
                )
            })
            .collect()
    }
}

// ============================================================================
// Adaptive limit
// ============================================================================

/// Observations needed before the success rate is trusted.
const MIN_OBSERVATIONS: u32 = 100;
/// Counters restart after this many observations.
const RESET_OBSERVATIONS: u32 = 1000;
const RAISE_ABOVE: f64 = 0.95;
const LOWER_BELOW: f64 = 0.85;

#[derive(Debug)]
struct AdaptiveState {
    current: u32,
    successes: u32,
    failures: u32,
    limiter: Arc<SlidingWindowLimiter>,
}

/// Adjusts a send limit from vendor feedback.
///
/// Every observation after the first hundred re-evaluates the limit: above
/// 95% success it grows by 10%, below 85% it shrinks by 10%. A vendor
/// rate-limit error halves it at once. The limit stays within
/// `[min_limit, max_limit]` and a change starts a fresh window.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    min_limit: u32,
    max_limit: u32,
    window: Duration,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveRateLimiter {
    pub fn new(initial: u32, window: Duration, min_limit: u32, max_limit: u32) -> Self {
        let current = initial.clamp(min_limit, max_limit);
        Self {
            min_limit,
            max_limit,
            window,
            state: Mutex::new(AdaptiveState {
                current,
                successes: 0,
                failures: 0,
                limiter: Arc::new(SlidingWindowLimiter::new(current, window)),
            }),
        }
    }

    pub fn from_settings(initial: u32, window: Duration, settings: &AdaptiveSettings) -> Self {
        Self::new(initial, window, settings.min_limit, settings.max_limit)
    }

    pub fn current_limit(&self) -> u32 {
        lock(&self.state).current
    }

    pub fn is_allowed(&self) -> bool {
        let limiter = lock(&self.state).limiter.clone();
        limiter.is_allowed()
    }

    /// Returns the new limit when this observation changed it.
    pub fn record_success(&self) -> Option<u32> {
        let mut state = lock(&self.state);
        let before = state.current;
        state.successes += 1;
        self.adjust(&mut state);
        (state.current != before).then_some(state.current)
    }

    /// Returns the new limit when this observation changed it.
    pub fn record_failure(&self, is_rate_limit_error: bool) -> Option<u32> {
        let mut state = lock(&self.state);
        let before = state.current;
        state.failures += 1;
        if is_rate_limit_error {
            self.scale(&mut state, 0.5);
        }
        self.adjust(&mut state);
        (state.current != before).then_some(state.current)
    }

    fn adjust(&self, state: &mut AdaptiveState) {
        let total = state.successes + state.failures;
        if total < MIN_OBSERVATIONS {
            return;
        }

        let success_rate = state.successes as f64 / total as f64;
        if success_rate > RAISE_ABOVE {
            self.scale(state, 1.1);
        } else if success_rate < LOWER_BELOW {
            self.scale(state, 0.9);
        }

        if total >= RESET_OBSERVATIONS {
            state.successes = 0;
            state.failures = 0;
        }
    }

    fn scale(&self, state: &mut AdaptiveState, factor: f64) {
        let scaled = (state.current as f64 * factor) as u32;
        let next = scaled.clamp(self.min_limit, self.max_limit);
        if next == state.current {
            return;
        }

        if next > state.current {
            info!(from = state.current, to = next, "Increasing adaptive rate limit");
        } else {
            warn!(from = state.current, to = next, "Reducing adaptive rate limit");
        }
        state.current = next;
        state.limiter = Arc::new(SlidingWindowLimiter::new(next, self.window));
    }
}
