//! Retry policy with exponential backoff and jitter.
//!
//! Two shapes are offered over the same [`RetryConfig`]:
//! - [`retry_async`] wraps a single fallible async call.
//! - [`RetryScope`] drives a hand-written `loop` around a multi-statement
//!   body, deciding after each error whether to sleep and go again.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Fraction of the computed delay used as the jitter band (±25%).
const JITTER_FRACTION: f64 = 0.25;

/// Classifies an error as transient (worth retrying) or permanent.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retries immediately, without sleeping. Useful for tests and local tooling.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `min(initial * base^attempt, max)`, then ±25% uniform jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter && capped > 0.0 {
            let band = capped * JITTER_FRACTION;
            capped + rand::thread_rng().gen_range(-band..=band)
        } else {
            capped
        };

        if delay.is_finite() {
            Duration::from_secs_f64(delay.max(0.0))
        } else {
            self.max_delay
        }
    }
}

/// Scoped retry block for bodies that span several statements.
///
/// ```ignore
/// let mut scope = RetryScope::new(&config, "sync_session");
/// let session = loop {
///     let result = async {
///         let status = client.get_session().await?;
///         client.start_if_stopped(status).await
///     }
///     .await;
///     match result {
///         Ok(session) => break session,
///         Err(e) => scope.on_error(e).await?,
///     }
/// };
/// ```
pub struct RetryScope<'a> {
    config: &'a RetryConfig,
    operation: &'a str,
    attempt: u32,
}

impl<'a> RetryScope<'a> {
    pub fn new(config: &'a RetryConfig, operation: &'a str) -> Self {
        Self {
            config,
            operation,
            attempt: 0,
        }
    }

    /// Number of failed attempts seen so far.
    pub fn failures(&self) -> u32 {
        self.attempt
    }

    /// Handles a failed attempt using the error's own classification.
    pub async fn on_error<E>(&mut self, err: E) -> Result<(), E>
    where
        E: Retryable + Display,
    {
        let retryable = err.is_retryable();
        self.on_error_if(err, retryable).await
    }

    /// Handles a failed attempt with an explicit retryable flag.
    ///
    /// Sleeps and returns `Ok(())` when another attempt should run, or hands the
    /// error back when it is permanent or the retry budget is spent.
    pub async fn on_error_if<E: Display>(&mut self, err: E, retryable: bool) -> Result<(), E> {
        let total = self.config.max_retries + 1;
        self.attempt += 1;

        if !retryable {
            warn!(
                operation = %self.operation,
                attempt = self.attempt,
                error = %err,
                "Non-retryable failure"
            );
            return Err(err);
        }

        if self.attempt >= total {
            error!(
                operation = %self.operation,
                attempts = self.attempt,
                error = %err,
                "{} failed after {} attempts",
                self.operation,
                self.attempt
            );
            return Err(err);
        }

        let delay = self.config.delay_for_attempt(self.attempt - 1);
        warn!(
            operation = %self.operation,
            attempt = self.attempt,
            max_attempts = total,
            delay_secs = delay.as_secs_f64(),
            "{} attempt {}/{} failed: {}. Retrying in {:.2}s",
            self.operation,
            self.attempt,
            total,
            err,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Runs `op` until it succeeds, fails permanently or exhausts the retry budget.
///
/// The error from the last attempt is returned unchanged.
pub async fn retry_async<T, E, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_async_if(config, operation, |e: &E| e.is_retryable(), op).await
}

/// Like [`retry_async`] with an explicit classifier instead of [`Retryable`].
pub async fn retry_async_if<T, E, F, Fut, C>(
    config: &RetryConfig,
    operation: &str,
    classify: C,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    C: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut scope = RetryScope::new(config, operation);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = classify(&err);
                scope.on_error_if(err, retryable).await?;
            }
        }
    }
}
