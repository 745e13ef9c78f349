//! Notification provider contract.
//!
//! Every vendor adapter (SMS, WhatsApp, push, email) implements
//! [`NotificationProvider`] and reports failures as a [`ProviderError`], so
//! callers never branch on vendor-specific error types.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use crate::models::notification::{Channel, NotificationType};

/// Vendor response bodies are cut to this many characters in errors and logs.
pub const MAX_RESPONSE_SNIPPET: usize = 200;

/// Truncates a vendor response body on a character boundary.
pub fn truncate_response(body: &str) -> String {
    if body.chars().count() <= MAX_RESPONSE_SNIPPET {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_RESPONSE_SNIPPET).collect();
        format!("{}...", cut)
    }
}

/// Uniform error for every provider adapter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: String,
    },

    #[error("Provider rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Builds an HTTP error from a vendor response.
    ///
    /// The message is taken from the body's `message`, `error.message` or
    /// `error` field when present. 429 becomes [`ProviderError::RateLimited`].
    pub fn from_response(status: u16, body: &str) -> Self {
        let snippet = truncate_response(body);
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| extract_error_message(&v))
            .unwrap_or_else(|| snippet.clone());

        if status == 429 {
            ProviderError::RateLimited(message)
        } else {
            ProviderError::Http {
                status,
                message,
                body: snippet,
            }
        }
    }

    /// Truncated vendor response body, when one was received.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            ProviderError::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

fn extract_error_message(value: &Value) -> Option<String> {
    let candidate = value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .or_else(|| value.get("error"))?;
    candidate.as_str().map(str::to_string)
}

impl shared::retry::Retryable for ProviderError {
    /// Network trouble and 5xx responses are transient; everything else is not.
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Per-send options that some vendors use.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Push title or email subject.
    pub title: Option<String>,
    /// HTML alternative for email.
    pub html_body: Option<String>,
    pub trip_id: Option<i64>,
    pub notification_type: Option<NotificationType>,
    pub extra: BTreeMap<String, String>,
}

/// What a vendor returned for an accepted message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
    pub status: Option<String>,
    pub raw_response: String,
}

/// Capability interface implemented once per vendor.
#[async_trait::async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Registry key, e.g. `twilio_sms`.
    fn name(&self) -> &str;

    fn channel(&self) -> Channel;

    /// Fails fast when required credentials or URLs are absent.
    fn validate_config(&self) -> Result<(), ProviderError>;

    /// Vendor-specific request body for a message.
    fn format_payload(&self, recipient: &str, message: &str, options: &SendOptions) -> Value;

    async fn send(
        &self,
        recipient: &str,
        message: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, ProviderError>;
}

/// Mock provider for development and testing.
///
/// Records every message it is asked to send. It can fail every call or only
/// the first `n` calls.
#[derive(Debug)]
pub struct MockNotificationProvider {
    channel: Channel,
    failure: Option<ProviderError>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockNotificationProvider {
    /// Create a mock provider that accepts every message.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            failure: None,
            failures_remaining: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock provider that always fails with `error`.
    pub fn failing(channel: Channel, error: ProviderError) -> Self {
        Self {
            failures_remaining: AtomicU32::new(u32::MAX),
            failure: Some(error),
            ..Self::new(channel)
        }
    }

    /// Create a mock provider that fails `times` times with `error`, then succeeds.
    pub fn flaky(channel: Channel, error: ProviderError, times: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(times),
            failure: Some(error),
            ..Self::new(channel)
        }
    }

    /// Total `send` calls, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// (recipient, message) pairs accepted so far.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl NotificationProvider for MockNotificationProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn format_payload(&self, recipient: &str, message: &str, _options: &SendOptions) -> Value {
        json!({ "to": recipient, "message": message })
    }

    async fn send(
        &self,
        recipient: &str,
        message: &str,
        _options: &SendOptions,
    ) -> Result<SendReceipt, ProviderError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(error) = &self.failure {
            let should_fail = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                tracing::warn!(
                    channel = %self.channel,
                    attempt,
                    "Mock provider simulating failure"
                );
                return Err(error.clone());
            }
        }

        tracing::info!(
            channel = %self.channel,
            recipient = %shared::crypto::mask_sensitive(recipient),
            "Mock: would send notification"
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((recipient.to_string(), message.to_string()));
        }

        Ok(SendReceipt {
            provider_message_id: Some(format!("mock-{}", attempt)),
            status: Some("sent".to_string()),
            raw_response: json!({ "id": format!("mock-{}", attempt) }).to_string(),
        })
    }
}
