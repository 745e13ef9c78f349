//! Vendor adapters for outbound notifications.
//!
//! Each adapter implements [`NotificationProvider`] for one vendor API. The
//! [`ProviderRegistry`] maps the configured provider key (e.g. `twilio_sms`)
//! to a constructor so deployments pick vendors per channel without code
//! changes.

pub mod console;
pub mod firebase;
pub mod generic;
pub mod sendgrid;
pub mod twilio;
pub mod waha;
pub mod whatsapp_business;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domain::models::Channel;
use domain::services::{NotificationProvider, ProviderError};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::config::ProviderSettings;

pub use console::ConsoleProvider;
pub use firebase::FirebasePushProvider;
pub use generic::GenericHttpProvider;
pub use sendgrid::SendGridEmailProvider;
pub use twilio::TwilioSmsProvider;
pub use waha::{format_phone_to_chat_id, SessionStatus, WahaClient, WahaError, WahaWhatsappProvider};
pub use whatsapp_business::WhatsAppBusinessProvider;

/// Builds a provider for the channel it will serve.
pub type ProviderConstructor = Arc<
    dyn Fn(Channel, &ProviderSettings) -> Result<Arc<dyn NotificationProvider>, ProviderError>
        + Send
        + Sync,
>;

/// String-keyed provider factory.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "twilio_sms",
            Arc::new(|_, settings| Ok(Arc::new(TwilioSmsProvider::new(settings)?))),
        );
        registry.register(
            "generic_sms",
            Arc::new(|_, settings| {
                Ok(Arc::new(GenericHttpProvider::new(
                    "generic_sms",
                    Channel::Sms,
                    settings,
                )?))
            }),
        );
        registry.register(
            "generic_whatsapp",
            Arc::new(|_, settings| {
                Ok(Arc::new(GenericHttpProvider::new(
                    "generic_whatsapp",
                    Channel::Whatsapp,
                    settings,
                )?))
            }),
        );
        registry.register(
            "whatsapp_business",
            Arc::new(|_, settings| Ok(Arc::new(WhatsAppBusinessProvider::new(settings)?))),
        );
        registry.register(
            "waha_whatsapp",
            Arc::new(|_, settings| Ok(Arc::new(WahaWhatsappProvider::new(settings)?))),
        );
        registry.register(
            "firebase_push",
            Arc::new(|_, settings| Ok(Arc::new(FirebasePushProvider::new(settings)?))),
        );
        registry.register(
            "sendgrid_email",
            Arc::new(|_, settings| Ok(Arc::new(SendGridEmailProvider::new(settings)?))),
        );
        registry.register(
            "console",
            Arc::new(|channel, _| Ok(Arc::new(ConsoleProvider::new(channel)))),
        );
        registry
    }

    /// Adds or replaces a provider key.
    pub fn register(&mut self, key: impl Into<String>, constructor: ProviderConstructor) {
        let key = key.into();
        tracing::info!(provider = %key, "Registered notification provider");
        self.constructors.insert(key, constructor);
    }

    /// Registered keys, sorted.
    pub fn available(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Builds and validates the provider registered under `key`.
    ///
    /// A vendor adapter bound to a different channel than the one requested
    /// is rejected; `console` serves any channel.
    pub fn create(
        &self,
        key: &str,
        channel: Channel,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn NotificationProvider>, ProviderError> {
        let constructor = self.constructors.get(key).ok_or_else(|| {
            ProviderError::Config(format!(
                "Unknown provider type: {}. Available: {}",
                key,
                self.available().join(", ")
            ))
        })?;

        let provider = constructor(channel, settings)?;
        if provider.channel() != channel {
            return Err(ProviderError::Config(format!(
                "Provider {} sends {} messages and cannot serve the {} channel",
                key,
                provider.channel(),
                channel
            )));
        }
        provider.validate_config()?;
        Ok(provider)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available())
            .finish()
    }
}

// =============================================================================
// Shared HTTP plumbing
// =============================================================================

/// HTTP client with the vendor timeout applied to every request.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// The parts of a successful vendor response the adapters read.
#[derive(Debug)]
pub(crate) struct VendorResponse {
    pub message_id_header: Option<String>,
    pub body: String,
}

impl VendorResponse {
    /// Body parsed as JSON; `Value::Null` when it is empty or not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Sends a vendor request; non-2xx responses become [`ProviderError`]s.
pub(crate) async fn execute(request: RequestBuilder) -> Result<VendorResponse, ProviderError> {
    let response = request.send().await.map_err(transport_error)?;

    let status = response.status();
    let message_id_header = response
        .headers()
        .get("X-Message-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(ProviderError::from_response(status.as_u16(), &body));
    }

    Ok(VendorResponse {
        message_id_header,
        body,
    })
}

pub(crate) fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Transport(format!("request timed out: {}", error))
    } else {
        ProviderError::Transport(error.to_string())
    }
}

/// Checks the URL and key every HTTP adapter needs.
pub(crate) fn require_credentials(
    provider: &str,
    api_url: &str,
    api_key: &str,
) -> Result<(), ProviderError> {
    if api_url.trim().is_empty() {
        return Err(ProviderError::Config(format!(
            "API URL is not configured for {}",
            provider
        )));
    }
    if api_key.trim().is_empty() {
        return Err(ProviderError::Config(format!(
            "API key is not configured for {}",
            provider
        )));
    }
    Ok(())
}

pub(crate) fn trim_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn settings(provider: &str) -> ProviderSettings {
        ProviderSettings {
            provider: provider.to_string(),
            api_url: "https://vendor.example.com".to_string(),
            api_key: "secret".to_string(),
            timeout_secs: 5,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_available_is_sorted() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(
            registry.available(),
            vec![
                "console",
                "firebase_push",
                "generic_sms",
                "generic_whatsapp",
                "sendgrid_email",
                "twilio_sms",
                "waha_whatsapp",
                "whatsapp_business",
            ]
        );
    }

    #[test]
    fn test_unknown_provider_lists_keys() {
        let registry = ProviderRegistry::with_defaults();
        let err = registry
            .create("carrier_pigeon", Channel::Sms, &settings("carrier_pigeon"))
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.starts_with("Unknown provider type: carrier_pigeon. Available: console, "));
        assert!(message.contains("twilio_sms"));
    }

    #[test]
    fn test_create_validates_config() {
        let registry = ProviderRegistry::with_defaults();
        let mut s = settings("generic_sms");
        s.api_key.clear();
        let err = registry.create("generic_sms", Channel::Sms, &s).err()
            .unwrap();
        assert_eq!(err.to_string(), "API key is not configured for generic_sms");
    }

    #[test]
    fn test_create_rejects_channel_mismatch() {
        let registry = ProviderRegistry::with_defaults();
        let err = registry
            .create("generic_sms", Channel::Email, &settings("generic_sms"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("cannot serve the email channel"));
    }

    #[test]
    fn test_console_serves_any_channel() {
        let registry = ProviderRegistry::with_defaults();
        for channel in Channel::ALL {
            let provider = registry
                .create("console", channel, &ProviderSettings::default())
                .unwrap();
            assert_eq!(provider.channel(), channel);
        }
    }

    #[test]
    fn test_register_custom_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            "in_memory",
            Arc::new(|channel, _| {
                Ok(Arc::new(domain::services::MockNotificationProvider::new(channel)))
            }),
        );
        assert_eq!(registry.available(), vec!["in_memory"]);
        assert!(registry
            .create("in_memory", Channel::Push, &ProviderSettings::default())
            .is_ok());
    }

    #[test]
    fn test_require_credentials() {
        assert!(require_credentials("x", "https://a", "k").is_ok());
        assert_eq!(
            require_credentials("twilio_sms", " ", "k").unwrap_err().to_string(),
            "API URL is not configured for twilio_sms"
        );
    }
}
