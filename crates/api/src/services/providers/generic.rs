//! Generic JSON gateway used by simple SMS and WhatsApp vendors.

use domain::models::Channel;
use domain::services::{
    truncate_response, NotificationProvider, ProviderError, SendOptions, SendReceipt,
};
use reqwest::Client;
use serde_json::{json, Value};

use super::{execute, http_client, require_credentials};
use crate::config::ProviderSettings;

/// POSTs `{to, message, api_key}` to `api_url`.
///
/// The message id comes from the `X-Message-Id` response header, falling back
/// to an `id` field in the body.
pub struct GenericHttpProvider {
    name: &'static str,
    channel: Channel,
    client: Client,
    api_url: String,
    api_key: String,
}

impl GenericHttpProvider {
    pub fn new(
        name: &'static str,
        channel: Channel,
        settings: &ProviderSettings,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name,
            channel,
            client: http_client(settings.timeout())?,
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait::async_trait]
impl NotificationProvider for GenericHttpProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        require_credentials(self.name, &self.api_url, &self.api_key)
    }

    fn format_payload(&self, recipient: &str, message: &str, _options: &SendOptions) -> Value {
        json!({
            "to": recipient,
            "message": message,
            "api_key": self.api_key,
        })
    }

    async fn send(
        &self,
        recipient: &str,
        message: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, ProviderError> {
        self.validate_config()?;

        let response = execute(
            self.client
                .post(&self.api_url)
                .json(&self.format_payload(recipient, message, options)),
        )
        .await?;

        let provider_message_id = response.message_id_header.clone().or_else(|| {
            match response.json().get("id") {
                Some(Value::String(id)) => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            }
        });

        Ok(SendReceipt {
            provider_message_id,
            status: None,
            raw_response: format!(
                "{} sent successfully. Response: {}",
                self.channel.label(),
                truncate_response(&response.body)
            ),
        })
    }
}
