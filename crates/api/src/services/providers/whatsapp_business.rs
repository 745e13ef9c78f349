//! WhatsApp Business Cloud API.

use domain::models::Channel;
use domain::services::{
    truncate_response, NotificationProvider, ProviderError, SendOptions, SendReceipt,
};
use reqwest::Client;
use serde_json::{json, Value};

use super::{execute, http_client, require_credentials, trim_url};
use crate::config::ProviderSettings;

const NAME: &str = "whatsapp_business";

pub struct WhatsAppBusinessProvider {
    client: Client,
    api_url: String,
    api_key: String,
    phone_number_id: Option<String>,
}

impl WhatsAppBusinessProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(settings.timeout())?,
            api_url: trim_url(&settings.api_url),
            api_key: settings.api_key.clone(),
            phone_number_id: settings.extra("phone_number_id").map(str::to_string),
        })
    }
}

#[async_trait::async_trait]
impl NotificationProvider for WhatsAppBusinessProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        require_credentials(NAME, &self.api_url, &self.api_key)?;
        if self.phone_number_id.is_none() {
            return Err(ProviderError::Config(
                "WhatsApp phone_number_id is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn format_payload(&self, recipient: &str, message: &str, _options: &SendOptions) -> Value {
        json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": message,
            },
        })
    }

    async fn send(
        &self,
        recipient: &str,
        message: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, ProviderError> {
        self.validate_config()?;
        let phone_number_id = self.phone_number_id.as_deref().unwrap_or_default();

        let response = execute(
            self.client
                .post(format!("{}/{}/messages", self.api_url, phone_number_id))
                .bearer_auth(&self.api_key)
                .json(&self.format_payload(recipient, message, options)),
        )
        .await?;

        let provider_message_id = response
            .json()
            .pointer("/messages/0/id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(SendReceipt {
            provider_message_id,
            status: None,
            raw_response: format!(
                "WhatsApp sent successfully. Response: {}",
                truncate_response(&response.body)
            ),
        })
    }
}
