//! Twilio Programmable SMS.

use domain::models::Channel;
use domain::services::{
    truncate_response, NotificationProvider, ProviderError, SendOptions, SendReceipt,
};
use reqwest::Client;
use serde_json::{json, Value};

use super::{execute, http_client, require_credentials, trim_url};
use crate::config::ProviderSettings;

const NAME: &str = "twilio_sms";

/// Posts form-encoded messages to `{api_url}/Messages.json`.
///
/// `api_url` is the account base, e.g.
/// `https://api.twilio.com/2010-04-01/Accounts/<sid>`.
pub struct TwilioSmsProvider {
    client: Client,
    api_url: String,
    api_key: String,
    account_sid: Option<String>,
    from_number: Option<String>,
}

impl TwilioSmsProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(settings.timeout())?,
            api_url: trim_url(&settings.api_url),
            api_key: settings.api_key.clone(),
            account_sid: settings.extra("account_sid").map(str::to_string),
            from_number: settings.extra("from_number").map(str::to_string),
        })
    }
}

#[async_trait::async_trait]
impl NotificationProvider for TwilioSmsProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        require_credentials(NAME, &self.api_url, &self.api_key)?;
        if self.account_sid.is_none() {
            return Err(ProviderError::Config(
                "Twilio account_sid is not configured".to_string(),
            ));
        }
        if self.from_number.is_none() {
            return Err(ProviderError::Config(
                "Twilio from_number is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn format_payload(&self, recipient: &str, message: &str, _options: &SendOptions) -> Value {
        json!({
            "From": self.from_number.as_deref().unwrap_or_default(),
            "To": recipient,
            "Body": message,
        })
    }

    async fn send(
        &self,
        recipient: &str,
        message: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, ProviderError> {
        self.validate_config()?;
        let account_sid = self.account_sid.as_deref().unwrap_or_default();
        let form = self.format_payload(recipient, message, options);

        let response = execute(
            self.client
                .post(format!("{}/Messages.json", self.api_url))
                .basic_auth(account_sid, Some(&self.api_key))
                .form(&form),
        )
        .await?;

        let data = response.json();
        let provider_message_id = data
            .get("sid")
            .and_then(Value::as_str)
            .map(str::to_string);
        if provider_message_id.is_none() {
            tracing::warn!(provider = NAME, "Twilio response carried no message sid");
        }

        Ok(SendReceipt {
            provider_message_id,
            status: data
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
            raw_response: truncate_response(&response.body),
        })
    }
}
