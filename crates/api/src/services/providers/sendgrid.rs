//! SendGrid v3 mail send.

use domain::models::Channel;
use domain::services::{
    truncate_response, NotificationProvider, ProviderError, SendOptions, SendReceipt,
};
use reqwest::Client;
use serde_json::{json, Value};

use super::{execute, http_client, require_credentials};
use crate::config::ProviderSettings;

const NAME: &str = "sendgrid_email";
const DEFAULT_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const DEFAULT_SUBJECT: &str = "Shuttle Notification";

pub struct SendGridEmailProvider {
    client: Client,
    api_url: String,
    api_key: String,
    from_email: Option<String>,
    from_name: Option<String>,
}

impl SendGridEmailProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let api_url = if settings.api_url.trim().is_empty() {
            DEFAULT_API_URL.to_string()
        } else {
            settings.api_url.clone()
        };

        Ok(Self {
            client: http_client(settings.timeout())?,
            api_url,
            api_key: settings.api_key.clone(),
            from_email: settings.extra("from_email").map(str::to_string),
            from_name: settings.extra("from_name").map(str::to_string),
        })
    }
}

#[async_trait::async_trait]
impl NotificationProvider for SendGridEmailProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        require_credentials(NAME, &self.api_url, &self.api_key)?;
        if self.from_email.is_none() {
            return Err(ProviderError::Config(
                "SendGrid from_email is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn format_payload(&self, recipient: &str, message: &str, options: &SendOptions) -> Value {
        let mut from = json!({ "email": self.from_email.as_deref().unwrap_or_default() });
        if let Some(name) = &self.from_name {
            from["name"] = json!(name);
        }

        let mut content = vec![json!({ "type": "text/plain", "value": message })];
        if let Some(html) = &options.html_body {
            content.push(json!({ "type": "text/html", "value": html }));
        }

        json!({
            "personalizations": [{ "to": [{ "email": recipient }] }],
            "from": from,
            "subject": options.title.as_deref().unwrap_or(DEFAULT_SUBJECT),
            "content": content,
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
                .bearer_auth(&self.api_key)
                .json(&self.format_payload(recipient, message, options)),
        )
        .await?;

        // 202 Accepted with an empty body; the id only travels in the header
        Ok(SendReceipt {
            provider_message_id: response.message_id_header.clone(),
            status: None,
            raw_response: format!(
                "Email accepted. Response: {}",
                truncate_response(&response.body)
            ),
        })
    }
}
