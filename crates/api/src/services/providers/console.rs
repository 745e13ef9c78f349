//! Logging-only provider for development and channels without a vendor.

use domain::models::Channel;
use domain::services::{NotificationProvider, ProviderError, SendOptions, SendReceipt};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConsoleProvider {
    channel: Channel,
}

impl ConsoleProvider {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait::async_trait]
impl NotificationProvider for ConsoleProvider {
    fn name(&self) -> &str {
        "console"
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn format_payload(&self, recipient: &str, message: &str, options: &SendOptions) -> Value {
        json!({
            "channel": self.channel.as_str(),
            "to": recipient,
            "title": options.title,
            "message": message,
        })
    }

    async fn send(
        &self,
        recipient: &str,
        message: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, ProviderError> {
        let message_id = format!("console-{}", Uuid::new_v4());
        info!(
            channel = %self.channel,
            recipient = %shared::crypto::mask_sensitive(recipient),
            trip_id = ?options.trip_id,
            message_id = %message_id,
            body = %message,
            "Notification logged to console"
        );

        Ok(SendReceipt {
            provider_message_id: Some(message_id.clone()),
            status: Some("sent".to_string()),
            raw_response: json!({ "id": message_id }).to_string(),
        })
    }
}
