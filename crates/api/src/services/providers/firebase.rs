//! Firebase Cloud Messaging, legacy HTTP endpoint.

use domain::models::{Channel, NotificationType};
use domain::services::{
    truncate_response, NotificationProvider, ProviderError, SendOptions, SendReceipt,
};
use reqwest::Client;
use serde_json::{json, Value};

use super::{execute, http_client, require_credentials, trim_url};
use crate::config::ProviderSettings;

const NAME: &str = "firebase_push";
const DEFAULT_TITLE: &str = "Shuttle Notification";
const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

/// Sends to `{api_url}/fcm/send` with `Authorization: key=<server key>`.
pub struct FirebasePushProvider {
    client: Client,
    api_url: String,
    api_key: String,
}

impl FirebasePushProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(settings.timeout())?,
            api_url: trim_url(&settings.api_url),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait::async_trait]
impl NotificationProvider for FirebasePushProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> Channel {
        Channel::Push
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        require_credentials(NAME, &self.api_url, &self.api_key)
    }

    fn format_payload(&self, recipient: &str, message: &str, options: &SendOptions) -> Value {
        let notification_type = options.notification_type.unwrap_or(NotificationType::Custom);
        json!({
            "to": recipient,
            "notification": {
                "title": options.title.as_deref().unwrap_or(DEFAULT_TITLE),
                "body": message,
                "sound": "default",
            },
            "data": {
                "trip_id": options.trip_id.map(|id| id.to_string()),
                "notification_type": notification_type.as_str(),
                "click_action": CLICK_ACTION,
            },
            "priority": "high",
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
                .post(format!("{}/fcm/send", self.api_url))
                .header("Authorization", format!("key={}", self.api_key))
                .json(&self.format_payload(recipient, message, options)),
        )
        .await?;

        let data = response.json();
        // Legacy FCM answers 200 with per-token errors in results[]
        if data.get("failure").and_then(Value::as_i64).unwrap_or(0) > 0 {
            let error = data
                .pointer("/results/0/error")
                .and_then(Value::as_str)
                .unwrap_or("Unknown FCM error");
            return Err(ProviderError::InvalidRecipient(error.to_string()));
        }

        let provider_message_id = match data
            .get("message_id")
            .or_else(|| data.pointer("/results/0/message_id"))
        {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };

        Ok(SendReceipt {
            provider_message_id,
            status: None,
            raw_response: format!(
                "Push notification sent successfully. Response: {}",
                truncate_response(&response.body)
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(api_url: &str) -> ProviderSettings {
        ProviderSettings {
            provider: NAME.to_string(),
            api_url: api_url.to_string(),
            api_key: "server-key".to_string(),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_payload_defaults() {
        let provider = FirebasePushProvider::new(&settings("https://fcm.googleapis.com")).unwrap();
        let payload = provider.format_payload("device-token", "Hello", &SendOptions::default());

        assert_eq!(payload["to"], "device-token");
        assert_eq!(payload["notification"]["title"], DEFAULT_TITLE);
        assert_eq!(payload["notification"]["sound"], "default");
        assert_eq!(payload["data"]["notification_type"], "custom");
        assert!(payload["data"]["trip_id"].is_null());
        assert_eq!(payload["priority"], "high");
    }

    #[test]
    fn test_payload_with_trip() {
        let provider = FirebasePushProvider::new(&settings("https://fcm.googleapis.com")).unwrap();
        let options = SendOptions {
            title: Some("Trip started".to_string()),
            trip_id: Some(42),
            notification_type: Some(NotificationType::TripStarted),
            ..Default::default()
        };
        let payload = provider.format_payload("device-token", "Go", &options);

        assert_eq!(payload["notification"]["title"], "Trip started");
        assert_eq!(payload["data"]["trip_id"], "42");
        assert_eq!(payload["data"]["notification_type"], "trip_started");
    }

    #[tokio::test]
    async fn test_send_reads_result_message_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/fcm/send")
                    .header("authorization", "key=server-key");
                then.status(200).json_body(serde_json::json!({
                    "multicast_id": 1,
                    "success": 1,
                    "failure": 0,
                    "results": [{"message_id": "0:1500415314455276%31bd1c96"}]
                }));
            })
            .await;

        let provider = FirebasePushProvider::new(&settings(&server.base_url())).unwrap();
        let receipt = provider
            .send("device-token", "Hello", &SendOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            receipt.provider_message_id.as_deref(),
            Some("0:1500415314455276%31bd1c96")
        );
    }

    #[tokio::test]
    async fn test_unregistered_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/fcm/send");
                then.status(200).json_body(serde_json::json!({
                    "success": 0,
                    "failure": 1,
                    "results": [{"error": "NotRegistered"}]
                }));
            })
            .await;

        let provider = FirebasePushProvider::new(&settings(&server.base_url())).unwrap();
        let err = provider
            .send("stale-token", "Hello", &SendOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::InvalidRecipient("NotRegistered".to_string()));
    }
}
