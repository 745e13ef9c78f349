//! WAHA, the self-hosted WhatsApp HTTP gateway.
//!
//! [`WahaClient`] wraps the session management and chatting endpoints;
//! [`WahaWhatsappProvider`] adapts `sendText` to the provider contract.
//! Session endpoints live under `/api/sessions`, authentication under
//! `/api/{session}/auth/*` and chatting under `/api/send*`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use domain::models::Channel;
use domain::services::{
    truncate_response, NotificationProvider, ProviderError, SendOptions, SendReceipt,
};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use super::{http_client, require_credentials, trim_url};
use crate::config::{ProviderSettings, WahaConfig};

const NAME: &str = "waha_whatsapp";
pub const DEFAULT_SESSION: &str = "default";
const DEFAULT_EVENTS: [&str; 3] = ["message", "message.ack", "state.change"];

// =============================================================================
// Errors and session status
// =============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WahaError {
    #[error("WAHA API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("WAHA request failed: {0}")]
    Transport(String),

    #[error("WAHA returned an unreadable response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Config(String),
}

impl WahaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, WahaError::Api { status: 404, .. })
    }
}

impl From<WahaError> for ProviderError {
    fn from(err: WahaError) -> Self {
        match err {
            WahaError::Api { status: 429, message } => ProviderError::RateLimited(message),
            WahaError::Api { status, message } => ProviderError::Http {
                status,
                body: truncate_response(&message),
                message,
            },
            WahaError::Transport(msg) => ProviderError::Transport(msg),
            WahaError::InvalidResponse(msg) => ProviderError::InvalidResponse(msg),
            WahaError::Config(msg) => ProviderError::Config(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Stopped,
    Starting,
    ScanQrCode,
    Working,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Stopped => "STOPPED",
            SessionStatus::Starting => "STARTING",
            SessionStatus::ScanQrCode => "SCAN_QR_CODE",
            SessionStatus::Working => "WORKING",
            SessionStatus::Failed => "FAILED",
        }
    }

    /// Reads `status`, falling back to `engine.status`.
    pub fn from_session(session: &Value) -> Option<Self> {
        session
            .get("status")
            .and_then(Value::as_str)
            .or_else(|| session.pointer("/engine/status").and_then(Value::as_str))
            .and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(SessionStatus::Stopped),
            "STARTING" => Ok(SessionStatus::Starting),
            "SCAN_QR_CODE" => Ok(SessionStatus::ScanQrCode),
            "WORKING" => Ok(SessionStatus::Working),
            "FAILED" => Ok(SessionStatus::Failed),
            _ => Err(format!("Unknown WAHA session status: {}", s)),
        }
    }
}

/// `+966 50-123 4567` becomes `966501234567@c.us`. Existing chat ids
/// (anything with `@`, including groups) pass through.
pub fn format_phone_to_chat_id(phone: &str) -> String {
    if phone.contains('@') {
        return phone.to_string();
    }
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    format!("{}@c.us", digits)
}

// =============================================================================
// Client
// =============================================================================

#[derive(Debug, Clone)]
pub struct WahaClient {
    client: Client,
    api_url: String,
    api_key: String,
    session: String,
    webhook_url: Option<String>,
    webhook_events: Vec<String>,
}

impl WahaClient {
    pub fn new(
        api_url: &str,
        api_key: &str,
        session: &str,
        timeout: Duration,
    ) -> Result<Self, WahaError> {
        let client = http_client(timeout).map_err(|e| WahaError::Config(e.to_string()))?;
        let session = if session.is_empty() {
            DEFAULT_SESSION
        } else {
            session
        };

        Ok(Self {
            client,
            api_url: trim_url(api_url),
            api_key: api_key.to_string(),
            session: session.to_string(),
            webhook_url: None,
            webhook_events: DEFAULT_EVENTS.iter().map(|e| e.to_string()).collect(),
        })
    }

    pub fn from_config(config: &WahaConfig) -> Result<Self, WahaError> {
        if config.api_url.trim().is_empty() {
            return Err(WahaError::Config("WAHA api_url is not configured".to_string()));
        }
        let client = Self::new(
            &config.api_url,
            &config.api_key,
            &config.session,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(client.with_webhook(config.webhook_url.clone(), config.webhook_events.clone()))
    }

    /// Webhook registered on sessions this client creates.
    pub fn with_webhook(mut self, url: Option<String>, events: Vec<String>) -> Self {
        self.webhook_url = url.filter(|u| !u.is_empty());
        if !events.is_empty() {
            self.webhook_events = events;
        }
        self
    }

    pub fn default_session(&self) -> &str {
        &self.session
    }

    fn session_name<'a>(&'a self, session: Option<&'a str>) -> &'a str {
        session.filter(|s| !s.is_empty()).unwrap_or(&self.session)
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<Value, WahaError> {
        let url = format!("{}{}", self.api_url, endpoint);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("X-Api-Key", &self.api_key);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            error!(method = %method, endpoint, error = %e, "WAHA request error");
            WahaError::Transport(e.to_string())
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| WahaError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .or_else(|| v.get("error"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| {
                    if text.is_empty() {
                        status.to_string()
                    } else {
                        truncate_response(&text)
                    }
                });
            error!(status = status.as_u16(), endpoint, error = %message, "WAHA API error");
            return Err(WahaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(json!({ "status": "success" }));
        }
        serde_json::from_str(&text).map_err(|e| WahaError::InvalidResponse(e.to_string()))
    }

    async fn get(&self, endpoint: &str) -> Result<Value, WahaError> {
        self.request(Method::GET, endpoint, None, &[]).await
    }

    async fn post(&self, endpoint: &str, body: Option<&Value>) -> Result<Value, WahaError> {
        self.request(Method::POST, endpoint, body, &[]).await
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    pub async fn list_sessions(&self) -> Result<Value, WahaError> {
        self.get("/api/sessions").await
    }

    /// Creates a session, registering the configured webhook if any.
    /// Keys in `config` override the generated webhook config.
    pub async fn create_session(
        &self,
        session: Option<&str>,
        start: bool,
        config: Option<Value>,
    ) -> Result<Value, WahaError> {
        let name = self.session_name(session);
        let mut payload = json!({ "name": name, "start": start });

        let mut session_config = serde_json::Map::new();
        if let Some(url) = &self.webhook_url {
            session_config.insert(
                "webhooks".to_string(),
                json!([{ "url": url, "events": self.webhook_events }]),
            );
        }
        if let Some(Value::Object(extra)) = config {
            session_config.extend(extra);
        }
        if !session_config.is_empty() {
            payload["config"] = Value::Object(session_config);
        }

        info!(session = name, start, "Creating WAHA session");
        self.post("/api/sessions", Some(&payload)).await
    }

    pub async fn get_session(&self, session: Option<&str>) -> Result<Value, WahaError> {
        self.get(&format!("/api/sessions/{}", self.session_name(session)))
            .await
    }

    pub async fn update_session_config(
        &self,
        session: Option<&str>,
        config: Value,
    ) -> Result<Value, WahaError> {
        let body = json!({ "config": config });
        self.request(
            Method::PUT,
            &format!("/api/sessions/{}", self.session_name(session)),
            Some(&body),
            &[],
        )
        .await
    }

    pub async fn delete_session(&self, session: Option<&str>) -> Result<Value, WahaError> {
        self.request(
            Method::DELETE,
            &format!("/api/sessions/{}", self.session_name(session)),
            None,
            &[],
        )
        .await
    }

    pub async fn start_session(&self, session: Option<&str>) -> Result<Value, WahaError> {
        self.session_action(session, "start").await
    }

    pub async fn stop_session(&self, session: Option<&str>) -> Result<Value, WahaError> {
        self.session_action(session, "stop").await
    }

    pub async fn restart_session(&self, session: Option<&str>) -> Result<Value, WahaError> {
        self.session_action(session, "restart").await
    }

    /// Unlinks the WhatsApp account; the session itself remains.
    pub async fn logout_session(&self, session: Option<&str>) -> Result<Value, WahaError> {
        self.session_action(session, "logout").await
    }

    async fn session_action(&self, session: Option<&str>, action: &str) -> Result<Value, WahaError> {
        let name = self.session_name(session);
        info!(session = name, action, "WAHA session action");
        self.post(&format!("/api/sessions/{}/{}", name, action), None)
            .await
    }

    /// Account linked to the session.
    pub async fn get_me(&self, session: Option<&str>) -> Result<Value, WahaError> {
        self.get(&format!("/api/sessions/{}/me", self.session_name(session)))
            .await
    }

    /// `format` is `image` (base64 PNG) or `raw`.
    pub async fn get_qr_code(
        &self,
        session: Option<&str>,
        format: &str,
    ) -> Result<Value, WahaError> {
        self.request(
            Method::GET,
            &format!("/api/{}/auth/qr", self.session_name(session)),
            None,
            &[("format", format)],
        )
        .await
    }

    pub async fn request_pairing_code(
        &self,
        session: Option<&str>,
        phone_number: &str,
    ) -> Result<Value, WahaError> {
        let body = json!({ "phoneNumber": phone_number });
        self.post(
            &format!("/api/{}/auth/request-code", self.session_name(session)),
            Some(&body),
        )
        .await
    }

    pub async fn is_session_ready(&self, session: Option<&str>) -> bool {
        match self.get_session(session).await {
            Ok(info) => SessionStatus::from_session(&info) == Some(SessionStatus::Working),
            Err(_) => false,
        }
    }

    /// Starts a stopped session and creates a missing one. Other states are
    /// returned as they are; this never waits for `WORKING`.
    pub async fn ensure_session_ready(&self, session: Option<&str>) -> Result<Value, WahaError> {
        let name = self.session_name(session);
        match self.get_session(Some(name)).await {
            Ok(info) => match SessionStatus::from_session(&info) {
                Some(SessionStatus::Stopped) => self.start_session(Some(name)).await,
                _ => Ok(info),
            },
            Err(e) => {
                warn!(session = name, error = %e, "WAHA session unavailable, creating it");
                self.create_session(Some(name), true, None).await
            }
        }
    }

    // -------------------------------------------------------------------------
    // Messaging
    // -------------------------------------------------------------------------

    pub async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let body = json!({
            "chatId": chat_id,
            "text": text,
            "session": self.session_name(session),
            "linkPreview": true,
        });
        self.post("/api/sendText", Some(&body)).await
    }

    pub async fn send_image(
        &self,
        chat_id: &str,
        image_url: &str,
        caption: &str,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let body = json!({
            "chatId": chat_id,
            "file": { "url": image_url },
            "caption": caption,
            "session": self.session_name(session),
        });
        self.post("/api/sendImage", Some(&body)).await
    }

    pub async fn send_file(
        &self,
        chat_id: &str,
        file_url: &str,
        filename: Option<&str>,
        caption: Option<&str>,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let mut body = json!({
            "chatId": chat_id,
            "file": { "url": file_url },
            "session": self.session_name(session),
        });
        if let Some(filename) = filename.filter(|f| !f.is_empty()) {
            body["file"]["filename"] = json!(filename);
        }
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            body["caption"] = json!(caption);
        }
        self.post("/api/sendFile", Some(&body)).await
    }

    /// OGG/Opus is what WhatsApp clients expect.
    pub async fn send_voice(
        &self,
        chat_id: &str,
        voice_url: &str,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let body = json!({
            "chatId": chat_id,
            "file": { "url": voice_url },
            "session": self.session_name(session),
        });
        self.post("/api/sendVoice", Some(&body)).await
    }

    pub async fn send_video(
        &self,
        chat_id: &str,
        video_url: &str,
        caption: &str,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let body = json!({
            "chatId": chat_id,
            "file": { "url": video_url },
            "caption": caption,
            "session": self.session_name(session),
        });
        self.post("/api/sendVideo", Some(&body)).await
    }

    pub async fn send_location(
        &self,
        chat_id: &str,
        latitude: f64,
        longitude: f64,
        name: Option<&str>,
        address: Option<&str>,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let mut body = json!({
            "chatId": chat_id,
            "latitude": latitude,
            "longitude": longitude,
            "session": self.session_name(session),
        });
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            body["name"] = json!(name);
        }
        if let Some(address) = address.filter(|a| !a.is_empty()) {
            body["address"] = json!(address);
        }
        self.post("/api/sendLocation", Some(&body)).await
    }

    pub async fn send_contact_vcard(
        &self,
        chat_id: &str,
        vcard: &str,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let body = json!({
            "chatId": chat_id,
            "vcard": vcard,
            "session": self.session_name(session),
        });
        self.post("/api/sendContactVcard", Some(&body)).await
    }

    pub async fn send_poll(
        &self,
        chat_id: &str,
        name: &str,
        options: &[String],
        multiple_answers: bool,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let body = json!({
            "chatId": chat_id,
            "name": name,
            "options": options,
            "multipleAnswers": multiple_answers,
            "session": self.session_name(session),
        });
        self.post("/api/sendPoll", Some(&body)).await
    }

    /// Read receipt for an inbound message.
    pub async fn send_seen(
        &self,
        chat_id: &str,
        message_id: &str,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let body = json!({
            "chatId": chat_id,
            "messageId": message_id,
            "session": self.session_name(session),
        });
        self.post("/api/sendSeen", Some(&body)).await
    }

    pub async fn start_typing(&self, chat_id: &str, session: Option<&str>) -> Result<Value, WahaError> {
        let body = json!({ "chatId": chat_id, "session": self.session_name(session) });
        self.post("/api/startTyping", Some(&body)).await
    }

    pub async fn stop_typing(&self, chat_id: &str, session: Option<&str>) -> Result<Value, WahaError> {
        let body = json!({ "chatId": chat_id, "session": self.session_name(session) });
        self.post("/api/stopTyping", Some(&body)).await
    }

    /// An empty `reaction` removes a previous one.
    pub async fn send_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        reaction: &str,
        session: Option<&str>,
    ) -> Result<Value, WahaError> {
        let body = json!({
            "chatId": chat_id,
            "messageId": message_id,
            "reaction": reaction,
            "session": self.session_name(session),
        });
        self.request(Method::PUT, "/api/reaction", Some(&body), &[])
            .await
    }
}

/// Message id from a send response: `id` as a string or `id._serialized`.
pub fn message_id_from_response(response: &Value) -> Option<String> {
    match response.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(id @ Value::Object(_)) => id
            .get("_serialized")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

// =============================================================================
// Provider adapter
// =============================================================================

pub struct WahaWhatsappProvider {
    client: WahaClient,
    api_url: String,
    api_key: String,
}

impl WahaWhatsappProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let session = settings.extra("session").unwrap_or(DEFAULT_SESSION);
        let client = WahaClient::new(
            &settings.api_url,
            &settings.api_key,
            session,
            settings.timeout(),
        )?;
        Ok(Self {
            client,
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    pub fn from_client(client: WahaClient) -> Self {
        Self {
            api_url: client.api_url.clone(),
            api_key: client.api_key.clone(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl NotificationProvider for WahaWhatsappProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        require_credentials(NAME, &self.api_url, &self.api_key)
    }

    fn format_payload(&self, recipient: &str, message: &str, _options: &SendOptions) -> Value {
        json!({
            "chatId": format_phone_to_chat_id(recipient),
            "text": message,
            "session": self.client.default_session(),
            "linkPreview": true,
        })
    }

    async fn send(
        &self,
        recipient: &str,
        message: &str,
        _options: &SendOptions,
    ) -> Result<SendReceipt, ProviderError> {
        self.validate_config()?;
        let chat_id = format_phone_to_chat_id(recipient);

        let response = self.client.send_text(&chat_id, message, None).await?;

        Ok(SendReceipt {
            provider_message_id: message_id_from_response(&response),
            status: None,
            raw_response: format!(
                "WhatsApp sent successfully. Response: {}",
                truncate_response(&response.to_string())
            ),
        })
    }
}
