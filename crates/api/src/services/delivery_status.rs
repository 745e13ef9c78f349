//! Parsing of inbound delivery-status callbacks.
//!
//! Every vendor reports delivery progress in its own shape. The parsers here
//! reduce them to [`StatusUpdate`]s; applying them is the notification
//! service's job.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use domain::models::{NotificationStatus, StatusUpdate};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("Missing required parameters")]
    MissingParameters,

    #[error("Unknown delivery status: {0}")]
    UnknownStatus(String),
}

/// Accepts RFC 3339 strings and unix seconds (number or numeric string).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(from_unix)),
        Value::Number(n) => n.as_i64().and_then(from_unix),
        _ => None,
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn to_status(raw: &str) -> Result<NotificationStatus, CallbackError> {
    NotificationStatus::from_provider_status(raw)
        .ok_or_else(|| CallbackError::UnknownStatus(raw.to_string()))
}

// =============================================================================
// Generic JSON
// =============================================================================

/// `{provider_message_id, status, error_message?, timestamp?}`.
pub fn parse_generic(body: &Value) -> Result<StatusUpdate, CallbackError> {
    let message_id = non_empty(body.get("provider_message_id").and_then(Value::as_str))
        .ok_or(CallbackError::MissingParameters)?;
    let status = non_empty(body.get("status").and_then(Value::as_str))
        .ok_or(CallbackError::MissingParameters)?;

    Ok(StatusUpdate {
        provider_message_id: message_id.to_string(),
        status: to_status(status)?,
        error_message: body
            .get("error_message")
            .and_then(Value::as_str)
            .map(str::to_string),
        timestamp: body.get("timestamp").and_then(parse_timestamp),
    })
}

// =============================================================================
// SMS gateways (form-encoded, Twilio naming accepted)
// =============================================================================

pub fn parse_sms_form(fields: &HashMap<String, String>) -> Result<StatusUpdate, CallbackError> {
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| non_empty(fields.get(*name).map(String::as_str)))
            .map(str::to_string)
    };

    let message_id = field(&["message_id", "MessageSid", "SmsSid"]).ok_or(CallbackError::MissingParameters)?;
    let status = field(&["status", "MessageStatus", "SmsStatus"]).ok_or(CallbackError::MissingParameters)?;

    let error_message = field(&["error_message", "ErrorMessage"]).or_else(|| {
        field(&["ErrorCode"]).map(|code| format!("Provider error code {}", code))
    });

    Ok(StatusUpdate {
        provider_message_id: message_id,
        status: to_status(&status)?,
        error_message,
        timestamp: None,
    })
}

// =============================================================================
// WhatsApp Business Cloud API
// =============================================================================

/// Every status in `entry[].changes[].value.statuses[]`.
///
/// Statuses without an id, or with a word we do not track, are skipped.
pub fn parse_whatsapp_business(body: &Value) -> Vec<StatusUpdate> {
    let statuses = body
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("changes").and_then(Value::as_array))
        .flatten()
        .filter_map(|change| change.pointer("/value/statuses").and_then(Value::as_array))
        .flatten();

    statuses
        .filter_map(|status| {
            let id = non_empty(status.get("id").and_then(Value::as_str))?;
            let raw = status.get("status").and_then(Value::as_str)?;
            let parsed = match NotificationStatus::from_provider_status(raw) {
                Some(parsed) => parsed,
                None => {
                    tracing::debug!(status = raw, "Skipping untracked WhatsApp status");
                    return None;
                }
            };
            let error_message = status.pointer("/errors/0").and_then(|e| {
                e.get("message")
                    .or_else(|| e.get("title"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

            Some(StatusUpdate {
                provider_message_id: id.to_string(),
                status: parsed,
                error_message,
                timestamp: status.get("timestamp").and_then(parse_timestamp),
            })
        })
        .collect()
}

// =============================================================================
// WAHA events
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WahaEvent {
    pub event: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WahaEventKind {
    Message,
    MessageAny,
    MessageAck,
    MessageReaction,
    StateChange,
    GroupJoin,
    GroupLeave,
    PresenceUpdate,
    PollVote,
    PollVoteFailed,
    ChatArchive,
    CallReceived,
    CallAccepted,
    CallRejected,
    Unknown(String),
}

impl WahaEventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "message" => WahaEventKind::Message,
            "message.any" => WahaEventKind::MessageAny,
            "message.ack" => WahaEventKind::MessageAck,
            "message.reaction" => WahaEventKind::MessageReaction,
            "state.change" | "session.status" => WahaEventKind::StateChange,
            "group.join" => WahaEventKind::GroupJoin,
            "group.leave" => WahaEventKind::GroupLeave,
            "presence.update" => WahaEventKind::PresenceUpdate,
            "poll.vote" => WahaEventKind::PollVote,
            "poll.vote.failed" => WahaEventKind::PollVoteFailed,
            "chat.archive" => WahaEventKind::ChatArchive,
            "call.received" => WahaEventKind::CallReceived,
            "call.accepted" => WahaEventKind::CallAccepted,
            "call.rejected" => WahaEventKind::CallRejected,
            other => WahaEventKind::Unknown(other.to_string()),
        }
    }
}

impl WahaEvent {
    pub fn kind(&self) -> WahaEventKind {
        WahaEventKind::from_name(&self.event)
    }

    /// Status update carried by a `message.ack` payload.
    pub fn ack_update(&self) -> Option<StatusUpdate> {
        let id = match self.payload.get("id")? {
            Value::String(id) => id.clone(),
            id @ Value::Object(_) => id.get("_serialized")?.as_str()?.to_string(),
            _ => return None,
        };
        let ack = self.payload.get("ack").and_then(Value::as_i64)?;
        let status = NotificationStatus::from_ack(ack)?;

        Some(StatusUpdate {
            provider_message_id: id,
            status,
            error_message: (status == NotificationStatus::Failed)
                .then(|| "WhatsApp reported the message as failed".to_string()),
            timestamp: self.payload.get("timestamp").and_then(parse_timestamp),
        })
    }

    /// Session status reported by a `state.change` event.
    pub fn session_status(&self) -> Option<&str> {
        self.payload
            .get("status")
            .or_else(|| self.payload.get("state"))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generic_callback() {
        let update = parse_generic(&json!({
            "provider_message_id": "msg_123456",
            "status": "delivered",
            "timestamp": "2025-01-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(update.provider_message_id, "msg_123456");
        assert_eq!(update.status, NotificationStatus::Delivered);
        assert_eq!(update.timestamp.unwrap().to_rfc3339(), "2025-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_generic_missing_fields() {
        assert_eq!(
            parse_generic(&json!({"status": "delivered"})),
            Err(CallbackError::MissingParameters)
        );
        assert_eq!(
            parse_generic(&json!({"provider_message_id": "m", "status": ""})),
            Err(CallbackError::MissingParameters)
        );
    }

    #[test]
    fn test_generic_unknown_status() {
        assert_eq!(
            parse_generic(&json!({"provider_message_id": "m", "status": "teleported"})),
            Err(CallbackError::UnknownStatus("teleported".to_string()))
        );
    }

    #[test]
    fn test_sms_form_twilio_names() {
        let fields = HashMap::from([
            ("MessageSid".to_string(), "SM42".to_string()),
            ("MessageStatus".to_string(), "undelivered".to_string()),
            ("ErrorCode".to_string(), "30003".to_string()),
        ]);
        let update = parse_sms_form(&fields).unwrap();

        assert_eq!(update.provider_message_id, "SM42");
        assert_eq!(update.status, NotificationStatus::Failed);
        assert_eq!(update.error_message.as_deref(), Some("Provider error code 30003"));
    }

    #[test]
    fn test_sms_form_status_mapping() {
        for (raw, expected) in [
            ("queued", NotificationStatus::Pending),
            ("accepted", NotificationStatus::Pending),
            ("sending", NotificationStatus::Sent),
            ("sent", NotificationStatus::Sent),
            ("delivered", NotificationStatus::Delivered),
            ("read", NotificationStatus::Read),
            ("failed", NotificationStatus::Failed),
        ] {
            let fields = HashMap::from([
                ("message_id".to_string(), "m1".to_string()),
                ("status".to_string(), raw.to_string()),
            ]);
            assert_eq!(parse_sms_form(&fields).unwrap().status, expected, "{raw}");
        }
    }

    #[test]
    fn test_whatsapp_business_statuses() {
        let body = json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "statuses": [
                            {"id": "wamid.1", "status": "delivered", "timestamp": "1736935200"},
                            {"id": "wamid.2", "status": "failed",
                             "errors": [{"code": 131026, "title": "Message undeliverable"}]},
                            {"id": "wamid.3", "status": "deleted"}
                        ]
                    }
                }]
            }]
        });
        let updates = parse_whatsapp_business(&body);

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].status, NotificationStatus::Delivered);
        assert_eq!(updates[0].timestamp.unwrap().timestamp(), 1736935200);
        assert_eq!(updates[1].error_message.as_deref(), Some("Message undeliverable"));
    }

    #[test]
    fn test_whatsapp_business_without_statuses() {
        assert!(parse_whatsapp_business(&json!({"entry": [{"changes": [{"value": {}}]}]})).is_empty());
        assert!(parse_whatsapp_business(&json!("garbage")).is_empty());
    }

    #[test]
    fn test_waha_ack_levels() {
        let event = |ack: i64| WahaEvent {
            event: "message.ack".to_string(),
            session: Some("default".to_string()),
            payload: json!({"id": {"_serialized": "true_966@c.us_AAA"}, "ack": ack}),
        };

        assert_eq!(event(1).ack_update().unwrap().status, NotificationStatus::Sent);
        assert_eq!(event(2).ack_update().unwrap().status, NotificationStatus::Delivered);
        assert_eq!(event(4).ack_update().unwrap().status, NotificationStatus::Read);
        let failed = event(-1).ack_update().unwrap();
        assert_eq!(failed.status, NotificationStatus::Failed);
        assert!(failed.error_message.is_some());
        assert!(event(9).ack_update().is_none());
        assert_eq!(event(3).ack_update().unwrap().provider_message_id, "true_966@c.us_AAA");
    }

    #[test]
    fn test_waha_event_kinds() {
        assert_eq!(WahaEventKind::from_name("poll.vote.failed"), WahaEventKind::PollVoteFailed);
        assert_eq!(WahaEventKind::from_name("call.rejected"), WahaEventKind::CallRejected);
        assert_eq!(
            WahaEventKind::from_name("label.upsert"),
            WahaEventKind::Unknown("label.upsert".to_string())
        );
    }

    #[test]
    fn test_waha_state_change() {
        let event: WahaEvent = serde_json::from_value(json!({
            "event": "state.change",
            "session": "default",
            "payload": {"status": "WORKING"}
        }))
        .unwrap();
        assert_eq!(event.kind(), WahaEventKind::StateChange);
        assert_eq!(event.session_status(), Some("WORKING"));
    }
}
