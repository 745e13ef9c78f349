//! Notification domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use validator::Validate;

// ============================================================================
// Channel
// ============================================================================

/// Delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Whatsapp,
    Push,
    Email,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Sms, Channel::Whatsapp, Channel::Push, Channel::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
            Channel::Push => "push",
            Channel::Email => "email",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::Whatsapp => "WhatsApp",
            Channel::Push => "push",
            Channel::Email => "email",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "whatsapp" => Ok(Channel::Whatsapp),
            "push" => Ok(Channel::Push),
            "email" => Ok(Channel::Email),
            _ => Err(format!(
                "Invalid channel: {}. Must be one of: sms, whatsapp, push, email",
                s
            )),
        }
    }
}

// ============================================================================
// Notification Type
// ============================================================================

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Approaching,
    Arrived,
    TripStarted,
    TripEnded,
    Cancelled,
    Reminder,
    Custom,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Approaching => "approaching",
            NotificationType::Arrived => "arrived",
            NotificationType::TripStarted => "trip_started",
            NotificationType::TripEnded => "trip_ended",
            NotificationType::Cancelled => "cancelled",
            NotificationType::Reminder => "reminder",
            NotificationType::Custom => "custom",
        }
    }

    /// Body used when no stored template matches.
    pub fn fallback_body(&self) -> &'static str {
        match self {
            NotificationType::Approaching => {
                "Hello {passenger_name}, the shuttle {vehicle_name} is about {eta} minutes from {stop_name}."
            }
            NotificationType::Arrived => {
                "Hello {passenger_name}, the shuttle {vehicle_name} has arrived at {stop_name}."
            }
            NotificationType::TripStarted => {
                "Hello {passenger_name}, trip {trip_name} has started at {trip_time}. Driver: {driver_name}."
            }
            NotificationType::TripEnded => {
                "Hello {passenger_name}, trip {trip_name} has ended. Thank you for riding with {company_name}."
            }
            NotificationType::Cancelled => {
                "Hello {passenger_name}, trip {trip_name} on {trip_date} at {trip_time} has been cancelled."
            }
            NotificationType::Reminder => {
                "Reminder: trip {trip_name} departs on {trip_date} at {trip_time}."
            }
            NotificationType::Custom => "{message}",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approaching" => Ok(NotificationType::Approaching),
            "arrived" => Ok(NotificationType::Arrived),
            "trip_started" => Ok(NotificationType::TripStarted),
            "trip_ended" => Ok(NotificationType::TripEnded),
            "cancelled" => Ok(NotificationType::Cancelled),
            "reminder" => Ok(NotificationType::Reminder),
            "custom" => Ok(NotificationType::Custom),
            _ => Err(format!("Invalid notification type: {}", s)),
        }
    }
}

// ============================================================================
// Notification Status
// ============================================================================

/// Delivery status of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
        }
    }

    /// Position on the delivery progression. Failed sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            NotificationStatus::Pending => Some(0),
            NotificationStatus::Sent => Some(1),
            NotificationStatus::Delivered => Some(2),
            NotificationStatus::Read => Some(3),
            NotificationStatus::Failed => None,
        }
    }

    /// Transitions the dispatch pipeline itself may perform.
    ///
    /// Delivered and read are reserved for provider callbacks, see
    /// [`NotificationStatus::accepts_callback`]. `failed -> pending` is the
    /// manual retry path.
    pub fn can_transition_to(&self, target: NotificationStatus) -> bool {
        matches!(
            (self, target),
            (NotificationStatus::Pending, NotificationStatus::Sent)
                | (NotificationStatus::Pending, NotificationStatus::Failed)
                | (NotificationStatus::Sent, NotificationStatus::Failed)
                | (NotificationStatus::Failed, NotificationStatus::Pending)
        )
    }

    /// Whether a provider callback reporting `incoming` should be applied.
    ///
    /// Callbacks only move a notification forward; repeating the current
    /// status, or reporting an earlier one, is a no-op. A failure report is
    /// honoured until the message is known to be delivered, and a delivery
    /// report overrides a local failure.
    pub fn accepts_callback(&self, incoming: NotificationStatus) -> bool {
        match (self.rank(), incoming.rank()) {
            (Some(current), Some(next)) => next > current,
            (Some(current), None) => current < 2,
            (None, Some(next)) => next >= 2,
            (None, None) => false,
        }
    }

    /// Maps a WhatsApp acknowledgement level to a status.
    pub fn from_ack(level: i64) -> Option<Self> {
        match level {
            -1 => Some(NotificationStatus::Failed),
            0 => Some(NotificationStatus::Pending),
            1 => Some(NotificationStatus::Sent),
            2 => Some(NotificationStatus::Delivered),
            3 | 4 => Some(NotificationStatus::Read),
            _ => None,
        }
    }

    /// Maps a vendor status word (Twilio, WhatsApp Business, generic) to a status.
    pub fn from_provider_status(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "accepted" | "scheduled" => Some(NotificationStatus::Pending),
            "sent" | "sending" => Some(NotificationStatus::Sent),
            "delivered" => Some(NotificationStatus::Delivered),
            "read" | "played" | "seen" => Some(NotificationStatus::Read),
            "failed" | "undelivered" | "canceled" | "error" | "rejected" => {
                Some(NotificationStatus::Failed)
            }
            _ => None,
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "delivered" => Ok(NotificationStatus::Delivered),
            "read" => Ok(NotificationStatus::Read),
            "failed" => Ok(NotificationStatus::Failed),
            _ => Err(format!(
                "Invalid notification status: {}. Must be one of: pending, sent, delivered, read, failed",
                s
            )),
        }
    }
}

// ============================================================================
// Core Model
// ============================================================================

/// One dispatch of a message to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub trip_id: Option<i64>,
    pub passenger_id: Option<i64>,
    pub channel: Channel,
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub subject: Option<String>,
    pub body: String,
    pub recipient_phone: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_push_token: Option<String>,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub api_response: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery status reported by a provider callback.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub provider_message_id: String,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Ad-hoc notification sent by a dispatcher.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendNotificationRequest {
    pub trip_id: Option<i64>,

    pub passenger_id: Option<i64>,

    pub channel: Channel,

    #[serde(default = "default_notification_type")]
    pub notification_type: NotificationType,

    #[validate(length(max = 200, message = "subject must be at most 200 characters"))]
    pub subject: Option<String>,

    #[validate(length(min = 1, max = 4096, message = "message must be 1-4096 characters"))]
    pub message: String,

    #[validate(length(max = 32, message = "phone must be at most 32 characters"))]
    pub recipient_phone: Option<String>,

    #[validate(length(max = 320, message = "email must be at most 320 characters"))]
    pub recipient_email: Option<String>,

    #[validate(length(max = 4096, message = "push_token must be at most 4096 characters"))]
    pub recipient_push_token: Option<String>,

    /// Values substituted into `{placeholder}` markers in `message`.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

fn default_notification_type() -> NotificationType {
    NotificationType::Custom
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct NotificationResponse {
    pub id: i64,
    pub trip_id: Option<i64>,
    pub passenger_id: Option<i64>,
    pub channel: Channel,
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub body: String,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            trip_id: n.trip_id,
            passenger_id: n.passenger_id,
            channel: n.channel,
            notification_type: n.notification_type,
            status: n.status,
            body: n.body,
            provider: n.provider,
            provider_message_id: n.provider_message_id,
            error_message: n.error_message,
            retry_count: n.retry_count,
            sent_at: n.sent_at,
            delivered_at: n.delivered_at,
            read_at: n.read_at,
            created_at: n.created_at,
        }
    }
}
