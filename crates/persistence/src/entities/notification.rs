//! Notification entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::notification::{Channel, NotificationStatus, NotificationType};
use sqlx::FromRow;

/// Database row mapping for the notifications table.
#[derive(Debug, Clone, FromRow)]
pub struct NotificationEntity {
    pub id: i64,
    pub trip_id: Option<i64>,
    pub passenger_id: Option<i64>,
    pub channel: String,
    pub notification_type: String,
    pub status: String,
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

impl NotificationEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> domain::models::Notification {
        domain::models::Notification {
            id: self.id,
            trip_id: self.trip_id,
            passenger_id: self.passenger_id,
            channel: self.channel.parse().unwrap_or(Channel::Sms),
            notification_type: self
                .notification_type
                .parse()
                .unwrap_or(NotificationType::Custom),
            status: self.status.parse().unwrap_or(NotificationStatus::Pending),
            subject: self.subject,
            body: self.body,
            recipient_phone: self.recipient_phone,
            recipient_email: self.recipient_email,
            recipient_push_token: self.recipient_push_token,
            provider: self.provider,
            provider_message_id: self.provider_message_id,
            api_response: self.api_response,
            error_message: self.error_message,
            retry_count: self.retry_count,
            sent_at: self.sent_at,
            delivered_at: self.delivered_at,
            read_at: self.read_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<NotificationEntity> for domain::models::Notification {
    fn from(entity: NotificationEntity) -> Self {
        entity.into_domain()
    }
}
