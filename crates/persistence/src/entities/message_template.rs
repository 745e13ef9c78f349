//! Message template entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::message_template::{Language, TemplateChannel};
use domain::models::notification::NotificationType;
use sqlx::FromRow;

/// Database row mapping for the message_templates table.
#[derive(Debug, Clone, FromRow)]
pub struct MessageTemplateEntity {
    pub id: i64,
    pub name: String,
    pub notification_type: String,
    pub channel: String,
    pub language: String,
    pub subject: Option<String>,
    pub body: String,
    pub is_active: bool,
    pub is_default: bool,
    pub sequence: i32,
    pub company_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MessageTemplateEntity> for domain::models::MessageTemplate {
    fn from(entity: MessageTemplateEntity) -> Self {
        domain::models::MessageTemplate {
            id: entity.id,
            name: entity.name,
            notification_type: entity
                .notification_type
                .parse()
                .unwrap_or(NotificationType::Custom),
            channel: entity.channel.parse().unwrap_or(TemplateChannel::All),
            language: entity.language.parse().unwrap_or_default(),
            subject: entity.subject,
            body: entity.body,
            is_active: entity.is_active,
            is_default: entity.is_default,
            sequence: entity.sequence,
            company_id: entity.company_id,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_to_domain_defaults() {
        let entity = MessageTemplateEntity {
            id: 3,
            name: "Arrival".to_string(),
            notification_type: "arrived".to_string(),
            channel: "fax".to_string(),
            language: "de".to_string(),
            subject: None,
            body: "{vehicle_name} is here".to_string(),
            is_active: true,
            is_default: false,
            sequence: 10,
            company_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let template: domain::models::MessageTemplate = entity.into();
        assert_eq!(template.notification_type, NotificationType::Arrived);
        assert_eq!(template.channel, TemplateChannel::All);
        assert_eq!(template.language, Language::Ar);
    }
}
