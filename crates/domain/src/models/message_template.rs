//! Message template domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use validator::Validate;

use super::notification::{Channel, NotificationType};
use crate::services::template::render_placeholders;

// ============================================================================
// Template Channel
// ============================================================================

/// Channel a template applies to; `All` matches every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateChannel {
    All,
    Sms,
    Whatsapp,
    Push,
    Email,
}

impl TemplateChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateChannel::All => "all",
            TemplateChannel::Sms => "sms",
            TemplateChannel::Whatsapp => "whatsapp",
            TemplateChannel::Push => "push",
            TemplateChannel::Email => "email",
        }
    }

    pub fn matches(&self, channel: Channel) -> bool {
        match self {
            TemplateChannel::All => true,
            specific => specific.as_str() == channel.as_str(),
        }
    }
}

impl From<Channel> for TemplateChannel {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Sms => TemplateChannel::Sms,
            Channel::Whatsapp => TemplateChannel::Whatsapp,
            Channel::Push => TemplateChannel::Push,
            Channel::Email => TemplateChannel::Email,
        }
    }
}

impl fmt::Display for TemplateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TemplateChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(TemplateChannel::All),
            other => other
                .parse::<Channel>()
                .map(TemplateChannel::from)
                .map_err(|_| {
                    format!(
                        "Invalid template channel: {}. Must be one of: all, sms, whatsapp, push, email",
                        s
                    )
                }),
        }
    }
}

// ============================================================================
// Language
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ar,
    En,
    Fr,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Ar => "ar",
            Language::En => "en",
            Language::Fr => "fr",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ar" => Ok(Language::Ar),
            "en" => Ok(Language::En),
            "fr" => Ok(Language::Fr),
            _ => Err(format!("Invalid language: {}. Must be one of: ar, en, fr", s)),
        }
    }
}

// ============================================================================
// Core Model
// ============================================================================

/// Reusable message body keyed by (type, channel, language, company).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: i64,
    pub name: String,
    pub notification_type: NotificationType,
    pub channel: TemplateChannel,
    pub language: Language,
    pub subject: Option<String>,
    pub body: String,
    pub is_active: bool,
    pub is_default: bool,
    pub sequence: i32,
    pub company_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageTemplate {
    /// Renders the body with `{placeholder}` substitution.
    ///
    /// Missing keys never fail the notification; the raw body is returned instead.
    pub fn render(&self, values: &BTreeMap<String, String>) -> String {
        render_placeholders(&self.body, values)
    }

    /// Renders the subject, if any, with the same rules as the body.
    pub fn render_subject(&self, values: &BTreeMap<String, String>) -> Option<String> {
        self.subject
            .as_deref()
            .map(|subject| render_placeholders(subject, values))
    }

    /// Renders the body with representative sample data.
    pub fn preview(&self) -> String {
        self.render(&sample_values())
    }
}

/// Sample context used for template previews.
pub fn sample_values() -> BTreeMap<String, String> {
    [
        ("passenger_name", "Ahmed Ali"),
        ("driver_name", "Mohammed Hassan"),
        ("vehicle_name", "Bus 01"),
        ("vehicle_plate", "ABC-1234"),
        ("stop_name", "Main Street Station"),
        ("trip_name", "Morning Route A"),
        ("trip_date", "2025-01-15"),
        ("trip_time", "07:30"),
        ("eta", "10"),
        ("company_name", "Shuttle Co."),
        ("company_phone", "+1234567890"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,

    pub notification_type: NotificationType,

    #[serde(default = "default_template_channel")]
    pub channel: TemplateChannel,

    #[serde(default)]
    pub language: Language,

    #[validate(length(max = 200, message = "subject must be at most 200 characters"))]
    pub subject: Option<String>,

    #[validate(length(min = 1, max = 4096, message = "body must be 1-4096 characters"))]
    pub body: String,

    #[serde(default)]
    pub is_default: bool,

    #[serde(default = "default_sequence")]
    pub sequence: i32,

    pub company_id: Option<i64>,
}

fn default_template_channel() -> TemplateChannel {
    TemplateChannel::All
}

fn default_sequence() -> i32 {
    10
}

/// Values supplied when previewing a template; sample data fills the rest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreviewTemplateRequest {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// Filters for listing templates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateQuery {
    pub notification_type: Option<NotificationType>,
    pub channel: Option<TemplateChannel>,
    pub language: Option<Language>,
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TemplatePreviewResponse {
    pub template_id: i64,
    pub subject: Option<String>,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn template(body: &str) -> MessageTemplate {
        MessageTemplate {
            id: 1,
            name: "Approaching".to_string(),
            notification_type: NotificationType::Approaching,
            channel: TemplateChannel::All,
            language: Language::En,
            subject: Some("Shuttle for {passenger_name}".to_string()),
            body: body.to_string(),
            is_active: true,
            is_default: true,
            sequence: 10,
            company_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_channel_matching() {
        assert!(TemplateChannel::All.matches(Channel::Sms));
        assert!(TemplateChannel::All.matches(Channel::Email));
        assert!(TemplateChannel::Whatsapp.matches(Channel::Whatsapp));
        assert!(!TemplateChannel::Whatsapp.matches(Channel::Sms));
    }

    #[test]
    fn test_template_channel_parse() {
        assert_eq!("all".parse::<TemplateChannel>().unwrap(), TemplateChannel::All);
        assert_eq!("push".parse::<TemplateChannel>().unwrap(), TemplateChannel::Push);
        assert!("pager".parse::<TemplateChannel>().is_err());
    }

    #[test]
    fn test_default_language_is_arabic() {
        assert_eq!(Language::default(), Language::Ar);
    }

    #[test]
    fn test_render_with_values() {
        let t = template("Hi {passenger_name}, bus arrives in {eta} min");
        let mut values = BTreeMap::new();
        values.insert("passenger_name".to_string(), "Sara".to_string());
        assert_eq!(t.render(&values), "Hi Sara, bus arrives in 10 min");
        assert_eq!(
            t.render_subject(&values).as_deref(),
            Some("Shuttle for Sara")
        );
    }

    #[test]
    fn test_render_unknown_key_returns_raw_body() {
        let t = template("Seat {seat_number} is yours");
        assert_eq!(t.render(&BTreeMap::new()), "Seat {seat_number} is yours");
    }

    #[test]
    fn test_preview_uses_sample_data() {
        let t = template("{driver_name} drives {vehicle_name}");
        assert_eq!(t.preview(), "Mohammed Hassan drives Bus 01");
    }
}
