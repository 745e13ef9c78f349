//! Message rendering.
//!
//! Two renderers live here:
//! - [`TemplateRenderer`] substitutes `{{ name }}` tags from a sanitized
//!   context. Unknown names are an error and values are HTML-escaped when
//!   autoescape is on.
//! - [`render_placeholders`] substitutes `{name}` markers over a fixed
//!   default context and falls back to the raw text when a key is missing.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::models::notification::Channel;
use crate::models::passenger::TripPassenger;
use crate::models::trip::Trip;

lazy_static::lazy_static! {
    static ref IDENTIFIER_REGEX: regex::Regex =
        regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Sanitized rendering context: every value is already display text.
pub type TemplateContext = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Undefined template variable: {0}")]
    UndefinedVariable(String),

    #[error("Template syntax error: {0}")]
    Syntax(String),
}

// ============================================================================
// Strict renderer
// ============================================================================

/// Strict `{{ name }}` renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer {
    autoescape: bool,
}

impl TemplateRenderer {
    pub fn new(autoescape: bool) -> Self {
        Self { autoescape }
    }

    /// Email bodies are HTML; every other channel is plain text.
    pub fn for_channel(channel: Channel) -> Self {
        Self::new(channel == Channel::Email)
    }

    pub fn autoescape(&self) -> bool {
        self.autoescape
    }

    pub fn render(&self, template: &str, context: &TemplateContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        for segment in parse(template)? {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = context
                        .get(name)
                        .ok_or_else(|| TemplateError::UndefinedVariable(name.to_string()))?;
                    if self.autoescape {
                        out.push_str(&escape_html(value));
                    } else {
                        out.push_str(value);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Renders a notification body from trip, passenger and driver data.
    ///
    /// `extra` is applied last and wins over the derived fields.
    pub fn render_notification_message(
        &self,
        template: &str,
        trip: Option<&Trip>,
        passenger: Option<&TripPassenger>,
        driver: Option<&Person>,
        extra: &BTreeMap<String, Value>,
    ) -> Result<String, TemplateError> {
        let mut raw: BTreeMap<String, Value> = BTreeMap::new();

        if let Some(trip) = trip {
            raw.insert("trip_name".into(), Value::from(trip.name.clone()));
            raw.insert("trip_date".into(), Value::from(trip.trip_date.format("%Y-%m-%d").to_string()));
            raw.insert("trip_time".into(), Value::from(format_time(trip.planned_start)));
            raw.insert("trip_type".into(), Value::from(trip.trip_type.label()));
        }
        if let Some(passenger) = passenger {
            raw.insert("passenger_name".into(), Value::from(passenger.name.clone()));
            raw.insert("passenger_phone".into(), opt_value(passenger.phone.as_deref()));
        }
        if let Some(driver) = driver {
            raw.insert("driver_name".into(), Value::from(driver.name.clone()));
            raw.insert("driver_phone".into(), opt_value(driver.phone.as_deref()));
        }
        for (key, value) in extra {
            raw.insert(key.clone(), value.clone());
        }

        self.render(template, &sanitize_context(&raw))
    }
}

/// Minimal person view used for the driver slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub name: String,
    pub phone: Option<String>,
}

/// Checks tag syntax without rendering.
pub fn validate_template(template: &str) -> Result<(), TemplateError> {
    parse(template).map(|_| ())
}

/// Reduces arbitrary JSON values to display text.
///
/// Scalars pass through. Objects carrying a `name` or `display_name` are
/// reduced to that name; anything else becomes compact JSON.
pub fn sanitize_context(raw: &BTreeMap<String, Value>) -> TemplateContext {
    raw.iter()
        .map(|(key, value)| (key.clone(), sanitize_value(value)))
        .collect()
}

fn sanitize_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => map
            .get("display_name")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        Value::Array(_) => value.to_string(),
    }
}

fn opt_value(v: Option<&str>) -> Value {
    v.map(Value::from).unwrap_or(Value::Null)
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%H:%M").to_string()).unwrap_or_default()
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

enum Segment<'a> {
    Text(&'a str),
    Var(&'a str),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Text(&rest[..open]));
        }
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}").ok_or_else(|| {
            TemplateError::Syntax(format!("unclosed tag at offset {}", offset + open))
        })?;
        let name = after_open[..close].trim();
        if !IDENTIFIER_REGEX.is_match(name) {
            return Err(TemplateError::Syntax(format!(
                "invalid expression '{}' at offset {}",
                name,
                offset + open
            )));
        }
        segments.push(Segment::Var(name));

        let consumed = open + 2 + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

// ============================================================================
// Simple placeholder renderer
// ============================================================================

/// Keys always present in the simple renderer's context.
const DEFAULT_PLACEHOLDERS: [(&str, &str); 11] = [
    ("passenger_name", ""),
    ("driver_name", ""),
    ("vehicle_name", ""),
    ("vehicle_plate", ""),
    ("stop_name", ""),
    ("trip_name", ""),
    ("trip_date", ""),
    ("trip_time", ""),
    ("eta", "10"),
    ("company_name", ""),
    ("company_phone", ""),
];

/// `{name}` substitution with `{{`/`}}` as literal braces.
///
/// Never fails: a missing key or unbalanced brace logs a warning and the raw
/// body comes back unchanged.
pub fn render_placeholders(body: &str, values: &BTreeMap<String, String>) -> String {
    match substitute(body, values) {
        Ok(rendered) => rendered,
        Err(reason) => {
            warn!(reason = %reason, "Template placeholder rendering failed, using raw body");
            body.to_string()
        }
    }
}

fn lookup<'a>(values: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    values.get(key).map(String::as_str).or_else(|| {
        DEFAULT_PLACEHOLDERS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    })
}

fn substitute(body: &str, values: &BTreeMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let end = body[i + 1..]
                    .find('}')
                    .map(|e| i + 1 + e)
                    .ok_or_else(|| format!("unclosed placeholder at offset {}", i))?;
                let key = &body[i + 1..end];
                let value = lookup(values, key).ok_or_else(|| format!("missing key '{}'", key))?;
                out.push_str(value);
                while matches!(chars.peek(), Some((j, _)) if *j <= end) {
                    chars.next();
                }
            }
            '}' => return Err(format!("single '}}' at offset {}", i)),
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trip::{TripState, TripType};
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn ctx(pairs: &[(&str, &str)]) -> TemplateContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ========================================================================
    // Strict renderer
    // ========================================================================

    #[test]
    fn test_strict_undefined_fails() {
        let renderer = TemplateRenderer::default();
        assert_eq!(
            renderer.render("Hello {{name}}", &TemplateContext::new()),
            Err(TemplateError::UndefinedVariable("name".to_string()))
        );
    }

    #[test]
    fn test_render_with_value() {
        let renderer = TemplateRenderer::default();
        assert_eq!(
            renderer.render("Hello {{name}}", &ctx(&[("name", "Ana")])).unwrap(),
            "Hello Ana"
        );
        assert_eq!(
            renderer.render("Hello {{ name }}!", &ctx(&[("name", "Ana")])).unwrap(),
            "Hello Ana!"
        );
    }

    #[test]
    fn test_autoescape_for_email_only() {
        let context = ctx(&[("name", "<b>Tom & Jerry</b>")]);
        let html = TemplateRenderer::for_channel(Channel::Email)
            .render("Hi {{name}}", &context)
            .unwrap();
        assert_eq!(html, "Hi &lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");

        let plain = TemplateRenderer::for_channel(Channel::Sms)
            .render("Hi {{name}}", &context)
            .unwrap();
        assert_eq!(plain, "Hi <b>Tom & Jerry</b>");
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            validate_template("Hello {{ name"),
            Err(TemplateError::Syntax(_))
        ));
        assert!(matches!(
            validate_template("Hello {{ user.__class__ }}"),
            Err(TemplateError::Syntax(_))
        ));
        assert!(validate_template("Plain text with } braces").is_ok());
    }

    #[test]
    fn test_sanitize_context() {
        let mut raw = BTreeMap::new();
        raw.insert("count".to_string(), json!(3));
        raw.insert("flag".to_string(), json!(true));
        raw.insert("missing".to_string(), Value::Null);
        raw.insert("driver".to_string(), json!({"id": 4, "name": "Samir"}));
        raw.insert("stops".to_string(), json!(["A", "B"]));

        let clean = sanitize_context(&raw);
        assert_eq!(clean["count"], "3");
        assert_eq!(clean["flag"], "true");
        assert_eq!(clean["missing"], "");
        assert_eq!(clean["driver"], "Samir");
        assert_eq!(clean["stops"], r#"["A","B"]"#);
    }

    #[test]
    fn test_render_notification_message() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 7, 30, 0).unwrap();
        let trip = Trip {
            id: 1,
            reference: "T-1".into(),
            name: "Route A".into(),
            trip_type: TripType::Dropoff,
            trip_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            state: TripState::Planned,
            planned_start: Some(start),
            planned_arrival: None,
            actual_start: None,
            actual_arrival: None,
            vehicle_id: None,
            vehicle_name: None,
            vehicle_plate: None,
            driver_id: 2,
            driver_name: None,
            driver_phone: None,
            group_name: None,
            company_id: None,
            total_seats: 10,
            booked_seats: 0,
            passenger_count: 0,
            current_latitude: None,
            current_longitude: None,
            last_gps_update: None,
            confirm_latitude: None,
            confirm_longitude: None,
            confirm_stop_id: None,
            confirm_stop_name: None,
            confirm_note: None,
            confirmed_at: None,
            confirm_source: None,
            created_at: start,
            updated_at: start,
        };
        let driver = Person {
            name: "Nadia".into(),
            phone: Some("+213555000111".into()),
        };
        let mut extra = BTreeMap::new();
        extra.insert("eta".to_string(), json!(7));

        let body = TemplateRenderer::default()
            .render_notification_message(
                "{{trip_type}} {{trip_name}} on {{trip_date}} at {{trip_time}}, driver {{driver_name}}, eta {{eta}}",
                Some(&trip),
                None,
                Some(&driver),
                &extra,
            )
            .unwrap();
        assert_eq!(
            body,
            "Drop-off Route A on 2025-03-10 at 07:30, driver Nadia, eta 7"
        );
    }

    // ========================================================================
    // Simple renderer
    // ========================================================================

    #[test]
    fn test_placeholders_use_defaults() {
        let body = render_placeholders("Arriving in {eta} minutes{stop_name}", &BTreeMap::new());
        assert_eq!(body, "Arriving in 10 minutes");
    }

    #[test]
    fn test_placeholders_literal_braces() {
        let mut values = BTreeMap::new();
        values.insert("trip_name".to_string(), "A1".to_string());
        assert_eq!(
            render_placeholders("{{code}} {trip_name}", &values),
            "{code} A1"
        );
    }

    #[test]
    fn test_placeholders_fall_back_to_raw_body() {
        let raw = "Gate {gate_number} closes soon";
        assert_eq!(render_placeholders(raw, &BTreeMap::new()), raw);
        assert_eq!(render_placeholders("broken {eta", &BTreeMap::new()), "broken {eta");
        assert_eq!(render_placeholders("stray } brace", &BTreeMap::new()), "stray } brace");
    }

    #[test]
    fn test_placeholders_handle_multibyte_text() {
        let mut values = BTreeMap::new();
        values.insert("passenger_name".to_string(), "سارة".to_string());
        assert_eq!(
            render_placeholders("مرحبا {passenger_name}", &values),
            "مرحبا سارة"
        );
    }
}
