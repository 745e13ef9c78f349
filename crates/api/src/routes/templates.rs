//! Message template administration.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::message_template::{
    sample_values, CreateTemplateRequest, PreviewTemplateRequest, TemplatePreviewResponse,
    TemplateQuery,
};
use domain::models::{MessageTemplate, TemplateChannel};
use domain::services::{render_placeholders, validate_template, TemplateError, TemplateRenderer};
use persistence::repositories::MessageTemplateRepository;
use serde::Serialize;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub success: bool,
    pub count: usize,
    pub templates: Vec<MessageTemplate>,
}

/// Strict `{{ name }}` syntax is opted into by using it.
fn is_strict(source: &str) -> bool {
    source.contains("{{")
}

/// POST /api/v1/admin/templates
///
/// `{{ }}` templates are parsed up front so syntax errors are rejected at
/// save time. Creating a second default for the same type, channel and
/// language is a 409.
pub async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<MessageTemplate>), ApiError> {
    request.validate()?;
    for source in std::iter::once(request.body.as_str()).chain(request.subject.as_deref()) {
        if is_strict(source) {
            validate_template(source)?;
        }
    }

    let template = MessageTemplateRepository::new(state.pool.clone())
        .create(&request)
        .await?;
    Ok((StatusCode::CREATED, Json(template.into())))
}

/// GET /api/v1/admin/templates?notification_type=&channel=&language=
pub async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Result<Json<TemplateListResponse>, ApiError> {
    let templates: Vec<MessageTemplate> = MessageTemplateRepository::new(state.pool.clone())
        .list(&query)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(TemplateListResponse {
        success: true,
        count: templates.len(),
        templates,
    }))
}

/// POST /api/v1/admin/templates/:template_id/default
pub async fn set_default_template(
    State(state): State<AppState>,
    Path(template_id): Path<i64>,
) -> Result<Json<MessageTemplate>, ApiError> {
    let template = MessageTemplateRepository::new(state.pool.clone())
        .set_default(template_id)
        .await?;
    Ok(Json(template.into()))
}

/// POST /api/v1/admin/templates/:template_id/preview
///
/// Renders with sample data; supplied `values` win over the samples.
pub async fn preview_template(
    State(state): State<AppState>,
    Path(template_id): Path<i64>,
    body: Option<Json<PreviewTemplateRequest>>,
) -> Result<Json<TemplatePreviewResponse>, ApiError> {
    let template: MessageTemplate = MessageTemplateRepository::new(state.pool.clone())
        .find_by_id(template_id)
        .await?
        .map(Into::into)
        .ok_or_else(|| ApiError::NotFound("Template not found".to_string()))?;

    let Json(request) = body.unwrap_or_default();
    let (subject, body) = render_preview(&template, request)?;

    Ok(Json(TemplatePreviewResponse {
        template_id,
        subject,
        body,
    }))
}

fn render_preview(
    template: &MessageTemplate,
    request: PreviewTemplateRequest,
) -> Result<(Option<String>, String), TemplateError> {
    let mut values = sample_values();
    values.extend(request.values);

    let renderer = TemplateRenderer::new(template.channel == TemplateChannel::Email);
    let render = |source: &str| {
        if is_strict(source) {
            renderer.render(source, &values)
        } else {
            Ok(render_placeholders(source, &values))
        }
    };

    let subject = template.subject.as_deref().map(render).transpose()?;
    Ok((subject, render(&template.body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::models::{Language, NotificationType};
    use std::collections::BTreeMap;

    fn template(subject: Option<&str>, body: &str) -> MessageTemplate {
        MessageTemplate {
            id: 3,
            name: "Started".to_string(),
            notification_type: NotificationType::TripStarted,
            channel: TemplateChannel::Sms,
            language: Language::En,
            subject: subject.map(str::to_string),
            body: body.to_string(),
            is_active: true,
            is_default: false,
            sequence: 10,
            company_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_preview_uses_samples() {
        let (subject, body) = render_preview(
            &template(Some("Trip {trip_name}"), "Hi {passenger_name}"),
            PreviewTemplateRequest::default(),
        )
        .unwrap();
        assert_eq!(subject.as_deref(), Some("Trip Morning Route A"));
        assert_eq!(body, "Hi Ahmed Ali");
    }

    #[test]
    fn test_preview_values_override_samples() {
        let request = PreviewTemplateRequest {
            values: BTreeMap::from([("passenger_name".to_string(), "Sara".to_string())]),
        };
        let (_, body) =
            render_preview(&template(None, "Hi {{ passenger_name }}"), request).unwrap();
        assert_eq!(body, "Hi Sara");
    }

    #[test]
    fn test_preview_strict_undefined_name() {
        let err = render_preview(
            &template(None, "Seat {{ seat_number }}"),
            PreviewTemplateRequest::default(),
        )
        .unwrap_err();
        assert_eq!(err, TemplateError::UndefinedVariable("seat_number".to_string()));
    }
}
