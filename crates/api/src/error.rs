use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::models::TripError;
use domain::services::{ConflictError, ConflictInfo, ContactError, TemplateError};
use persistence::repositories::{TemplateWriteError, TripWriteError};
use serde::Serialize;
use thiserror::Error;

use crate::services::dispatch::DispatchError;
use crate::services::providers::WahaError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A vehicle or driver is already booked for an overlapping window.
    #[error("Conflict: {message}")]
    ScheduleConflict {
        message: String,
        conflict: Box<ConflictInfo>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation error: {message}")]
    InvalidFields {
        message: String,
        details: Vec<ValidationDetail>,
    },

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ValidationDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conflict: Option<ConflictInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut details = None;
        let mut conflict = None;

        let (status, error_code, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::ScheduleConflict {
                message,
                conflict: info,
            } => {
                conflict = Some(*info);
                (StatusCode::CONFLICT, "conflict", message)
            }
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::InvalidFields {
                message,
                details: fields,
            } => {
                details = Some(fields);
                (StatusCode::BAD_REQUEST, "validation_error", message)
            }
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests. Please try again later.".into(),
            ),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
            details,
            conflict,
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".into()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => ApiError::Conflict("Resource already exists".into()),
                        "23503" => ApiError::NotFound("Referenced resource not found".into()),
                        "23514" => ApiError::Validation("Value violates a data constraint".into()),
                        _ => ApiError::Internal(format!("Database error: {}", db_err)),
                    }
                } else {
                    ApiError::Internal(format!("Database error: {}", db_err))
                }
            }
            _ => ApiError::Internal(format!("Database error: {}", err)),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationDetail {
                    field: field.to_string(),
                    message: e
                        .message
                        .clone()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field)),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));

        let message = if details.len() == 1 {
            details[0].message.clone()
        } else {
            format!("{} validation errors", details.len())
        };

        ApiError::InvalidFields { message, details }
    }
}

impl From<ConflictError> for ApiError {
    fn from(err: ConflictError) -> Self {
        match err {
            ConflictError::Vehicle { message, conflict } => {
                metrics::counter!("schedule_conflicts_total", "resource" => "vehicle").increment(1);
                ApiError::ScheduleConflict { message, conflict }
            }
            ConflictError::Driver { message, conflict } => {
                metrics::counter!("schedule_conflicts_total", "resource" => "driver").increment(1);
                ApiError::ScheduleConflict { message, conflict }
            }
            ConflictError::Lookup(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<TripError> for ApiError {
    fn from(err: TripError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<TripWriteError> for ApiError {
    fn from(err: TripWriteError) -> Self {
        match err {
            TripWriteError::Conflict(e) => e.into(),
            TripWriteError::Invalid(e) => e.into(),
            TripWriteError::NotFound => ApiError::NotFound("Trip not found".into()),
            TripWriteError::Database(e) => e.into(),
        }
    }
}

impl From<TemplateWriteError> for ApiError {
    fn from(err: TemplateWriteError) -> Self {
        match err {
            TemplateWriteError::DuplicateDefault(msg) => ApiError::Conflict(msg),
            TemplateWriteError::NotFound => ApiError::NotFound("Template not found".into()),
            TemplateWriteError::Database(e) => e.into(),
        }
    }
}

impl From<TemplateError> for ApiError {
    fn from(err: TemplateError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<ContactError> for ApiError {
    fn from(err: ContactError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation(msg) => ApiError::Validation(msg),
            DispatchError::Configuration(msg) => ApiError::ServiceUnavailable(msg),
            DispatchError::RateLimited(_) => ApiError::RateLimited,
            DispatchError::Provider(e) => ApiError::ServiceUnavailable(e.to_string()),
            e @ DispatchError::RetryLimitExceeded { .. } => ApiError::Conflict(e.to_string()),
            e @ DispatchError::NotRetryable(_) => ApiError::Conflict(e.to_string()),
            DispatchError::NotFound => ApiError::NotFound("Notification not found".into()),
            DispatchError::Database(e) => e.into(),
        }
    }
}

impl From<WahaError> for ApiError {
    fn from(err: WahaError) -> Self {
        match err {
            WahaError::Api { status: 404, message } => ApiError::NotFound(message),
            WahaError::Api { status: 400 | 422, message } => ApiError::Validation(message),
            WahaError::Config(msg) => ApiError::ServiceUnavailable(msg),
            e => ApiError::ServiceUnavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::{TimeZone, Utc};
    use domain::models::{Channel, NotificationStatus, TripState};
    use domain::services::ProviderError;
    use validator::Validate;

    fn conflict_info() -> ConflictInfo {
        ConflictInfo {
            trip_id: 7,
            trip_name: "Morning Route A".to_string(),
            start: Utc.with_ymd_and_hms(2025, 1, 15, 7, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap(),
            group_name: "N/A".to_string(),
            state: TripState::Planned,
            vehicle_name: Some("Bus 01".to_string()),
            driver_name: None,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_api_error_unauthorized() {
        let error = ApiError::Unauthorized("test message".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_api_error_forbidden() {
        let error = ApiError::Forbidden("access denied".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_api_error_not_found() {
        let error = ApiError::NotFound("resource not found".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_api_error_conflict() {
        let error = ApiError::Conflict("already exists".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_api_error_validation() {
        let error = ApiError::Validation("invalid input".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_api_error_rate_limited() {
        let response = ApiError::RateLimited.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_api_error_internal() {
        let error = ApiError::Internal("database connection failed".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_service_unavailable() {
        let error = ApiError::ServiceUnavailable("maintenance".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(
            format!("{}", ApiError::Unauthorized("test".to_string())),
            "Unauthorized: test"
        );
        assert_eq!(
            format!("{}", ApiError::NotFound("test".to_string())),
            "Not found: test"
        );
        assert_eq!(format!("{}", ApiError::RateLimited), "Rate limited");
        assert_eq!(
            format!("{}", ApiError::Internal("test".to_string())),
            "Internal error: test"
        );
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let error: ApiError = sqlx::Error::RowNotFound.into();
        match error {
            ApiError::NotFound(msg) => assert_eq!(msg, "Resource not found"),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[tokio::test]
    async fn test_schedule_conflict_renders_conflicting_trip() {
        let error: ApiError = ConflictError::Vehicle {
            message: "Vehicle conflict detected!".to_string(),
            conflict: Box::new(conflict_info()),
        }
        .into();
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["message"], "Vehicle conflict detected!");
        assert_eq!(body["conflict"]["trip_id"], 7);
        assert_eq!(body["conflict"]["trip_name"], "Morning Route A");
    }

    #[test]
    fn test_trip_write_errors() {
        let error: ApiError = TripWriteError::NotFound.into();
        assert!(matches!(error, ApiError::NotFound(ref m) if m == "Trip not found"));

        let error: ApiError = TripWriteError::Invalid(TripError::NoPassengers).into();
        assert!(matches!(error, ApiError::Validation(ref m) if m.contains("passenger")));

        let error: ApiError =
            TripWriteError::Conflict(ConflictError::Lookup("boom".to_string())).into();
        assert!(matches!(error, ApiError::Internal(_)));
    }

    #[test]
    fn test_template_write_errors() {
        let error: ApiError = TemplateWriteError::DuplicateDefault("taken".to_string()).into();
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);

        let error: ApiError = TemplateWriteError::NotFound.into();
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_dispatch_errors() {
        let error: ApiError = DispatchError::RetryLimitExceeded {
            retry_count: 3,
            max_retries: 3,
        }
        .into();
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);

        let error: ApiError = DispatchError::NotRetryable(NotificationStatus::Sent).into();
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);

        let error: ApiError = DispatchError::RateLimited(Channel::Sms).into();
        assert_eq!(error.into_response().status(), StatusCode::TOO_MANY_REQUESTS);

        let error: ApiError =
            DispatchError::Provider(ProviderError::Transport("reset".to_string())).into();
        assert_eq!(error.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_validation_errors_carry_details() {
        let request = domain::models::trip::ConfirmTripRequest {
            latitude: Some(91.0),
            longitude: Some(181.0),
            ..Default::default()
        };
        let error: ApiError = request.validate().unwrap_err().into();
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["message"], "2 validation errors");
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
        assert_eq!(body["details"][0]["field"], "latitude");
    }
}
