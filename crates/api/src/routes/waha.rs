//! WAHA session management for dispatchers.
//!
//! Thin pass-through to the gateway; responses are the gateway's JSON.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::providers::waha::SessionStatus;
use crate::services::WahaClient;

#[derive(Debug, Deserialize)]
pub struct QrQuery {
    #[serde(default = "default_qr_format")]
    pub format: String,
}

fn default_qr_format() -> String {
    "image".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct PairingCodeRequest {
    #[validate(length(min = 6, max = 20, message = "Phone number is required"))]
    pub phone_number: String,
}

fn client(state: &AppState) -> Result<&WahaClient, ApiError> {
    state
        .waha
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("WAHA is not enabled".to_string()))
}

/// GET /api/v1/admin/waha/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(client(&state)?.list_sessions().await?))
}

/// GET /api/v1/admin/waha/sessions/:session
///
/// Adds a `ready` flag next to the gateway's session document.
pub async fn session_status(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let info = client(&state)?.get_session(Some(&session)).await?;
    let status = SessionStatus::from_session(&info);
    Ok(Json(json!({
        "session": session,
        "status": status.map(|s| s.as_str()),
        "ready": status == Some(SessionStatus::Working),
        "info": info,
    })))
}

/// POST /api/v1/admin/waha/sessions/:session/ensure
pub async fn ensure_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(client(&state)?.ensure_session_ready(Some(&session)).await?))
}

/// POST /api/v1/admin/waha/sessions/:session/start
pub async fn start_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(client(&state)?.start_session(Some(&session)).await?))
}

/// POST /api/v1/admin/waha/sessions/:session/stop
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(client(&state)?.stop_session(Some(&session)).await?))
}

/// POST /api/v1/admin/waha/sessions/:session/restart
pub async fn restart_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(client(&state)?.restart_session(Some(&session)).await?))
}

/// POST /api/v1/admin/waha/sessions/:session/logout
pub async fn logout_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let response = client(&state)?.logout_session(Some(&session)).await?;
    info!(session = %session, "WAHA session logged out");
    Ok(Json(response))
}

/// DELETE /api/v1/admin/waha/sessions/:session
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let response = client(&state)?.delete_session(Some(&session)).await?;
    info!(session = %session, "WAHA session deleted");
    Ok(Json(response))
}

/// GET /api/v1/admin/waha/sessions/:session/qr?format=image|raw
pub async fn session_qr(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Query(query): Query<QrQuery>,
) -> Result<Json<Value>, ApiError> {
    if !matches!(query.format.as_str(), "image" | "raw") {
        return Err(ApiError::Validation(
            "format must be image or raw".to_string(),
        ));
    }
    Ok(Json(
        client(&state)?
            .get_qr_code(Some(&session), &query.format)
            .await?,
    ))
}

/// POST /api/v1/admin/waha/sessions/:session/request-code
pub async fn request_pairing_code(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(request): Json<PairingCodeRequest>,
) -> Result<Json<Value>, ApiError> {
    request.validate()?;
    Ok(Json(
        client(&state)?
            .request_pairing_code(Some(&session), &request.phone_number)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_format_defaults_to_image() {
        let query: QrQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.format, "image");
    }

    #[test]
    fn test_pairing_code_requires_phone() {
        let request = PairingCodeRequest {
            phone_number: String::new(),
        };
        assert!(request.validate().is_err());

        let request = PairingCodeRequest {
            phone_number: "966501234567".to_string(),
        };
        assert!(request.validate().is_ok());
    }
}
