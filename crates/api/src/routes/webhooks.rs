//! Inbound delivery-status webhooks.
//!
//! Vendors retry on anything but a 2xx, so every handler answers 200 and
//! logs what it could not use. Signatures are checked by the
//! `verify_webhook_signature` middleware before a handler runs.

use std::collections::HashMap;

use axum::{
    extract::{rejection::FormRejection, rejection::JsonRejection, Extension, State},
    Form, Json,
};
use domain::models::StatusUpdate;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::middleware::metrics::record_webhook_status_update;
use crate::middleware::RequestId;
use crate::services::delivery_status::{
    parse_generic, parse_sms_form, parse_whatsapp_business, CallbackError, WahaEvent,
    WahaEventKind,
};

fn ok() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn error(message: impl std::fmt::Display) -> Json<Value> {
    Json(json!({ "status": "error", "message": message.to_string() }))
}

/// Applies one update and records the outcome. Database errors are logged,
/// never returned.
async fn apply(state: &AppState, source: &'static str, request_id: &str, update: &StatusUpdate) {
    match state.notifications.apply_status_update(update).await {
        Ok(outcome) => record_webhook_status_update(source, outcome.is_applied()),
        Err(e) => {
            record_webhook_status_update(source, false);
            warn!(
                request_id,
                source,
                provider_message_id = %update.provider_message_id,
                error = %e,
                "Failed to apply delivery status"
            );
        }
    }
}

fn request_id(id: &Option<Extension<RequestId>>) -> String {
    id.as_ref()
        .map(|Extension(r)| r.0.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// POST /webhooks/delivery-status
pub async fn delivery_status(
    State(state): State<AppState>,
    id: Option<Extension<RequestId>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Json<Value> {
    let request_id = request_id(&id);
    let body = match payload {
        Ok(Json(body)) => body,
        Err(e) => {
            warn!(request_id, error = %e, "Unparseable delivery-status callback");
            return ok();
        }
    };

    match parse_generic(&body) {
        Ok(update) => {
            apply(&state, "generic", &request_id, &update).await;
            ok()
        }
        Err(e @ CallbackError::MissingParameters) => error(e),
        Err(e) => {
            warn!(request_id, error = %e, "Ignoring delivery-status callback");
            ok()
        }
    }
}

/// POST /webhooks/sms
pub async fn sms_status(
    State(state): State<AppState>,
    id: Option<Extension<RequestId>>,
    payload: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Json<Value> {
    let request_id = request_id(&id);
    let fields = match payload {
        Ok(Form(fields)) => fields,
        Err(e) => {
            warn!(request_id, error = %e, "Unparseable SMS callback");
            return ok();
        }
    };

    match parse_sms_form(&fields) {
        Ok(update) => apply(&state, "sms", &request_id, &update).await,
        Err(e) => warn!(request_id, error = %e, "Ignoring SMS callback"),
    }
    ok()
}

/// POST /webhooks/whatsapp
pub async fn whatsapp_status(
    State(state): State<AppState>,
    id: Option<Extension<RequestId>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Json<Value> {
    let request_id = request_id(&id);
    let Ok(Json(body)) = payload else {
        warn!(request_id, "Unparseable WhatsApp callback");
        return ok();
    };

    let updates = parse_whatsapp_business(&body);
    debug!(request_id, count = updates.len(), "WhatsApp status callback");
    for update in &updates {
        apply(&state, "whatsapp", &request_id, update).await;
    }
    ok()
}

/// POST /webhooks/waha
pub async fn waha_event(
    State(state): State<AppState>,
    id: Option<Extension<RequestId>>,
    payload: Result<Json<WahaEvent>, JsonRejection>,
) -> Json<Value> {
    let request_id = request_id(&id);
    let event = match payload {
        Ok(Json(event)) => event,
        Err(e) => {
            warn!(request_id, error = %e, "Unparseable WAHA event");
            return ok();
        }
    };
    let session = event.session.as_deref().unwrap_or("default");

    match event.kind() {
        WahaEventKind::MessageAck => match event.ack_update() {
            Some(update) => apply(&state, "waha", &request_id, &update).await,
            None => debug!(request_id, session, "WAHA ack without a usable id or level"),
        },
        WahaEventKind::StateChange => {
            info!(
                request_id,
                session,
                status = event.session_status().unwrap_or("unknown"),
                "WAHA session status changed"
            );
        }
        WahaEventKind::Unknown(name) => {
            debug!(request_id, session, event = %name, "Unhandled WAHA event");
        }
        kind => {
            debug!(request_id, session, event = ?kind, "WAHA event received");
        }
    }
    ok()
}

/// GET /webhooks/health
pub async fn webhook_health() -> &'static str {
    "Shuttle Webhook Service OK"
}
