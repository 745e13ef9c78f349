//! Authentication middleware.
//!
//! Validates the `X-API-Key` header and stores the resulting
//! [`ApiKeyAuth`] in request extensions for handlers and the rate limiter.
//! Inbound webhooks carry no key; they are checked against an HMAC
//! signature instead when a webhook secret is configured.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shared::crypto::verify_signature;
use tracing::warn;

use super::metrics::record_webhook_signature_rejection;
use crate::app::AppState;
use crate::extractors::api_key::{ApiKeyAuth, API_KEY_HEADER};

/// Middleware that requires a valid API key of any kind.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(api_key) = header_key(&req) else {
        return unauthorized_response("Invalid or missing API key");
    };

    match ApiKeyAuth::validate(&state.pool, &api_key).await {
        Ok(auth) => {
            req.extensions_mut().insert(auth);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

/// Middleware for dispatcher routes: the key must be an admin key.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(api_key) = header_key(&req) else {
        return unauthorized_response("Invalid or missing API key");
    };

    match ApiKeyAuth::validate(&state.pool, &api_key).await {
        Ok(auth) => {
            if !auth.is_admin {
                return forbidden_response("Admin access required");
            }
            req.extensions_mut().insert(auth);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

/// Header carrying `sha256=<hex>` over the raw request body.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Largest webhook body buffered for signature checks.
const MAX_WEBHOOK_BODY: usize = 1024 * 1024;

/// Middleware for `/webhooks`: verifies the HMAC signature when
/// `security.webhook_secret` is set, and passes everything through otherwise.
///
/// Unlike the handlers behind it, which acknowledge anything they cannot
/// use, this answers 401. Every rejection is logged and counted in
/// `webhook_signature_rejections_total` by reason.
pub async fn verify_webhook_signature(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(secret) = state.config.security.webhook_secret.as_deref() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_WEBHOOK_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %parts.uri.path(), error = %e, "Rejected unreadable webhook body");
            record_webhook_signature_rejection("unreadable_body");
            return unauthorized_response("Invalid webhook payload");
        }
    };

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Some(reason) = signature_rejection(secret, &bytes, signature) {
        warn!(path = %parts.uri.path(), reason, "Rejected webhook signature");
        record_webhook_signature_rejection(reason);
        return unauthorized_response("Invalid webhook signature");
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Why a webhook fails the signature check, if it does.
fn signature_rejection(secret: &str, body: &[u8], signature: Option<&str>) -> Option<&'static str> {
    match signature {
        None | Some("") => Some("missing_signature"),
        Some(signature) if !verify_signature(secret, body, signature) => Some("invalid_signature"),
        Some(_) => None,
    }
}

fn header_key(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "unauthorized",
            "message": message
        })),
    )
        .into_response()
}

fn forbidden_response(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "forbidden",
            "message": message
        })),
    )
        .into_response()
}
