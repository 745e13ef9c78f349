//! Prometheus metrics: HTTP middleware, dispatch counters and the exporter.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use domain::models::Channel;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Records `http_requests_total` and `http_request_duration_seconds`.
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let method_str = method_to_str(&method);

    counter!(
        "http_requests_total",
        "method" => method_str,
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method_str,
        "path" => path
    )
    .record(duration);

    response
}

fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

/// One finished dispatch. `outcome` is `sent`, `failed` or `rate_limited`.
pub fn record_dispatch(channel: Channel, outcome: &'static str) {
    counter!(
        "notifications_dispatched_total",
        "channel" => channel.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_provider_send(provider: &str, elapsed: Duration) {
    histogram!(
        "provider_send_duration_seconds",
        "provider" => provider.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// `source` names the webhook; `applied` is false for ignored callbacks.
pub fn record_webhook_status_update(source: &'static str, applied: bool) {
    counter!(
        "webhook_status_updates_total",
        "source" => source,
        "applied" => if applied { "true" } else { "false" }
    )
    .increment(1);
}

/// A webhook turned away by the signature check. `reason` is
/// `missing_signature`, `invalid_signature` or `unreadable_body`.
pub fn record_webhook_signature_rejection(reason: &'static str) {
    counter!("webhook_signature_rejections_total", "reason" => reason).increment(1);
}

/// Handler for `/metrics` in Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
    } else {
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            [(axum::http::header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        )
    }
}

/// Installs the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> Result<(), BuildError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(&[0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0])?
        .install_recorder()?;

    // A concurrent initializer may have won; its handle is equivalent
    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}
