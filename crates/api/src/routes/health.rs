//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;

use crate::app::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseHealth,
    pub providers: Vec<ProviderHealth>,
}

/// Database health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseHealth {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

/// Provider configured for a channel.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderHealth {
    pub channel: String,
    pub provider: Option<String>,
}

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// GET /api/health
///
/// Database connectivity with round-trip latency, plus the provider serving
/// each channel. 503 when the database is unreachable.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match persistence::db::check_connection(&state.pool).await {
        Ok(latency) => DatabaseHealth {
            connected: true,
            latency_ms: Some(latency.as_millis() as u64),
        },
        Err(e) => {
            warn!(error = %e, "Health check database query failed");
            DatabaseHealth {
                connected: false,
                latency_ms: None,
            }
        }
    };

    let dispatcher = state.notifications.dispatcher();
    let providers = domain::models::Channel::ALL
        .iter()
        .map(|channel| ProviderHealth {
            channel: channel.as_str().to_string(),
            provider: dispatcher.provider_name(*channel).map(str::to_string),
        })
        .collect();

    let status = if database.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let response = HealthResponse {
        status: if database.connected { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        providers,
    };

    (status, Json(response))
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK if the service can accept traffic (database connected).
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    match persistence::db::check_connection(&state.pool).await {
        Ok(_) => Ok(Json(StatusResponse {
            status: "ready".to_string(),
        })),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
