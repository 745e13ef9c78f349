use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, require_admin, require_auth,
    trace_id, verify_webhook_signature, RateLimiterState,
};
use crate::routes::{admin, fleet, health, notifications, templates, trips, waha, webhooks};
use crate::services::providers::WahaError;
use crate::services::{
    ChannelRateLimiter, NotificationDispatcher, NotificationService, ProviderRegistry, WahaClient,
};
use domain::services::ProviderError;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    /// Per-API-key request limiter; `None` when disabled.
    pub rate_limiter: Option<Arc<RateLimiterState>>,
    pub notifications: NotificationService,
    /// Outbound per-channel limiter shared with the dispatcher.
    pub channel_limiter: Arc<ChannelRateLimiter>,
    pub waha: Option<WahaClient>,
}

/// Misconfiguration that stops the service from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Notification provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("WAHA client setup failed: {0}")]
    Waha(#[from] WahaError),
}

/// Wires providers, limiters and the notification service from config.
pub fn build_state(config: Config, pool: PgPool) -> Result<AppState, StartupError> {
    build_state_with_registry(config, pool, &ProviderRegistry::with_defaults())
}

/// As [`build_state`], with a caller-supplied provider registry.
pub fn build_state_with_registry(
    config: Config,
    pool: PgPool,
    registry: &ProviderRegistry,
) -> Result<AppState, StartupError> {
    let config = Arc::new(config);

    let rate_limiter = (config.security.rate_limit_per_minute > 0).then(|| {
        Arc::new(RateLimiterState::new(config.security.rate_limit_per_minute))
    });

    let channel_limiter = Arc::new(ChannelRateLimiter::from_config(
        &config.notifications.limits,
    ));
    let dispatcher =
        NotificationDispatcher::from_config(&config, registry, Arc::clone(&channel_limiter))?;
    let notifications = NotificationService::new(
        pool.clone(),
        Arc::new(dispatcher),
        config.notifications.clone(),
    );

    let waha = if config.waha.enabled {
        let client = WahaClient::from_config(&config.waha)?;
        info!(session = client.default_session(), "WAHA session management enabled");
        Some(client)
    } else {
        None
    };

    Ok(AppState {
        pool,
        config,
        rate_limiter,
        notifications,
        channel_limiter,
        waha,
    })
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.security.cors_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    use tower_http::cors::AllowOrigin;
    let origins: Vec<_> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // Driver app. Auth runs first (outermost route_layer), then the
    // per-key limiter, which needs the auth info.
    let driver_routes = Router::new()
        .route("/api/v1/shuttle/trips/my", get(trips::my_trips))
        .route(
            "/api/v1/shuttle/trips/:trip_id/confirm",
            post(trips::confirm_trip),
        )
        .route("/api/v1/shuttle/live/ongoing", get(trips::live_ongoing))
        .route(
            "/api/v1/shuttle/trips/:trip_id/gps",
            get(trips::trip_gps_path).post(trips::record_trip_gps),
        )
        .route(
            "/api/v1/shuttle/vehicle/position",
            post(fleet::record_vehicle_position),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route("/api/v1/admin/trips", post(admin::create_trip))
        .route(
            "/api/v1/admin/trips/:trip_id/schedule",
            put(admin::reschedule_trip),
        )
        .route(
            "/api/v1/admin/trips/:trip_id/passengers",
            post(admin::add_passenger),
        )
        .route("/api/v1/admin/trips/:trip_id/plan", post(admin::plan_trip))
        .route("/api/v1/admin/trips/:trip_id/start", post(admin::start_trip))
        .route(
            "/api/v1/admin/trips/:trip_id/complete",
            post(admin::complete_trip),
        )
        .route("/api/v1/admin/trips/:trip_id/cancel", post(admin::cancel_trip))
        .route("/api/v1/admin/trips/:trip_id/reset", post(admin::reset_trip))
        .route(
            "/api/v1/admin/trips/:trip_id/notify",
            post(admin::notify_passengers),
        )
        .route(
            "/api/v1/admin/trips/:trip_id/notifications",
            get(notifications::list_trip_notifications),
        )
        .route("/api/v1/admin/conflicts/check", post(admin::check_conflicts))
        .route(
            "/api/v1/admin/notifications",
            post(notifications::send_notification),
        )
        .route(
            "/api/v1/admin/notifications/:notification_id/retry",
            post(notifications::retry_notification),
        )
        .route("/api/v1/admin/rate-limits", get(admin::rate_limit_stats))
        .route(
            "/api/v1/admin/templates",
            get(templates::list_templates).post(templates::create_template),
        )
        .route(
            "/api/v1/admin/templates/:template_id/default",
            post(templates::set_default_template),
        )
        .route(
            "/api/v1/admin/templates/:template_id/preview",
            post(templates::preview_template),
        )
        .route("/api/v1/admin/waha/sessions", get(waha::list_sessions))
        .route(
            "/api/v1/admin/waha/sessions/:session",
            get(waha::session_status).delete(waha::delete_session),
        )
        .route(
            "/api/v1/admin/waha/sessions/:session/ensure",
            post(waha::ensure_session),
        )
        .route(
            "/api/v1/admin/waha/sessions/:session/start",
            post(waha::start_session),
        )
        .route(
            "/api/v1/admin/waha/sessions/:session/stop",
            post(waha::stop_session),
        )
        .route(
            "/api/v1/admin/waha/sessions/:session/restart",
            post(waha::restart_session),
        )
        .route(
            "/api/v1/admin/waha/sessions/:session/logout",
            post(waha::logout_session),
        )
        .route(
            "/api/v1/admin/waha/sessions/:session/qr",
            get(waha::session_qr),
        )
        .route(
            "/api/v1/admin/waha/sessions/:session/request-code",
            post(waha::request_pairing_code),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    // Vendor callbacks carry no API key.
    let webhook_routes = Router::new()
        .route("/webhooks/delivery-status", post(webhooks::delivery_status))
        .route("/webhooks/sms", post(webhooks::sms_status))
        .route("/webhooks/whatsapp", post(webhooks::whatsapp_status))
        .route("/webhooks/waha", post(webhooks::waha_event))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_webhook_signature,
        ))
        .route("/webhooks/health", get(webhooks::webhook_health));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(driver_routes)
        .merge(admin_routes)
        .merge(webhook_routes)
        // Global middleware (bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors_layer(&config))
        .with_state(state)
}
