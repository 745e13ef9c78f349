//! Dispatcher trip operations.
//!
//! Routes here require an admin API key. Every write that touches a
//! vehicle or driver assignment runs the double-booking check before it
//! commits.

use std::collections::BTreeMap;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use domain::models::notification::NotificationResponse;
use domain::models::passenger::AddPassengerRequest;
use domain::models::trip::{CreateTripRequest, RescheduleTripRequest};
use domain::models::{NotificationType, Trip, TripPassenger, TripState};
use domain::services::{
    validate_trip_schedule, ConflictError, ConflictInfo, ResourceKind, TripSchedule,
};
use persistence::repositories::{
    FleetRepository, PassengerRepository, TripRepository, TripTransition,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::ApiKeyAuth;
use crate::services::rate_limiter::LimiterStats;
use crate::services::DispatchSummary;

// ============================================================================
// Request / response types
// ============================================================================

/// Ad-hoc availability check for a prospective assignment.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct ConflictCheckRequest {
    pub trip_date: NaiveDate,
    pub planned_start: DateTime<Utc>,
    pub planned_arrival: Option<DateTime<Utc>>,
    pub vehicle_id: Option<i64>,
    pub driver_id: Option<i64>,
    /// Trip being edited, so it does not collide with itself.
    pub exclude_trip_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictInfo>,
}

/// Manual passenger notification, e.g. approaching or arrived.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NotifyPassengersRequest {
    pub notification_type: NotificationType,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct NotifyPassengersResponse {
    pub success: bool,
    pub trip_id: i64,
    pub summary: DispatchSummary,
    pub notifications: Vec<NotificationResponse>,
}

// ============================================================================
// Trips
// ============================================================================

/// POST /api/v1/admin/trips
///
/// Creates a draft trip. 409 when the vehicle or driver is already booked
/// for an overlapping window.
pub async fn create_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Json(request): Json<CreateTripRequest>,
) -> Result<(StatusCode, Json<Trip>), ApiError> {
    request.validate()?;

    let trip = TripRepository::new(state.pool.clone())
        .create_trip(&request)
        .await?
        .into_domain();

    info!(
        admin_key_id = auth.api_key_id,
        trip_id = trip.id,
        reference = %trip.reference,
        "Trip created"
    );
    Ok((StatusCode::CREATED, Json(trip)))
}

/// PUT /api/v1/admin/trips/:trip_id/schedule
pub async fn reschedule_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Path(trip_id): Path<i64>,
    Json(request): Json<RescheduleTripRequest>,
) -> Result<Json<Trip>, ApiError> {
    request.validate()?;

    let trip = TripRepository::new(state.pool.clone())
        .reschedule_trip(trip_id, &request)
        .await?
        .into_domain();

    info!(admin_key_id = auth.api_key_id, trip_id, "Trip schedule updated");
    Ok(Json(trip))
}

/// POST /api/v1/admin/trips/:trip_id/passengers
pub async fn add_passenger(
    State(state): State<AppState>,
    Path(trip_id): Path<i64>,
    Json(request): Json<AddPassengerRequest>,
) -> Result<(StatusCode, Json<TripPassenger>), ApiError> {
    request.validate()?;

    let passenger = PassengerRepository::new(state.pool.clone())
        .add_passenger(trip_id, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(passenger.into())))
}

async fn apply_transition(
    state: &AppState,
    auth: &ApiKeyAuth,
    trip_id: i64,
    transition: TripTransition,
) -> Result<Trip, ApiError> {
    let outcome = TripRepository::new(state.pool.clone())
        .transition(trip_id, transition)
        .await?;
    let trip = outcome.trip.into_domain();

    info!(
        admin_key_id = auth.api_key_id,
        trip_id,
        from = %outcome.previous_state,
        to = %trip.state,
        "Trip transitioned by dispatcher"
    );

    let notification = match trip.state {
        TripState::Ongoing => Some(NotificationType::TripStarted),
        TripState::Cancelled => Some(NotificationType::Cancelled),
        _ => None,
    };
    if let Some(notification_type) = notification {
        state
            .notifications
            .spawn_trip_notifications(trip.clone(), notification_type, BTreeMap::new());
    }

    Ok(trip)
}

/// POST /api/v1/admin/trips/:trip_id/plan
pub async fn plan_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Path(trip_id): Path<i64>,
) -> Result<Json<Trip>, ApiError> {
    apply_transition(&state, &auth, trip_id, TripTransition::Plan)
        .await
        .map(Json)
}

/// POST /api/v1/admin/trips/:trip_id/start
///
/// Passengers are notified in the background.
pub async fn start_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Path(trip_id): Path<i64>,
) -> Result<Json<Trip>, ApiError> {
    apply_transition(&state, &auth, trip_id, TripTransition::Start)
        .await
        .map(Json)
}

/// POST /api/v1/admin/trips/:trip_id/complete
pub async fn complete_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Path(trip_id): Path<i64>,
) -> Result<Json<Trip>, ApiError> {
    apply_transition(&state, &auth, trip_id, TripTransition::Complete)
        .await
        .map(Json)
}

/// POST /api/v1/admin/trips/:trip_id/cancel
///
/// Passengers are notified in the background.
pub async fn cancel_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Path(trip_id): Path<i64>,
) -> Result<Json<Trip>, ApiError> {
    apply_transition(&state, &auth, trip_id, TripTransition::Cancel)
        .await
        .map(Json)
}

/// POST /api/v1/admin/trips/:trip_id/reset
pub async fn reset_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Path(trip_id): Path<i64>,
) -> Result<Json<Trip>, ApiError> {
    apply_transition(&state, &auth, trip_id, TripTransition::ResetToDraft)
        .await
        .map(Json)
}

/// POST /api/v1/admin/trips/:trip_id/notify
///
/// Stores one notification per passenger and sends them in the background,
/// answering 202. Passengers that cannot be reached on their channel show
/// up as `failed` right away.
pub async fn notify_passengers(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Path(trip_id): Path<i64>,
    Json(request): Json<NotifyPassengersRequest>,
) -> Result<(StatusCode, Json<NotifyPassengersResponse>), ApiError> {
    let trip: Trip = TripRepository::new(state.pool.clone())
        .find_by_id(trip_id)
        .await?
        .map(Trip::from)
        .ok_or_else(|| ApiError::NotFound("Trip not found".to_string()))?;
    if trip.state.is_terminal() {
        return Err(ApiError::Validation(format!(
            "Cannot notify passengers of a {} trip",
            trip.state.label()
        )));
    }

    let notifications = state
        .notifications
        .queue_trip_notifications(&trip, request.notification_type, &request.values)
        .await?;
    let summary = DispatchSummary::of(&notifications);

    info!(
        admin_key_id = auth.api_key_id,
        trip_id,
        notification_type = %request.notification_type,
        queued = summary.queued,
        failed = summary.failed,
        "Manual passenger notification queued"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(NotifyPassengersResponse {
            success: true,
            trip_id,
            summary,
            notifications: notifications.into_iter().map(Into::into).collect(),
        }),
    ))
}

// ============================================================================
// Conflicts and limits
// ============================================================================

/// POST /api/v1/admin/conflicts/check
///
/// Reports the first collision without writing anything. A conflict is a
/// normal answer here, so it comes back with 200.
pub async fn check_conflicts(
    State(state): State<AppState>,
    Json(request): Json<ConflictCheckRequest>,
) -> Result<Json<ConflictCheckResponse>, ApiError> {
    request.validate()?;
    if let Some(end) = request.planned_arrival {
        if end <= request.planned_start {
            return Err(ApiError::Validation(
                "planned_arrival must be after planned_start".to_string(),
            ));
        }
    }

    let fleet = FleetRepository::new(state.pool.clone());
    let vehicle_name = match request.vehicle_id {
        Some(id) => fleet.find_vehicle(id).await?.map(|v| v.name),
        None => None,
    };
    let driver_name = match request.driver_id {
        Some(id) => fleet.find_driver(id).await?.map(|d| d.name),
        None => None,
    };

    let schedule = TripSchedule {
        trip_id: request.exclude_trip_id,
        state: TripState::Planned,
        trip_date: request.trip_date,
        planned_start: Some(request.planned_start),
        planned_arrival: request.planned_arrival,
        vehicle_id: request.vehicle_id,
        vehicle_name,
        driver_id: request.driver_id,
        driver_name,
    };

    let mut source = TripRepository::new(state.pool.clone());
    let response = match validate_trip_schedule(&mut source, &schedule).await {
        Ok(()) => ConflictCheckResponse {
            has_conflict: false,
            resource: None,
            message: None,
            conflict: None,
        },
        Err(ConflictError::Lookup(msg)) => return Err(ApiError::Internal(msg)),
        Err(e) => ConflictCheckResponse {
            has_conflict: true,
            resource: e.resource(),
            conflict: e.conflict().cloned(),
            message: Some(e.to_string()),
        },
    };
    Ok(Json(response))
}

/// GET /api/v1/admin/rate-limits
pub async fn rate_limit_stats(
    State(state): State<AppState>,
) -> Json<BTreeMap<&'static str, LimiterStats>> {
    let stats = state
        .channel_limiter
        .stats()
        .into_iter()
        .map(|(channel, stats)| (channel.as_str(), stats))
        .collect();
    Json(stats)
}
