//! Driver-app trip endpoints under `/api/v1/shuttle`.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use domain::models::gps::{GpsPointResponse, GpsQuery, PositionAck, RecordGpsRequest};
use domain::models::trip::{
    ConfirmTripRequest, ConfirmTripResponse, LiveTripResponse, MyTripsQuery, TripListResponse,
    TripResponse,
};
use domain::models::{GpsPoint, NotificationType, Trip, TripState};
use persistence::repositories::{GpsRepository, TripRepository, TripTransition};
use serde::Serialize;
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::{ApiKeyAuth, DriverAuth};

#[derive(Debug, Serialize)]
pub struct LiveTripsResponse {
    pub success: bool,
    pub count: usize,
    pub trips: Vec<LiveTripResponse>,
}

#[derive(Debug, Serialize)]
pub struct GpsPathResponse {
    pub success: bool,
    pub trip_id: i64,
    pub count: usize,
    pub points: Vec<GpsPointResponse>,
}

async fn load_trip(repo: &TripRepository, trip_id: i64) -> Result<Trip, ApiError> {
    repo.find_by_id(trip_id)
        .await?
        .map(Trip::from)
        .ok_or_else(|| ApiError::NotFound("Trip not found".to_string()))
}

fn ensure_own_trip(trip: &Trip, driver: &DriverAuth) -> Result<(), ApiError> {
    if trip.driver_id != driver.driver_id {
        return Err(ApiError::Forbidden("Not authorized".to_string()));
    }
    Ok(())
}

/// GET /api/v1/shuttle/trips/my
///
/// The caller's trips ordered by planned start, optionally filtered by state.
pub async fn my_trips(
    State(state): State<AppState>,
    driver: DriverAuth,
    Query(query): Query<MyTripsQuery>,
) -> Result<Json<TripListResponse>, ApiError> {
    let filter = match query.state.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<TripState>().map_err(ApiError::Validation)?),
        None => None,
    };

    let repo = TripRepository::new(state.pool.clone());
    let trips: Vec<TripResponse> = repo
        .list_for_driver(driver.driver_id, filter)
        .await?
        .into_iter()
        .map(|e| TripResponse::from(e.into_domain()))
        .collect();

    Ok(Json(TripListResponse {
        success: true,
        count: trips.len(),
        trips,
    }))
}

/// POST /api/v1/shuttle/trips/:trip_id/confirm
///
/// Moves a draft trip to planned, or a planned trip to ongoing, and records
/// where the driver confirmed it. Starting the trip notifies its passengers.
pub async fn confirm_trip(
    State(state): State<AppState>,
    driver: DriverAuth,
    Path(trip_id): Path<i64>,
    Json(request): Json<ConfirmTripRequest>,
) -> Result<Json<ConfirmTripResponse>, ApiError> {
    request.validate()?;

    let repo = TripRepository::new(state.pool.clone());
    let trip = load_trip(&repo, trip_id).await?;
    ensure_own_trip(&trip, &driver)?;

    let outcome = repo
        .transition(trip_id, TripTransition::Confirm(request))
        .await?;
    let trip = outcome.trip.into_domain();

    info!(
        trip_id,
        driver_id = driver.driver_id,
        from = %outcome.previous_state,
        to = %trip.state,
        "Trip confirmed from driver app"
    );

    if trip.state == TripState::Ongoing {
        state.notifications.spawn_trip_notifications(
            trip.clone(),
            NotificationType::TripStarted,
            BTreeMap::new(),
        );
    }

    Ok(Json(ConfirmTripResponse {
        success: true,
        trip_id: trip.id,
        new_state: trip.state,
        confirmed_at: trip.confirmed_at.unwrap_or_else(Utc::now),
        confirm_stop_id: trip.confirm_stop_id,
        confirm_stop_name: trip.confirm_stop_name,
    }))
}

/// GET /api/v1/shuttle/live/ongoing
pub async fn live_ongoing(
    State(state): State<AppState>,
    _auth: ApiKeyAuth,
) -> Result<Json<LiveTripsResponse>, ApiError> {
    let repo = TripRepository::new(state.pool.clone());
    let trips: Vec<LiveTripResponse> = repo
        .list_ongoing()
        .await?
        .into_iter()
        .map(|e| LiveTripResponse::from(e.into_domain()))
        .collect();

    Ok(Json(LiveTripsResponse {
        success: true,
        count: trips.len(),
        trips,
    }))
}

/// GET /api/v1/shuttle/trips/:trip_id/gps?since=&limit=
pub async fn trip_gps_path(
    State(state): State<AppState>,
    _auth: ApiKeyAuth,
    Path(trip_id): Path<i64>,
    Query(query): Query<GpsQuery>,
) -> Result<Json<GpsPathResponse>, ApiError> {
    let since = query.since().map_err(ApiError::Validation)?;

    let trips = TripRepository::new(state.pool.clone());
    let trip = load_trip(&trips, trip_id).await?;

    let points: Vec<GpsPointResponse> = GpsRepository::new(state.pool.clone())
        .list_for_trip(trip.id, since, query.limit())
        .await?
        .into_iter()
        .map(|p| GpsPointResponse::from(GpsPoint::from(p)))
        .collect();

    Ok(Json(GpsPathResponse {
        success: true,
        trip_id: trip.id,
        count: points.len(),
        points,
    }))
}

/// POST /api/v1/shuttle/trips/:trip_id/gps
///
/// Records a breadcrumb for the caller's ongoing trip.
pub async fn record_trip_gps(
    State(state): State<AppState>,
    driver: DriverAuth,
    Path(trip_id): Path<i64>,
    Json(request): Json<RecordGpsRequest>,
) -> Result<(StatusCode, Json<PositionAck>), ApiError> {
    request.validate()?;

    let trips = TripRepository::new(state.pool.clone());
    let trip = load_trip(&trips, trip_id).await?;
    ensure_own_trip(&trip, &driver)?;
    trip.ensure_accepts_gps()?;

    let point = GpsRepository::new(state.pool.clone())
        .record_trip_point(trip.id, Some(driver.driver_id), trip.vehicle_id, &request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PositionAck {
            success: true,
            id: point.id,
            timestamp: point.timestamp,
        }),
    ))
}
