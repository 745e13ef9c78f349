//! Vehicle heartbeat endpoint.

use axum::{extract::State, http::StatusCode, Json};
use domain::models::gps::{PositionAck, VehiclePositionRequest};
use persistence::repositories::{FleetRepository, GpsRepository};
use tracing::debug;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::DriverAuth;

/// POST /api/v1/shuttle/vehicle/position
///
/// Accepted whether or not the driver has a trip running. Without a
/// `vehicle_id` the driver's assigned vehicle is used.
pub async fn record_vehicle_position(
    State(state): State<AppState>,
    driver: DriverAuth,
    Json(request): Json<VehiclePositionRequest>,
) -> Result<(StatusCode, Json<PositionAck>), ApiError> {
    request.validate()?;

    let fleet = FleetRepository::new(state.pool.clone());
    let vehicle = match request.vehicle_id {
        Some(id) => fleet.find_vehicle(id).await?,
        None => fleet.vehicle_for_driver(driver.driver_id).await?,
    };
    let vehicle = match (vehicle, request.vehicle_id) {
        (Some(v), _) => v,
        (None, Some(_)) => return Err(ApiError::NotFound("Vehicle not found".to_string())),
        (None, None) => return Err(ApiError::Validation("Missing vehicle_id".to_string())),
    };

    let position = GpsRepository::new(state.pool.clone())
        .record_vehicle_position(vehicle.id, Some(driver.driver_id), &request)
        .await?;

    debug!(
        vehicle_id = vehicle.id,
        driver_id = driver.driver_id,
        "Vehicle heartbeat recorded"
    );

    Ok((
        StatusCode::CREATED,
        Json(PositionAck {
            success: true,
            id: position.id,
            timestamp: position.timestamp,
        }),
    ))
}
