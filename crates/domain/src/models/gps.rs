//! GPS telemetry models: trip breadcrumbs and vehicle heartbeats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default number of breadcrumbs returned by the trip GPS endpoint.
pub const DEFAULT_GPS_LIMIT: i64 = 500;

/// Hard cap on breadcrumbs returned in one request.
pub const MAX_GPS_LIMIT: i64 = 5000;

/// A breadcrumb recorded while a trip is ongoing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsPoint {
    pub id: i64,
    pub trip_id: i64,
    pub driver_id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
}

/// A vehicle heartbeat, independent of any trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub id: i64,
    pub vehicle_id: i64,
    pub driver_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    pub note: Option<String>,
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Breadcrumb posted by the driver app for an ongoing trip.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordGpsRequest {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,

    #[validate(custom(function = "crate::models::gps::validate_optional_speed"))]
    pub speed: Option<f64>,

    #[validate(custom(function = "crate::models::gps::validate_optional_heading"))]
    pub heading: Option<f64>,

    #[validate(custom(function = "crate::models::gps::validate_optional_accuracy"))]
    pub accuracy: Option<f64>,

    pub timestamp: Option<DateTime<Utc>>,
}

/// Heartbeat posted by the driver app.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VehiclePositionRequest {
    pub vehicle_id: Option<i64>,

    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,

    #[validate(custom(function = "crate::models::gps::validate_optional_speed"))]
    pub speed: Option<f64>,

    #[validate(custom(function = "crate::models::gps::validate_optional_heading"))]
    pub heading: Option<f64>,

    #[validate(custom(function = "crate::models::gps::validate_optional_accuracy"))]
    pub accuracy: Option<f64>,

    pub timestamp: Option<DateTime<Utc>>,

    #[serde(alias = "message")]
    #[validate(length(max = 1000, message = "note must be at most 1000 characters"))]
    pub note: Option<String>,
}

/// Query parameters for the trip breadcrumb endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GpsQuery {
    pub since: Option<String>,
    pub limit: Option<i64>,
}

impl GpsQuery {
    /// Parses `since` as RFC 3339.
    pub fn since(&self) -> Result<Option<DateTime<Utc>>, String> {
        match self.since.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|_| "Invalid since timestamp".to_string()),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_GPS_LIMIT)
            .min(MAX_GPS_LIMIT)
    }
}

pub fn validate_optional_speed(speed: f64) -> Result<(), validator::ValidationError> {
    shared::validation::validate_speed(speed)
}

pub fn validate_optional_heading(heading: f64) -> Result<(), validator::ValidationError> {
    shared::validation::validate_heading(heading)
}

pub fn validate_optional_accuracy(accuracy: f64) -> Result<(), validator::ValidationError> {
    shared::validation::validate_accuracy(accuracy)
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Breadcrumb as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct GpsPointResponse {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub driver_id: Option<i64>,
    pub vehicle_id: Option<i64>,
}

impl From<GpsPoint> for GpsPointResponse {
    fn from(point: GpsPoint) -> Self {
        Self {
            id: point.id,
            timestamp: point.timestamp,
            latitude: point.latitude,
            longitude: point.longitude,
            speed: point.speed,
            heading: point.heading,
            driver_id: point.driver_id,
            vehicle_id: point.vehicle_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionAck {
    pub success: bool,
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}
