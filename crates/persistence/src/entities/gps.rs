//! GPS breadcrumb and vehicle heartbeat entities (database row mappings).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the gps_positions table.
#[derive(Debug, Clone, FromRow)]
pub struct GpsPointEntity {
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

impl From<GpsPointEntity> for domain::models::GpsPoint {
    fn from(entity: GpsPointEntity) -> Self {
        domain::models::GpsPoint {
            id: entity.id,
            trip_id: entity.trip_id,
            driver_id: entity.driver_id,
            vehicle_id: entity.vehicle_id,
            timestamp: entity.timestamp,
            latitude: entity.latitude,
            longitude: entity.longitude,
            speed: entity.speed,
            heading: entity.heading,
            accuracy: entity.accuracy,
        }
    }
}

/// Database row mapping for the vehicle_positions table.
#[derive(Debug, Clone, FromRow)]
pub struct VehiclePositionEntity {
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

impl From<VehiclePositionEntity> for domain::models::VehiclePosition {
    fn from(entity: VehiclePositionEntity) -> Self {
        domain::models::VehiclePosition {
            id: entity.id,
            vehicle_id: entity.vehicle_id,
            driver_id: entity.driver_id,
            timestamp: entity.timestamp,
            latitude: entity.latitude,
            longitude: entity.longitude,
            speed: entity.speed,
            heading: entity.heading,
            accuracy: entity.accuracy,
            note: entity.note,
        }
    }
}
