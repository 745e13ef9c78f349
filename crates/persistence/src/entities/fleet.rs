//! Vehicle, driver and stop entities (database row mappings).

use sqlx::FromRow;

/// Database row mapping for the vehicles table.
#[derive(Debug, Clone, FromRow)]
pub struct VehicleEntity {
    pub id: i64,
    pub name: String,
    pub license_plate: Option<String>,
    pub seat_capacity: i32,
    pub driver_id: Option<i64>,
    pub is_active: bool,
}

/// Database row mapping for the drivers table.
#[derive(Debug, Clone, FromRow)]
pub struct DriverEntity {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub is_active: bool,
}

/// Database row mapping for the stops table.
#[derive(Debug, Clone, FromRow)]
pub struct StopEntity {
    pub id: i64,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}
