//! Read access to vehicles, drivers and stops.

use sqlx::PgPool;

use crate::entities::{DriverEntity, StopEntity, VehicleEntity};
use crate::metrics::QueryTimer;

/// Repository for fleet reference data.
#[derive(Clone)]
pub struct FleetRepository {
    pool: PgPool,
}

impl FleetRepository {
    /// Creates a new fleet repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_vehicle(&self, id: i64) -> Result<Option<VehicleEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_vehicle_by_id");
        let result = sqlx::query_as::<_, VehicleEntity>(
            r#"
            SELECT id, name, license_plate, seat_capacity, driver_id, is_active
            FROM vehicles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// The active vehicle a driver is assigned to, if any.
    pub async fn vehicle_for_driver(
        &self,
        driver_id: i64,
    ) -> Result<Option<VehicleEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_vehicle_for_driver");
        let result = sqlx::query_as::<_, VehicleEntity>(
            r#"
            SELECT id, name, license_plate, seat_capacity, driver_id, is_active
            FROM vehicles
            WHERE driver_id = $1 AND is_active
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn find_driver(&self, id: i64) -> Result<Option<DriverEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_driver_by_id");
        let result = sqlx::query_as::<_, DriverEntity>(
            "SELECT id, name, phone, is_active FROM drivers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn find_stop(&self, id: i64) -> Result<Option<StopEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_stop_by_id");
        let result = sqlx::query_as::<_, StopEntity>(
            "SELECT id, name, latitude, longitude FROM stops WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }
}
