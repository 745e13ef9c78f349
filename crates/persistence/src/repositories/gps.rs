//! Repository for trip breadcrumbs and vehicle heartbeats.

use chrono::{DateTime, Utc};
use domain::models::gps::{RecordGpsRequest, VehiclePositionRequest};
use sqlx::PgPool;

use crate::entities::{GpsPointEntity, VehiclePositionEntity};
use crate::metrics::QueryTimer;

/// Repository for GPS telemetry.
#[derive(Clone)]
pub struct GpsRepository {
    pool: PgPool,
}

impl GpsRepository {
    /// Creates a new GPS repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stores a breadcrumb and moves the trip's current position to it,
    /// unless the trip already holds a newer fix.
    pub async fn record_trip_point(
        &self,
        trip_id: i64,
        driver_id: Option<i64>,
        vehicle_id: Option<i64>,
        request: &RecordGpsRequest,
    ) -> Result<GpsPointEntity, sqlx::Error> {
        let timer = QueryTimer::new("record_trip_gps_point");
        let timestamp = request.timestamp.unwrap_or_else(Utc::now);
        let mut tx = self.pool.begin().await?;

        let point = sqlx::query_as::<_, GpsPointEntity>(
            r#"
            INSERT INTO gps_positions (trip_id, driver_id, vehicle_id, timestamp, latitude,
                                       longitude, speed, heading, accuracy)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, trip_id, driver_id, vehicle_id, timestamp, latitude, longitude,
                      speed, heading, accuracy
            "#,
        )
        .bind(trip_id)
        .bind(driver_id)
        .bind(vehicle_id)
        .bind(timestamp)
        .bind(request.latitude)
        .bind(request.longitude)
        .bind(request.speed)
        .bind(request.heading)
        .bind(request.accuracy)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE trips
            SET current_latitude = $2, current_longitude = $3, last_gps_update = $4,
                updated_at = NOW()
            WHERE id = $1 AND (last_gps_update IS NULL OR last_gps_update <= $4)
            "#,
        )
        .bind(trip_id)
        .bind(point.latitude)
        .bind(point.longitude)
        .bind(point.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.record();
        Ok(point)
    }

    /// Breadcrumbs for a trip in ascending time order.
    pub async fn list_for_trip(
        &self,
        trip_id: i64,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<GpsPointEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_trip_gps_points");
        let result = sqlx::query_as::<_, GpsPointEntity>(
            r#"
            SELECT id, trip_id, driver_id, vehicle_id, timestamp, latitude, longitude,
                   speed, heading, accuracy
            FROM gps_positions
            WHERE trip_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR timestamp > $2)
            ORDER BY timestamp ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(trip_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Stores a vehicle heartbeat.
    pub async fn record_vehicle_position(
        &self,
        vehicle_id: i64,
        driver_id: Option<i64>,
        request: &VehiclePositionRequest,
    ) -> Result<VehiclePositionEntity, sqlx::Error> {
        let timer = QueryTimer::new("record_vehicle_position");
        let result = sqlx::query_as::<_, VehiclePositionEntity>(
            r#"
            INSERT INTO vehicle_positions (vehicle_id, driver_id, timestamp, latitude, longitude,
                                           speed, heading, accuracy, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, vehicle_id, driver_id, timestamp, latitude, longitude, speed,
                      heading, accuracy, note
            "#,
        )
        .bind(vehicle_id)
        .bind(driver_id)
        .bind(request.timestamp.unwrap_or_else(Utc::now))
        .bind(request.latitude)
        .bind(request.longitude)
        .bind(request.speed)
        .bind(request.heading)
        .bind(request.accuracy)
        .bind(&request.note)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }
}
