//! Repository for trip database operations.
//!
//! Writes that change a trip's schedule (create, reschedule, planning) run the
//! conflict detector inside the same transaction as the write. The transaction
//! first takes advisory locks on the vehicle and driver, so two writers
//! targeting the same resource are serialized.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use domain::models::trip::{
    ConfirmTripRequest, CreateTripRequest, RescheduleTripRequest, Trip, TripError, TripState,
};
use domain::services::conflict::{
    validate_trip_schedule, ConflictError, ResourceKind, ScheduledTrip, TripSchedule,
    TripScheduleSource,
};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use crate::entities::{ScheduledTripEntity, TripEntity};
use crate::metrics::QueryTimer;

/// Joined projection shared by every trip read.
const TRIP_SELECT: &str = r#"
    SELECT t.id, t.reference, t.name, t.trip_type, t.trip_date, t.state,
           t.planned_start, t.planned_arrival, t.actual_start, t.actual_arrival,
           t.vehicle_id, v.name AS vehicle_name, v.license_plate AS vehicle_plate,
           t.driver_id, d.name AS driver_name, d.phone AS driver_phone,
           t.group_name, t.company_id, t.total_seats, t.booked_seats,
           (SELECT COUNT(*) FROM trip_passengers p WHERE p.trip_id = t.id)::INT AS passenger_count,
           t.current_latitude, t.current_longitude, t.last_gps_update,
           t.confirm_latitude, t.confirm_longitude, t.confirm_stop_id,
           s.name AS confirm_stop_name, t.confirm_note, t.confirmed_at, t.confirm_source,
           t.created_at, t.updated_at
    FROM trips t
    LEFT JOIN vehicles v ON v.id = t.vehicle_id
    LEFT JOIN drivers d ON d.id = t.driver_id
    LEFT JOIN stops s ON s.id = t.confirm_stop_id
"#;

const SCHEDULED_BY_VEHICLE: &str = r#"
    SELECT t.id, t.name, t.state, t.planned_start, t.planned_arrival, t.group_name,
           v.name AS vehicle_name, d.name AS driver_name
    FROM trips t
    LEFT JOIN vehicles v ON v.id = t.vehicle_id
    LEFT JOIN drivers d ON d.id = t.driver_id
    WHERE t.vehicle_id = $1
      AND t.trip_date = $2
      AND t.state <> 'cancelled'
      AND t.planned_start IS NOT NULL
      AND ($3::BIGINT IS NULL OR t.id <> $3)
    ORDER BY t.planned_start
"#;

const SCHEDULED_BY_DRIVER: &str = r#"
    SELECT t.id, t.name, t.state, t.planned_start, t.planned_arrival, t.group_name,
           v.name AS vehicle_name, d.name AS driver_name
    FROM trips t
    LEFT JOIN vehicles v ON v.id = t.vehicle_id
    LEFT JOIN drivers d ON d.id = t.driver_id
    WHERE t.driver_id = $1
      AND t.trip_date = $2
      AND t.state <> 'cancelled'
      AND t.planned_start IS NOT NULL
      AND ($3::BIGINT IS NULL OR t.id <> $3)
    ORDER BY t.planned_start
"#;

/// Source tag stored on confirmations made from the driver app.
pub const CONFIRM_SOURCE_DRIVER_APP: &str = "driver_app";

// ============================================================================
// Errors and inputs
// ============================================================================

/// Failure of a trip write.
#[derive(Debug, Error)]
pub enum TripWriteError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Invalid(#[from] TripError),

    #[error("Trip not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Lifecycle step requested on an existing trip.
#[derive(Debug, Clone)]
pub enum TripTransition {
    Plan,
    Start,
    Complete,
    Cancel,
    ResetToDraft,
    /// Driver confirmation: draft to planned, or planned to ongoing.
    Confirm(ConfirmTripRequest),
}

/// Result of a lifecycle step.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub previous_state: TripState,
    pub trip: TripEntity,
}

// ============================================================================
// Repository
// ============================================================================

/// Repository for trip operations.
#[derive(Clone)]
pub struct TripRepository {
    pool: PgPool,
}

impl TripRepository {
    /// Creates a new trip repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Find a trip by ID.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_trip_by_id");
        let sql = format!("{TRIP_SELECT} WHERE t.id = $1");
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Trips assigned to a driver, optionally filtered by state, ordered by
    /// planned start.
    pub async fn list_for_driver(
        &self,
        driver_id: i64,
        state: Option<TripState>,
    ) -> Result<Vec<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_trips_for_driver");
        let sql = format!(
            "{TRIP_SELECT} WHERE t.driver_id = $1 AND ($2::TEXT IS NULL OR t.state = $2) \
             ORDER BY t.planned_start ASC NULLS LAST, t.id ASC"
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(driver_id)
            .bind(state.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
    }

    /// All ongoing trips, most recently updated position first.
    pub async fn list_ongoing(&self) -> Result<Vec<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_ongoing_trips");
        let sql = format!(
            "{TRIP_SELECT} WHERE t.state = 'ongoing' \
             ORDER BY t.last_gps_update DESC NULLS LAST, t.id ASC"
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Planned trips starting after `after` and no later than `until`.
    pub async fn list_planned_starting_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TripEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_planned_trips_starting_between");
        let sql = format!(
            "{TRIP_SELECT} WHERE t.state = 'planned' \
             AND t.planned_start > $1 AND t.planned_start <= $2 \
             ORDER BY t.planned_start ASC, t.id ASC"
        );
        let result = sqlx::query_as::<_, TripEntity>(&sql)
            .bind(after)
            .bind(until)
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Creates a draft trip after checking its vehicle and driver for
    /// double-booking.
    pub async fn create_trip(
        &self,
        request: &CreateTripRequest,
    ) -> Result<TripEntity, TripWriteError> {
        Trip::check_invariants(
            request.total_seats,
            0,
            request.planned_start,
            request.planned_arrival,
        )?;

        let timer = QueryTimer::new("create_trip");
        let mut tx = self.pool.begin().await?;
        lock_resources(&mut tx, request.vehicle_id, request.driver_id).await?;

        let (vehicle_name, driver_name) =
            resource_names(&mut tx, request.vehicle_id, request.driver_id).await?;
        let schedule = TripSchedule {
            trip_id: None,
            state: TripState::Draft,
            trip_date: request.trip_date,
            planned_start: request.planned_start,
            planned_arrival: request.planned_arrival,
            vehicle_id: request.vehicle_id,
            vehicle_name,
            driver_id: Some(request.driver_id),
            driver_name,
        };
        validate_trip_schedule(&mut TxScheduleSource { tx: &mut tx }, &schedule).await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO trips (reference, name, trip_type, trip_date, planned_start,
                               planned_arrival, vehicle_id, driver_id, group_name,
                               company_id, total_seats)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&request.reference)
        .bind(&request.name)
        .bind(request.trip_type.as_str())
        .bind(request.trip_date)
        .bind(request.planned_start)
        .bind(request.planned_arrival)
        .bind(request.vehicle_id)
        .bind(request.driver_id)
        .bind(&request.group_name)
        .bind(request.company_id)
        .bind(request.total_seats)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.record();
        info!(trip_id = id, reference = %request.reference, "Trip created");

        self.find_by_id(id).await?.ok_or(TripWriteError::NotFound)
    }

    /// Moves a trip to a new slot or resources, re-running the conflict check
    /// against every other trip.
    pub async fn reschedule_trip(
        &self,
        trip_id: i64,
        request: &RescheduleTripRequest,
    ) -> Result<TripEntity, TripWriteError> {
        let timer = QueryTimer::new("reschedule_trip");
        let mut tx = self.pool.begin().await?;
        lock_resources(&mut tx, request.vehicle_id, request.driver_id).await?;

        let current = fetch_for_update(&mut tx, trip_id)
            .await?
            .ok_or(TripWriteError::NotFound)?
            .into_domain();
        if current.state.is_terminal() {
            return Err(TripError::InvalidTransition {
                from: current.state,
                to: current.state,
            }
            .into());
        }
        Trip::check_invariants(
            current.total_seats,
            current.booked_seats,
            request.planned_start,
            request.planned_arrival,
        )?;

        let (vehicle_name, driver_name) =
            resource_names(&mut tx, request.vehicle_id, request.driver_id).await?;
        let schedule = TripSchedule {
            trip_id: Some(trip_id),
            state: current.state,
            trip_date: request.trip_date,
            planned_start: request.planned_start,
            planned_arrival: request.planned_arrival,
            vehicle_id: request.vehicle_id,
            vehicle_name,
            driver_id: Some(request.driver_id),
            driver_name,
        };
        validate_trip_schedule(&mut TxScheduleSource { tx: &mut tx }, &schedule).await?;

        sqlx::query(
            r#"
            UPDATE trips
            SET trip_date = $2, planned_start = $3, planned_arrival = $4,
                vehicle_id = $5, driver_id = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(trip_id)
        .bind(request.trip_date)
        .bind(request.planned_start)
        .bind(request.planned_arrival)
        .bind(request.vehicle_id)
        .bind(request.driver_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.record();
        info!(trip_id, "Trip rescheduled");

        self.find_by_id(trip_id).await?.ok_or(TripWriteError::NotFound)
    }

    /// Applies a lifecycle step under row and resource locks.
    ///
    /// Moving to `planned` re-validates the schedule, because a draft may
    /// have been created before a competing trip took the slot.
    pub async fn transition(
        &self,
        trip_id: i64,
        transition: TripTransition,
    ) -> Result<TransitionOutcome, TripWriteError> {
        let timer = QueryTimer::new("transition_trip");
        let mut tx = self.pool.begin().await?;

        let resources: Option<(Option<i64>, i64)> =
            sqlx::query_as("SELECT vehicle_id, driver_id FROM trips WHERE id = $1")
                .bind(trip_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (vehicle_id, driver_id) = resources.ok_or(TripWriteError::NotFound)?;
        lock_resources(&mut tx, vehicle_id, driver_id).await?;

        let current = fetch_for_update(&mut tx, trip_id)
            .await?
            .ok_or(TripWriteError::NotFound)?
            .into_domain();

        let target = match &transition {
            TripTransition::Plan => {
                current.ensure_can_plan()?;
                TripState::Planned
            }
            TripTransition::Start => {
                current.ensure_can_start()?;
                TripState::Ongoing
            }
            TripTransition::Complete => {
                current.ensure_can_complete()?;
                TripState::Done
            }
            TripTransition::Cancel => {
                current.ensure_can_cancel()?;
                TripState::Cancelled
            }
            TripTransition::ResetToDraft => {
                current.ensure_can_reset()?;
                TripState::Draft
            }
            TripTransition::Confirm(_) => current.confirmation_target()?,
        };

        if target == TripState::Planned {
            let schedule = TripSchedule {
                state: target,
                ..current.schedule()
            };
            validate_trip_schedule(&mut TxScheduleSource { tx: &mut tx }, &schedule).await?;
        }

        sqlx::query(
            r#"
            UPDATE trips
            SET state = $2,
                actual_start = CASE
                    WHEN $2 = 'ongoing' THEN COALESCE(actual_start, NOW())
                    WHEN $2 = 'draft' THEN NULL
                    ELSE actual_start END,
                actual_arrival = CASE
                    WHEN $2 = 'done' THEN NOW()
                    WHEN $2 = 'draft' THEN NULL
                    ELSE actual_arrival END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(trip_id)
        .bind(target.as_str())
        .execute(&mut *tx)
        .await?;

        if let TripTransition::Confirm(confirm) = &transition {
            sqlx::query(
                r#"
                UPDATE trips
                SET confirm_latitude = $2, confirm_longitude = $3, confirm_stop_id = $4,
                    confirm_note = $5, confirmed_at = NOW(), confirm_source = $6
                WHERE id = $1
                "#,
            )
            .bind(trip_id)
            .bind(confirm.latitude)
            .bind(confirm.longitude)
            .bind(confirm.stop_id)
            .bind(&confirm.note)
            .bind(CONFIRM_SOURCE_DRIVER_APP)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        timer.record();
        info!(
            trip_id,
            from = %current.state,
            to = %target,
            "Trip state changed"
        );

        let trip = self
            .find_by_id(trip_id)
            .await?
            .ok_or(TripWriteError::NotFound)?;
        Ok(TransitionOutcome {
            previous_state: current.state,
            trip,
        })
    }
}

#[async_trait]
impl TripScheduleSource for TripRepository {
    async fn scheduled_trips(
        &mut self,
        kind: ResourceKind,
        resource_id: i64,
        date: NaiveDate,
        exclude_trip_id: Option<i64>,
    ) -> Result<Vec<ScheduledTrip>, ConflictError> {
        let timer = QueryTimer::new("scheduled_trips");
        let result = fetch_scheduled(&self.pool, kind, resource_id, date, exclude_trip_id).await;
        timer.record();
        result
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

/// Schedule source reading through an open transaction, so the check sees
/// the same snapshot the write commits against.
struct TxScheduleSource<'a, 'c> {
    tx: &'a mut Transaction<'c, Postgres>,
}

#[async_trait]
impl TripScheduleSource for TxScheduleSource<'_, '_> {
    async fn scheduled_trips(
        &mut self,
        kind: ResourceKind,
        resource_id: i64,
        date: NaiveDate,
        exclude_trip_id: Option<i64>,
    ) -> Result<Vec<ScheduledTrip>, ConflictError> {
        fetch_scheduled(&mut **self.tx, kind, resource_id, date, exclude_trip_id).await
    }
}

async fn fetch_scheduled<'e, E>(
    executor: E,
    kind: ResourceKind,
    resource_id: i64,
    date: NaiveDate,
    exclude_trip_id: Option<i64>,
) -> Result<Vec<ScheduledTrip>, ConflictError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = match kind {
        ResourceKind::Vehicle => SCHEDULED_BY_VEHICLE,
        ResourceKind::Driver => SCHEDULED_BY_DRIVER,
    };
    let rows = sqlx::query_as::<_, ScheduledTripEntity>(sql)
        .bind(resource_id)
        .bind(date)
        .bind(exclude_trip_id)
        .fetch_all(executor)
        .await
        .map_err(|e| ConflictError::Lookup(e.to_string()))?;
    Ok(rows.into_iter().map(ScheduledTrip::from).collect())
}

/// Advisory key for a schedulable resource.
pub fn resource_lock_key(kind: ResourceKind, id: i64) -> String {
    format!("{}:{}", kind.as_str(), id)
}

/// Takes transaction-scoped advisory locks, vehicle before driver.
async fn lock_resources(
    tx: &mut Transaction<'_, Postgres>,
    vehicle_id: Option<i64>,
    driver_id: i64,
) -> Result<(), sqlx::Error> {
    let mut keys = Vec::with_capacity(2);
    if let Some(vehicle_id) = vehicle_id {
        keys.push(resource_lock_key(ResourceKind::Vehicle, vehicle_id));
    }
    keys.push(resource_lock_key(ResourceKind::Driver, driver_id));

    for key in keys {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&key)
            .execute(&mut **tx)
            .await?;
        debug!(lock = %key, "Acquired schedule lock");
    }
    Ok(())
}

async fn fetch_for_update(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: i64,
) -> Result<Option<TripEntity>, sqlx::Error> {
    let sql = format!("{TRIP_SELECT} WHERE t.id = $1 FOR UPDATE OF t");
    sqlx::query_as::<_, TripEntity>(&sql)
        .bind(trip_id)
        .fetch_optional(&mut **tx)
        .await
}

/// Display names used in conflict messages.
async fn resource_names(
    tx: &mut Transaction<'_, Postgres>,
    vehicle_id: Option<i64>,
    driver_id: i64,
) -> Result<(Option<String>, Option<String>), sqlx::Error> {
    let vehicle_name = match vehicle_id {
        Some(id) => {
            sqlx::query_scalar::<_, String>("SELECT name FROM vehicles WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?
        }
        None => None,
    };
    let driver_name = sqlx::query_scalar::<_, String>("SELECT name FROM drivers WHERE id = $1")
        .bind(driver_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok((vehicle_name, driver_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_lock_keys() {
        assert_eq!(resource_lock_key(ResourceKind::Vehicle, 12), "vehicle:12");
        assert_eq!(resource_lock_key(ResourceKind::Driver, 7), "driver:7");
    }

    #[test]
    fn test_write_error_messages() {
        let err: TripWriteError = TripError::NoPassengers.into();
        assert_eq!(err.to_string(), "Trip must have at least one passenger");
        assert_eq!(TripWriteError::NotFound.to_string(), "Trip not found");
    }

    #[test]
    fn test_scheduled_queries_exclude_cancelled() {
        for sql in [SCHEDULED_BY_VEHICLE, SCHEDULED_BY_DRIVER] {
            assert!(sql.contains("t.state <> 'cancelled'"));
            assert!(sql.contains("t.planned_start IS NOT NULL"));
        }
    }
}
