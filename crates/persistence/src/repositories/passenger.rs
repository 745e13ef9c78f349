//! Repository for trip passenger bookings.

use domain::models::passenger::AddPassengerRequest;
use domain::models::trip::{Trip, TripError, TripState};
use sqlx::PgPool;
use tracing::info;

use super::trip::TripWriteError;
use crate::entities::PassengerEntity;
use crate::metrics::QueryTimer;

/// Repository for passenger booking operations.
#[derive(Clone)]
pub struct PassengerRepository {
    pool: PgPool,
}

impl PassengerRepository {
    /// Creates a new passenger repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Passengers booked on a trip, in booking order.
    pub async fn list_for_trip(&self, trip_id: i64) -> Result<Vec<PassengerEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_passengers_for_trip");
        let result = sqlx::query_as::<_, PassengerEntity>(
            r#"
            SELECT id, trip_id, name, phone, email, push_token, preferred_channel,
                   language, seat_count, stop_name, created_at
            FROM trip_passengers
            WHERE trip_id = $1
            ORDER BY id
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Marks the trip's passengers that have not had an approaching message
    /// yet and returns them. A passenger is returned by one call only.
    pub async fn claim_for_approaching(
        &self,
        trip_id: i64,
    ) -> Result<Vec<PassengerEntity>, sqlx::Error> {
        let timer = QueryTimer::new("claim_passengers_for_approaching");
        let result = sqlx::query_as::<_, PassengerEntity>(
            r#"
            UPDATE trip_passengers
            SET approaching_notified = TRUE
            WHERE trip_id = $1 AND NOT approaching_notified
            RETURNING id, trip_id, name, phone, email, push_token, preferred_channel,
                      language, seat_count, stop_name, created_at
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<PassengerEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_passenger_by_id");
        let result = sqlx::query_as::<_, PassengerEntity>(
            r#"
            SELECT id, trip_id, name, phone, email, push_token, preferred_channel,
                   language, seat_count, stop_name, created_at
            FROM trip_passengers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Books a passenger and updates the trip's booked seats atomically.
    ///
    /// Fails with [`TripError::Overbooked`] when the booking would exceed
    /// the trip's capacity.
    pub async fn add_passenger(
        &self,
        trip_id: i64,
        request: &AddPassengerRequest,
    ) -> Result<PassengerEntity, TripWriteError> {
        let timer = QueryTimer::new("add_passenger");
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, i32, i32)> = sqlx::query_as(
            "SELECT state, total_seats, booked_seats FROM trips WHERE id = $1 FOR UPDATE",
        )
        .bind(trip_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (state, total_seats, booked_seats) = row.ok_or(TripWriteError::NotFound)?;

        let state: TripState = state.parse().unwrap_or(TripState::Draft);
        if state.is_terminal() {
            return Err(TripError::InvalidTransition {
                from: state,
                to: state,
            }
            .into());
        }
        Trip::check_invariants(total_seats, booked_seats + request.seat_count, None, None)?;

        let passenger = sqlx::query_as::<_, PassengerEntity>(
            r#"
            INSERT INTO trip_passengers (trip_id, name, phone, email, push_token,
                                         preferred_channel, language, seat_count, stop_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, trip_id, name, phone, email, push_token, preferred_channel,
                      language, seat_count, stop_name, created_at
            "#,
        )
        .bind(trip_id)
        .bind(&request.name)
        .bind(&request.phone)
        .bind(&request.email)
        .bind(&request.push_token)
        .bind(request.preferred_channel.map(|c| c.as_str()))
        .bind(&request.language)
        .bind(request.seat_count)
        .bind(&request.stop_name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE trips SET booked_seats = booked_seats + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(trip_id)
        .bind(request.seat_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.record();
        info!(
            trip_id,
            passenger_id = passenger.id,
            seats = request.seat_count,
            "Passenger booked"
        );
        Ok(passenger)
    }
}
