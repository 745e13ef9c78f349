//! Trip passenger entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the trip_passengers table.
#[derive(Debug, Clone, FromRow)]
pub struct PassengerEntity {
    pub id: i64,
    pub trip_id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub push_token: Option<String>,
    pub preferred_channel: Option<String>,
    pub language: Option<String>,
    pub seat_count: i32,
    pub stop_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PassengerEntity> for domain::models::TripPassenger {
    fn from(entity: PassengerEntity) -> Self {
        domain::models::TripPassenger {
            id: entity.id,
            trip_id: entity.trip_id,
            name: entity.name,
            phone: entity.phone,
            email: entity.email,
            push_token: entity.push_token,
            preferred_channel: entity
                .preferred_channel
                .and_then(|channel| channel.parse().ok()),
            language: entity.language,
            seat_count: entity.seat_count,
            stop_name: entity.stop_name,
            created_at: entity.created_at,
        }
    }
}
