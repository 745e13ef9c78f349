//! Passenger booking on a trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::notification::Channel;

/// A passenger booked on a trip, with the contact fields notifications need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripPassenger {
    pub id: i64,
    pub trip_id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub push_token: Option<String>,
    pub preferred_channel: Option<Channel>,
    pub language: Option<String>,
    pub seat_count: i32,
    pub stop_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request payload for booking a passenger onto a trip.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddPassengerRequest {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,

    #[validate(length(max = 32, message = "phone must be at most 32 characters"))]
    pub phone: Option<String>,

    #[validate(email(message = "email must be a valid address"))]
    pub email: Option<String>,

    #[validate(length(max = 4096, message = "push_token must be at most 4096 characters"))]
    pub push_token: Option<String>,

    pub preferred_channel: Option<Channel>,

    #[validate(length(min = 2, max = 8, message = "language must be 2-8 characters"))]
    pub language: Option<String>,

    #[serde(default = "default_seat_count")]
    #[validate(range(min = 1, max = 50, message = "seat_count must be between 1 and 50"))]
    pub seat_count: i32,

    #[validate(length(max = 200, message = "stop_name must be at most 200 characters"))]
    pub stop_name: Option<String>,
}

fn default_seat_count() -> i32 {
    1
}
