//! Trip domain model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use validator::Validate;

use crate::services::conflict::{TimeWindow, TripSchedule};

// ============================================================================
// Trip State Enum
// ============================================================================

/// State of a trip in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripState {
    Draft,
    Planned,
    Ongoing,
    Done,
    Cancelled,
}

impl TripState {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            TripState::Draft => "draft",
            TripState::Planned => "planned",
            TripState::Ongoing => "ongoing",
            TripState::Done => "done",
            TripState::Cancelled => "cancelled",
        }
    }

    /// Human-readable label used in dispatcher-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            TripState::Draft => "Draft",
            TripState::Planned => "Planned",
            TripState::Ongoing => "Ongoing",
            TripState::Done => "Done",
            TripState::Cancelled => "Cancelled",
        }
    }

    /// Done and cancelled trips accept no further forward transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripState::Done | TripState::Cancelled)
    }

    /// Check if transition to target state is valid.
    ///
    /// Reset to draft is an explicit action and is not a forward transition.
    pub fn can_transition_to(&self, target: TripState) -> bool {
        match (self, target) {
            (TripState::Draft, TripState::Planned) => true,
            (TripState::Planned, TripState::Ongoing) => true,
            (TripState::Ongoing, TripState::Done) => true,
            (from, TripState::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// States from which a dispatcher may reset a trip back to draft.
    pub fn can_reset_to_draft(&self) -> bool {
        matches!(self, TripState::Planned | TripState::Cancelled)
    }
}

impl fmt::Display for TripState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TripState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TripState::Draft),
            "planned" => Ok(TripState::Planned),
            "ongoing" => Ok(TripState::Ongoing),
            "done" => Ok(TripState::Done),
            "cancelled" => Ok(TripState::Cancelled),
            _ => Err(format!(
                "Invalid trip state: {}. Must be one of: draft, planned, ongoing, done, cancelled",
                s
            )),
        }
    }
}

// ============================================================================
// Trip Type Enum
// ============================================================================

/// Direction of a shuttle run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    Pickup,
    Dropoff,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::Pickup => "pickup",
            TripType::Dropoff => "dropoff",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TripType::Pickup => "Pickup",
            TripType::Dropoff => "Drop-off",
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TripType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pickup" => Ok(TripType::Pickup),
            "dropoff" => Ok(TripType::Dropoff),
            _ => Err(format!(
                "Invalid trip type: {}. Must be one of: pickup, dropoff",
                s
            )),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Business-rule violations on trip state and capacity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TripError {
    #[error("Cannot move trip from {from} to {to}")]
    InvalidTransition { from: TripState, to: TripState },

    #[error("Trip must have at least one passenger")]
    NoPassengers,

    #[error("Trip must have a planned start time")]
    MissingStartTime,

    #[error("Trip must have at least one seat")]
    NoSeats,

    #[error("Booked seats ({booked}) exceed capacity ({total})")]
    Overbooked { booked: i32, total: i32 },

    #[error("Planned arrival must be after the planned start")]
    ArrivalBeforeStart,

    #[error("Trip is not ongoing")]
    NotOngoing,
}

// ============================================================================
// Core Model
// ============================================================================

/// A scheduled vehicle run, joined with its vehicle and driver display data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: i64,
    pub reference: String,
    pub name: String,
    pub trip_type: TripType,
    pub trip_date: NaiveDate,
    pub state: TripState,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_arrival: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub vehicle_id: Option<i64>,
    pub vehicle_name: Option<String>,
    pub vehicle_plate: Option<String>,
    pub driver_id: i64,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub group_name: Option<String>,
    pub company_id: Option<i64>,
    pub total_seats: i32,
    pub booked_seats: i32,
    pub passenger_count: i32,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub last_gps_update: Option<DateTime<Utc>>,
    pub confirm_latitude: Option<f64>,
    pub confirm_longitude: Option<f64>,
    pub confirm_stop_id: Option<i64>,
    pub confirm_stop_name: Option<String>,
    pub confirm_note: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirm_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// Seat and time-window invariants shared by create and reschedule.
    pub fn check_invariants(
        total_seats: i32,
        booked_seats: i32,
        planned_start: Option<DateTime<Utc>>,
        planned_arrival: Option<DateTime<Utc>>,
    ) -> Result<(), TripError> {
        if booked_seats > total_seats {
            return Err(TripError::Overbooked {
                booked: booked_seats,
                total: total_seats,
            });
        }
        if let (Some(start), Some(arrival)) = (planned_start, planned_arrival) {
            if arrival <= start {
                return Err(TripError::ArrivalBeforeStart);
            }
        }
        Ok(())
    }

    fn require_state(&self, target: TripState) -> Result<(), TripError> {
        if self.state.can_transition_to(target) {
            Ok(())
        } else {
            Err(TripError::InvalidTransition {
                from: self.state,
                to: target,
            })
        }
    }

    /// Draft to planned: needs passengers, a start time and capacity.
    pub fn ensure_can_plan(&self) -> Result<(), TripError> {
        self.require_state(TripState::Planned)?;
        if self.passenger_count == 0 {
            return Err(TripError::NoPassengers);
        }
        if self.planned_start.is_none() {
            return Err(TripError::MissingStartTime);
        }
        if self.total_seats <= 0 {
            return Err(TripError::NoSeats);
        }
        Ok(())
    }

    /// Planned to ongoing: the driver starts the run.
    pub fn ensure_can_start(&self) -> Result<(), TripError> {
        self.require_state(TripState::Ongoing)?;
        if self.passenger_count == 0 {
            return Err(TripError::NoPassengers);
        }
        Ok(())
    }

    pub fn ensure_can_complete(&self) -> Result<(), TripError> {
        self.require_state(TripState::Done)
    }

    pub fn ensure_can_cancel(&self) -> Result<(), TripError> {
        self.require_state(TripState::Cancelled)
    }

    pub fn ensure_can_reset(&self) -> Result<(), TripError> {
        if self.state.can_reset_to_draft() {
            Ok(())
        } else {
            Err(TripError::InvalidTransition {
                from: self.state,
                to: TripState::Draft,
            })
        }
    }

    /// GPS breadcrumbs are only accepted while the run is in progress.
    pub fn ensure_accepts_gps(&self) -> Result<(), TripError> {
        if self.state == TripState::Ongoing {
            Ok(())
        } else {
            Err(TripError::NotOngoing)
        }
    }

    /// The state a driver confirmation moves this trip to.
    pub fn confirmation_target(&self) -> Result<TripState, TripError> {
        match self.state {
            TripState::Draft => {
                self.ensure_can_plan()?;
                Ok(TripState::Planned)
            }
            TripState::Planned => {
                self.ensure_can_start()?;
                Ok(TripState::Ongoing)
            }
            from => Err(TripError::InvalidTransition {
                from,
                to: TripState::Ongoing,
            }),
        }
    }

    /// Effective occupation window, when the trip has a start.
    pub fn window(&self) -> Option<TimeWindow> {
        self.planned_start
            .map(|start| TimeWindow::with_default_end(start, self.planned_arrival))
    }

    /// Scheduling view used by the conflict detector.
    pub fn schedule(&self) -> TripSchedule {
        TripSchedule {
            trip_id: Some(self.id),
            state: self.state,
            trip_date: self.trip_date,
            planned_start: self.planned_start,
            planned_arrival: self.planned_arrival,
            vehicle_id: self.vehicle_id,
            vehicle_name: self.vehicle_name.clone(),
            driver_id: Some(self.driver_id),
            driver_name: self.driver_name.clone(),
        }
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Request payload for creating a trip.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTripRequest {
    #[validate(length(min = 1, max = 64, message = "reference must be 1-64 characters"))]
    pub reference: String,

    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,

    pub trip_type: TripType,

    pub trip_date: NaiveDate,

    pub planned_start: Option<DateTime<Utc>>,

    pub planned_arrival: Option<DateTime<Utc>>,

    pub vehicle_id: Option<i64>,

    pub driver_id: i64,

    #[validate(length(max = 200, message = "group_name must be at most 200 characters"))]
    pub group_name: Option<String>,

    pub company_id: Option<i64>,

    #[validate(range(min = 1, max = 500, message = "total_seats must be between 1 and 500"))]
    pub total_seats: i32,
}

/// Request payload for moving or reassigning an existing trip.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RescheduleTripRequest {
    pub trip_date: NaiveDate,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_arrival: Option<DateTime<Utc>>,
    pub vehicle_id: Option<i64>,
    pub driver_id: i64,
}

/// Driver confirmation of a trip from the mobile app.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ConfirmTripRequest {
    #[validate(custom(function = "crate::models::trip::validate_optional_latitude"))]
    pub latitude: Option<f64>,

    #[validate(custom(function = "crate::models::trip::validate_optional_longitude"))]
    pub longitude: Option<f64>,

    pub stop_id: Option<i64>,

    #[serde(alias = "message")]
    #[validate(length(max = 1000, message = "note must be at most 1000 characters"))]
    pub note: Option<String>,
}

/// Query parameters for listing a driver's trips.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MyTripsQuery {
    pub state: Option<String>,
}

/// Validates optional latitude.
pub fn validate_optional_latitude(lat: f64) -> Result<(), validator::ValidationError> {
    shared::validation::validate_latitude(lat)
}

/// Validates optional longitude.
pub fn validate_optional_longitude(lon: f64) -> Result<(), validator::ValidationError> {
    shared::validation::validate_longitude(lon)
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Trip as exposed to the driver app and dispatchers.
#[derive(Debug, Clone, Serialize)]
pub struct TripResponse {
    pub id: i64,
    pub reference: String,
    pub name: String,
    pub date: NaiveDate,
    pub trip_type: TripType,
    pub state: TripState,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_arrival: Option<DateTime<Utc>>,
    pub vehicle_id: Option<i64>,
    pub vehicle_name: Option<String>,
    pub vehicle_plate: Option<String>,
    pub passenger_count: i32,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub last_gps_update: Option<DateTime<Utc>>,
    pub confirm_latitude: Option<f64>,
    pub confirm_longitude: Option<f64>,
    pub confirm_stop_id: Option<i64>,
    pub confirm_stop_name: Option<String>,
    pub confirm_note: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirm_source: Option<String>,
}

impl From<Trip> for TripResponse {
    fn from(trip: Trip) -> Self {
        Self {
            id: trip.id,
            reference: trip.reference,
            name: trip.name,
            date: trip.trip_date,
            trip_type: trip.trip_type,
            state: trip.state,
            planned_start: trip.planned_start,
            planned_arrival: trip.planned_arrival,
            vehicle_id: trip.vehicle_id,
            vehicle_name: trip.vehicle_name,
            vehicle_plate: trip.vehicle_plate,
            passenger_count: trip.passenger_count,
            current_latitude: trip.current_latitude,
            current_longitude: trip.current_longitude,
            last_gps_update: trip.last_gps_update,
            confirm_latitude: trip.confirm_latitude,
            confirm_longitude: trip.confirm_longitude,
            confirm_stop_id: trip.confirm_stop_id,
            confirm_stop_name: trip.confirm_stop_name,
            confirm_note: trip.confirm_note,
            confirmed_at: trip.confirmed_at,
            confirm_source: trip.confirm_source,
        }
    }
}

/// Envelope for the driver's trip list.
#[derive(Debug, Clone, Serialize)]
pub struct TripListResponse {
    pub success: bool,
    pub count: usize,
    pub trips: Vec<TripResponse>,
}

/// Response to a driver confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmTripResponse {
    pub success: bool,
    pub trip_id: i64,
    pub new_state: TripState,
    pub confirmed_at: DateTime<Utc>,
    pub confirm_stop_id: Option<i64>,
    pub confirm_stop_name: Option<String>,
}

/// Ongoing trip with its latest fix, for the live map.
#[derive(Debug, Clone, Serialize)]
pub struct LiveTripResponse {
    pub trip_id: i64,
    pub reference: String,
    pub name: String,
    pub trip_type: TripType,
    pub driver_id: i64,
    pub driver_name: Option<String>,
    pub vehicle_id: Option<i64>,
    pub vehicle_name: Option<String>,
    pub vehicle_plate: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_gps_update: Option<DateTime<Utc>>,
}

impl From<Trip> for LiveTripResponse {
    fn from(trip: Trip) -> Self {
        Self {
            trip_id: trip.id,
            reference: trip.reference,
            name: trip.name,
            trip_type: trip.trip_type,
            driver_id: trip.driver_id,
            driver_name: trip.driver_name,
            vehicle_id: trip.vehicle_id,
            vehicle_name: trip.vehicle_name,
            vehicle_plate: trip.vehicle_plate,
            latitude: trip.current_latitude,
            longitude: trip.current_longitude,
            last_gps_update: trip.last_gps_update,
        }
    }
}
