//! Scheduling conflict detection for vehicles and drivers.
//!
//! Two trips conflict when they share a vehicle (or a driver) on the same
//! date and their time windows overlap. Windows are half-open, so a trip
//! ending at 10:00 and another starting at 10:00 do not conflict.
//!
//! The pure core is [`times_overlap`] and [`find_conflict`]. Stored trips come
//! from a [`TripScheduleSource`], which lets the same logic run against a
//! connection pool or inside an open transaction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::trip::TripState;

/// Length assumed for a trip without a planned arrival.
///
/// Applied to both the candidate and every stored trip it is compared with.
pub const DEFAULT_TRIP_DURATION_HOURS: i64 = 2;

pub fn default_trip_duration() -> Duration {
    Duration::hours(DEFAULT_TRIP_DURATION_HOURS)
}

// ============================================================================
// Types
// ============================================================================

/// Resource that can be double-booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Vehicle,
    Driver,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vehicle => "vehicle",
            ResourceKind::Driver => "driver",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ResourceKind::Vehicle => "Vehicle",
            ResourceKind::Driver => "Driver",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Uses `start + 2h` when no end is known.
    pub fn with_default_end(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            start,
            end: end.unwrap_or(start + default_trip_duration()),
        }
    }
}

/// True iff `[a.start, a.end)` and `[b.start, b.end)` overlap.
pub fn times_overlap(a: &TimeWindow, b: &TimeWindow) -> bool {
    a.start < b.end && a.end > b.start
}

/// A stored trip as seen by the detector.
#[derive(Debug, Clone)]
pub struct ScheduledTrip {
    pub id: i64,
    pub name: String,
    pub state: TripState,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_arrival: Option<DateTime<Utc>>,
    pub group_name: Option<String>,
    pub vehicle_name: Option<String>,
    pub driver_name: Option<String>,
}

/// Descriptor of the trip a candidate collides with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictInfo {
    pub trip_id: i64,
    pub trip_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub group_name: String,
    pub state: TripState,
    pub vehicle_name: Option<String>,
    pub driver_name: Option<String>,
}

/// Parameters of a single conflict check.
#[derive(Debug, Clone)]
pub struct ConflictQuery {
    pub resource_id: Option<i64>,
    pub kind: ResourceKind,
    pub date: NaiveDate,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub exclude_trip_id: Option<i64>,
}

/// The scheduling-relevant part of a trip, stored or prospective.
#[derive(Debug, Clone)]
pub struct TripSchedule {
    pub trip_id: Option<i64>,
    pub state: TripState,
    pub trip_date: NaiveDate,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_arrival: Option<DateTime<Utc>>,
    pub vehicle_id: Option<i64>,
    pub vehicle_name: Option<String>,
    pub driver_id: Option<i64>,
    pub driver_name: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("{message}")]
    Vehicle {
        message: String,
        conflict: Box<ConflictInfo>,
    },

    #[error("{message}")]
    Driver {
        message: String,
        conflict: Box<ConflictInfo>,
    },

    #[error("Failed to load scheduled trips: {0}")]
    Lookup(String),
}

impl ConflictError {
    pub fn conflict(&self) -> Option<&ConflictInfo> {
        match self {
            ConflictError::Vehicle { conflict, .. } | ConflictError::Driver { conflict, .. } => {
                Some(conflict)
            }
            ConflictError::Lookup(_) => None,
        }
    }

    pub fn resource(&self) -> Option<ResourceKind> {
        match self {
            ConflictError::Vehicle { .. } => Some(ResourceKind::Vehicle),
            ConflictError::Driver { .. } => Some(ResourceKind::Driver),
            ConflictError::Lookup(_) => None,
        }
    }
}

// ============================================================================
// Schedule source
// ============================================================================

/// Loads stored trips that could collide with a candidate.
///
/// Implementations return non-cancelled trips on `date` that use the given
/// resource and have a planned start, excluding `exclude_trip_id`. The
/// detector re-applies those filters, so a looser source is still correct.
#[async_trait]
pub trait TripScheduleSource: Send {
    async fn scheduled_trips(
        &mut self,
        kind: ResourceKind,
        resource_id: i64,
        date: NaiveDate,
        exclude_trip_id: Option<i64>,
    ) -> Result<Vec<ScheduledTrip>, ConflictError>;
}

// ============================================================================
// Detection
// ============================================================================

/// Returns the first stored trip whose window overlaps `window`.
pub fn find_conflict(
    window: &TimeWindow,
    candidates: &[ScheduledTrip],
    exclude_trip_id: Option<i64>,
) -> Option<ConflictInfo> {
    candidates
        .iter()
        .filter(|trip| trip.state != TripState::Cancelled)
        .filter(|trip| Some(trip.id) != exclude_trip_id)
        .find_map(|trip| {
            let start = trip.planned_start?;
            let other = TimeWindow::with_default_end(start, trip.planned_arrival);
            times_overlap(window, &other).then(|| ConflictInfo {
                trip_id: trip.id,
                trip_name: trip.name.clone(),
                start: other.start,
                end: other.end,
                group_name: trip.group_name.clone().unwrap_or_else(|| "N/A".to_string()),
                state: trip.state,
                vehicle_name: trip.vehicle_name.clone(),
                driver_name: trip.driver_name.clone(),
            })
        })
}

/// Checks one resource for double-booking.
///
/// Returns `Ok(None)` when there is nothing to compare (no resource or no
/// start time) or when no stored trip overlaps.
pub async fn check_conflict<S>(
    source: &mut S,
    query: &ConflictQuery,
) -> Result<Option<ConflictInfo>, ConflictError>
where
    S: TripScheduleSource + ?Sized,
{
    let (Some(resource_id), Some(start)) = (query.resource_id, query.start) else {
        return Ok(None);
    };

    let window = TimeWindow::with_default_end(start, query.end);
    let candidates = source
        .scheduled_trips(query.kind, resource_id, query.date, query.exclude_trip_id)
        .await?;

    let conflict = find_conflict(&window, &candidates, query.exclude_trip_id);
    debug!(
        resource = %query.kind,
        resource_id,
        candidates = candidates.len(),
        conflict = conflict.is_some(),
        "Conflict check completed"
    );
    Ok(conflict)
}

/// Validates a trip's vehicle and driver assignments, vehicle first.
///
/// Cancelled trips and trips without a start time are not checked.
pub async fn validate_trip_schedule<S>(
    source: &mut S,
    trip: &TripSchedule,
) -> Result<(), ConflictError>
where
    S: TripScheduleSource + ?Sized,
{
    if trip.state == TripState::Cancelled || trip.planned_start.is_none() {
        return Ok(());
    }

    let base = ConflictQuery {
        resource_id: None,
        kind: ResourceKind::Vehicle,
        date: trip.trip_date,
        start: trip.planned_start,
        end: trip.planned_arrival,
        exclude_trip_id: trip.trip_id,
    };

    let vehicle_query = ConflictQuery {
        resource_id: trip.vehicle_id,
        ..base.clone()
    };
    if let Some(conflict) = check_conflict(source, &vehicle_query).await? {
        let name = trip.vehicle_name.as_deref().unwrap_or("N/A");
        info!(
            vehicle_id = ?trip.vehicle_id,
            conflicting_trip_id = conflict.trip_id,
            "Vehicle double-booking rejected"
        );
        return Err(ConflictError::Vehicle {
            message: format_conflict_message(ResourceKind::Vehicle, name, &conflict),
            conflict: Box::new(conflict),
        });
    }

    let driver_query = ConflictQuery {
        resource_id: trip.driver_id,
        kind: ResourceKind::Driver,
        ..base
    };
    if let Some(conflict) = check_conflict(source, &driver_query).await? {
        let name = trip.driver_name.as_deref().unwrap_or("N/A");
        info!(
            driver_id = ?trip.driver_id,
            conflicting_trip_id = conflict.trip_id,
            "Driver double-booking rejected"
        );
        return Err(ConflictError::Driver {
            message: format_conflict_message(ResourceKind::Driver, name, &conflict),
            conflict: Box::new(conflict),
        });
    }

    Ok(())
}

/// Dispatcher-facing description of a conflict.
pub fn format_conflict_message(kind: ResourceKind, resource_name: &str, c: &ConflictInfo) -> String {
    let mut message = format!(
        "{label} conflict detected!\n\n{label} \"{name}\" is already assigned to another trip:\n\
         • Trip: {trip}\n\
         • Time: {start} - {end}\n\
         • Group: {group}\n",
        label = kind.label(),
        name = resource_name,
        trip = c.trip_name,
        start = c.start.format("%Y-%m-%d %H:%M"),
        end = c.end.format("%H:%M"),
        group = c.group_name,
    );
    if kind == ResourceKind::Driver {
        message.push_str(&format!(
            "• Vehicle: {}\n",
            c.vehicle_name.as_deref().unwrap_or("N/A")
        ));
    }
    message.push_str(&format!("• Status: {}\n\n", c.state.label()));
    message.push_str(&format!(
        "Please choose a different {} or adjust the trip time.",
        kind.as_str()
    ));
    message
}
