//! Trip entity (database row mapping).

use chrono::{DateTime, NaiveDate, Utc};
use domain::models::trip::{TripState, TripType};
use domain::services::conflict::ScheduledTrip;
use sqlx::FromRow;

/// Database row mapping for the trips table, joined with vehicle, driver
/// and confirmation stop display columns.
#[derive(Debug, Clone, FromRow)]
pub struct TripEntity {
    pub id: i64,
    pub reference: String,
    pub name: String,
    pub trip_type: String,
    pub trip_date: NaiveDate,
    pub state: String,
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

impl TripEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> domain::models::Trip {
        let trip_type = self.trip_type.parse().unwrap_or(TripType::Pickup);
        let state = self.state.parse().unwrap_or(TripState::Draft);

        domain::models::Trip {
            id: self.id,
            reference: self.reference,
            name: self.name,
            trip_type,
            trip_date: self.trip_date,
            state,
            planned_start: self.planned_start,
            planned_arrival: self.planned_arrival,
            actual_start: self.actual_start,
            actual_arrival: self.actual_arrival,
            vehicle_id: self.vehicle_id,
            vehicle_name: self.vehicle_name,
            vehicle_plate: self.vehicle_plate,
            driver_id: self.driver_id,
            driver_name: self.driver_name,
            driver_phone: self.driver_phone,
            group_name: self.group_name,
            company_id: self.company_id,
            total_seats: self.total_seats,
            booked_seats: self.booked_seats,
            passenger_count: self.passenger_count,
            current_latitude: self.current_latitude,
            current_longitude: self.current_longitude,
            last_gps_update: self.last_gps_update,
            confirm_latitude: self.confirm_latitude,
            confirm_longitude: self.confirm_longitude,
            confirm_stop_id: self.confirm_stop_id,
            confirm_stop_name: self.confirm_stop_name,
            confirm_note: self.confirm_note,
            confirmed_at: self.confirmed_at,
            confirm_source: self.confirm_source,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<TripEntity> for domain::models::Trip {
    fn from(entity: TripEntity) -> Self {
        entity.into_domain()
    }
}

/// Slim row loaded by conflict checks.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduledTripEntity {
    pub id: i64,
    pub name: String,
    pub state: String,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_arrival: Option<DateTime<Utc>>,
    pub group_name: Option<String>,
    pub vehicle_name: Option<String>,
    pub driver_name: Option<String>,
}

impl From<ScheduledTripEntity> for ScheduledTrip {
    fn from(entity: ScheduledTripEntity) -> Self {
        ScheduledTrip {
            id: entity.id,
            name: entity.name,
            state: entity.state.parse().unwrap_or(TripState::Draft),
            planned_start: entity.planned_start,
            planned_arrival: entity.planned_arrival,
            group_name: entity.group_name,
            vehicle_name: entity.vehicle_name,
            driver_name: entity.driver_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_entity() -> TripEntity {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 7, 30, 0).unwrap();
        TripEntity {
            id: 42,
            reference: "TRIP-0042".to_string(),
            name: "Morning Route A".to_string(),
            trip_type: "pickup".to_string(),
            trip_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            state: "planned".to_string(),
            planned_start: Some(start),
            planned_arrival: None,
            actual_start: None,
            actual_arrival: None,
            vehicle_id: Some(3),
            vehicle_name: Some("Bus 01".to_string()),
            vehicle_plate: Some("ABC-1234".to_string()),
            driver_id: 7,
            driver_name: Some("Mohammed Hassan".to_string()),
            driver_phone: None,
            group_name: None,
            company_id: None,
            total_seats: 20,
            booked_seats: 4,
            passenger_count: 3,
            current_latitude: None,
            current_longitude: None,
            last_gps_update: None,
            confirm_latitude: None,
            confirm_longitude: None,
            confirm_stop_id: None,
            confirm_stop_name: None,
            confirm_note: None,
            confirmed_at: None,
            confirm_source: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_entity_to_domain() {
        let entity = create_test_entity();
        let trip: domain::models::Trip = entity.clone().into();

        assert_eq!(trip.id, 42);
        assert_eq!(trip.state, TripState::Planned);
        assert_eq!(trip.trip_type, TripType::Pickup);
        assert_eq!(trip.vehicle_name.as_deref(), Some("Bus 01"));
        assert_eq!(trip.passenger_count, 3);
    }

    #[test]
    fn test_unknown_state_falls_back_to_draft() {
        let mut entity = create_test_entity();
        entity.state = "archived".to_string();
        entity.trip_type = "shuttle".to_string();

        let trip = entity.into_domain();
        assert_eq!(trip.state, TripState::Draft);
        assert_eq!(trip.trip_type, TripType::Pickup);
    }

    #[test]
    fn test_scheduled_trip_conversion() {
        let entity = ScheduledTripEntity {
            id: 5,
            name: "Evening Route".to_string(),
            state: "ongoing".to_string(),
            planned_start: None,
            planned_arrival: None,
            group_name: Some("Plant B".to_string()),
            vehicle_name: None,
            driver_name: None,
        };
        let scheduled: ScheduledTrip = entity.into();
        assert_eq!(scheduled.state, TripState::Ongoing);
        assert_eq!(scheduled.group_name.as_deref(), Some("Plant B"));
    }
}
