//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod api_key;
pub mod fleet;
pub mod gps;
pub mod message_template;
pub mod notification;
pub mod passenger;
pub mod trip;

pub use api_key::ApiKeyEntity;
pub use fleet::{DriverEntity, StopEntity, VehicleEntity};
pub use gps::{GpsPointEntity, VehiclePositionEntity};
pub use message_template::MessageTemplateEntity;
pub use notification::NotificationEntity;
pub use passenger::PassengerEntity;
pub use trip::{ScheduledTripEntity, TripEntity};
