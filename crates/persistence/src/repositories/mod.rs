//! Repository implementations for database operations.

pub mod api_key;
pub mod fleet;
pub mod gps;
pub mod message_template;
pub mod notification;
pub mod passenger;
pub mod trip;

pub use api_key::ApiKeyRepository;
pub use fleet::FleetRepository;
pub use gps::GpsRepository;
pub use message_template::{MessageTemplateRepository, TemplateWriteError};
pub use notification::{NewNotification, NotificationRepository, StatusUpdateOutcome};
pub use passenger::PassengerRepository;
pub use trip::{TransitionOutcome, TripRepository, TripTransition, TripWriteError};
