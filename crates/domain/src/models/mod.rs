//! Domain models for shuttle dispatch.

pub mod gps;
pub mod message_template;
pub mod notification;
pub mod passenger;
pub mod trip;

pub use gps::{GpsPoint, VehiclePosition};
pub use message_template::{Language, MessageTemplate, TemplateChannel};
pub use notification::{
    Channel, Notification, NotificationStatus, NotificationType, StatusUpdate,
};
pub use passenger::TripPassenger;
pub use trip::{Trip, TripError, TripState, TripType};
