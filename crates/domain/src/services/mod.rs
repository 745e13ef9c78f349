//! Domain services for shuttle dispatch.
//!
//! Services contain business logic that operates on domain models.

pub mod conflict;
pub mod contact;
pub mod notification;
pub mod template;

pub use conflict::{
    check_conflict, find_conflict, times_overlap, validate_trip_schedule, ConflictError,
    ConflictInfo, ConflictQuery, ResourceKind, ScheduledTrip, TimeWindow, TripSchedule,
    TripScheduleSource,
};
pub use contact::{recipient_for, validate_contact, ContactError, ContactInfo};
pub use notification::{
    truncate_response, MockNotificationProvider, NotificationProvider, ProviderError, SendOptions,
    SendReceipt,
};
pub use template::{
    render_placeholders, sanitize_context, validate_template, Person, TemplateError,
    TemplateRenderer,
};
