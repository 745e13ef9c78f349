//! HTTP route handlers.

pub mod admin;
pub mod fleet;
pub mod health;
pub mod notifications;
pub mod templates;
pub mod trips;
pub mod waha;
pub mod webhooks;
