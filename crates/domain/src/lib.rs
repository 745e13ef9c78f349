//! Domain layer for the shuttle dispatch backend.
//!
//! This crate contains:
//! - Domain models (Trip, TripPassenger, Notification, MessageTemplate, GPS)
//! - Business logic services (conflict detection, template rendering,
//!   contact validation, the notification provider contract)
//! - Domain error types

pub mod models;
pub mod services;
