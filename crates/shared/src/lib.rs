//! Shared utilities and common types for the shuttle dispatch backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Cryptographic utilities (API key hashing, webhook signatures, masking)
//! - Coordinate, phone and email validation
//! - Retry policy with exponential backoff
//! - Scoped operation timers

pub mod crypto;
pub mod retry;
pub mod timing;
pub mod validation;
