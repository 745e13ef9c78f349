//! Notification delivery services.

pub mod delivery_status;
pub mod dispatch;
pub mod providers;
pub mod rate_limiter;

pub use dispatch::{DispatchError, DispatchSummary, NotificationDispatcher, NotificationService};
pub use providers::{ProviderRegistry, WahaClient};
pub use rate_limiter::ChannelRateLimiter;
