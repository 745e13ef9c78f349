//! Background jobs.

mod approaching;
mod pending_sweep;
mod pool_metrics;
mod scheduler;

pub use approaching::ApproachingNotificationJob;
pub use pending_sweep::PendingNotificationSweepJob;
pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
