//! Re-dispatch of notifications stuck in `pending`.
//!
//! A notification stays `pending` when the process stopped between writing
//! it and finishing the background dispatch. The sweep claims the oldest of
//! them and runs them through the dispatcher again.

use std::time::Duration;

use chrono::Utc;
use shared::timing::ScopedTimer;
use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::config::JobsConfig;
use crate::services::NotificationService;

pub struct PendingNotificationSweepJob {
    notifications: NotificationService,
    interval_secs: u64,
    batch_size: i64,
    stale_after: Duration,
}

impl PendingNotificationSweepJob {
    pub fn new(notifications: NotificationService, config: &JobsConfig) -> Self {
        Self {
            notifications,
            interval_secs: config.pending_sweep_interval_secs,
            batch_size: config.pending_sweep_batch_size.max(1),
            stale_after: Duration::from_secs(config.pending_stale_after_secs),
        }
    }
}

#[async_trait::async_trait]
impl Job for PendingNotificationSweepJob {
    fn name(&self) -> &'static str {
        "pending_notification_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let stale_after =
            chrono::Duration::from_std(self.stale_after).map_err(|e| e.to_string())?;
        let cutoff = Utc::now() - stale_after;

        let mut timer = ScopedTimer::start(self.name());
        let summary = match self
            .notifications
            .redispatch_stale(cutoff, self.batch_size)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                timer.fail(&e);
                return Err(e.to_string());
            }
        };
        timer.succeed();

        if summary.total > 0 {
            info!(
                total = summary.total,
                sent = summary.sent,
                failed = summary.failed,
                "Re-dispatched stale pending notifications"
            );
        }
        Ok(())
    }
}
