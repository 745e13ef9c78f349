//! Database gauges: pool usage and the pending notification backlog.

use domain::models::Channel;
use persistence::metrics::{record_pending_backlog, record_pool_metrics};
use persistence::repositories::NotificationRepository;
use sqlx::PgPool;

use super::scheduler::{Job, JobFrequency};

pub struct PoolMetricsJob {
    pool: PgPool,
}

impl PoolMetricsJob {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Zero for channels with nothing pending, so a drained queue shows as 0
/// rather than keeping its last value.
fn backlog_per_channel(counts: &[(String, i64)]) -> Vec<(&'static str, i64)> {
    Channel::ALL
        .iter()
        .map(|channel| {
            let channel = channel.as_str();
            let count = counts
                .iter()
                .find(|(c, _)| c == channel)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            (channel, count)
        })
        .collect()
}

#[async_trait::async_trait]
impl Job for PoolMetricsJob {
    fn name(&self) -> &'static str {
        "pool_metrics"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(15)
    }

    async fn execute(&self) -> Result<(), String> {
        record_pool_metrics(&self.pool);

        let counts = NotificationRepository::new(self.pool.clone())
            .count_pending_by_channel()
            .await
            .map_err(|e| e.to_string())?;
        for (channel, count) in backlog_per_channel(&counts) {
            record_pending_backlog(channel, count);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_fills_missing_channels() {
        let counts = vec![("email".to_string(), 4)];
        let backlog = backlog_per_channel(&counts);
        assert_eq!(backlog.len(), 4);
        assert!(backlog.contains(&("email", 4)));
        assert!(backlog.contains(&("sms", 0)));
    }
}
