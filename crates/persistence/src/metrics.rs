//! Database and backlog gauges for the `/metrics` scrape.

use metrics::{gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

pub fn record_query_duration(query_name: &str, duration_secs: f64) {
    histogram!(
        "database_query_duration_seconds",
        "query" => query_name.to_string()
    )
    .record(duration_secs);
}

/// Active, idle and total connections of the pool.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("database_connections_active").set(size.saturating_sub(idle) as f64);
    gauge!("database_connections_idle").set(idle as f64);
    gauge!("database_connections_total").set(size as f64);
}

/// Notifications still waiting for a provider, per channel.
pub fn record_pending_backlog(channel: &str, count: i64) {
    gauge!(
        "notifications_pending",
        "channel" => channel.to_string()
    )
    .set(count.max(0) as f64);
}

/// Times one repository query; call [`QueryTimer::record`] once it returns.
///
/// ```ignore
/// let timer = QueryTimer::new("find_trip_by_id");
/// let result = sqlx::query_as::<_, TripEntity>(...).fetch_optional(&pool).await;
/// timer.record();
/// result
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        record_query_duration(self.query_name, self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_timer_keeps_name() {
        let timer = QueryTimer::new("find_trip_by_id");
        assert_eq!(timer.query_name, "find_trip_by_id");
        timer.record();
    }

    #[test]
    fn test_negative_backlog_clamped() {
        // No recorder installed; must not panic.
        record_pending_backlog("sms", -3);
    }
}
