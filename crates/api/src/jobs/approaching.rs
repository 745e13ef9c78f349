//! `approaching` messages for planned trips about to start.
//!
//! Each run looks at planned trips starting within the configured window and
//! sends one `approaching` notification to every passenger not yet told.
//! Passengers are claimed before sending, so overlapping runs never message
//! the same booking twice.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use domain::models::{NotificationType, Trip, TripPassenger};
use persistence::repositories::{PassengerRepository, TripRepository};
use serde_json::Value;
use shared::timing::ScopedTimer;
use sqlx::PgPool;
use tracing::{info, warn};

use super::scheduler::{Job, JobFrequency};
use crate::config::JobsConfig;
use crate::services::{DispatchSummary, NotificationService};

const DEFAULT_APPROACHING_MINUTES: i64 = 10;

/// Window length in minutes. Non-positive settings fall back to the default.
fn window_minutes(configured: i64) -> i64 {
    if configured <= 0 {
        warn!(
            configured,
            fallback = DEFAULT_APPROACHING_MINUTES,
            "jobs.approaching_minutes must be positive, using the default"
        );
        DEFAULT_APPROACHING_MINUTES
    } else {
        configured
    }
}

/// Whole minutes until `start`, never below one.
fn eta_minutes(now: DateTime<Utc>, start: DateTime<Utc>) -> i64 {
    let seconds = (start - now).num_seconds().max(0);
    ((seconds + 59) / 60).max(1)
}

pub struct ApproachingNotificationJob {
    trips: TripRepository,
    passengers: PassengerRepository,
    notifications: NotificationService,
    interval_secs: u64,
    window: ChronoDuration,
}

impl ApproachingNotificationJob {
    pub fn new(pool: PgPool, notifications: NotificationService, config: &JobsConfig) -> Self {
        Self {
            trips: TripRepository::new(pool.clone()),
            passengers: PassengerRepository::new(pool),
            notifications,
            interval_secs: config.approaching_interval_secs,
            window: ChronoDuration::minutes(window_minutes(config.approaching_minutes)),
        }
    }

    /// One pass over the trips starting in `(now, now + window]`.
    pub async fn notify_approaching(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary, sqlx::Error> {
        let trips: Vec<Trip> = self
            .trips
            .list_planned_starting_between(now, now + self.window)
            .await?
            .into_iter()
            .map(Trip::from)
            .collect();

        let mut total = DispatchSummary::default();
        for trip in trips {
            let passengers: Vec<TripPassenger> = self
                .passengers
                .claim_for_approaching(trip.id)
                .await?
                .into_iter()
                .map(Into::into)
                .collect();
            if passengers.is_empty() {
                continue;
            }

            let mut extra = BTreeMap::new();
            if let Some(start) = trip.planned_start {
                extra.insert("eta".to_string(), Value::from(eta_minutes(now, start)));
            }
            let summary = self
                .notifications
                .notify_passengers(&trip, &passengers, NotificationType::Approaching, &extra)
                .await?;
            total.total += summary.total;
            total.sent += summary.sent;
            total.failed += summary.failed;
        }
        Ok(total)
    }
}

#[async_trait::async_trait]
impl Job for ApproachingNotificationJob {
    fn name(&self) -> &'static str {
        "approaching_notifications"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let mut timer = ScopedTimer::start(self.name());
        let summary = match self.notify_approaching(Utc::now()).await {
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
                "Approaching notifications sent"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_minutes_fallback() {
        assert_eq!(window_minutes(15), 15);
        assert_eq!(window_minutes(0), DEFAULT_APPROACHING_MINUTES);
        assert_eq!(window_minutes(-5), DEFAULT_APPROACHING_MINUTES);
    }

    #[test]
    fn test_eta_rounds_up_to_whole_minutes() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 7, 0, 0).unwrap();
        assert_eq!(eta_minutes(now, now + ChronoDuration::seconds(61)), 2);
        assert_eq!(eta_minutes(now, now + ChronoDuration::minutes(10)), 10);
        assert_eq!(eta_minutes(now, now + ChronoDuration::seconds(5)), 1);
        assert_eq!(eta_minutes(now, now - ChronoDuration::minutes(1)), 1);
    }
}
