//! Repository for notification records.

use chrono::{DateTime, Utc};
use domain::models::notification::{Channel, NotificationStatus, NotificationType, StatusUpdate};
use sqlx::PgPool;

use crate::entities::NotificationEntity;
use crate::metrics::QueryTimer;

const NOTIFICATION_COLUMNS: &str = r#"
    id, trip_id, passenger_id, channel, notification_type, status, subject, body,
    recipient_phone, recipient_email, recipient_push_token, provider, provider_message_id,
    api_response, error_message, retry_count, sent_at, delivered_at, read_at,
    created_at, updated_at
"#;

/// Input for a new pending notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub trip_id: Option<i64>,
    pub passenger_id: Option<i64>,
    pub channel: Channel,
    pub notification_type: NotificationType,
    pub subject: Option<String>,
    pub body: String,
    pub recipient_phone: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_push_token: Option<String>,
}

/// What happened to a delivery-status callback.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdateOutcome {
    /// The status advanced.
    Applied {
        notification_id: i64,
        from: NotificationStatus,
        to: NotificationStatus,
    },
    /// The notification exists but the update would not move it forward.
    Ignored {
        notification_id: i64,
        current: NotificationStatus,
    },
    /// No notification carries this provider message id.
    UnknownMessage,
}

impl StatusUpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, StatusUpdateOutcome::Applied { .. })
    }
}

/// Repository for notification operations.
#[derive(Clone)]
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    /// Creates a new notification repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a notification in `pending`.
    pub async fn create(&self, input: &NewNotification) -> Result<NotificationEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_notification");
        let sql = format!(
            r#"
            INSERT INTO notifications (trip_id, passenger_id, channel, notification_type,
                                       subject, body, recipient_phone, recipient_email,
                                       recipient_push_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, NotificationEntity>(&sql)
            .bind(input.trip_id)
            .bind(input.passenger_id)
            .bind(input.channel.as_str())
            .bind(input.notification_type.as_str())
            .bind(&input.subject)
            .bind(&input.body)
            .bind(&input.recipient_phone)
            .bind(&input.recipient_email)
            .bind(&input.recipient_push_token)
            .fetch_one(&self.pool)
            .await;
        timer.record();
        result
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<NotificationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_notification_by_id");
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1");
        let result = sqlx::query_as::<_, NotificationEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result
    }

    pub async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<NotificationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_notification_by_provider_message_id");
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE provider_message_id = $1 \
             ORDER BY id DESC LIMIT 1"
        );
        let result = sqlx::query_as::<_, NotificationEntity>(&sql)
            .bind(provider_message_id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Number of `pending` notifications per channel.
    pub async fn count_pending_by_channel(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        let timer = QueryTimer::new("count_pending_notifications");
        let result = sqlx::query_as::<_, (String, i64)>(
            "SELECT channel, COUNT(*) FROM notifications WHERE status = 'pending' GROUP BY channel",
        )
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Notifications for a trip, newest first.
    pub async fn list_for_trip(&self, trip_id: i64) -> Result<Vec<NotificationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_notifications_for_trip");
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE trip_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let result = sqlx::query_as::<_, NotificationEntity>(&sql)
            .bind(trip_id)
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Records a provider acceptance. Only a pending notification moves.
    pub async fn mark_sent(
        &self,
        id: i64,
        provider: &str,
        provider_message_id: Option<&str>,
        api_response: &str,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_notification_sent");
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'sent', provider = $2, provider_message_id = $3,
                api_response = $4, error_message = NULL, sent_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(provider)
        .bind(provider_message_id)
        .bind(api_response)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }

    /// Records a dispatch failure and bumps the retry counter.
    pub async fn mark_failed(
        &self,
        id: i64,
        provider: Option<&str>,
        error_message: &str,
        api_response: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_notification_failed");
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'failed', provider = COALESCE($2, provider), error_message = $3,
                api_response = COALESCE($4, api_response), retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'sent')
            "#,
        )
        .bind(id)
        .bind(provider)
        .bind(error_message)
        .bind(api_response)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }

    /// Moves a failed notification back to `pending` for a manual retry.
    ///
    /// Returns `None` when the notification is not in `failed`.
    pub async fn reset_for_retry(&self, id: i64) -> Result<Option<NotificationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("reset_notification_for_retry");
        let sql = format!(
            r#"
            UPDATE notifications
            SET status = 'pending', error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, NotificationEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Claims notifications stuck in `pending` since before `older_than`.
    ///
    /// Claiming bumps `updated_at`, so concurrent sweepers skip rows another
    /// sweeper already took.
    pub async fn claim_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("claim_stale_pending_notifications");
        let sql = format!(
            r#"
            UPDATE notifications
            SET updated_at = NOW()
            WHERE id IN (
                SELECT id FROM notifications
                WHERE status = 'pending' AND updated_at < $1
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, NotificationEntity>(&sql)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Applies a provider delivery-status callback.
    ///
    /// Callbacks only move a notification forward, and repeating one is a
    /// no-op that keeps the first delivery and read timestamps.
    pub async fn apply_status_update(
        &self,
        update: &StatusUpdate,
    ) -> Result<StatusUpdateOutcome, sqlx::Error> {
        let timer = QueryTimer::new("apply_notification_status_update");
        let mut tx = self.pool.begin().await?;

        let current: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT id, status FROM notifications
            WHERE provider_message_id = $1
            ORDER BY id DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(&update.provider_message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((notification_id, status)) = current else {
            timer.record();
            return Ok(StatusUpdateOutcome::UnknownMessage);
        };
        let current: NotificationStatus = status.parse().unwrap_or(NotificationStatus::Pending);

        if !current.accepts_callback(update.status) {
            timer.record();
            return Ok(StatusUpdateOutcome::Ignored {
                notification_id,
                current,
            });
        }

        let at = update.timestamp.unwrap_or_else(Utc::now);
        sqlx::query(
            r#"
            UPDATE notifications
            SET status = $2,
                delivered_at = CASE WHEN $2 IN ('delivered', 'read')
                                    THEN COALESCE(delivered_at, $3) ELSE delivered_at END,
                read_at = CASE WHEN $2 = 'read' THEN COALESCE(read_at, $3) ELSE read_at END,
                error_message = CASE WHEN $2 = 'failed'
                                     THEN COALESCE($4, error_message) ELSE error_message END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(notification_id)
        .bind(update.status.as_str())
        .bind(at)
        .bind(&update.error_message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.record();
        Ok(StatusUpdateOutcome::Applied {
            notification_id,
            from: current,
            to: update.status,
        })
    }
}
