//! Notification dispatch pipeline.
//!
//! [`NotificationDispatcher`] runs one send: contact validation, the
//! per-channel rate-limit gate, the provider call under the retry policy and
//! adaptive limit feedback. It has no database access.
//!
//! [`NotificationService`] wraps it with persistence: notifications are
//! written as `pending`, dispatched, then recorded as `sent` or `failed`.
//! Request handlers only write the rows and leave the sending to a spawned
//! task.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use domain::models::{
    Channel, Language, MessageTemplate, Notification, NotificationStatus, NotificationType,
    StatusUpdate, Trip, TripPassenger,
};
use domain::services::{
    recipient_for, render_placeholders, sanitize_context, ContactError, ContactInfo,
    NotificationProvider, Person, ProviderError, SendOptions, SendReceipt, TemplateError,
    TemplateRenderer,
};
use persistence::entities::NotificationEntity;
use persistence::repositories::{
    MessageTemplateRepository, NewNotification, NotificationRepository, PassengerRepository,
    StatusUpdateOutcome,
};
use serde::Serialize;
use serde_json::Value;
use shared::retry::{retry_async, RetryConfig};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::providers::ProviderRegistry;
use super::rate_limiter::{AdaptiveRateLimiter, ChannelRateLimiter};
use crate::config::{Config, NotificationsConfig};
use crate::middleware::metrics::{record_dispatch, record_provider_send};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Configuration(String),

    #[error("Rate limit wait timed out for {0} channel, try again later")]
    RateLimited(Channel),

    #[error(transparent)]
    Provider(ProviderError),

    #[error("Maximum retry attempts ({max_retries}) reached, {retry_count} attempts made")]
    RetryLimitExceeded { retry_count: i32, max_retries: i32 },

    #[error("Only failed notifications can be retried (current status: {0})")]
    NotRetryable(NotificationStatus),

    #[error("Notification not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<ContactError> for DispatchError {
    fn from(err: ContactError) -> Self {
        DispatchError::Validation(err.to_string())
    }
}

impl From<TemplateError> for DispatchError {
    fn from(err: TemplateError) -> Self {
        DispatchError::Validation(err.to_string())
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// One message to one recipient.
#[derive(Debug, Clone)]
pub struct DeliveryRequest<'a> {
    pub channel: Channel,
    pub contact: ContactInfo<'a>,
    pub message: &'a str,
    pub options: SendOptions,
}

/// A vendor acceptance and who accepted it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub provider: String,
    pub receipt: SendReceipt,
}

pub struct NotificationDispatcher {
    providers: HashMap<Channel, Arc<dyn NotificationProvider>>,
    limiter: Arc<ChannelRateLimiter>,
    adaptive: HashMap<Channel, AdaptiveRateLimiter>,
    adaptive_window: Duration,
    retry: RetryConfig,
    rate_limit_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        limiter: Arc<ChannelRateLimiter>,
        retry: RetryConfig,
        rate_limit_timeout: Duration,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            limiter,
            adaptive: HashMap::new(),
            adaptive_window: Duration::from_secs(60),
            retry,
            rate_limit_timeout,
        }
    }

    /// Builds one provider per channel from `[providers.*]`.
    pub fn from_config(
        config: &Config,
        registry: &ProviderRegistry,
        limiter: Arc<ChannelRateLimiter>,
    ) -> Result<Self, ProviderError> {
        let notifications = &config.notifications;
        let mut dispatcher = Self::new(
            limiter,
            notifications.retry.to_retry_config(),
            notifications.rate_limit_wait_timeout(),
        );

        for channel in Channel::ALL {
            let settings = config.provider_settings(channel);
            let provider = registry.create(&settings.provider, channel, &settings)?;
            info!(channel = %channel, provider = provider.name(), "Notification provider ready");
            dispatcher = dispatcher.with_provider(provider);
        }

        if notifications.adaptive.enabled {
            let limits = &notifications.limits;
            dispatcher.adaptive_window = limits.window();
            for channel in Channel::ALL {
                dispatcher.adaptive.insert(
                    channel,
                    AdaptiveRateLimiter::from_settings(
                        limits.limit_for(channel),
                        limits.window(),
                        &notifications.adaptive,
                    ),
                );
            }
        }

        Ok(dispatcher)
    }

    /// Registers `provider` for the channel it reports.
    pub fn with_provider(mut self, provider: Arc<dyn NotificationProvider>) -> Self {
        self.providers.insert(provider.channel(), provider);
        self
    }

    pub fn with_adaptive(mut self, channel: Channel, adaptive: AdaptiveRateLimiter) -> Self {
        self.adaptive.insert(channel, adaptive);
        self
    }

    pub fn limiter(&self) -> &Arc<ChannelRateLimiter> {
        &self.limiter
    }

    pub fn provider_name(&self, channel: Channel) -> Option<&str> {
        self.providers.get(&channel).map(|p| p.name())
    }

    /// Sends one message.
    ///
    /// A rate-limit timeout is reported before any provider call, so it does
    /// not count as an attempt.
    pub async fn deliver(&self, request: &DeliveryRequest<'_>) -> Result<Delivery, DispatchError> {
        let channel = request.channel;
        let recipient = recipient_for(channel, &request.contact)?;

        let provider = self.providers.get(&channel).ok_or_else(|| {
            DispatchError::Configuration(format!(
                "No notification provider configured for {} channel",
                channel
            ))
        })?;

        if !self
            .limiter
            .wait_if_needed(channel, self.rate_limit_timeout)
            .await
        {
            record_dispatch(channel, "rate_limited");
            return Err(DispatchError::RateLimited(channel));
        }

        let operation = format!("send_{}", channel);
        let result = retry_async(&self.retry, &operation, || async {
            let started = Instant::now();
            let result = provider
                .send(recipient, request.message, &request.options)
                .await;
            record_provider_send(provider.name(), started.elapsed());
            self.observe(channel, &result);
            result
        })
        .await;

        match result {
            Ok(receipt) => {
                record_dispatch(channel, "sent");
                debug!(
                    channel = %channel,
                    provider = provider.name(),
                    message_id = ?receipt.provider_message_id,
                    "Notification accepted by provider"
                );
                Ok(Delivery {
                    provider: provider.name().to_string(),
                    receipt,
                })
            }
            Err(e) => {
                record_dispatch(channel, "failed");
                Err(DispatchError::Provider(e))
            }
        }
    }

    /// Feeds a provider result to the adaptive limiter and applies any new
    /// limit to the channel gate.
    fn observe(&self, channel: Channel, result: &Result<SendReceipt, ProviderError>) {
        let Some(adaptive) = self.adaptive.get(&channel) else {
            return;
        };
        let changed = match result {
            Ok(_) => adaptive.record_success(),
            Err(e) => adaptive.record_failure(e.is_rate_limit()),
        };
        if let Some(limit) = changed {
            info!(channel = %channel, limit, "Adaptive rate limit adjusted");
            self.limiter
                .configure_limit(channel, limit, self.adaptive_window);
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: BTreeMap<Channel, &str> = self
            .providers
            .iter()
            .map(|(channel, provider)| (*channel, provider.name()))
            .collect();
        f.debug_struct("NotificationDispatcher")
            .field("providers", &providers)
            .field("retry", &self.retry)
            .field("rate_limit_timeout", &self.rate_limit_timeout)
            .finish()
    }
}

// =============================================================================
// Persistent service
// =============================================================================

/// Notification counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    /// Still `pending`, waiting for the background dispatch.
    pub queued: usize,
}

impl DispatchSummary {
    pub fn of(notifications: &[Notification]) -> Self {
        let mut summary = Self::default();
        for notification in notifications {
            summary.count(notification.status);
        }
        summary
    }

    fn count(&mut self, status: NotificationStatus) {
        self.total += 1;
        match status {
            NotificationStatus::Failed => self.failed += 1,
            NotificationStatus::Pending => self.queued += 1,
            _ => self.sent += 1,
        }
    }
}

#[derive(Clone)]
pub struct NotificationService {
    notifications: NotificationRepository,
    passengers: PassengerRepository,
    templates: MessageTemplateRepository,
    dispatcher: Arc<NotificationDispatcher>,
    settings: Arc<NotificationsConfig>,
}

impl NotificationService {
    pub fn new(
        pool: PgPool,
        dispatcher: Arc<NotificationDispatcher>,
        settings: NotificationsConfig,
    ) -> Self {
        Self {
            notifications: NotificationRepository::new(pool.clone()),
            passengers: PassengerRepository::new(pool.clone()),
            templates: MessageTemplateRepository::new(pool),
            dispatcher,
            settings: Arc::new(settings),
        }
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub async fn list_for_trip(&self, trip_id: i64) -> Result<Vec<Notification>, sqlx::Error> {
        let entities = self.notifications.list_for_trip(trip_id).await?;
        Ok(entities.into_iter().map(NotificationEntity::into_domain).collect())
    }

    /// Persists a pending notification and sends it in the background.
    ///
    /// The returned notification is still `pending`. Contact problems and
    /// provider failures are recorded on it later as `failed`.
    pub async fn queue(&self, input: NewNotification) -> Result<Notification, sqlx::Error> {
        let notification = self.create(&input).await?;
        self.spawn_dispatch(vec![notification.clone()]);
        Ok(notification)
    }

    async fn create(&self, input: &NewNotification) -> Result<Notification, sqlx::Error> {
        let entity = self.notifications.create(input).await?;
        info!(
            notification_id = entity.id,
            trip_id = ?entity.trip_id,
            channel = %input.channel,
            notification_type = %input.notification_type,
            "Notification created"
        );
        Ok(entity.into_domain())
    }

    async fn reload(&self, id: i64) -> Result<Notification, sqlx::Error> {
        self.notifications
            .find_by_id(id)
            .await?
            .map(NotificationEntity::into_domain)
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Sends a `pending` notification and records the outcome.
    ///
    /// Every dispatch error, a rate-limit timeout included, leaves the
    /// notification `failed` with the error text. Only database errors are
    /// returned.
    pub async fn dispatch(&self, notification: Notification) -> Result<Notification, sqlx::Error> {
        let id = notification.id;
        let request = DeliveryRequest {
            channel: notification.channel,
            contact: ContactInfo {
                phone: notification.recipient_phone.as_deref(),
                email: notification.recipient_email.as_deref(),
                push_token: notification.recipient_push_token.as_deref(),
            },
            message: &notification.body,
            options: SendOptions {
                title: notification.subject.clone(),
                trip_id: notification.trip_id,
                notification_type: Some(notification.notification_type),
                ..Default::default()
            },
        };

        match self.dispatcher.deliver(&request).await {
            Ok(delivery) => {
                self.notifications
                    .mark_sent(
                        id,
                        &delivery.provider,
                        delivery.receipt.provider_message_id.as_deref(),
                        &delivery.receipt.raw_response,
                    )
                    .await?;
                info!(
                    notification_id = id,
                    provider = %delivery.provider,
                    "Notification sent"
                );
            }
            Err(DispatchError::Database(e)) => return Err(e),
            Err(e) => self.record_failure(&notification, &e).await?,
        }

        self.reload(id).await
    }

    async fn record_failure(
        &self,
        notification: &Notification,
        error: &DispatchError,
    ) -> Result<(), sqlx::Error> {
        let id = notification.id;
        let response = match error {
            DispatchError::Provider(e) => e.response_body(),
            _ => None,
        };
        if matches!(error, DispatchError::RateLimited(_)) {
            warn!(notification_id = id, error = %error, "Notification not sent");
        } else {
            error!(notification_id = id, error = %error, "Notification dispatch failed");
        }
        self.notifications
            .mark_failed(
                id,
                self.dispatcher.provider_name(notification.channel),
                &error.to_string(),
                response,
            )
            .await?;
        Ok(())
    }

    /// Sends every `pending` notification in `notifications`, in order.
    /// Notifications already `failed` are only counted.
    pub async fn dispatch_all(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<DispatchSummary, sqlx::Error> {
        let mut summary = DispatchSummary::default();
        for notification in notifications {
            let notification = if notification.status == NotificationStatus::Pending {
                self.dispatch(notification).await?
            } else {
                notification
            };
            summary.count(notification.status);
        }
        Ok(summary)
    }

    /// Runs [`Self::dispatch_all`] in the background.
    pub fn spawn_dispatch(&self, notifications: Vec<Notification>) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            match service.dispatch_all(notifications).await {
                Ok(summary) => debug!(
                    total = summary.total,
                    sent = summary.sent,
                    failed = summary.failed,
                    "Background dispatch finished"
                ),
                Err(e) => error!(error = %e, "Background dispatch failed"),
            }
        })
    }

    /// Writes one notification per passenger without sending anything.
    ///
    /// A passenger whose message does not render, or whose contact does not
    /// fit the channel, gets a `failed` notification carrying the reason.
    pub async fn prepare_notifications(
        &self,
        trip: &Trip,
        passengers: &[TripPassenger],
        notification_type: NotificationType,
        extra: &BTreeMap<String, Value>,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let mut prepared = Vec::with_capacity(passengers.len());
        for passenger in passengers {
            prepared.push(
                self.prepare_for_passenger(trip, passenger, notification_type, extra)
                    .await?,
            );
        }
        Ok(prepared)
    }

    async fn prepare_for_passenger(
        &self,
        trip: &Trip,
        passenger: &TripPassenger,
        notification_type: NotificationType,
        extra: &BTreeMap<String, Value>,
    ) -> Result<Notification, sqlx::Error> {
        let channel = passenger
            .preferred_channel
            .unwrap_or(self.settings.default_channel);
        let language = passenger
            .language
            .as_deref()
            .and_then(|l| l.parse::<Language>().ok())
            .unwrap_or(self.settings.default_language);

        let template: Option<MessageTemplate> = self
            .templates
            .find_for(notification_type, channel, language, trip.company_id)
            .await?
            .map(Into::into);
        if template.is_none() {
            debug!(
                notification_type = %notification_type,
                channel = %channel,
                language = %language,
                "No template found, using built-in text"
            );
        }

        let (subject, body, mut problem) = match render_message(
            template.as_ref(),
            notification_type,
            channel,
            trip,
            passenger,
            &self.settings,
            extra,
        ) {
            Ok((subject, body)) => (subject, body, None),
            // Kept unrendered so the stored row shows what failed
            Err(e) => (
                template.as_ref().and_then(|t| t.subject.clone()),
                template
                    .as_ref()
                    .map(|t| t.body.clone())
                    .unwrap_or_else(|| notification_type.fallback_body().to_string()),
                Some(DispatchError::from(e)),
            ),
        };

        let input = NewNotification {
            trip_id: Some(trip.id),
            passenger_id: Some(passenger.id),
            channel,
            notification_type,
            subject,
            body,
            recipient_phone: passenger.phone.clone(),
            recipient_email: passenger.email.clone(),
            recipient_push_token: passenger.push_token.clone(),
        };
        if problem.is_none() {
            problem = recipient_for(channel, &contact_of(&input))
                .err()
                .map(DispatchError::from);
        }

        let notification = self.create(&input).await?;
        match problem {
            Some(e) => {
                warn!(
                    trip_id = trip.id,
                    passenger_id = passenger.id,
                    error = %e,
                    "Passenger notification not sendable"
                );
                self.record_failure(&notification, &e).await?;
                self.reload(notification.id).await
            }
            None => Ok(notification),
        }
    }

    /// Writes and sends `notification_type` to `passengers` of `trip`.
    ///
    /// Each passenger gets their preferred channel, or the configured default.
    /// One passenger's failure does not stop the others.
    pub async fn notify_passengers(
        &self,
        trip: &Trip,
        passengers: &[TripPassenger],
        notification_type: NotificationType,
        extra: &BTreeMap<String, Value>,
    ) -> Result<DispatchSummary, sqlx::Error> {
        let prepared = self
            .prepare_notifications(trip, passengers, notification_type, extra)
            .await?;
        let summary = self.dispatch_all(prepared).await?;

        info!(
            trip_id = trip.id,
            notification_type = %notification_type,
            total = summary.total,
            sent = summary.sent,
            failed = summary.failed,
            "Trip passengers notified"
        );
        Ok(summary)
    }

    /// [`Self::notify_passengers`] for everyone booked on `trip`.
    pub async fn notify_trip_passengers(
        &self,
        trip: &Trip,
        notification_type: NotificationType,
        extra: &BTreeMap<String, Value>,
    ) -> Result<DispatchSummary, sqlx::Error> {
        let passengers = self.trip_passengers(trip.id).await?;
        self.notify_passengers(trip, &passengers, notification_type, extra)
            .await
    }

    /// Writes the notifications for everyone booked on `trip` and sends
    /// them in the background. Returns the stored notifications.
    pub async fn queue_trip_notifications(
        &self,
        trip: &Trip,
        notification_type: NotificationType,
        extra: &BTreeMap<String, Value>,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let passengers = self.trip_passengers(trip.id).await?;
        let prepared = self
            .prepare_notifications(trip, &passengers, notification_type, extra)
            .await?;
        self.spawn_dispatch(prepared.clone());
        Ok(prepared)
    }

    /// Runs [`Self::notify_trip_passengers`] in the background.
    pub fn spawn_trip_notifications(
        &self,
        trip: Trip,
        notification_type: NotificationType,
        extra: BTreeMap<String, Value>,
    ) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service
                .notify_trip_passengers(&trip, notification_type, &extra)
                .await
            {
                error!(
                    trip_id = trip.id,
                    notification_type = %notification_type,
                    error = %e,
                    "Trip notifications failed"
                );
            }
        })
    }

    async fn trip_passengers(&self, trip_id: i64) -> Result<Vec<TripPassenger>, sqlx::Error> {
        Ok(self
            .passengers
            .list_for_trip(trip_id)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    /// Manual retry of a failed notification.
    ///
    /// The notification moves back to `pending` and is sent in the
    /// background.
    pub async fn retry(&self, notification_id: i64) -> Result<Notification, DispatchError> {
        let current = self
            .notifications
            .find_by_id(notification_id)
            .await?
            .ok_or(DispatchError::NotFound)?
            .into_domain();

        if current.status != NotificationStatus::Failed {
            return Err(DispatchError::NotRetryable(current.status));
        }
        let max_retries = self.settings.max_manual_retries;
        if current.retry_count >= max_retries {
            return Err(DispatchError::RetryLimitExceeded {
                retry_count: current.retry_count,
                max_retries,
            });
        }

        // Another retry may have claimed it between the read and the reset
        let notification = self
            .notifications
            .reset_for_retry(notification_id)
            .await?
            .ok_or(DispatchError::NotRetryable(NotificationStatus::Pending))?
            .into_domain();

        info!(
            notification_id,
            retry_count = current.retry_count,
            "Retrying notification"
        );
        self.spawn_dispatch(vec![notification.clone()]);
        Ok(notification)
    }

    /// Applies a delivery-status callback. Unknown message ids are ignored.
    pub async fn apply_status_update(
        &self,
        update: &StatusUpdate,
    ) -> Result<StatusUpdateOutcome, sqlx::Error> {
        let outcome = self.notifications.apply_status_update(update).await?;
        match &outcome {
            StatusUpdateOutcome::Applied {
                notification_id,
                from,
                to,
            } => info!(
                notification_id,
                from = %from,
                to = %to,
                "Delivery status updated"
            ),
            StatusUpdateOutcome::Ignored {
                notification_id,
                current,
            } => debug!(
                notification_id,
                current = %current,
                incoming = %update.status,
                "Delivery status callback ignored"
            ),
            StatusUpdateOutcome::UnknownMessage => warn!(
                provider_message_id = %update.provider_message_id,
                "Delivery status for unknown message"
            ),
        }
        Ok(outcome)
    }

    /// Re-sends notifications stuck in `pending` since before `older_than`.
    pub async fn redispatch_stale(
        &self,
        older_than: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<DispatchSummary, sqlx::Error> {
        let stale: Vec<Notification> = self
            .notifications
            .claim_stale_pending(older_than, batch_size)
            .await?
            .into_iter()
            .map(NotificationEntity::into_domain)
            .collect();
        self.dispatch_all(stale).await
    }
}

fn contact_of(input: &NewNotification) -> ContactInfo<'_> {
    ContactInfo {
        phone: input.recipient_phone.as_deref(),
        email: input.recipient_email.as_deref(),
        push_token: input.recipient_push_token.as_deref(),
    }
}

// =============================================================================
// Message rendering
// =============================================================================

/// ETA used when the caller supplies none.
const DEFAULT_ETA_MINUTES: &str = "10";

/// Values that are neither trip, passenger nor driver fields.
fn context_values(
    trip: &Trip,
    passenger: &TripPassenger,
    settings: &NotificationsConfig,
    extra: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut values = BTreeMap::new();
    let text = |v: &Option<String>| Value::from(v.clone().unwrap_or_default());
    values.insert("vehicle_name".to_string(), text(&trip.vehicle_name));
    values.insert("vehicle_plate".to_string(), text(&trip.vehicle_plate));
    values.insert("stop_name".to_string(), text(&passenger.stop_name));
    values.insert("group_name".to_string(), text(&trip.group_name));
    values.insert("company_name".to_string(), Value::from(settings.company_name.clone()));
    values.insert("company_phone".to_string(), Value::from(settings.company_phone.clone()));
    values.insert("eta".to_string(), Value::from(DEFAULT_ETA_MINUTES));
    for (key, value) in extra {
        values.insert(key.clone(), value.clone());
    }
    values
}

/// Renders a notification for one passenger.
///
/// Bodies using `{{ name }}` tags go through the strict renderer, which
/// rejects unknown names. Plain `{name}` bodies, including the built-in
/// fallbacks, use lenient substitution.
pub(crate) fn render_message(
    template: Option<&MessageTemplate>,
    notification_type: NotificationType,
    channel: Channel,
    trip: &Trip,
    passenger: &TripPassenger,
    settings: &NotificationsConfig,
    extra: &BTreeMap<String, Value>,
) -> Result<(Option<String>, String), TemplateError> {
    let body = template
        .map(|t| t.body.as_str())
        .unwrap_or_else(|| notification_type.fallback_body());
    let subject = template.and_then(|t| t.subject.as_deref());
    let values = context_values(trip, passenger, settings, extra);

    if body.contains("{{") {
        let renderer = TemplateRenderer::for_channel(channel);
        let driver = Person {
            name: trip.driver_name.clone().unwrap_or_default(),
            phone: trip.driver_phone.clone(),
        };
        let render = |source: &str| {
            renderer.render_notification_message(
                source,
                Some(trip),
                Some(passenger),
                Some(&driver),
                &values,
            )
        };
        let rendered_subject = subject.map(render).transpose()?;
        return Ok((rendered_subject, render(body)?));
    }

    let mut flat = sanitize_context(&values);
    flat.insert("passenger_name".to_string(), passenger.name.clone());
    flat.insert(
        "passenger_phone".to_string(),
        passenger.phone.clone().unwrap_or_default(),
    );
    flat.insert(
        "driver_name".to_string(),
        trip.driver_name.clone().unwrap_or_default(),
    );
    flat.insert(
        "driver_phone".to_string(),
        trip.driver_phone.clone().unwrap_or_default(),
    );
    flat.insert("trip_name".to_string(), trip.name.clone());
    flat.insert(
        "trip_date".to_string(),
        trip.trip_date.format("%Y-%m-%d").to_string(),
    );
    flat.insert(
        "trip_time".to_string(),
        trip.planned_start
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default(),
    );
    flat.insert("trip_type".to_string(), trip.trip_type.label().to_string());
    // Caller-supplied values win over the derived trip fields
    for (key, value) in sanitize_context(extra) {
        flat.insert(key, value);
    }

    Ok((
        subject.map(|s| render_placeholders(s, &flat)),
        render_placeholders(body, &flat),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use domain::models::{TemplateChannel, TripState, TripType};
    use domain::services::MockNotificationProvider;

    fn dispatcher_with(provider: MockNotificationProvider) -> NotificationDispatcher {
        NotificationDispatcher::new(
            Arc::new(ChannelRateLimiter::with_defaults()),
            RetryConfig::immediate(3),
            Duration::from_millis(200),
        )
        .with_provider(Arc::new(provider))
    }

    fn sms_request(message: &str) -> DeliveryRequest<'_> {
        DeliveryRequest {
            channel: Channel::Sms,
            contact: ContactInfo {
                phone: Some("+966501234567"),
                ..Default::default()
            },
            message,
            options: SendOptions::default(),
        }
    }

    fn trip() -> Trip {
        Trip {
            id: 7,
            reference: "TRP-0007".to_string(),
            name: "Morning Route A".to_string(),
            trip_type: TripType::Pickup,
            trip_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            state: TripState::Ongoing,
            planned_start: Some(Utc.with_ymd_and_hms(2025, 1, 15, 7, 30, 0).unwrap()),
            planned_arrival: None,
            actual_start: None,
            actual_arrival: None,
            vehicle_id: Some(3),
            vehicle_name: Some("Bus 01".to_string()),
            vehicle_plate: Some("ABC-1234".to_string()),
            driver_id: 11,
            driver_name: Some("Mohammed Hassan".to_string()),
            driver_phone: Some("+966500000011".to_string()),
            group_name: None,
            company_id: None,
            total_seats: 20,
            booked_seats: 1,
            passenger_count: 1,
            current_latitude: None,
            current_longitude: None,
            last_gps_update: None,
            confirm_latitude: None,
            confirm_longitude: None,
            confirm_stop_id: None,
            confirm_stop_name: None,
            confirm_note: None,
            confirmed_at: None,
            confirm_source: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn passenger() -> TripPassenger {
        TripPassenger {
            id: 5,
            trip_id: 7,
            name: "Ahmed Ali".to_string(),
            phone: Some("+966501234567".to_string()),
            email: None,
            push_token: None,
            preferred_channel: None,
            language: None,
            seat_count: 1,
            stop_name: Some("Main Street Station".to_string()),
            created_at: Utc::now(),
        }
    }

    fn template(body: &str) -> MessageTemplate {
        MessageTemplate {
            id: 1,
            name: "t".to_string(),
            notification_type: NotificationType::TripStarted,
            channel: TemplateChannel::All,
            language: Language::En,
            subject: None,
            body: body.to_string(),
            is_active: true,
            is_default: true,
            sequence: 10,
            company_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_deliver_success() {
        let dispatcher = dispatcher_with(MockNotificationProvider::new(Channel::Sms));
        let delivery = dispatcher.deliver(&sms_request("hello")).await.unwrap();

        assert_eq!(delivery.provider, "mock");
        assert_eq!(delivery.receipt.provider_message_id.as_deref(), Some("mock-1"));
    }

    #[tokio::test]
    async fn test_deliver_retries_transient_failures() {
        let provider = Arc::new(MockNotificationProvider::flaky(
            Channel::Sms,
            ProviderError::Transport("connection reset".into()),
            2,
        ));
        let dispatcher = NotificationDispatcher::new(
            Arc::new(ChannelRateLimiter::with_defaults()),
            RetryConfig::immediate(3),
            Duration::from_millis(200),
        )
        .with_provider(provider.clone());

        assert!(dispatcher.deliver(&sms_request("hello")).await.is_ok());
        assert_eq!(provider.attempts(), 3);
    }

    #[tokio::test]
    async fn test_deliver_exhausts_retries() {
        let provider = Arc::new(MockNotificationProvider::failing(
            Channel::Sms,
            ProviderError::from_response(503, "unavailable"),
        ));
        let dispatcher = NotificationDispatcher::new(
            Arc::new(ChannelRateLimiter::with_defaults()),
            RetryConfig::immediate(3),
            Duration::from_millis(200),
        )
        .with_provider(provider.clone());

        let err = dispatcher.deliver(&sms_request("hello")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Provider(ProviderError::Http { status: 503, .. })));
        assert_eq!(provider.attempts(), 4);
    }

    #[tokio::test]
    async fn test_deliver_does_not_retry_client_errors() {
        let provider = Arc::new(MockNotificationProvider::failing(
            Channel::Sms,
            ProviderError::from_response(400, "bad number"),
        ));
        let dispatcher = NotificationDispatcher::new(
            Arc::new(ChannelRateLimiter::with_defaults()),
            RetryConfig::immediate(3),
            Duration::from_millis(200),
        )
        .with_provider(provider.clone());

        assert!(dispatcher.deliver(&sms_request("hello")).await.is_err());
        assert_eq!(provider.attempts(), 1);
    }

    #[tokio::test]
    async fn test_deliver_rejects_bad_contact() {
        let provider = Arc::new(MockNotificationProvider::new(Channel::Sms));
        let dispatcher = NotificationDispatcher::new(
            Arc::new(ChannelRateLimiter::with_defaults()),
            RetryConfig::immediate(3),
            Duration::from_millis(200),
        )
        .with_provider(provider.clone());

        let mut request = sms_request("hello");
        request.contact.phone = Some("12ab");
        let err = dispatcher.deliver(&request).await.unwrap_err();

        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(provider.attempts(), 0);
    }

    #[tokio::test]
    async fn test_deliver_without_provider() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(ChannelRateLimiter::with_defaults()),
            RetryConfig::immediate(0),
            Duration::from_millis(200),
        );
        let err = dispatcher.deliver(&sms_request("hello")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_timeout_skips_provider() {
        let limiter = Arc::new(ChannelRateLimiter::new());
        limiter.configure_limit(Channel::Sms, 1, Duration::from_secs(60));
        let provider = Arc::new(MockNotificationProvider::new(Channel::Sms));
        let dispatcher =
            NotificationDispatcher::new(limiter, RetryConfig::immediate(3), Duration::from_millis(150))
                .with_provider(provider.clone());

        assert!(dispatcher.deliver(&sms_request("first")).await.is_ok());
        let err = dispatcher.deliver(&sms_request("second")).await.unwrap_err();

        assert!(matches!(err, DispatchError::RateLimited(Channel::Sms)));
        assert_eq!(provider.attempts(), 1);
    }

    #[tokio::test]
    async fn test_adaptive_feedback_halves_channel_limit() {
        let limiter = Arc::new(ChannelRateLimiter::with_defaults());
        let dispatcher = NotificationDispatcher::new(
            limiter.clone(),
            RetryConfig::immediate(0),
            Duration::from_millis(200),
        )
        .with_provider(Arc::new(MockNotificationProvider::failing(
            Channel::Sms,
            ProviderError::RateLimited("slow down".into()),
        )))
        .with_adaptive(
            Channel::Sms,
            AdaptiveRateLimiter::new(100, Duration::from_secs(60), 10, 1000),
        );

        assert!(dispatcher.deliver(&sms_request("hello")).await.is_err());
        assert_eq!(limiter.stats()[&Channel::Sms].max_requests, 50);
    }

    #[test]
    fn test_render_fallback_body() {
        let (subject, body) = render_message(
            None,
            NotificationType::TripStarted,
            Channel::Sms,
            &trip(),
            &passenger(),
            &NotificationsConfig::default(),
            &BTreeMap::new(),
        )
        .unwrap();

        assert!(subject.is_none());
        assert_eq!(
            body,
            "Hello Ahmed Ali, trip Morning Route A has started at 07:30. Driver: Mohammed Hassan."
        );
    }

    #[test]
    fn test_render_placeholder_template_with_extra() {
        let mut extra = BTreeMap::new();
        extra.insert("eta".to_string(), Value::from(4));
        let (_, body) = render_message(
            Some(&template("{vehicle_name} reaches {stop_name} in {eta} min")),
            NotificationType::Approaching,
            Channel::Whatsapp,
            &trip(),
            &passenger(),
            &NotificationsConfig::default(),
            &extra,
        )
        .unwrap();

        assert_eq!(body, "Bus 01 reaches Main Street Station in 4 min");
    }

    #[test]
    fn test_render_strict_template() {
        let (_, body) = render_message(
            Some(&template("Hello {{ passenger_name }}, driver {{driver_name}} is on the way")),
            NotificationType::TripStarted,
            Channel::Sms,
            &trip(),
            &passenger(),
            &NotificationsConfig::default(),
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(body, "Hello Ahmed Ali, driver Mohammed Hassan is on the way");
    }

    #[test]
    fn test_render_strict_template_undefined_name() {
        let err = render_message(
            Some(&template("Seat {{ seat_number }}")),
            NotificationType::TripStarted,
            Channel::Sms,
            &trip(),
            &passenger(),
            &NotificationsConfig::default(),
            &BTreeMap::new(),
        )
        .unwrap_err();

        assert_eq!(err, TemplateError::UndefinedVariable("seat_number".to_string()));
    }

    #[test]
    fn test_summary_counts() {
        let summary = DispatchSummary::of(&[]);
        assert_eq!(summary, DispatchSummary::default());

        let mut summary = DispatchSummary::default();
        summary.count(NotificationStatus::Failed);
        summary.count(NotificationStatus::Pending);
        summary.count(NotificationStatus::Delivered);
        assert_eq!(
            summary,
            DispatchSummary {
                total: 3,
                sent: 1,
                failed: 1,
                queued: 1
            }
        );
    }

    #[test]
    fn test_rate_limit_error_asks_to_try_later() {
        let err = DispatchError::RateLimited(Channel::Sms);
        assert_eq!(
            err.to_string(),
            "Rate limit wait timed out for sms channel, try again later"
        );
    }
}
