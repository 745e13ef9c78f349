//! Dispatcher notification endpoints.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use domain::models::notification::{NotificationResponse, SendNotificationRequest};
use domain::models::TripPassenger;
use domain::services::{recipient_for, render_placeholders, ContactInfo};
use persistence::repositories::{NewNotification, PassengerRepository, TripRepository};
use serde::Serialize;
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::ApiKeyAuth;

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub success: bool,
    pub count: usize,
    pub notifications: Vec<NotificationResponse>,
}

/// GET /api/v1/admin/trips/:trip_id/notifications
pub async fn list_trip_notifications(
    State(state): State<AppState>,
    Path(trip_id): Path<i64>,
) -> Result<Json<NotificationListResponse>, ApiError> {
    TripRepository::new(state.pool.clone())
        .find_by_id(trip_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Trip not found".to_string()))?;

    let notifications: Vec<NotificationResponse> = state
        .notifications
        .list_for_trip(trip_id)
        .await?
        .into_iter()
        .map(NotificationResponse::from)
        .collect();

    Ok(Json(NotificationListResponse {
        success: true,
        count: notifications.len(),
        notifications,
    }))
}

/// Fills contact fields the request left out from the passenger's booking.
fn with_passenger_contact(input: &mut NewNotification, passenger: &TripPassenger) {
    if input.recipient_phone.is_none() {
        input.recipient_phone = passenger.phone.clone();
    }
    if input.recipient_email.is_none() {
        input.recipient_email = passenger.email.clone();
    }
    if input.recipient_push_token.is_none() {
        input.recipient_push_token = passenger.push_token.clone();
    }
    if input.trip_id.is_none() {
        input.trip_id = Some(passenger.trip_id);
    }
}

/// POST /api/v1/admin/notifications
///
/// Stores a custom message and sends it in the background, answering 202
/// with the `pending` notification. `{placeholder}` markers in the message
/// are filled from `values`. A contact that does not fit the channel is
/// rejected before anything is stored.
pub async fn send_notification(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Json(request): Json<SendNotificationRequest>,
) -> Result<(StatusCode, Json<NotificationResponse>), ApiError> {
    request.validate()?;

    let mut input = NewNotification {
        trip_id: request.trip_id,
        passenger_id: request.passenger_id,
        channel: request.channel,
        notification_type: request.notification_type,
        subject: request
            .subject
            .as_deref()
            .map(|s| render_placeholders(s, &request.values)),
        body: render_placeholders(&request.message, &request.values),
        recipient_phone: request.recipient_phone.clone(),
        recipient_email: request.recipient_email.clone(),
        recipient_push_token: request.recipient_push_token.clone(),
    };

    if let Some(passenger_id) = request.passenger_id {
        let passenger: TripPassenger = PassengerRepository::new(state.pool.clone())
            .find_by_id(passenger_id)
            .await?
            .map(Into::into)
            .ok_or_else(|| ApiError::NotFound("Passenger not found".to_string()))?;
        with_passenger_contact(&mut input, &passenger);
    }

    recipient_for(
        input.channel,
        &ContactInfo {
            phone: input.recipient_phone.as_deref(),
            email: input.recipient_email.as_deref(),
            push_token: input.recipient_push_token.as_deref(),
        },
    )?;

    let notification = state.notifications.queue(input).await?;

    info!(
        admin_key_id = auth.api_key_id,
        notification_id = notification.id,
        channel = %notification.channel,
        "Custom notification queued"
    );
    Ok((StatusCode::ACCEPTED, Json(notification.into())))
}

/// POST /api/v1/admin/notifications/:notification_id/retry
///
/// Answers 202 with the notification back in `pending` while it is re-sent
/// in the background. 409 when it is not `failed` or its retries are used up.
pub async fn retry_notification(
    State(state): State<AppState>,
    Extension(auth): Extension<ApiKeyAuth>,
    Path(notification_id): Path<i64>,
) -> Result<(StatusCode, Json<NotificationResponse>), ApiError> {
    let notification = state.notifications.retry(notification_id).await?;

    info!(
        admin_key_id = auth.api_key_id,
        notification_id,
        retry_count = notification.retry_count,
        "Notification retry queued"
    );
    Ok((StatusCode::ACCEPTED, Json(notification.into())))
}
