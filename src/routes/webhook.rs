//! Google push notification callback and channel management endpoints.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use calmirror_core::channel::ResourceState;
use calmirror_core::user::WebhookChannel;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhook/calendar", post(notification))
        .route("/api/users/{user_id}/webhook", post(setup_webhook))
        .route("/api/users/{user_id}/webhook/stop", post(stop_webhook))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /api/webhook/calendar - Inbound push notification.
///
/// Always acknowledged with 200 so Google does not retry or tear down
/// the channel; the triggered sync runs in the background.
async fn notification(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let Some(channel_id) = header(&headers, "x-goog-channel-id").map(str::to_string) else {
        debug!("notification without a channel id, ignoring");
        return StatusCode::OK;
    };
    let Some(resource_state) =
        header(&headers, "x-goog-resource-state").and_then(ResourceState::parse)
    else {
        debug!(channel = %channel_id, "notification with unknown resource state, ignoring");
        return StatusCode::OK;
    };

    tokio::spawn(async move {
        if let Err(err) = state
            .channels
            .handle_notification(&channel_id, resource_state)
            .await
        {
            warn!(channel = %channel_id, error = %err, "failed to handle notification");
        }
    });

    StatusCode::OK
}

#[derive(Serialize)]
pub struct ChannelResponse {
    pub channel_id: String,
    pub expiration: chrono::DateTime<chrono::Utc>,
}

/// POST /api/users/:user_id/webhook - Register (or keep) the user's
/// notification channel.
async fn setup_webhook(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ChannelResponse>, AppError> {
    let channel: WebhookChannel = state.channels.ensure_channel(user_id).await?;
    Ok(Json(ChannelResponse {
        channel_id: channel.channel_id,
        expiration: channel.expiration,
    }))
}

#[derive(Serialize)]
pub struct StoppedResponse {
    pub stopped: bool,
}

/// POST /api/users/:user_id/webhook/stop
async fn stop_webhook(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<StoppedResponse>, AppError> {
    state.channels.stop_channel(user_id).await?;
    Ok(Json(StoppedResponse { stopped: true }))
}
