//! Event endpoints: list from the mirror, mutate through the gateway.

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use calmirror_core::dispatcher::TriggerReason;
use calmirror_core::error::SyncError;
use calmirror_core::event::{EventDraft, EventPatch, MirrorEvent};
use serde::Serialize;
use uuid::Uuid;

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/users/{user_id}/events",
            get(list_events).post(create_event),
        )
        .route(
            "/api/users/{user_id}/events/{event_id}",
            put(update_event).delete(delete_event),
        )
}

/// GET /api/users/:user_id/events - The user's mirrored events,
/// ordered by start time. Reads the local mirror only.
async fn list_events(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<MirrorEvent>>, AppError> {
    let events = state
        .mirror
        .list_by_user(user_id)
        .await
        .map_err(SyncError::Store)?;
    Ok(Json(events))
}

/// POST /api/users/:user_id/events - Create on Google first, then
/// mirror locally.
async fn create_event(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(draft): Json<EventDraft>,
) -> Result<Json<MirrorEvent>, AppError> {
    let event = state.gateway.create_event(user_id, draft).await?;
    // A follow-up sync picks up whatever the write race left behind.
    state.dispatcher.trigger(user_id, TriggerReason::PostMutation);
    Ok(Json(event))
}

/// PUT /api/users/:user_id/events/:event_id - Partial update by the
/// Google event id.
async fn update_event(
    State(state): State<AppState>,
    Path((user_id, event_id)): Path<(Uuid, String)>,
    Json(patch): Json<EventPatch>,
) -> Result<Json<MirrorEvent>, AppError> {
    let event = state.gateway.update_event(user_id, &event_id, patch).await?;
    state.dispatcher.trigger(user_id, TriggerReason::PostMutation);
    Ok(Json(event))
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

/// DELETE /api/users/:user_id/events/:event_id
async fn delete_event(
    State(state): State<AppState>,
    Path((user_id, event_id)): Path<(Uuid, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    state.gateway.delete_event(user_id, &event_id).await?;
    state.dispatcher.trigger(user_id, TriggerReason::PostMutation);
    Ok(Json(DeletedResponse { deleted: true }))
}
