//! Sign-in: authorization-code exchange and user bootstrap.

use axum::{extract::State, routing::post, Json, Router};
use calmirror_core::dispatcher::TriggerReason;
use calmirror_core::error::SyncError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/auth/google", post(sign_in))
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub code: String,
    pub redirect_uri: String,
}

#[derive(Serialize)]
pub struct SignInResponse {
    pub user_id: Uuid,
    pub email: String,
}

/// POST /api/auth/google - Exchange an authorization code, upsert the
/// user, then kick off the initial sync and webhook registration.
async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SignInResponse>, AppError> {
    let tokens = state
        .google
        .exchange_code(&req.code, &req.redirect_uri)
        .await
        .map_err(SyncError::Remote)?;
    let profile = state
        .google
        .fetch_profile(&tokens.access_token)
        .await
        .map_err(SyncError::Remote)?;

    let user = state
        .users
        .upsert_by_google_id(
            &profile.id,
            &profile.email,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
        )
        .await
        .map_err(SyncError::Store)?;

    info!(user = %user.id, email = %user.email, "user signed in");

    // Populate the mirror right away; webhook registration failure is
    // not fatal to sign-in, the periodic timer still covers the user.
    state.dispatcher.trigger(user.id, TriggerReason::SignIn);
    if let Err(err) = state.channels.ensure_channel(user.id).await {
        warn!(user = %user.id, error = %err, "could not register webhook channel at sign-in");
    }

    Ok(Json(SignInResponse {
        user_id: user.id,
        email: user.email,
    }))
}
