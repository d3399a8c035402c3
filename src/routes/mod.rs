pub mod auth;
pub mod events;
pub mod webhook;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use calmirror_core::error::{RemoteError, StoreError, SyncError};
use serde::Serialize;

/// Standard API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Convert sync errors to HTTP responses
pub struct AppError(SyncError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::CredentialMissing => StatusCode::UNAUTHORIZED,
            SyncError::UserNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Remote(remote) => match remote {
                RemoteError::AuthExpired => StatusCode::UNAUTHORIZED,
                RemoteError::NotFound => StatusCode::NOT_FOUND,
                RemoteError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                RemoteError::Unavailable(_) | RemoteError::Timeout(_) => StatusCode::BAD_GATEWAY,
            },
            SyncError::Store(store) => match store {
                StoreError::NotFound => StatusCode::NOT_FOUND,
                StoreError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (self.status(), body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<SyncError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
