//! Error types for the calmirror ecosystem.

use thiserror::Error;
use uuid::Uuid;

/// Failures of calls against the remote calendar service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The access token was rejected. Recoverable once via refresh,
    /// terminal on the second occurrence.
    #[error("Remote authorization expired")]
    AuthExpired,

    #[error("Remote resource not found")]
    NotFound,

    #[error("Remote rate limit exceeded")]
    RateLimited,

    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    #[error("Remote call timed out after {0}s")]
    Timeout(u64),
}

/// Failures of the local persistence layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Record not found")]
    NotFound,
}

/// Failures surfaced by the sync core (guard, engine, channel manager,
/// mutation gateway).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// No refresh token is available for a user whose access token
    /// expired. Requires re-authentication; never retried.
    #[error("No refresh credential available, re-authentication required")]
    CredentialMissing,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("User not found: {0}")]
    UserNotFound(Uuid),
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
