//! Core types and sync logic for the calmirror ecosystem.
//!
//! This crate is free of HTTP and SQL: the remote calendar and the
//! local stores are consumed through the traits in [`remote`] and
//! [`store`], so the reconciliation engine, credential guard, webhook
//! channel manager and sync dispatcher can be exercised against
//! in-memory fakes.

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gateway;
pub mod guard;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod user;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the most commonly used types at crate root for convenience
pub use error::{RemoteError, StoreError, SyncError, SyncResult};
pub use event::{EventDraft, EventPatch, EventTime, MirrorEvent, RemoteEvent};
pub use user::{User, WebhookChannel};
