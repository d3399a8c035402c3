//! Google Calendar adapter for calmirror.
//!
//! Implements the `RemoteCalendar` and `TokenRefresher` ports from
//! `calmirror-core` against the Calendar v3 REST API.

pub mod auth;
pub mod client;
pub mod convert;

pub use auth::GoogleProfile;
pub use client::{GoogleCalendar, GoogleConfig};
