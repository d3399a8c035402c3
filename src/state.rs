use std::sync::Arc;

use anyhow::{Context, Result};
use calmirror_core::channel::ChannelManager;
use calmirror_core::dispatcher::SyncDispatcher;
use calmirror_core::gateway::MutationGateway;
use calmirror_core::guard::CredentialGuard;
use calmirror_core::reconcile::ReconcileEngine;
use calmirror_core::store::{MirrorStore, UserStore};
use calmirror_google::{GoogleCalendar, GoogleConfig};
use calmirror_store::Database;
use chrono::Duration;

use crate::config::Config;

/// Shared application state: one wired instance of every component,
/// handed to the routes and the background loops.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub mirror: Arc<dyn MirrorStore>,
    pub google: Arc<GoogleCalendar>,
    pub dispatcher: Arc<SyncDispatcher>,
    pub channels: Arc<ChannelManager>,
    pub gateway: Arc<MutationGateway>,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self> {
        let db = Arc::new(
            Database::open(&config.database)
                .with_context(|| format!("Failed to open database at {}", config.database.display()))?,
        );
        let users: Arc<dyn UserStore> = db.clone();
        let mirror: Arc<dyn MirrorStore> = db;

        let google = Arc::new(
            GoogleCalendar::new(GoogleConfig {
                client_id: config.google.client_id.clone(),
                client_secret: config.google.client_secret.clone(),
                timeout: config.sync.remote_timeout(),
                channel_ttl: config.sync.channel_ttl(),
            })
            .context("Failed to build the Google API client")?,
        );

        let guard = Arc::new(CredentialGuard::new(users.clone(), google.clone()));
        let engine = Arc::new(ReconcileEngine::new(
            guard.clone(),
            google.clone(),
            mirror.clone(),
        ));
        let dispatcher = SyncDispatcher::new(engine, config.sync.max_concurrent_syncs);
        let channels = Arc::new(ChannelManager::new(
            users.clone(),
            google.clone(),
            guard.clone(),
            dispatcher.clone(),
            config.google.callback_url.clone(),
            Duration::from_std(config.sync.renewal_interval())
                .context("Renewal interval out of range")?,
        ));
        let gateway = Arc::new(MutationGateway::new(guard, google.clone(), mirror.clone()));

        Ok(AppState {
            users,
            mirror,
            google,
            dispatcher,
            channels,
            gateway,
        })
    }
}
