mod config;
mod routes;
mod state;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use calmirror_core::dispatcher::TriggerReason;
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("calmirror=info")),
        )
        .init();

    let config_path = config::config_path();
    let config = config::load(&config_path)?;
    let state = AppState::new(&config)?;

    let periodic = tokio::spawn(periodic_sync_loop(state.clone(), config.sync.interval()));
    let renewal = tokio::spawn(renewal_loop(state.clone(), config.sync.renewal_interval()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::auth::router())
        .merge(routes::events::router())
        .merge(routes::webhook::router())
        .with_state(state.clone())
        .layer(cors);

    info!(addr = %config.listen, "calmirror-server listening");
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting new sync triggers, then let in-flight runs drain.
    periodic.abort();
    renewal.abort();
    state.dispatcher.shutdown();
    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        while !state.dispatcher.is_idle() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("shutdown timed out waiting for in-flight syncs");
    }
    info!("calmirror-server stopped");

    Ok(())
}

/// Full sync for every user on a fixed interval. The safety net for
/// notifications that never arrive.
async fn periodic_sync_loop(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; that is the startup sync.
    loop {
        ticker.tick().await;
        match state.users.all().await {
            Ok(users) => {
                for user in users {
                    state.dispatcher.trigger(user.id, TriggerReason::Periodic);
                }
            }
            Err(err) => warn!(error = %err, "periodic sync could not list users"),
        }
    }
}

/// Renew webhook channels that would expire before the next sweep.
async fn renewal_loop(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let renewed = state.channels.renew_due(Utc::now()).await;
        if renewed > 0 {
            info!(renewed, "webhook channels renewed");
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not install the shutdown handler");
    }
    info!("shutdown signal received");
}
