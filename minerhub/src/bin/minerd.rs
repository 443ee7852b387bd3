//! Fleet daemon.
//!
//! Loads the fleet configuration, polls every configured device, creates
//! each device's controls once it has answered, and serves the HTTP API
//! until interrupted.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use minerhub::api::{self, SharedState};
use minerhub::config::FleetConfig;
use minerhub::controls::Registrar;
use minerhub::coordinator::PollCoordinator;
use minerhub::device::gateway::GatewayConnector;
use minerhub::fleet::{FleetDispatcher, FleetRegistry};
use minerhub::tracing::{self, prelude::*};

const DEFAULT_CONFIG_PATH: &str = "minerhub.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let path = env::var("MINERHUB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config =
        FleetConfig::from_path(&path).with_context(|| format!("failed to load {path}"))?;
    info!(config = %path, devices = config.devices.len(), "Starting minerhubd");

    let connector = Arc::new(GatewayConnector::new()?);
    let registry = Arc::new(FleetRegistry::new(connector, config.poll));
    let state = SharedState::new(FleetDispatcher::new(Arc::clone(&registry)));
    let shutdown = CancellationToken::new();

    // First polls run concurrently; one slow device must not hold up the
    // others.
    let added = join_all(config.devices.into_iter().map(|device| registry.add(device))).await;
    for coordinator in added {
        let coordinator = coordinator?;
        tokio::spawn(register_when_ready(coordinator, state.clone(), shutdown.clone()));
    }

    let server = {
        let bind = config.api_bind.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        // A server that fails to start takes the daemon down with it.
        tokio::spawn(async move {
            let result = api::serve(&bind, state, shutdown.clone()).await;
            shutdown.cancel();
            result
        })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Interrupted, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "API server failed"),
        Err(err) => error!(error = %err, "API server task panicked"),
    }
    registry.shutdown().await;

    info!("Stopped");
    Ok(())
}

/// Create a device's controls after its first successful poll.
async fn register_when_ready(
    coordinator: PollCoordinator,
    state: SharedState,
    shutdown: CancellationToken,
) {
    let ready = tokio::select! {
        _ = shutdown.cancelled() => return,
        ready = coordinator.wait_ready() => ready,
    };

    match ready.and_then(|_| Registrar::register(&coordinator)) {
        Ok(controls) => state.install_controls(controls),
        Err(err) => warn!(device = %coordinator.id(), error = %err, "Controls not created"),
    }
}
