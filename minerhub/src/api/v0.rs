//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the hub reaches 1.0.
//!
//! Reads are served from the coordinators' cached snapshots and never
//! touch a device. Fleet commands always answer 200 with a per-device
//! report; single-device calls map errors onto status codes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use super::server::SharedState;
use crate::api_client::types::{
    ActionCall, DeviceDetail, DeviceSummary, FleetReport, FleetRequest, MiningModeRequest,
    PowerLimitRequest,
};
use crate::error::Result;
use crate::fleet::DeviceId;
use crate::fleet::actions::{call_action, list_actions};

/// Build the v0 API routes.
pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(get_devices))
        .route("/devices/{id}", get(get_device).delete(remove_device))
        .route("/devices/{id}/power-limit", post(set_power_limit))
        .route("/actions", post(post_action))
        .route("/fleet/reboot", post(fleet_reboot))
        .route("/fleet/restart-backend", post(fleet_restart_backend))
        .route("/fleet/mining-mode", post(fleet_mining_mode))
}

async fn health() -> &'static str {
    "OK"
}

/// Summaries of every registered device, in id order.
async fn get_devices(State(state): State<SharedState>) -> Json<Vec<DeviceSummary>> {
    Json(
        state
            .registry()
            .coordinators()
            .iter()
            .map(|c| {
                let config = c.config();
                DeviceSummary::new(c.id().clone(), config.title(), &config.address, &c.snapshot())
            })
            .collect(),
    )
}

async fn get_device(
    State(state): State<SharedState>,
    Path(id): Path<DeviceId>,
) -> Result<Json<DeviceDetail>> {
    let coordinator = state.registry().resolve(&id)?;
    let controls = state
        .controls(&id)
        .map(|set| set.views())
        .unwrap_or_default();
    let actions = list_actions(&state.dispatcher, &id)?;

    Ok(Json(DeviceDetail {
        title: coordinator.config().title().to_string(),
        snapshot: (*coordinator.snapshot()).clone(),
        id,
        controls,
        actions,
    }))
}

async fn remove_device(
    State(state): State<SharedState>,
    Path(id): Path<DeviceId>,
) -> Result<StatusCode> {
    state.remove_device(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Write a power limit. Goes through the device's power-limit control
/// when one is registered so the control reflects the written value.
async fn set_power_limit(
    State(state): State<SharedState>,
    Path(id): Path<DeviceId>,
    Json(req): Json<PowerLimitRequest>,
) -> Result<StatusCode> {
    let control = state.controls(&id);
    match control.as_deref().and_then(|set| set.power_limit()) {
        Some(power_limit) => power_limit.set(req.watts).await?,
        None => state.dispatcher.set_power_limit(&id, req.watts).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn post_action(
    State(state): State<SharedState>,
    Json(call): Json<ActionCall>,
) -> Json<FleetReport> {
    Json(call_action(&state.dispatcher, &call).await)
}

async fn fleet_reboot(
    State(state): State<SharedState>,
    Json(req): Json<FleetRequest>,
) -> Json<FleetReport> {
    Json(state.dispatcher.reboot(&req.device_ids).await)
}

async fn fleet_restart_backend(
    State(state): State<SharedState>,
    Json(req): Json<FleetRequest>,
) -> Json<FleetReport> {
    Json(state.dispatcher.restart_backend(&req.device_ids).await)
}

async fn fleet_mining_mode(
    State(state): State<SharedState>,
    Json(req): Json<MiningModeRequest>,
) -> Json<FleetReport> {
    Json(
        state
            .dispatcher
            .set_mining_mode(&req.device_ids, req.mode)
            .await,
    )
}
