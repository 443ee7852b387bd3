//! Commands addressed to several devices at once.
//!
//! Every resolved device runs its command concurrently and the batch
//! completes only when all of them have finished. A failing device never
//! cancels or delays its siblings; the [`FleetReport`] says who did what.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::{DeviceId, FleetRegistry};
use crate::coordinator::PollCoordinator;
use crate::device::MiningMode;
use crate::error::Result;
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetCommand {
    Reboot,
    RestartBackend,
    SetMiningMode(MiningMode),
}

impl FleetCommand {
    fn name(&self) -> &'static str {
        match self {
            FleetCommand::Reboot => "reboot",
            FleetCommand::RestartBackend => "restart_backend",
            FleetCommand::SetMiningMode(_) => "set_mining_mode",
        }
    }
}

/// Result of one device's share of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceOutcome {
    pub device: DeviceId,
    /// `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeviceOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FleetReport {
    /// One entry per resolved device, in request order.
    pub outcomes: Vec<DeviceOutcome>,
    /// Ids with no live coordinator or no connected handle.
    pub unresolved: Vec<DeviceId>,
}

impl FleetReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &DeviceId> {
        self.outcomes
            .iter()
            .filter(|o| o.succeeded())
            .map(|o| &o.device)
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

#[derive(Clone)]
pub struct FleetDispatcher {
    registry: Arc<FleetRegistry>,
}

impl FleetDispatcher {
    pub fn new(registry: Arc<FleetRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    pub async fn reboot(&self, ids: &[DeviceId]) -> FleetReport {
        self.dispatch(ids, FleetCommand::Reboot).await
    }

    pub async fn restart_backend(&self, ids: &[DeviceId]) -> FleetReport {
        self.dispatch(ids, FleetCommand::RestartBackend).await
    }

    pub async fn set_mining_mode(&self, ids: &[DeviceId], mode: MiningMode) -> FleetReport {
        self.dispatch(ids, FleetCommand::SetMiningMode(mode)).await
    }

    /// Run `command` on every resolvable device in `ids`.
    ///
    /// Duplicate ids are collapsed. Unresolvable ids are logged and listed
    /// in [`FleetReport::unresolved`].
    pub async fn dispatch(&self, ids: &[DeviceId], command: FleetCommand) -> FleetReport {
        let mut report = FleetReport::default();
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        for id in ids.iter().filter(|id| seen.insert(*id)) {
            match self.lend(id) {
                Some(target) => targets.push(target),
                None => {
                    warn!(device = %id, command = command.name(), "Skipping unresolved device");
                    report.unresolved.push(id.clone());
                }
            }
        }

        report.outcomes = join_all(
            targets
                .into_iter()
                .map(|coordinator| run(coordinator, command)),
        )
        .await;

        info!(
            command = command.name(),
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            unresolved = report.unresolved.len(),
            "Fleet command finished"
        );
        report
    }

    /// Set one device's power limit.
    ///
    /// Rejected locally, without a device call, when the value is outside
    /// the configured range or the device does not support autotuning.
    pub async fn set_power_limit(&self, id: &DeviceId, watts: u32) -> Result<()> {
        self.registry.resolve(id)?.set_power_limit(watts).await
    }

    /// A coordinator that currently holds a device handle.
    fn lend(&self, id: &DeviceId) -> Option<PollCoordinator> {
        self.registry.get(id).filter(|c| c.available())
    }
}

async fn run(coordinator: PollCoordinator, command: FleetCommand) -> DeviceOutcome {
    let result = match command {
        FleetCommand::Reboot => coordinator.reboot().await,
        FleetCommand::RestartBackend => coordinator.restart_backend().await,
        FleetCommand::SetMiningMode(mode) => coordinator.set_mining_mode(mode).await,
    };

    let device = coordinator.id().clone();
    match result {
        Ok(()) => {
            debug!(device = %device, command = command.name(), "Command succeeded");
            DeviceOutcome {
                device,
                error: None,
            }
        }
        Err(e) => {
            warn!(device = %device, command = command.name(), error = %e, "Command failed");
            DeviceOutcome {
                device,
                error: Some(e.to_string()),
            }
        }
    }
}
