//! The set of managed devices.
//!
//! [`FleetRegistry`] is constructed once by the daemon and handed to
//! whatever needs to look devices up; there is no global device map.

pub mod actions;
mod dispatcher;

pub use dispatcher::{DeviceOutcome, FleetCommand, FleetDispatcher, FleetReport};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::{DeviceConfig, PollConfig};
use crate::coordinator::{CoordinatorSnapshot, PollCoordinator};
use crate::device::DeviceConnector;
use crate::error::{Error, Result};
use crate::telemetry::DeviceState;
use crate::tracing::prelude::*;

/// Opaque device identifier, unique within a fleet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Live coordinators keyed by device id.
pub struct FleetRegistry {
    connector: Arc<dyn DeviceConnector>,
    poll: PollConfig,
    coordinators: RwLock<HashMap<DeviceId, PollCoordinator>>,
}

impl FleetRegistry {
    pub fn new(connector: Arc<dyn DeviceConnector>, poll: PollConfig) -> Self {
        Self {
            connector,
            poll,
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    /// Create a coordinator for `config` and run its first poll.
    pub async fn add(&self, config: DeviceConfig) -> Result<PollCoordinator> {
        let coordinator = {
            let mut coordinators = self.coordinators.write();
            if coordinators.contains_key(&config.id) {
                return Err(Error::Config(format!("device {} already registered", config.id)));
            }
            let coordinator =
                PollCoordinator::new(config, self.poll, Arc::clone(&self.connector));
            coordinators.insert(coordinator.id().clone(), coordinator.clone());
            coordinator
        };

        info!(device = %coordinator.id(), address = %coordinator.config().address, "Device added");
        coordinator.start().await;
        Ok(coordinator)
    }

    /// Stop and forget a device. Returns `false` if it was not registered.
    pub async fn remove(&self, id: &DeviceId) -> bool {
        let removed = self.coordinators.write().remove(id);
        match removed {
            Some(coordinator) => {
                coordinator.shutdown().await;
                info!(device = %id, "Device removed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &DeviceId) -> Option<PollCoordinator> {
        self.coordinators.read().get(id).cloned()
    }

    pub fn resolve(&self, id: &DeviceId) -> Result<PollCoordinator> {
        self.get(id).ok_or_else(|| Error::Resolution(id.clone()))
    }

    /// Latest cached state. Never blocks on the network.
    pub fn get_state(&self, id: &DeviceId) -> Result<DeviceState> {
        Ok(self.resolve(id)?.state())
    }

    pub fn subscribe(&self, id: &DeviceId) -> Result<watch::Receiver<Arc<CoordinatorSnapshot>>> {
        Ok(self.resolve(id)?.subscribe())
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.coordinators.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registered coordinators in id order.
    pub fn coordinators(&self) -> Vec<PollCoordinator> {
        let mut coordinators: Vec<_> = self.coordinators.read().values().cloned().collect();
        coordinators.sort_by(|a, b| a.id().cmp(b.id()));
        coordinators
    }

    pub async fn shutdown(&self) {
        let coordinators: Vec<_> = self.coordinators.write().drain().map(|(_, c)| c).collect();
        futures::future::join_all(coordinators.iter().map(|c| c.shutdown())).await;
    }
}
