use super::{ControlInfo, Naming, Optimistic};
use crate::coordinator::PollCoordinator;
use crate::error::Result;
use crate::telemetry::DeviceState;

/// Start/stop control, present on devices that support shutdown.
pub struct MiningSwitch {
    info: ControlInfo,
    coordinator: PollCoordinator,
    assumed: Optimistic<bool>,
}

impl MiningSwitch {
    pub(super) fn new(naming: &Naming, coordinator: PollCoordinator) -> Self {
        Self {
            info: naming.device("active", "Active"),
            coordinator,
            assumed: Optimistic::default(),
        }
    }

    pub fn info(&self) -> &ControlInfo {
        &self.info
    }

    /// Whether the device is hashing. Holds the commanded value until
    /// the next poll.
    pub fn is_on(&self) -> Option<bool> {
        let snapshot = self.coordinator.snapshot();
        self.assumed
            .current(&snapshot)
            .or_else(|| is_mining(&snapshot.state))
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.switch(true).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.switch(false).await
    }

    async fn switch(&self, on: bool) -> Result<()> {
        let seen = self.coordinator.snapshot();
        self.coordinator.set_mining(on).await?;
        self.assumed.record(on, seen);
        Ok(())
    }
}

/// The device's own `is_mining` flag. When the device does not report
/// one, a non-zero average temperature is taken as a sign of hashing;
/// a stopped miner reports none.
fn is_mining(state: &DeviceState) -> Option<bool> {
    state
        .is_mining
        .or_else(|| state.temperature_avg.map(|t| t != 0))
}
