use super::{ControlInfo, Naming, Optimistic};
use crate::coordinator::PollCoordinator;
use crate::error::Result;

/// Granularity offered to callers picking a power limit.
pub const POWER_LIMIT_STEP_W: u32 = 100;

/// Settable power limit, present only on autotuning devices.
pub struct PowerLimitControl {
    info: ControlInfo,
    coordinator: PollCoordinator,
    written: Optimistic<f64>,
}

impl PowerLimitControl {
    pub(super) fn new(naming: &Naming, coordinator: PollCoordinator) -> Self {
        Self {
            info: naming.device("power_limit_setting", "Power Limit Setting"),
            coordinator,
            written: Optimistic::default(),
        }
    }

    pub fn info(&self) -> &ControlInfo {
        &self.info
    }

    pub fn min(&self) -> u32 {
        self.coordinator.snapshot().power_limit_range.min
    }

    pub fn max(&self) -> u32 {
        self.coordinator.snapshot().power_limit_range.max
    }

    pub fn step(&self) -> u32 {
        POWER_LIMIT_STEP_W
    }

    pub fn unit(&self) -> &'static str {
        "W"
    }

    /// Current limit in W.
    ///
    /// A freshly written value is shown until the next poll, and after
    /// that for as long as polls do not report a limit.
    pub fn value(&self) -> Option<f64> {
        let snapshot = self.coordinator.snapshot();
        self.written
            .current(&snapshot)
            .or(snapshot.state.wattage_limit)
            .or_else(|| self.written.last())
    }

    pub async fn set(&self, watts: u32) -> Result<()> {
        let seen = self.coordinator.snapshot();
        self.coordinator.set_power_limit(watts).await?;
        self.written.record(f64::from(watts), seen);
        Ok(())
    }
}
