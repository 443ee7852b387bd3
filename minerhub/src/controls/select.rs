use super::{ControlInfo, Naming};
use crate::coordinator::PollCoordinator;
use crate::device::MiningMode;
use crate::error::{Error, Result};

pub const MINING_MODE_OPTIONS: &[&str] = &["Normal", "High", "Low"];

/// Fixed power preset selector, present on preset devices without
/// autotuning.
pub struct MiningModeSelect {
    info: ControlInfo,
    coordinator: PollCoordinator,
}

impl MiningModeSelect {
    pub(super) fn new(naming: &Naming, coordinator: PollCoordinator) -> Self {
        Self {
            info: naming.device("power_mode", "Power Mode"),
            coordinator,
        }
    }

    pub fn info(&self) -> &ControlInfo {
        &self.info
    }

    pub fn options(&self) -> &'static [&'static str] {
        MINING_MODE_OPTIONS
    }

    /// The device-reported mode, title-cased.
    pub fn current_option(&self) -> Option<String> {
        self.coordinator
            .snapshot()
            .state
            .mining_mode
            .as_deref()
            .map(title_case)
    }

    pub async fn select(&self, option: &str) -> Result<()> {
        let mode: MiningMode = option.parse().map_err(|_| Error::InvalidOption {
            option: option.to_string(),
            allowed: MINING_MODE_OPTIONS,
        })?;
        self.coordinator.set_mining_mode(mode).await
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
