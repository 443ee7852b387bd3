//! Stable telemetry records derived from raw device snapshots.
//!
//! Every numeric field is an `Option`: `None` is "unknown", which is not
//! the same as zero (a stopped fan legitimately reports 0 RPM).

mod normalize;

pub use normalize::{ExpectedCounts, normalize};

use serde::{Deserialize, Serialize};

use crate::device::{MiningModeConfig, RawSnapshot};

/// Who the device is.
///
/// Fields are filled from the first snapshot that reports them and are
/// never blanked by a later snapshot that does not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceIdentity {
    pub host_address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
}

impl DeviceIdentity {
    pub fn new(host_address: impl Into<String>) -> Self {
        Self {
            host_address: host_address.into(),
            ..Default::default()
        }
    }

    /// Take any identity fields `raw` reports, keeping existing values for
    /// the ones it leaves out.
    pub fn absorb(&mut self, raw: &RawSnapshot) {
        fn keep_or_take(current: &mut Option<String>, reported: &Option<String>) {
            if let Some(value) = reported.as_deref().filter(|v| !v.is_empty()) {
                *current = Some(value.to_string());
            }
        }

        keep_or_take(&mut self.hostname, &raw.hostname);
        keep_or_take(&mut self.mac_address, &raw.mac);
        keep_or_take(&mut self.manufacturer, &raw.make);
        keep_or_take(&mut self.model, &raw.model);
        keep_or_take(&mut self.firmware_version, &raw.fw_version);
    }
}

/// One point-in-time view of a device.
///
/// Replaced wholesale on every poll; never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DeviceState {
    pub is_reachable: bool,
    pub is_mining: Option<bool>,
    /// TH/s, two decimals.
    pub hashrate: Option<f64>,
    /// TH/s, two decimals.
    pub expected_hashrate: Option<f64>,
    /// °C, truncated.
    pub temperature_avg: Option<i32>,
    /// W
    pub wattage: Option<f64>,
    /// W
    pub wattage_limit: Option<f64>,
    /// W, as currently applied by the auto-tuner.
    pub scaled_power_limit: Option<f64>,
    /// J/TH
    pub efficiency: Option<f64>,
    pub active_preset_name: Option<String>,
    pub mining_mode: Option<String>,
    pub boards: Vec<BoardState>,
    pub fans: Vec<FanState>,
    pub mining_mode_config: Option<MiningModeConfig>,
}

impl DeviceState {
    /// Placeholder published for an absorbed (single) poll failure.
    ///
    /// Carries one empty record per expected board and fan so slot-keyed
    /// consumers keep seeing the same cardinality.
    pub fn unreachable(expected: ExpectedCounts) -> Self {
        Self {
            boards: (0..expected.hashboards)
                .map(|slot| BoardState {
                    slot,
                    ..Default::default()
                })
                .collect(),
            fans: (0..expected.fans)
                .map(|slot| FanState {
                    slot,
                    speed_rpm: None,
                })
                .collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BoardState {
    pub slot: u8,
    /// °C
    pub board_temp: Option<f64>,
    /// °C
    pub chip_temp: Option<f64>,
    /// TH/s, two decimals.
    pub hashrate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FanState {
    pub slot: u8,
    pub speed_rpm: Option<u32>,
}
