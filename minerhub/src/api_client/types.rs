//! API data transfer objects.
//!
//! These types define the API contract shared between the daemon and
//! clients. Library types that already serialize cleanly (snapshots,
//! control views, fleet reports) are reused as-is.

use serde::{Deserialize, Serialize};

use crate::controls::ControlView;
use crate::coordinator::{CoordinatorSnapshot, PollPhase};
use crate::device::MiningMode;
use crate::fleet::DeviceId;
use crate::fleet::actions::ActionDescriptor;

pub use crate::fleet::actions::ActionCall;
pub use crate::fleet::{DeviceOutcome, FleetReport};

/// One line of the fleet overview.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub title: String,
    pub address: String,
    #[serde(flatten)]
    pub phase: PollPhase,
    pub failure_count: u32,
    pub is_reachable: bool,
    pub is_mining: Option<bool>,
    /// TH/s.
    pub hashrate: Option<f64>,
    /// W.
    pub wattage: Option<f64>,
    /// °C.
    pub temperature_avg: Option<i32>,
}

impl DeviceSummary {
    pub fn new(
        id: DeviceId,
        title: impl Into<String>,
        address: impl Into<String>,
        snapshot: &CoordinatorSnapshot,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            address: address.into(),
            phase: snapshot.phase.clone(),
            failure_count: snapshot.failure_count,
            is_reachable: snapshot.state.is_reachable,
            is_mining: snapshot.state.is_mining,
            hashrate: snapshot.state.hashrate,
            wattage: snapshot.state.wattage,
            temperature_avg: snapshot.state.temperature_avg,
        }
    }
}

/// Everything known about one device.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceDetail {
    pub id: DeviceId,
    pub title: String,
    pub snapshot: CoordinatorSnapshot,
    /// Empty until the device has been polled successfully once.
    pub controls: Vec<ControlView>,
    pub actions: Vec<ActionDescriptor>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PowerLimitRequest {
    pub watts: u32,
}

/// Target list for fleet commands without arguments.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FleetRequest {
    pub device_ids: Vec<DeviceId>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MiningModeRequest {
    pub device_ids: Vec<DeviceId>,
    pub mode: MiningMode,
}

/// Body of every non-2xx response.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
