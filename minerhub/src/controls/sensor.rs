//! Read-only telemetry controls.

use serde::{Deserialize, Serialize};

use super::{ControlInfo, Naming};
use crate::coordinator::PollCoordinator;
use crate::telemetry::DeviceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Hashrate,
    IdealHashrate,
    ActivePresetName,
    Temperature,
    PowerLimit,
    MinerConsumption,
    MinerConsumptionKw,
    Efficiency,
    BoardTemperature(u8),
    ChipTemperature(u8),
    BoardHashrate(u8),
    FanSpeed(u8),
}

/// A sensor reading. Text only for the active preset name.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

impl SensorKind {
    /// Device-level sensors, in creation order.
    pub const DEVICE: &'static [SensorKind] = &[
        SensorKind::Hashrate,
        SensorKind::IdealHashrate,
        SensorKind::ActivePresetName,
        SensorKind::Temperature,
        SensorKind::PowerLimit,
        SensorKind::MinerConsumption,
        SensorKind::MinerConsumptionKw,
        SensorKind::Efficiency,
    ];

    pub fn board(slot: u8) -> [SensorKind; 3] {
        [
            SensorKind::BoardTemperature(slot),
            SensorKind::ChipTemperature(slot),
            SensorKind::BoardHashrate(slot),
        ]
    }

    pub fn key(&self) -> &'static str {
        match self {
            SensorKind::Hashrate => "hashrate",
            SensorKind::IdealHashrate => "ideal_hashrate",
            SensorKind::ActivePresetName => "active_preset_name",
            SensorKind::Temperature => "temperature",
            SensorKind::PowerLimit => "power_limit",
            SensorKind::MinerConsumption => "miner_consumption",
            SensorKind::MinerConsumptionKw => "miner_consumption_kw",
            SensorKind::Efficiency => "efficiency",
            SensorKind::BoardTemperature(_) => "board_temperature",
            SensorKind::ChipTemperature(_) => "chip_temperature",
            SensorKind::BoardHashrate(_) => "board_hashrate",
            SensorKind::FanSpeed(_) => "fan_speed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Hashrate => "Hashrate",
            SensorKind::IdealHashrate => "Ideal Hashrate",
            SensorKind::ActivePresetName => "Active Preset",
            SensorKind::Temperature => "Temperature",
            SensorKind::PowerLimit => "Power Limit",
            SensorKind::MinerConsumption => "Miner Consumption",
            SensorKind::MinerConsumptionKw => "Miner Consumption (kW)",
            SensorKind::Efficiency => "Efficiency",
            SensorKind::BoardTemperature(_) => "Board Temperature",
            SensorKind::ChipTemperature(_) => "Chip Temperature",
            SensorKind::BoardHashrate(_) => "Board Hashrate",
            SensorKind::FanSpeed(_) => "Fan Speed",
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::Hashrate | SensorKind::IdealHashrate | SensorKind::BoardHashrate(_) => {
                Some("TH/s")
            }
            SensorKind::Temperature
            | SensorKind::BoardTemperature(_)
            | SensorKind::ChipTemperature(_) => Some("°C"),
            SensorKind::PowerLimit | SensorKind::MinerConsumption => Some("W"),
            SensorKind::MinerConsumptionKw => Some("kW"),
            SensorKind::Efficiency => Some("J/TH"),
            SensorKind::FanSpeed(_) => Some("RPM"),
            SensorKind::ActivePresetName => None,
        }
    }

    /// Pick this sensor's reading out of `state`.
    pub fn read(&self, state: &DeviceState) -> Option<SensorValue> {
        use SensorValue::Number;

        let board = |slot: u8| state.boards.iter().find(|b| b.slot == slot);

        match *self {
            SensorKind::Hashrate => state.hashrate.map(Number),
            SensorKind::IdealHashrate => state.expected_hashrate.map(Number),
            SensorKind::ActivePresetName => state.active_preset_name.clone().map(SensorValue::Text),
            SensorKind::Temperature => state.temperature_avg.map(|t| Number(f64::from(t))),
            SensorKind::PowerLimit => state.wattage_limit.map(Number),
            SensorKind::MinerConsumption => state.wattage.map(Number),
            SensorKind::MinerConsumptionKw => state.wattage.map(|w| Number(w / 1000.0)),
            SensorKind::Efficiency => state.efficiency.map(Number),
            SensorKind::BoardTemperature(slot) => board(slot)?.board_temp.map(Number),
            SensorKind::ChipTemperature(slot) => board(slot)?.chip_temp.map(Number),
            SensorKind::BoardHashrate(slot) => board(slot)?.hashrate.map(Number),
            SensorKind::FanSpeed(slot) => state
                .fans
                .iter()
                .find(|f| f.slot == slot)?
                .speed_rpm
                .map(|rpm| Number(f64::from(rpm))),
        }
    }
}

pub struct Sensor {
    info: ControlInfo,
    kind: SensorKind,
    coordinator: PollCoordinator,
}

impl Sensor {
    pub(super) fn new(kind: SensorKind, naming: &Naming, coordinator: PollCoordinator) -> Self {
        let info = match kind {
            SensorKind::BoardTemperature(slot)
            | SensorKind::ChipTemperature(slot)
            | SensorKind::BoardHashrate(slot) => naming.board(slot, kind.key(), kind.label()),
            SensorKind::FanSpeed(slot) => naming.fan(slot, kind.key(), kind.label()),
            _ => naming.device(kind.key(), kind.label()),
        };
        Self {
            info,
            kind,
            coordinator,
        }
    }

    pub fn info(&self) -> &ControlInfo {
        &self.info
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn value(&self) -> Option<SensorValue> {
        self.kind.read(&self.coordinator.snapshot().state)
    }
}
