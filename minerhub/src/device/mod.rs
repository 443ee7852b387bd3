//! Boundary to the component that actually talks to mining hardware.
//!
//! Everything vendor-specific (RPC dialects, web APIs, SSH) lives behind
//! [`DeviceConnector`] and [`DeviceHandle`]. The rest of the crate sees only
//! the types in this module: a [`RawSnapshot`] of whatever the device
//! reported, the [`Capabilities`] it advertises, and a fixed set of
//! mutations.

#[cfg(test)]
pub(crate) mod fake;
pub mod gateway;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr, VariantArray};

use crate::config::Credentials;
use crate::error::Result;
use crate::tracing::prelude::*;

/// Opens connections to devices.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Resolve `address` to a live device.
    ///
    /// Credentials are handed over once, here; the returned handle keeps
    /// whatever it needs for later calls.
    async fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceHandle>>;
}

/// A connected device.
///
/// Handles are cached by the coordinator that created them and lent out
/// for the duration of single calls; implementations must tolerate
/// concurrent use.
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Address the handle was connected with.
    fn address(&self) -> &str;

    /// What this device currently claims to support.
    fn capabilities(&self) -> Capabilities;

    /// Read the requested telemetry fields.
    async fn fetch(&self, fields: &[TelemetryField]) -> Result<RawSnapshot>;

    /// Returns `false` when the device refused the new limit.
    async fn set_power_limit(&self, watts: u32) -> Result<bool>;

    /// Switch to `mode`. `config` is the device's current mining
    /// configuration as last polled; implementations send it back with
    /// only the mode replaced.
    async fn set_mining_mode(
        &self,
        mode: MiningMode,
        config: Option<&MiningModeConfig>,
    ) -> Result<()>;

    async fn reboot(&self) -> Result<()>;

    async fn restart_backend(&self) -> Result<()>;

    async fn start_mining(&self) -> Result<()>;

    async fn stop_mining(&self) -> Result<()>;
}

/// Capability flags and expected hardware counts for one device instance.
///
/// Recomputed after every successful poll. A different device may answer
/// on the same address tomorrow, so nothing here is assumed stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Capabilities {
    pub supports_autotuning: bool,
    pub supports_power_mode_presets: bool,
    pub supports_shutdown: bool,
    pub expected_hashboard_count: u8,
    pub expected_fan_count: u8,
}

impl Capabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Autotuning => self.supports_autotuning,
            Capability::PowerModePresets => self.supports_power_mode_presets,
            Capability::Shutdown => self.supports_shutdown,
        }
    }
}

/// The optional features a control or command can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Capability {
    #[strum(to_string = "autotuning")]
    Autotuning,
    #[strum(to_string = "power mode presets")]
    PowerModePresets,
    #[strum(to_string = "shutdown")]
    Shutdown,
}

/// Fixed power presets.
///
/// String forms are the lowercase names (`"high"`, `"normal"`, `"low"`),
/// matched case-insensitively.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    VariantArray,
    Deserialize,
    Serialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MiningMode {
    /// High-power preset.
    High,
    /// Balanced preset.
    Normal,
    /// Low-power preset.
    Low,
}

impl MiningMode {
    /// Preset used when a free-form mode string is not recognized.
    pub const FALLBACK: MiningMode = MiningMode::High;

    /// Map a free-form mode string to a preset, falling back to
    /// [`MiningMode::FALLBACK`] on anything unrecognized.
    ///
    /// The fallback selects the highest-power preset, so every use is
    /// logged. Prefer `str::parse` wherever the caller can report an
    /// error instead.
    pub fn from_str_or_fallback(mode: &str) -> MiningMode {
        mode.parse().unwrap_or_else(|_| {
            warn!(
                requested = mode,
                fallback = %MiningMode::FALLBACK,
                "Unrecognized mining mode, using fallback preset"
            );
            MiningMode::FALLBACK
        })
    }
}

/// Telemetry the coordinator asks for on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, VariantArray)]
#[strum(serialize_all = "snake_case")]
pub enum TelemetryField {
    Hostname,
    Mac,
    IsMining,
    FwVersion,
    Hashrate,
    ExpectedHashrate,
    Hashboards,
    Wattage,
    WattageLimit,
    Fans,
    Config,
}

/// Telemetry exactly as the device reported it.
///
/// `None` means the device did not report the value this time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RawSnapshot {
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub fw_version: Option<String>,
    pub is_mining: Option<bool>,
    /// TH/s
    pub hashrate: Option<f64>,
    /// TH/s
    pub expected_hashrate: Option<f64>,
    /// °C
    pub temperature_avg: Option<f64>,
    /// W
    pub wattage: Option<f64>,
    /// W
    pub wattage_limit: Option<f64>,
    /// J/TH
    pub efficiency: Option<f64>,
    pub hashboards: Vec<RawBoard>,
    pub fans: Vec<RawFan>,
    /// Current mining mode name, e.g. `"normal"`.
    pub mining_mode: Option<String>,
    pub active_preset: Option<String>,
    pub config: Option<MiningModeConfig>,
    pub tuner: Option<TunerPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawBoard {
    pub slot: u8,
    #[serde(default)]
    pub temp: Option<f64>,
    #[serde(default)]
    pub chip_temp: Option<f64>,
    #[serde(default)]
    pub hashrate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawFan {
    pub slot: u8,
    #[serde(default)]
    pub speed: Option<u32>,
}

/// Device mining configuration, carried through to mutation calls
/// without interpretation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MiningModeConfig(pub serde_json::Value);

/// Sentinel in [`PowerScaling::Pinned`] meaning the scaled limit equals the
/// configured power limit.
pub const INITIAL_POWER_LIMIT: &str = "InitialPowerLimit";

/// Auto-tuner status block.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TunerPayload {
    #[serde(rename = "DynamicPowerScaling", default)]
    pub dynamic_power_scaling: Option<PowerScaling>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PowerScaling {
    Scaled {
        #[serde(rename = "ScaledPowerLimit")]
        scaled_power_limit: f64,
    },
    /// A bare string such as [`INITIAL_POWER_LIMIT`].
    Pinned(String),
    /// Any shape this crate does not understand. Reads as unknown rather
    /// than failing the whole snapshot.
    Other(serde_json::Value),
}
