//! Crate-wide error type.
//!
//! Transport problems (`Connect`, `Fetch`) never escape a
//! [`PollCoordinator`](crate::coordinator::PollCoordinator); it converts
//! them into a soft-fail snapshot or a failed-update status. The remaining
//! variants are returned directly to whoever issued a mutation.

use crate::device::Capability;
use crate::fleet::DeviceId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device unreachable or its address could not be resolved.
    #[error("cannot connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Connected, but the telemetry call failed or returned garbage.
    #[error("telemetry fetch from {address} failed: {reason}")]
    Fetch { address: String, reason: String },

    /// Mutation attempted against a device lacking the capability. Never
    /// sent to the device.
    #[error("{device} does not support {capability}")]
    CapabilityUnsupported {
        device: String,
        capability: Capability,
    },

    #[error("power limit {requested} W is outside the configured range {min}..={max} W")]
    Range { requested: u32, min: u32, max: u32 },

    #[error("unknown device {0}")]
    Resolution(DeviceId),

    /// The device accepted the request but reported failure.
    #[error("{operation} failed on {address}: {reason}")]
    Command {
        operation: &'static str,
        address: String,
        reason: String,
    },

    /// First refresh finished without a successful snapshot.
    #[error("{0} has not produced a successful snapshot yet")]
    NotReady(DeviceId),

    /// No cached device handle to execute against.
    #[error("{0} is not connected")]
    Unavailable(DeviceId),

    #[error("invalid option {option:?}, expected one of {allowed:?}")]
    InvalidOption {
        option: String,
        allowed: &'static [&'static str],
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}
