//! Declarative device actions for automations.
//!
//! An action call names a type, one or more target devices, and any
//! type-specific fields:
//!
//! ```json
//! { "type": "set_work_mode", "device_id": ["rack1", "rack2"], "mode": "normal" }
//! ```
//!
//! `device_id` may also be a single string.

use serde::{Deserialize, Deserializer, Serialize};

use super::{DeviceId, FleetDispatcher, FleetReport};
use crate::device::MiningMode;
use crate::error::Result;

pub const ACTION_TYPES: &[&str] = &["reboot", "restart_backend", "set_work_mode"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceAction {
    Reboot,
    RestartBackend,
    /// `mode` is free-form; unrecognized values use
    /// [`MiningMode::FALLBACK`].
    SetWorkMode { mode: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionCall {
    #[serde(rename = "device_id", deserialize_with = "one_or_many")]
    pub device_ids: Vec<DeviceId>,
    #[serde(flatten)]
    pub action: DeviceAction,
}

/// An action available on one device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionDescriptor {
    pub device_id: DeviceId,
    #[serde(rename = "type")]
    pub kind: String,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<DeviceId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(DeviceId),
        Many(Vec<DeviceId>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

/// Actions offered for `device`.
pub fn list_actions(dispatcher: &FleetDispatcher, device: &DeviceId) -> Result<Vec<ActionDescriptor>> {
    dispatcher.registry().resolve(device)?;
    Ok(ACTION_TYPES
        .iter()
        .map(|kind| ActionDescriptor {
            device_id: device.clone(),
            kind: kind.to_string(),
        })
        .collect())
}

pub async fn call_action(dispatcher: &FleetDispatcher, call: &ActionCall) -> FleetReport {
    match &call.action {
        DeviceAction::Reboot => dispatcher.reboot(&call.device_ids).await,
        DeviceAction::RestartBackend => dispatcher.restart_backend(&call.device_ids).await,
        DeviceAction::SetWorkMode { mode } => {
            let mode = MiningMode::from_str_or_fallback(mode);
            dispatcher.set_mining_mode(&call.device_ids, mode).await
        }
    }
}
