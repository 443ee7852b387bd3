//! Scripted in-memory devices for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    Capabilities, DeviceConnector, DeviceHandle, MiningMode, MiningModeConfig, RawBoard, RawFan,
    RawSnapshot, TelemetryField,
};
use crate::config::Credentials;
use crate::error::{Error, Result};

/// A mutation or fetch seen by a [`FakeDevice`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Fetch,
    SetPowerLimit(u32),
    SetMiningMode(MiningMode),
    Reboot,
    RestartBackend,
    StartMining,
    StopMining,
}

#[derive(Default)]
struct Script {
    capabilities: Capabilities,
    snapshot: RawSnapshot,
    failing_fetches: u32,
    fail_commands: bool,
    refuse_power_limit: bool,
    fetch_delay: Option<Duration>,
    calls: Vec<Call>,
    mode_configs: Vec<Option<MiningModeConfig>>,
}

pub(crate) struct FakeDevice {
    address: String,
    script: Mutex<Script>,
}

impl FakeDevice {
    pub(crate) fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            script: Mutex::new(Script {
                snapshot: sample_snapshot(),
                ..Default::default()
            }),
        })
    }

    pub(crate) fn set_capabilities(&self, capabilities: Capabilities) {
        self.script.lock().capabilities = capabilities;
    }

    pub(crate) fn set_snapshot(&self, snapshot: RawSnapshot) {
        self.script.lock().snapshot = snapshot;
    }

    /// Make the next `count` fetches fail.
    pub(crate) fn fail_fetches(&self, count: u32) {
        self.script.lock().failing_fetches = count;
    }

    pub(crate) fn fail_commands(&self, fail: bool) {
        self.script.lock().fail_commands = fail;
    }

    pub(crate) fn refuse_power_limit(&self, refuse: bool) {
        self.script.lock().refuse_power_limit = refuse;
    }

    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        self.script.lock().fetch_delay = Some(delay);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    /// The configuration handed to each `set_mining_mode` call, in order.
    pub(crate) fn mode_configs(&self) -> Vec<Option<MiningModeConfig>> {
        self.script.lock().mode_configs.clone()
    }

    /// Calls other than fetches.
    pub(crate) fn commands(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| *call != Call::Fetch)
            .collect()
    }

    fn command(&self, call: Call, operation: &'static str) -> Result<()> {
        let mut script = self.script.lock();
        script.calls.push(call);
        if script.fail_commands {
            return Err(Error::Command {
                operation,
                address: self.address.clone(),
                reason: "scripted failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceHandle for FakeDevice {
    fn address(&self) -> &str {
        &self.address
    }

    fn capabilities(&self) -> Capabilities {
        self.script.lock().capabilities
    }

    async fn fetch(&self, _fields: &[TelemetryField]) -> Result<RawSnapshot> {
        let delay = self.script.lock().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock();
        script.calls.push(Call::Fetch);
        if script.failing_fetches > 0 {
            script.failing_fetches -= 1;
            return Err(Error::Fetch {
                address: self.address.clone(),
                reason: "scripted failure".into(),
            });
        }
        Ok(script.snapshot.clone())
    }

    async fn set_power_limit(&self, watts: u32) -> Result<bool> {
        self.command(Call::SetPowerLimit(watts), "set_power_limit")?;
        Ok(!self.script.lock().refuse_power_limit)
    }

    async fn set_mining_mode(
        &self,
        mode: MiningMode,
        config: Option<&MiningModeConfig>,
    ) -> Result<()> {
        self.script.lock().mode_configs.push(config.cloned());
        self.command(Call::SetMiningMode(mode), "set_mining_mode")
    }

    async fn reboot(&self) -> Result<()> {
        self.command(Call::Reboot, "reboot")
    }

    async fn restart_backend(&self) -> Result<()> {
        self.command(Call::RestartBackend, "restart_backend")
    }

    async fn start_mining(&self) -> Result<()> {
        self.command(Call::StartMining, "start_mining")
    }

    async fn stop_mining(&self) -> Result<()> {
        self.command(Call::StopMining, "stop_mining")
    }
}

/// Connector over a set of [`FakeDevice`]s keyed by address.
#[derive(Default)]
pub(crate) struct FakeConnector {
    devices: Mutex<HashMap<String, Arc<FakeDevice>>>,
    unreachable: Mutex<HashSet<String>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add(&self, device: Arc<FakeDevice>) {
        self.devices.lock().insert(device.address.clone(), device);
    }

    pub(crate) fn set_reachable(&self, address: &str, reachable: bool) {
        let mut unreachable = self.unreachable.lock();
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.to_string());
        }
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnector for FakeConnector {
    async fn connect(
        &self,
        address: &str,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceHandle>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let connect_error = |reason: &str| Error::Connect {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        if self.unreachable.lock().contains(address) {
            return Err(connect_error("scripted unreachable"));
        }

        let device = self
            .devices
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| connect_error("no such device"))?;
        Ok(device as Arc<dyn DeviceHandle>)
    }
}

/// A healthy two-board, two-fan miner.
pub(crate) fn sample_snapshot() -> RawSnapshot {
    RawSnapshot {
        hostname: Some("miner-a".into()),
        mac: Some("AA:BB:CC:00:11:22".into()),
        make: Some("Antminer".into()),
        model: Some("S19".into()),
        fw_version: Some("1.2.3".into()),
        is_mining: Some(true),
        hashrate: Some(95.123),
        expected_hashrate: Some(100.0),
        temperature_avg: Some(64.8),
        wattage: Some(3250.0),
        wattage_limit: Some(3300.0),
        efficiency: Some(34.2),
        hashboards: vec![
            RawBoard {
                slot: 0,
                temp: Some(60.0),
                chip_temp: Some(70.0),
                hashrate: Some(47.555),
            },
            RawBoard {
                slot: 1,
                temp: Some(61.0),
                chip_temp: Some(71.0),
                hashrate: Some(47.568),
            },
        ],
        fans: vec![
            RawFan {
                slot: 0,
                speed: Some(4200),
            },
            RawFan {
                slot: 1,
                speed: Some(4320),
            },
        ],
        mining_mode: Some("normal".into()),
        active_preset: None,
        config: None,
        tuner: None,
    }
}
