//! Controls exposed for a device.
//!
//! The [`Registrar`] decides once, from the first successful poll, which
//! controls a device gets. The set is fixed for the lifetime of the
//! coordinator: a capability that later reads as false leaves its control
//! in place, and its mutations are then rejected by the capability check
//! at call time.
//!
//! | Control                | Exists when                                      |
//! |------------------------|--------------------------------------------------|
//! | sensors                | always                                           |
//! | [`PowerLimitControl`]  | `supports_autotuning`                            |
//! | [`MiningSwitch`]       | `supports_shutdown`                              |
//! | [`MiningModeSelect`]   | `supports_power_mode_presets` and not autotuning |

mod number;
mod select;
mod sensor;
mod switch;

pub use number::{POWER_LIMIT_STEP_W, PowerLimitControl};
pub use select::{MINING_MODE_OPTIONS, MiningModeSelect};
pub use sensor::{Sensor, SensorKind, SensorValue};
pub use switch::MiningSwitch;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::coordinator::{CoordinatorSnapshot, PollCoordinator};
use crate::error::{Error, Result};
use crate::fleet::DeviceId;
use crate::tracing::prelude::*;

/// Stable identity of one control.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControlInfo {
    /// `<mac>-<key>` or `<mac>-<slot>-<key>`.
    pub unique_id: String,
    /// Human-readable name, prefixed with the device title.
    pub name: String,
}

/// Builds [`ControlInfo`] for one device.
pub(crate) struct Naming {
    title: String,
    prefix: String,
}

impl Naming {
    /// Ids are rooted at the MAC address, or at the device id while the
    /// MAC is unknown.
    fn new(title: &str, mac: Option<&str>, id: &DeviceId) -> Self {
        Self {
            title: title.to_string(),
            prefix: mac.unwrap_or(id.as_str()).to_string(),
        }
    }

    fn device(&self, key: &str, label: &str) -> ControlInfo {
        ControlInfo {
            unique_id: format!("{}-{key}", self.prefix),
            name: format!("{} {label}", self.title),
        }
    }

    fn board(&self, slot: u8, key: &str, label: &str) -> ControlInfo {
        ControlInfo {
            unique_id: format!("{}-{slot}-{key}", self.prefix),
            name: format!("{} Board #{slot} {label}", self.title),
        }
    }

    fn fan(&self, slot: u8, key: &str, label: &str) -> ControlInfo {
        ControlInfo {
            unique_id: format!("{}-{slot}-{key}", self.prefix),
            name: format!("{} Fan #{slot} {label}", self.title),
        }
    }
}

/// A value set by a control, valid until the coordinator publishes a
/// newer snapshot than the one seen when it was written.
struct Optimistic<T> {
    inner: Mutex<Option<(T, Arc<CoordinatorSnapshot>)>>,
}

impl<T> Default for Optimistic<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

impl<T: Copy> Optimistic<T> {
    fn record(&self, value: T, seen: Arc<CoordinatorSnapshot>) {
        *self.inner.lock() = Some((value, seen));
    }

    /// The recorded value, if no poll has been published since.
    fn current(&self, snapshot: &Arc<CoordinatorSnapshot>) -> Option<T> {
        match &*self.inner.lock() {
            Some((value, seen)) if Arc::ptr_eq(seen, snapshot) => Some(*value),
            _ => None,
        }
    }

    fn last(&self) -> Option<T> {
        self.inner.lock().as_ref().map(|(value, _)| *value)
    }
}

pub enum Control {
    Sensor(Sensor),
    PowerLimit(PowerLimitControl),
    MiningMode(MiningModeSelect),
    MiningSwitch(MiningSwitch),
}

impl Control {
    pub fn info(&self) -> &ControlInfo {
        match self {
            Control::Sensor(c) => c.info(),
            Control::PowerLimit(c) => c.info(),
            Control::MiningMode(c) => c.info(),
            Control::MiningSwitch(c) => c.info(),
        }
    }

    fn detail(&self) -> ControlDetail {
        match self {
            Control::Sensor(c) => ControlDetail::Sensor {
                value: c.value(),
                unit: c.kind().unit().map(str::to_string),
            },
            Control::PowerLimit(c) => ControlDetail::Number {
                value: c.value(),
                min: c.min(),
                max: c.max(),
                step: c.step(),
                unit: c.unit().to_string(),
            },
            Control::MiningMode(c) => ControlDetail::Select {
                current: c.current_option(),
                options: c.options().iter().map(|o| o.to_string()).collect(),
            },
            Control::MiningSwitch(c) => ControlDetail::Switch { is_on: c.is_on() },
        }
    }
}

/// Point-in-time rendering of a control.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ControlView {
    #[serde(flatten)]
    pub info: ControlInfo,
    pub available: bool,
    #[serde(flatten)]
    pub detail: ControlDetail,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlDetail {
    Sensor {
        value: Option<SensorValue>,
        unit: Option<String>,
    },
    Number {
        value: Option<f64>,
        min: u32,
        max: u32,
        step: u32,
        unit: String,
    },
    Select {
        current: Option<String>,
        options: Vec<String>,
    },
    Switch {
        is_on: Option<bool>,
    },
}

/// The controls created for one device.
pub struct ControlSet {
    coordinator: PollCoordinator,
    controls: Vec<Control>,
}

impl ControlSet {
    pub fn device(&self) -> &DeviceId {
        self.coordinator.id()
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.controls.iter().filter_map(|c| match c {
            Control::Sensor(s) => Some(s),
            _ => None,
        })
    }

    pub fn power_limit(&self) -> Option<&PowerLimitControl> {
        self.controls.iter().find_map(|c| match c {
            Control::PowerLimit(p) => Some(p),
            _ => None,
        })
    }

    pub fn mining_mode(&self) -> Option<&MiningModeSelect> {
        self.controls.iter().find_map(|c| match c {
            Control::MiningMode(m) => Some(m),
            _ => None,
        })
    }

    pub fn mining_switch(&self) -> Option<&MiningSwitch> {
        self.controls.iter().find_map(|c| match c {
            Control::MiningSwitch(s) => Some(s),
            _ => None,
        })
    }

    /// Render every control against the latest snapshot.
    pub fn views(&self) -> Vec<ControlView> {
        let available = self.coordinator.available();
        self.controls
            .iter()
            .map(|control| ControlView {
                info: control.info().clone(),
                available,
                detail: control.detail(),
            })
            .collect()
    }
}

pub struct Registrar;

impl Registrar {
    /// Create the controls for a coordinator that has completed a
    /// successful poll.
    pub fn register(coordinator: &PollCoordinator) -> Result<ControlSet> {
        let snapshot = coordinator.ready()?;
        let capabilities = snapshot
            .capabilities
            .ok_or_else(|| Error::NotReady(coordinator.id().clone()))?;

        let naming = Naming::new(
            coordinator.config().title(),
            snapshot.identity.mac_address.as_deref(),
            coordinator.id(),
        );

        let mut controls: Vec<Control> = SensorKind::DEVICE
            .iter()
            .map(|kind| Control::Sensor(Sensor::new(*kind, &naming, coordinator.clone())))
            .collect();

        for slot in 0..capabilities.expected_hashboard_count {
            controls.extend(
                SensorKind::board(slot)
                    .into_iter()
                    .map(|kind| Control::Sensor(Sensor::new(kind, &naming, coordinator.clone()))),
            );
        }

        for slot in 0..capabilities.expected_fan_count {
            controls.push(Control::Sensor(Sensor::new(
                SensorKind::FanSpeed(slot),
                &naming,
                coordinator.clone(),
            )));
        }

        if capabilities.supports_autotuning {
            controls.push(Control::PowerLimit(PowerLimitControl::new(
                &naming,
                coordinator.clone(),
            )));
        }

        if capabilities.supports_shutdown {
            controls.push(Control::MiningSwitch(MiningSwitch::new(
                &naming,
                coordinator.clone(),
            )));
        }

        if capabilities.supports_power_mode_presets && !capabilities.supports_autotuning {
            controls.push(Control::MiningMode(MiningModeSelect::new(
                &naming,
                coordinator.clone(),
            )));
        }

        info!(
            device = %coordinator.id(),
            controls = controls.len(),
            autotuning = capabilities.supports_autotuning,
            shutdown = capabilities.supports_shutdown,
            presets = capabilities.supports_power_mode_presets,
            "Controls created"
        );

        Ok(ControlSet {
            coordinator: coordinator.clone(),
            controls,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{DeviceConfig, PollConfig, PowerLimitRange};
    use crate::device::fake::{Call, FakeConnector, FakeDevice};
    use crate::device::{Capabilities, DeviceConnector, MiningMode, RawSnapshot};

    const ADDRESS: &str = "10.0.0.9";

    async fn started(capabilities: Capabilities) -> (PollCoordinator, Arc<FakeDevice>) {
        let device = FakeDevice::new(ADDRESS);
        device.set_capabilities(capabilities);
        let connector = FakeConnector::new();
        connector.add(Arc::clone(&device));

        let mut config = DeviceConfig::new("rack1", ADDRESS);
        config.title = Some("Garage S19".into());
        config.power_limit = PowerLimitRange::new(1000, 4000);

        let coordinator = PollCoordinator::new(
            config,
            PollConfig::default(),
            connector as Arc<dyn DeviceConnector>,
        );
        coordinator.start().await;
        (coordinator, device)
    }

    fn caps(autotuning: bool, presets: bool, shutdown: bool) -> Capabilities {
        Capabilities {
            supports_autotuning: autotuning,
            supports_power_mode_presets: presets,
            supports_shutdown: shutdown,
            expected_hashboard_count: 3,
            expected_fan_count: 2,
        }
    }

    /// Registers a device with the given capabilities and returns which
    /// optional controls it got: (power limit, switch, mode select).
    async fn optional_controls(capabilities: Capabilities) -> (bool, bool, bool) {
        let (coordinator, _device) = started(capabilities).await;
        let set = Registrar::register(&coordinator).unwrap();
        let present = (
            set.power_limit().is_some(),
            set.mining_switch().is_some(),
            set.mining_mode().is_some(),
        );
        coordinator.shutdown().await;
        present
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_without_autotuning_gets_switch_only() {
        assert_eq!(optional_controls(caps(false, false, true)).await, (false, true, false));
    }

    #[tokio::test(start_paused = true)]
    async fn autotuning_gets_power_limit() {
        assert_eq!(optional_controls(caps(true, false, false)).await, (true, false, false));
    }

    #[tokio::test(start_paused = true)]
    async fn presets_get_mode_select() {
        assert_eq!(optional_controls(caps(false, true, false)).await, (false, false, true));
    }

    #[tokio::test(start_paused = true)]
    async fn autotuning_suppresses_mode_select() {
        assert_eq!(optional_controls(caps(true, true, true)).await, (true, true, false));
    }

    #[tokio::test(start_paused = true)]
    async fn should_create_per_slot_sensors() {
        let (coordinator, _device) = started(caps(false, false, false)).await;

        let set = Registrar::register(&coordinator).unwrap();

        // 8 device sensors, 3 per board, 1 per fan
        assert_eq!(set.sensors().count(), 8 + 3 * 3 + 2);
        let board = set
            .sensors()
            .find(|s| s.kind() == SensorKind::BoardHashrate(1))
            .unwrap();
        assert_eq!(board.info().unique_id, "AA:BB:CC:00:11:22-1-board_hashrate");
        assert_eq!(board.info().name, "Garage S19 Board #1 Board Hashrate");
        assert_eq!(board.value(), Some(SensorValue::Number(47.57)));

        let fan = set
            .sensors()
            .find(|s| s.kind() == SensorKind::FanSpeed(0))
            .unwrap();
        assert_eq!(fan.info().name, "Garage S19 Fan #0 Fan Speed");

        let kw = set
            .sensors()
            .find(|s| s.kind() == SensorKind::MinerConsumptionKw)
            .unwrap();
        assert_eq!(kw.info().unique_id, "AA:BB:CC:00:11:22-miner_consumption_kw");
        assert_eq!(kw.value(), Some(SensorValue::Number(3.25)));

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn registration_requires_successful_poll() {
        let device = FakeDevice::new(ADDRESS);
        device.fail_fetches(1);
        let connector = FakeConnector::new();
        connector.add(device);
        let coordinator = PollCoordinator::new(
            DeviceConfig::new("rack1", ADDRESS),
            PollConfig::default(),
            connector as Arc<dyn DeviceConnector>,
        );
        coordinator.start().await;

        assert!(matches!(
            Registrar::register(&coordinator),
            Err(Error::NotReady(_))
        ));

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn controls_survive_capability_loss() {
        let (coordinator, device) = started(caps(true, false, true)).await;
        let set = Registrar::register(&coordinator).unwrap();

        device.set_capabilities(caps(false, false, false));
        coordinator.request_refresh();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(set.power_limit().is_some());
        assert!(set.mining_switch().is_some());
        assert!(matches!(
            set.power_limit().unwrap().set(2000).await,
            Err(Error::CapabilityUnsupported { .. })
        ));
        assert!(device.commands().is_empty());

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn power_limit_keeps_written_value_until_next_poll() {
        let (coordinator, device) = started(caps(true, false, false)).await;
        let set = Registrar::register(&coordinator).unwrap();
        let control = set.power_limit().unwrap();

        assert_eq!(control.min(), 1000);
        assert_eq!(control.max(), 4000);
        assert_eq!(control.step(), 100);
        assert_eq!(control.value(), Some(3300.0));

        control.set(2500).await.unwrap();
        assert_eq!(control.value(), Some(2500.0));
        assert_eq!(device.commands(), vec![Call::SetPowerLimit(2500)]);

        device.set_snapshot(RawSnapshot {
            wattage_limit: Some(2600.0),
            ..Default::default()
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(control.value(), Some(2600.0));

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn power_limit_keeps_written_value_while_unreported() {
        let (coordinator, device) = started(caps(true, false, false)).await;
        let set = Registrar::register(&coordinator).unwrap();
        let control = set.power_limit().unwrap();

        device.set_snapshot(RawSnapshot::default());
        control.set(2500).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(coordinator.state().wattage_limit, None);
        assert_eq!(control.value(), Some(2500.0));

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn power_limit_out_of_range_is_rejected() {
        let (coordinator, device) = started(caps(true, false, false)).await;
        let set = Registrar::register(&coordinator).unwrap();

        let result = set.power_limit().unwrap().set(5000).await;

        assert!(matches!(result, Err(Error::Range { .. })));
        assert!(device.commands().is_empty());

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mode_select_reports_and_sets_mode() {
        let (coordinator, device) = started(caps(false, true, false)).await;
        let set = Registrar::register(&coordinator).unwrap();
        let select = set.mining_mode().unwrap();

        assert_eq!(select.options(), MINING_MODE_OPTIONS);
        assert_eq!(select.current_option().as_deref(), Some("Normal"));

        select.select("Low").await.unwrap();
        assert_eq!(device.commands(), vec![Call::SetMiningMode(MiningMode::Low)]);

        assert!(matches!(
            select.select("Turbo").await,
            Err(Error::InvalidOption { .. })
        ));

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn switch_pauses_and_resumes() {
        let (coordinator, device) = started(caps(false, false, true)).await;
        let set = Registrar::register(&coordinator).unwrap();
        let switch = set.mining_switch().unwrap();

        assert_eq!(switch.is_on(), Some(true));

        switch.turn_off().await.unwrap();
        assert_eq!(switch.is_on(), Some(false));
        switch.turn_on().await.unwrap();

        assert_eq!(device.commands(), vec![Call::StopMining, Call::StartMining]);

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn views_render_every_control() {
        let (coordinator, _device) = started(caps(true, false, true)).await;
        let set = Registrar::register(&coordinator).unwrap();

        let views = set.views();

        assert_eq!(views.len(), set.controls().len());
        assert!(views.iter().all(|v| v.available));
        let number = views
            .iter()
            .find(|v| matches!(v.detail, ControlDetail::Number { .. }))
            .unwrap();
        assert_eq!(number.detail, ControlDetail::Number {
            value: Some(3300.0),
            min: 1000,
            max: 4000,
            step: 100,
            unit: "W".into(),
        });

        coordinator.shutdown().await;
    }

    #[test]
    fn naming_falls_back_to_device_id() {
        let naming = Naming::new("Rack", None, &DeviceId::from("rack1"));
        let info = naming.device("hashrate", "Hashrate");
        assert_eq!(info.unique_id, "rack1-hashrate");
        assert_eq!(info.name, "Rack Hashrate");
    }
}
