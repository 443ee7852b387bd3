//! Per-device polling.
//!
//! Each [`PollCoordinator`] owns one device: it connects, polls on a fixed
//! interval, normalizes what it reads, and publishes the result as a
//! single [`CoordinatorSnapshot`] through a watch channel. Coordinators
//! run as independent tasks, so a slow device never delays another.
//!
//! # Failure handling
//!
//! ```text
//!                      connect ok, fetch ok
//!  Uninitialized ──► Connecting ─────────────► Ok ◄──────┐
//!                       ▲    │                  │        │ fetch ok
//!                       │    │ 1st failure      │ 1st    │
//!                       │    └──────────► SoftFail ◄─────┘
//!                       │                   │
//!                       │  next tick        │ 2nd consecutive failure
//!                       └──────────────── Failed
//! ```
//!
//! A single failure publishes an "unreachable" placeholder state. A
//! second consecutive failure publishes [`PollPhase::Failed`], keeps the
//! last state, and drops the cached handle so the next tick reconnects.
//! Transport errors never leave this module any other way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use strum::VariantArray;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{DeviceConfig, PollConfig, PowerLimitRange};
use crate::device::{
    Capabilities, Capability, DeviceConnector, DeviceHandle, MiningMode, RawSnapshot,
    TelemetryField,
};
use crate::error::{Error, Result};
use crate::fleet::DeviceId;
use crate::telemetry::{DeviceIdentity, DeviceState, ExpectedCounts, normalize};
use crate::tracing::prelude::*;
use crate::types::{RefreshDebouncer, RefreshDecision};

/// Where a coordinator is in its poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PollPhase {
    /// No poll has completed yet.
    Uninitialized,
    /// No cached handle; a connect is in progress.
    Connecting,
    /// Last poll succeeded.
    Ok,
    /// Last poll failed once; the state is the unreachable placeholder.
    SoftFail { error: String },
    /// Update failed: two or more consecutive polls failed.
    Failed { error: String },
}

impl PollPhase {
    pub fn name(&self) -> &'static str {
        match self {
            PollPhase::Uninitialized => "uninitialized",
            PollPhase::Connecting => "connecting",
            PollPhase::Ok => "ok",
            PollPhase::SoftFail { .. } => "soft_fail",
            PollPhase::Failed { .. } => "failed",
        }
    }
}

/// Everything a coordinator publishes, swapped as one value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CoordinatorSnapshot {
    pub identity: DeviceIdentity,
    pub state: DeviceState,
    /// `None` until the first successful poll.
    pub capabilities: Option<Capabilities>,
    pub power_limit_range: PowerLimitRange,
    pub phase: PollPhase,
    pub failure_count: u32,
}

impl CoordinatorSnapshot {
    fn initial(config: &DeviceConfig) -> Self {
        Self {
            identity: DeviceIdentity::new(&config.address),
            state: DeviceState::default(),
            capabilities: None,
            power_limit_range: config.power_limit,
            phase: PollPhase::Uninitialized,
            failure_count: 0,
        }
    }

    pub fn update_failed(&self) -> bool {
        matches!(self.phase, PollPhase::Failed { .. })
    }

    fn expected_counts(&self) -> ExpectedCounts {
        self.capabilities
            .as_ref()
            .map(ExpectedCounts::from)
            .unwrap_or_default()
    }
}

/// Owns the polling of one device.
///
/// Cheap to clone; clones share the same task and state.
#[derive(Clone)]
pub struct PollCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: DeviceConfig,
    poll: PollConfig,
    connector: Arc<dyn DeviceConnector>,
    handle: RwLock<Option<Arc<dyn DeviceHandle>>>,
    snapshot_tx: watch::Sender<Arc<CoordinatorSnapshot>>,
    refresh: Notify,
    cancel: CancellationToken,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollCoordinator {
    pub fn new(config: DeviceConfig, poll: PollConfig, connector: Arc<dyn DeviceConnector>) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(CoordinatorSnapshot::initial(&config)));
        Self {
            inner: Arc::new(Inner {
                config,
                poll,
                connector,
                handle: RwLock::new(None),
                snapshot_tx,
                refresh: Notify::new(),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.inner.config.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Run the first poll, then keep polling in the background.
    ///
    /// Returns once the first poll has finished, successful or not. Use
    /// [`ready`](Self::ready) to find out which. Only the first call does
    /// anything; later calls return immediately.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.poll().await;
        if self.inner.cancel.is_cancelled() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.run().await });
        *self.inner.task.lock() = Some(task);
    }

    /// The latest snapshot, provided at least one poll has succeeded.
    pub fn ready(&self) -> Result<Arc<CoordinatorSnapshot>> {
        let snapshot = self.snapshot();
        match snapshot.capabilities {
            Some(_) => Ok(snapshot),
            None => Err(Error::NotReady(self.id().clone())),
        }
    }

    /// Wait until a poll has succeeded at least once.
    pub async fn wait_ready(&self) -> Result<Arc<CoordinatorSnapshot>> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(|s| s.capabilities.is_some())
            .await
            .map_err(|_| Error::Unavailable(self.id().clone()))?;
        Ok(Arc::clone(&snapshot))
    }

    /// Ask for a poll soon. Bursts are collapsed; see [`RefreshDebouncer`].
    pub fn request_refresh(&self) {
        self.inner.refresh.notify_one();
    }

    /// Change notification for every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CoordinatorSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<CoordinatorSnapshot> {
        Arc::clone(&self.inner.snapshot_tx.borrow())
    }

    /// Latest state. Never touches the network.
    pub fn state(&self) -> DeviceState {
        self.snapshot().state.clone()
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.snapshot().capabilities
    }

    /// Borrow the cached device handle for one call.
    pub fn handle(&self) -> Option<Arc<dyn DeviceHandle>> {
        self.inner.handle.read().clone()
    }

    /// Whether a device handle is currently cached.
    pub fn available(&self) -> bool {
        self.inner.handle.read().is_some()
    }

    /// Set the power limit.
    ///
    /// Rejected without a device call when `watts` is outside the
    /// configured range or the device does not support autotuning.
    pub async fn set_power_limit(&self, watts: u32) -> Result<()> {
        self.inner.config.power_limit.check(watts)?;
        let handle = self.lend(Some(Capability::Autotuning))?;

        debug!(device = %self.id(), watts, "Setting power limit");
        if !handle.set_power_limit(watts).await? {
            return Err(Error::Command {
                operation: "set_power_limit",
                address: handle.address().to_string(),
                reason: format!("device refused {watts} W"),
            });
        }

        self.request_refresh();
        Ok(())
    }

    pub async fn set_mining_mode(&self, mode: MiningMode) -> Result<()> {
        let handle = self.lend(Some(Capability::PowerModePresets))?;
        debug!(device = %self.id(), %mode, "Setting mining mode");
        let snapshot = self.snapshot();
        handle
            .set_mining_mode(mode, snapshot.state.mining_mode_config.as_ref())
            .await?;
        self.request_refresh();
        Ok(())
    }

    /// Resume (`true`) or pause (`false`) hashing.
    pub async fn set_mining(&self, on: bool) -> Result<()> {
        let handle = self.lend(Some(Capability::Shutdown))?;
        debug!(device = %self.id(), on, "Switching mining");
        if on {
            handle.start_mining().await?;
        } else {
            handle.stop_mining().await?;
        }
        self.request_refresh();
        Ok(())
    }

    pub async fn reboot(&self) -> Result<()> {
        self.lend(None)?.reboot().await
    }

    pub async fn restart_backend(&self) -> Result<()> {
        self.lend(None)?.restart_backend().await
    }

    /// Borrow the handle for one mutation, checking what the device
    /// currently claims to support.
    fn lend(&self, required: Option<Capability>) -> Result<Arc<dyn DeviceHandle>> {
        let handle = self
            .handle()
            .ok_or_else(|| Error::Unavailable(self.id().clone()))?;

        if let Some(capability) = required {
            if !handle.capabilities().supports(capability) {
                return Err(Error::CapabilityUnsupported {
                    device: self.id().to_string(),
                    capability,
                });
            }
        }
        Ok(handle)
    }

    /// Stop polling and wait for the task to exit.
    ///
    /// A poll in flight is abandoned and publishes nothing.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(device = %self.id(), error = %e, "Poll task ended abnormally");
            }
        }

        self.inner.handle.write().take();
        debug!(device = %self.id(), "Coordinator shut down");
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let period = self.poll.interval();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut debouncer = RefreshDebouncer::new(self.poll.refresh_cooldown());

        loop {
            let deadline = debouncer.deadline();

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    self.poll().await;
                }
                _ = self.refresh.notified() => {
                    if debouncer.request() == RefreshDecision::Run {
                        self.poll().await;
                    }
                }
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if debouncer.expire() == RefreshDecision::Run {
                        self.poll().await;
                    }
                }
            }
        }

        trace!(device = %self.config.id, "Poll loop exited");
    }

    /// One poll cycle, start to publish.
    async fn poll(&self) {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return,
            outcome = self.fetch() => outcome,
        };

        // Teardown may have raced the fetch.
        if self.cancel.is_cancelled() {
            return;
        }

        match outcome {
            Ok((raw, capabilities)) => self.succeeded(&raw, capabilities),
            Err(e) => self.failed(e),
        }
    }

    async fn fetch(&self) -> Result<(RawSnapshot, Capabilities)> {
        let cached = self.handle.read().clone();
        let handle = match cached {
            Some(handle) => handle,
            None => self.connect().await?,
        };

        let raw = handle.fetch(TelemetryField::VARIANTS).await?;
        Ok((raw, handle.capabilities()))
    }

    async fn connect(&self) -> Result<Arc<dyn DeviceHandle>> {
        self.snapshot_tx.send_if_modified(|snapshot| {
            if snapshot.phase == PollPhase::Connecting {
                return false;
            }
            let mut next = CoordinatorSnapshot::clone(snapshot);
            next.phase = PollPhase::Connecting;
            *snapshot = Arc::new(next);
            true
        });

        let handle = self
            .connector
            .connect(&self.config.address, &self.config.credentials)
            .await?;
        {
            // Shutdown cancels before it clears the slot.
            let mut cached = self.handle.write();
            if self.cancel.is_cancelled() {
                return Err(Error::Unavailable(self.config.id.clone()));
            }
            *cached = Some(Arc::clone(&handle));
        }
        info!(device = %self.config.id, address = %self.config.address, "Connected");
        Ok(handle)
    }

    fn succeeded(&self, raw: &RawSnapshot, capabilities: Capabilities) {
        let previous = self.snapshot_tx.borrow().clone();

        let mut identity = previous.identity.clone();
        identity.absorb(raw);

        let state = normalize(raw, ExpectedCounts::from(&capabilities));

        if previous.failure_count > 0 {
            info!(
                device = %self.config.id,
                failures = previous.failure_count,
                "Device recovered"
            );
        }
        debug!(
            device = %self.config.id,
            hashrate = ?state.hashrate,
            wattage = ?state.wattage,
            "Poll succeeded"
        );

        self.publish(CoordinatorSnapshot {
            identity,
            state,
            capabilities: Some(capabilities),
            power_limit_range: self.config.power_limit,
            phase: PollPhase::Ok,
            failure_count: 0,
        });
    }

    fn failed(&self, error: Error) {
        let previous = self.snapshot_tx.borrow().clone();
        let failure_count = previous.failure_count.saturating_add(1);
        let message = error.to_string();

        let next = if failure_count == 1 {
            warn!(device = %self.config.id, error = %message, "Poll failed, reporting device unreachable");
            CoordinatorSnapshot {
                state: DeviceState::unreachable(previous.expected_counts()),
                phase: PollPhase::SoftFail { error: message },
                failure_count,
                ..CoordinatorSnapshot::clone(&previous)
            }
        } else {
            error!(
                device = %self.config.id,
                failures = failure_count,
                error = %message,
                "Update failed"
            );
            self.handle.write().take();
            CoordinatorSnapshot {
                phase: PollPhase::Failed { error: message },
                failure_count,
                ..CoordinatorSnapshot::clone(&previous)
            }
        };

        self.publish(next);
    }

    fn publish(&self, snapshot: CoordinatorSnapshot) {
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }
}
