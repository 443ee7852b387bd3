//! Fleet configuration.
//!
//! The configuration is produced elsewhere (a UI, a provisioning script,
//! a hand-written file); this module only describes its shape, fills in
//! defaults, and rejects values the rest of the crate cannot work with.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fleet::DeviceId;

/// Lowest power limit any device may be configured for (W).
pub const POWER_LIMIT_FLOOR_W: u32 = 100;

/// Highest power limit any device may be configured for (W).
pub const POWER_LIMIT_CEILING_W: u32 = 10_000;

/// Default HTTP bind address for the daemon.
pub const DEFAULT_API_BIND: &str = "127.0.0.1:7785";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetConfig {
    #[serde(default = "default_api_bind")]
    pub api_bind: String,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_api_bind() -> String {
    DEFAULT_API_BIND.to_string()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            api_bind: default_api_bind(),
            poll: PollConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl FleetConfig {
    /// Read and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: FleetConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !seen.insert(&device.id) {
                return Err(Error::Config(format!("duplicate device id {}", device.id)));
            }
        }

        Ok(())
    }
}

/// Per-device polling cadence.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PollConfig {
    /// Seconds between scheduled polls.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Minimum quiet period between two polls triggered by refresh
    /// requests.
    #[serde(default = "default_refresh_cooldown_secs")]
    pub refresh_cooldown_secs: u64,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_refresh_cooldown_secs() -> u64 {
    5
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            refresh_cooldown_secs: default_refresh_cooldown_secs(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.refresh_cooldown_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config("poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub id: DeviceId,

    /// Display name. Falls back to the device id.
    #[serde(default)]
    pub title: Option<String>,

    /// Host name or IP address of the device.
    pub address: String,

    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub power_limit: PowerLimitRange,
}

impl DeviceConfig {
    pub fn new(id: impl Into<DeviceId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            address: address.into(),
            credentials: Credentials::default(),
            power_limit: PowerLimitRange::default(),
        }
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(self.id.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(Error::Config("device id must not be empty".into()));
        }
        if self.address.trim().is_empty() {
            return Err(Error::Config(format!("{}: address must not be empty", self.id)));
        }
        self.power_limit
            .validate()
            .map_err(|reason| Error::Config(format!("{}: {reason}", self.id)))
    }
}

/// Inclusive power-limit bounds for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PowerLimitRange {
    #[serde(default = "default_min_power")]
    pub min: u32,
    #[serde(default = "default_max_power")]
    pub max: u32,
}

fn default_min_power() -> u32 {
    POWER_LIMIT_FLOOR_W
}

fn default_max_power() -> u32 {
    POWER_LIMIT_CEILING_W
}

impl Default for PowerLimitRange {
    fn default() -> Self {
        Self {
            min: POWER_LIMIT_FLOOR_W,
            max: POWER_LIMIT_CEILING_W,
        }
    }
}

impl PowerLimitRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, watts: u32) -> bool {
        (self.min..=self.max).contains(&watts)
    }

    /// Reject `watts` with [`Error::Range`] unless it falls inside the
    /// bounds.
    pub fn check(&self, watts: u32) -> Result<()> {
        if self.contains(watts) {
            Ok(())
        } else {
            Err(Error::Range {
                requested: watts,
                min: self.min,
                max: self.max,
            })
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let allowed = POWER_LIMIT_FLOOR_W..=POWER_LIMIT_CEILING_W;
        if !allowed.contains(&self.min) || !allowed.contains(&self.max) {
            return Err(format!(
                "power limit bounds must lie within {POWER_LIMIT_FLOOR_W}..={POWER_LIMIT_CEILING_W} W"
            ));
        }
        if self.min > self.max {
            return Err(format!(
                "power limit min {} W exceeds max {} W",
                self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Credentials for every transport a device might be reached through.
///
/// Each sub-record is optional; a connector uses the ones its transport
/// needs and ignores the rest.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc: Option<RpcCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<LoginCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<LoginCredentials>,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct RpcCredentials {
    #[serde(default)]
    pub password: String,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct LoginCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("rpc", &self.rpc.as_ref().map(|_| "<redacted>"))
            .field("web", &self.web.as_ref().map(|w| &w.username))
            .field("ssh", &self.ssh.as_ref().map(|s| &s.username))
            .finish()
    }
}

impl fmt::Debug for RpcCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcCredentials")
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn should_fill_defaults_for_minimal_device() {
        let config: FleetConfig = serde_json::from_str(
            r#"{ "devices": [ { "id": "rack1", "address": "10.0.0.5" } ] }"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.api_bind, DEFAULT_API_BIND);
        assert_eq!(config.poll.interval(), Duration::from_secs(10));
        assert_eq!(config.poll.refresh_cooldown(), Duration::from_secs(5));

        let device = &config.devices[0];
        assert_eq!(device.title(), "rack1");
        assert_eq!(device.power_limit, PowerLimitRange::new(100, 10_000));
        assert!(device.credentials.web.is_none());
    }

    #[test]
    fn should_parse_per_transport_credentials() {
        let device: DeviceConfig = serde_json::from_str(
            r#"{
                "id": "a",
                "address": "10.0.0.6",
                "credentials": {
                    "rpc": { "password": "admin" },
                    "web": { "username": "root", "password": "root" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(device.credentials.rpc.unwrap().password, "admin");
        assert_eq!(device.credentials.web.unwrap().username, "root");
        assert!(device.credentials.ssh.is_none());
    }

    #[test]
    fn should_redact_secrets_in_debug_output() {
        let credentials = Credentials {
            rpc: Some(RpcCredentials {
                password: "hunter2".into(),
            }),
            web: Some(LoginCredentials {
                username: "root".into(),
                password: "hunter3".into(),
            }),
            ssh: None,
        };

        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("hunter3"));
        assert!(rendered.contains("root"));
    }

    #[test]
    fn should_reject_duplicate_device_ids() {
        let config = FleetConfig {
            devices: vec![DeviceConfig::new("a", "h1"), DeviceConfig::new("a", "h2")],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test_case(100, 10_000, true; "full range")]
    #[test_case(3000, 3000, true; "single value")]
    #[test_case(50, 5000, false; "min below floor")]
    #[test_case(100, 12_000, false; "max above ceiling")]
    #[test_case(5000, 4000, false; "inverted")]
    fn power_limit_bounds_validation(min: u32, max: u32, valid: bool) {
        assert_eq!(PowerLimitRange::new(min, max).validate().is_ok(), valid);
    }

    #[test]
    fn should_reject_out_of_range_watts() {
        let range = PowerLimitRange::new(100, 5000);
        assert!(range.check(100).is_ok());
        assert!(range.check(5000).is_ok());
        assert!(matches!(
            range.check(50),
            Err(Error::Range {
                requested: 50,
                min: 100,
                max: 5000
            })
        ));
    }
}
