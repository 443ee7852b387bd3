//! Connector for devices fronted by a JSON gateway.
//!
//! The gateway is expected to translate the vendor protocol into the
//! shapes defined in [`crate::device`] and serve them over HTTP:
//!
//! | Method | Path                        | Body / response              |
//! |--------|-----------------------------|------------------------------|
//! | GET    | `/api/v0/device`            | `{capabilities}`             |
//! | GET    | `/api/v0/telemetry?fields=` | `{snapshot, capabilities}`   |
//! | POST   | `/api/v0/power-limit`       | `{watts}` / `{accepted}`     |
//! | POST   | `/api/v0/mining-mode`       | `{mode}`                     |
//! | POST   | `/api/v0/reboot`            |                              |
//! | POST   | `/api/v0/restart-backend`   |                              |
//! | POST   | `/api/v0/mining/start`      |                              |
//! | POST   | `/api/v0/mining/stop`       |                              |
//!
//! Requests carry the `web` credentials as HTTP basic auth when present.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{
    Capabilities, DeviceConnector, DeviceHandle, MiningMode, MiningModeConfig, RawSnapshot,
    TelemetryField,
};
use crate::config::{Credentials, LoginCredentials};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize, Serialize)]
struct DeviceDescription {
    capabilities: Capabilities,
}

#[derive(Debug, Deserialize, Serialize)]
struct TelemetryResponse {
    snapshot: RawSnapshot,
    capabilities: Capabilities,
}

#[derive(Debug, Deserialize, Serialize)]
struct PowerLimitBody {
    watts: u32,
}

#[derive(Debug, Deserialize, Serialize)]
struct PowerLimitReply {
    accepted: bool,
}

#[derive(Debug, Serialize)]
struct MiningModeBody<'a> {
    mode: MiningMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a MiningModeConfig>,
}

pub struct GatewayConnector {
    client: reqwest::Client,
}

impl GatewayConnector {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

/// Accept both bare hosts (`10.0.0.5`, `miner.lan:8080`) and full URLs.
fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

#[async_trait]
impl DeviceConnector for GatewayConnector {
    async fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn DeviceHandle>> {
        let handle = GatewayHandle {
            address: address.to_string(),
            base: base_url(address),
            client: self.client.clone(),
            auth: credentials.web.clone(),
            capabilities: RwLock::new(Capabilities::default()),
        };

        if credentials.rpc.is_some() || credentials.ssh.is_some() {
            debug!(address, "Gateway ignores rpc and ssh credentials");
        }

        let description: DeviceDescription = handle
            .get("/api/v0/device")
            .await
            .map_err(|e| Error::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        *handle.capabilities.write() = description.capabilities;

        Ok(Arc::new(handle) as Arc<dyn DeviceHandle>)
    }
}

struct GatewayHandle {
    address: String,
    base: String,
    client: reqwest::Client,
    auth: Option<LoginCredentials>,
    capabilities: RwLock<Capabilities>,
}

impl GatewayHandle {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        match &self.auth {
            Some(auth) => builder.basic_auth(&auth.username, Some(&auth.password)),
            None => builder,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post(&self, path: &str, body: Option<&impl Serialize>) -> Result<reqwest::Response> {
        let mut builder = self.request(reqwest::Method::POST, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?.error_for_status()?)
    }

    async fn command(&self, operation: &'static str, path: &str) -> Result<()> {
        self.post(path, None::<&()>)
            .await
            .map(drop)
            .map_err(|e| self.command_error(operation, e))
    }

    fn command_error(&self, operation: &'static str, err: Error) -> Error {
        Error::Command {
            operation,
            address: self.address.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl DeviceHandle for GatewayHandle {
    fn address(&self) -> &str {
        &self.address
    }

    fn capabilities(&self) -> Capabilities {
        *self.capabilities.read()
    }

    async fn fetch(&self, fields: &[TelemetryField]) -> Result<RawSnapshot> {
        let fields = fields
            .iter()
            .map(|field| <&'static str>::from(*field))
            .collect::<Vec<_>>()
            .join(",");

        let response: TelemetryResponse = self
            .get(&format!("/api/v0/telemetry?fields={fields}"))
            .await
            .map_err(|e| Error::Fetch {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        *self.capabilities.write() = response.capabilities;
        Ok(response.snapshot)
    }

    async fn set_power_limit(&self, watts: u32) -> Result<bool> {
        let reply: PowerLimitReply = async {
            let response = self
                .post("/api/v0/power-limit", Some(&PowerLimitBody { watts }))
                .await?;
            Ok::<_, Error>(response.json::<PowerLimitReply>().await?)
        }
        .await
        .map_err(|e| self.command_error("set_power_limit", e))?;
        Ok(reply.accepted)
    }

    async fn set_mining_mode(
        &self,
        mode: MiningMode,
        config: Option<&MiningModeConfig>,
    ) -> Result<()> {
        self.post("/api/v0/mining-mode", Some(&MiningModeBody { mode, config }))
            .await
            .map(drop)
            .map_err(|e| self.command_error("set_mining_mode", e))
    }

    async fn reboot(&self) -> Result<()> {
        self.command("reboot", "/api/v0/reboot").await
    }

    async fn restart_backend(&self) -> Result<()> {
        self.command("restart_backend", "/api/v0/restart-backend").await
    }

    async fn start_mining(&self) -> Result<()> {
        self.command("start_mining", "/api/v0/mining/start").await
    }

    async fn stop_mining(&self) -> Result<()> {
        self.command("stop_mining", "/api/v0/mining/stop").await
    }
}
