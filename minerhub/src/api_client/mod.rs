//! HTTP client for the daemon's v0 API.

pub mod types;

use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::DEFAULT_API_BIND;
use crate::device::MiningMode;
use crate::error::{Error, Result};
use crate::fleet::DeviceId;
use types::{
    ActionCall, DeviceDetail, DeviceSummary, ErrorBody, FleetReport, FleetRequest,
    MiningModeRequest, PowerLimitRequest,
};

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client for a daemon on the default local address.
    pub fn new() -> Self {
        Self::with_base_url(format!("http://{DEFAULT_API_BIND}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0{path}", self.base_url)
    }

    pub async fn health(&self) -> Result<String> {
        let response = check(self.http.get(self.url("/health")).send().await?).await?;
        Ok(response.text().await?)
    }

    pub async fn get_devices(&self) -> Result<Vec<DeviceSummary>> {
        fetch(self.http.get(self.url("/devices"))).await
    }

    pub async fn get_device(&self, id: &DeviceId) -> Result<DeviceDetail> {
        fetch(self.http.get(self.url(&format!("/devices/{id}")))).await
    }

    /// Stop polling a device until the daemon restarts.
    pub async fn remove_device(&self, id: &DeviceId) -> Result<()> {
        check(self.http.delete(self.url(&format!("/devices/{id}"))).send().await?).await?;
        Ok(())
    }

    pub async fn set_power_limit(&self, id: &DeviceId, watts: u32) -> Result<()> {
        let path = format!("/devices/{id}/power-limit");
        post(&self.http, self.url(&path), &PowerLimitRequest { watts }).await?;
        Ok(())
    }

    pub async fn reboot(&self, device_ids: Vec<DeviceId>) -> Result<FleetReport> {
        fetch_post(&self.http, self.url("/fleet/reboot"), &FleetRequest { device_ids }).await
    }

    pub async fn restart_backend(&self, device_ids: Vec<DeviceId>) -> Result<FleetReport> {
        let body = FleetRequest { device_ids };
        fetch_post(&self.http, self.url("/fleet/restart-backend"), &body).await
    }

    pub async fn set_mining_mode(
        &self,
        device_ids: Vec<DeviceId>,
        mode: MiningMode,
    ) -> Result<FleetReport> {
        let body = MiningModeRequest { device_ids, mode };
        fetch_post(&self.http, self.url("/fleet/mining-mode"), &body).await
    }

    pub async fn call_action(&self, call: &ActionCall) -> Result<FleetReport> {
        fetch_post(&self.http, self.url("/actions"), call).await
    }
}

async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    Ok(check(request.send().await?).await?.json().await?)
}

async fn post<B: Serialize>(http: &reqwest::Client, url: String, body: &B) -> Result<Response> {
    check(http.post(url).json(body).send().await?).await
}

async fn fetch_post<B: Serialize, T: DeserializeOwned>(
    http: &reqwest::Client,
    url: String,
    body: &B,
) -> Result<T> {
    Ok(post(http, url, body).await?.json().await?)
}

/// Turn a non-2xx response into an error carrying the daemon's message.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reason = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(Error::Other(format!("{status}: {reason}")))
}
