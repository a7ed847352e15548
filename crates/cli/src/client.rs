//! HTTP client for a running group controller

use anyhow::{bail, Context, Result};
use controller_lib::{anomaly::ResolverPhase, health::HealthResponse, ControllerState};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid controller URL: {}", base_url))?;

        Ok(Self { client, base_url })
    }

    /// `GET /status`
    pub async fn status(&self) -> Result<ControllerStatus> {
        self.fetch("status", &[StatusCode::OK]).await
    }

    /// `GET /healthz`; an unhealthy controller answers 503 with the same body
    pub async fn health(&self) -> Result<HealthResponse> {
        self.fetch("healthz", &[StatusCode::OK, StatusCode::SERVICE_UNAVAILABLE])
            .await
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str, accepted: &[StatusCode]) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Controller unreachable at {}", url))?;

        let status = response.status();
        if !accepted.contains(&status) {
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", url, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Unexpected response from {}", url))
    }
}

/// Body of the controller's `/status` route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub busy: bool,
    pub state: ControllerState,
    pub resolver_phase: ResolverPhase,
    pub hosts: HostCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCounts {
    pub active: usize,
    pub woken_up: usize,
    pub passive: usize,
    pub virtual_machines: usize,
}
