//! API client for communicating with the autoscaler daemon

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the autoscaler daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        Ok(())
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuantity {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub architecture: Option<String>,
    pub capacity_type: String,
    #[serde(default)]
    pub allowed_families: Vec<String>,
    #[serde(default)]
    pub taint: Option<String>,
    pub resource_limits: ResourceQuantity,
    #[serde(default)]
    pub on_demand_floor: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    pub family: String,
    pub architecture: String,
    pub vcpus: u32,
    pub memory_gib: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    Active,
    CandidateForRemoval { since: i64 },
    Draining { deadline: i64, forced: bool },
    Terminated,
}

impl NodeState {
    pub fn label(&self) -> &'static str {
        match self {
            NodeState::Active => "active",
            NodeState::CandidateForRemoval { .. } => "candidate",
            NodeState::Draining { forced: false, .. } => "draining",
            NodeState::Draining { forced: true, .. } => "reclaiming",
            NodeState::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utilization {
    pub cpu_fraction: f64,
    pub mem_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub pool: String,
    pub shape: Shape,
    pub capacity_type: String,
    pub launched_at: i64,
    #[serde(default)]
    pub bound_workloads: Vec<String>,
    #[serde(default)]
    pub last_utilization: Option<Utilization>,
    pub state: NodeState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolReport {
    pub name: String,
    pub nodes: usize,
    pub draining: usize,
    pub committed: ResourceQuantity,
    pub limits: ResourceQuantity,
    pub cpu_fraction: f64,
    pub mem_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: i64,
    pub duration_ms: u64,
    pub matched: usize,
    pub unplaceable: usize,
    pub deferred: usize,
    pub plans_emitted: usize,
    pub nodes_launched: u32,
    pub drains_started: usize,
    pub nodes_terminated: usize,
    pub launch_timeouts: usize,
    pub drain_timeouts: usize,
    pub pools: Vec<PoolReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionNotice {
    pub node_id: String,
    pub deadline: i64,
}
