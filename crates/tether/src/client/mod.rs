//! HTTP client for a running tether server's management API.

use anyhow::Result;
use serde::Deserialize;
use url::Url;

use tether_server::API_KEY_HEADER;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Health check response from the server.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server-wide session usage.
#[derive(Debug, Deserialize)]
pub struct ServerCapacity {
    pub limit: usize,
    pub active: usize,
    pub remaining: usize,
}

/// One agent's session usage.
#[derive(Debug, Deserialize)]
pub struct AgentCapacity {
    pub agent_id: String,
    pub limit: usize,
    pub active: usize,
    pub remaining: usize,
}

/// Response of `GET /api/v1/capacity`.
#[derive(Debug, Deserialize)]
pub struct CapacityResponse {
    pub server: ServerCapacity,
    #[serde(default)]
    pub agent: Option<AgentCapacity>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the management API.
pub struct Client {
    base_url: Url,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl Client {
    /// Create a new client for the given server URL.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            http: reqwest::Client::new(),
            api_key,
        })
    }

    /// Check server health (no auth).
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.base_url.join("/health")?;

        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }

        Ok(response.json().await?)
    }

    /// Fetch session capacity, optionally for one agent.
    pub async fn capacity(&self, agent_id: Option<&str>) -> Result<CapacityResponse> {
        let mut url = self.base_url.join("/api/v1/capacity")?;
        if let Some(agent_id) = agent_id {
            url.query_pairs_mut().append_pair("agent_id", agent_id);
        }

        let mut request = self.http.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }

        Ok(response.json().await?)
    }
}
