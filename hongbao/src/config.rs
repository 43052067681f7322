use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::ens::DEFAULT_ENS_ENDPOINTS;

/// Runtime knobs, every field has a default so an empty JSON object is a valid config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub ens: EnsConfig,
    pub gateway: GatewayConfig,
    /// Extra or replacement contract deployments keyed by chain id
    pub deployments: BTreeMap<u64, Address>,
    /// JSON-RPC endpoints for node-side callers keyed by chain id, needed for chains outside
    /// the built-in network table
    pub rpc_urls: BTreeMap<u64, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnsConfig {
    /// Mainnet read-only endpoints, tried strictly in this order
    pub endpoints: Vec<String>,
    /// Budget for each individual lookup against a single endpoint
    pub attempt_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub receipt_poll_interval_ms: u64,
    pub event_poll_interval_ms: u64,
    /// Consecutive receipt polling failures tolerated before a write is marked failed
    pub receipt_poll_retries: u32,
}

impl Default for EnsConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENS_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            attempt_timeout_ms: 5_000,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            receipt_poll_interval_ms: 1_000,
            event_poll_interval_ms: 4_000,
            receipt_poll_retries: 3,
        }
    }
}

impl EnsConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl GatewayConfig {
    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).wrap_err("invalid client config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Deployed red envelope address on `chain_id`, configured entries win over built-in ones
    pub fn deployment(&self, chain_id: u64) -> Option<Address> {
        self.deployments
            .get(&chain_id)
            .copied()
            .or_else(|| crate::gateway::resolve_address(chain_id))
    }

    /// Node endpoint for `chain_id`, configured entries win over the built-in network table
    pub fn rpc_url(&self, chain_id: u64) -> Option<&str> {
        self.rpc_urls
            .get(&chain_id)
            .map(String::as_str)
            .or_else(|| crate::networks::network(chain_id).map(|network| network.rpc_url))
    }

    fn validate(&self) -> Result<()> {
        if self.ens.attempt_timeout_ms == 0 {
            eyre::bail!("ens.attempt_timeout_ms must be positive");
        }
        if self.gateway.receipt_poll_interval_ms == 0 || self.gateway.event_poll_interval_ms == 0 {
            eyre::bail!("gateway poll intervals must be positive");
        }
        for endpoint in &self.ens.endpoints {
            let _: reqwest::Url = endpoint.parse().wrap_err_with(|| format!("invalid ENS endpoint {endpoint}"))?;
        }
        for (chain_id, url) in &self.rpc_urls {
            let _: reqwest::Url = url.parse().wrap_err_with(|| format!("invalid RPC URL for chain {chain_id}"))?;
        }
        Ok(())
    }
}
