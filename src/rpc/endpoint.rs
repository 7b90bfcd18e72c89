//! Core types for the endpoint pool
//!
//! Networks, endpoint candidates and their health snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Solana cluster the console talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Devnet,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Testnet, Network::Devnet];
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "Mainnet"),
            Network::Testnet => write!(f, "Testnet"),
            Network::Devnet => write!(f, "Devnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "mainnet-beta" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "devnet" => Ok(Network::Devnet),
            _ => Err(format!(
                "Invalid network: {}. Use: mainnet, testnet, devnet",
                s
            )),
        }
    }
}

/// Reachability classification of a single endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Never probed
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    /// Whether selection may pick an endpoint in this state
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Static endpoint entry from configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub url: String,

    /// Human-readable name shown next to the url
    #[serde(default)]
    pub label: String,

    /// Lower wins
    #[serde(default)]
    pub priority: i32,
}

impl EndpointConfig {
    pub fn new(url: &str, label: &str, priority: i32) -> Self {
        Self {
            url: url.to_string(),
            label: label.to_string(),
            priority,
        }
    }
}

/// One RPC candidate plus its latest health snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub label: String,
    pub priority: i32,
    pub health: HealthStatus,
    pub latency_ms: Option<f64>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Endpoint {
    pub fn new(url: &str, label: &str, priority: i32) -> Self {
        Self {
            url: url.to_string(),
            label: label.to_string(),
            priority,
            health: HealthStatus::Unknown,
            latency_ms: None,
            last_checked: None,
        }
    }

    /// Label if set, url otherwise
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.url
        } else {
            &self.label
        }
    }
}

impl From<&EndpointConfig> for Endpoint {
    fn from(config: &EndpointConfig) -> Self {
        Endpoint::new(&config.url, &config.label, config.priority)
    }
}
