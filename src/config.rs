//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rpc::endpoint::{EndpointConfig, Network};
use crate::rpc::monitor::{MAX_INTERVAL_SECS, MIN_INTERVAL_SECS};
use crate::vault::keystore::{KdfParams, MAX_KDF_MEMORY_KIB, MAX_KDF_PARALLELISM};

/// Smallest Argon2 memory cost accepted from configuration (19 MiB)
pub const MIN_KDF_MEMORY_KIB: u32 = 19 * 1024;
pub const MIN_KDF_ITERATIONS: u32 = 2;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Keystore location; a leading `~` expands to the home directory
    #[serde(default = "default_keystore_path")]
    pub keystore_path: String,

    /// Idle seconds before an unlocked session locks itself (0 disables)
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,

    /// Argon2id cost for newly written keystores
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            keystore_path: default_keystore_path(),
            inactivity_secs: default_inactivity_secs(),
            kdf: KdfParams::default(),
        }
    }
}

impl VaultConfig {
    pub fn resolved_keystore_path(&self) -> PathBuf {
        expand_home(&self.keystore_path)
    }

    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub default_network: Network,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            default_network: Network::default(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between probe passes, clamped to 15..=60 at runtime
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Candidate endpoints per network
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_mainnet_endpoints")]
    pub mainnet: Vec<EndpointConfig>,
    #[serde(default = "default_testnet_endpoints")]
    pub testnet: Vec<EndpointConfig>,
    #[serde(default = "default_devnet_endpoints")]
    pub devnet: Vec<EndpointConfig>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            mainnet: default_mainnet_endpoints(),
            testnet: default_testnet_endpoints(),
            devnet: default_devnet_endpoints(),
        }
    }
}

impl EndpointsConfig {
    pub fn for_network(&self, network: Network) -> &[EndpointConfig] {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
            Network::Devnet => &self.devnet,
        }
    }

    /// Pools keyed by network, ready to seed the registry
    pub fn pools(&self) -> HashMap<Network, Vec<EndpointConfig>> {
        Network::ALL
            .iter()
            .map(|network| (*network, self.for_network(*network).to_vec()))
            .collect()
    }
}

// Default value functions
fn default_keystore_path() -> String {
    "~/.treasury/keystore.json".to_string()
}

fn default_inactivity_secs() -> u64 {
    300
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_interval_secs() -> u64 {
    30
}

fn default_mainnet_endpoints() -> Vec<EndpointConfig> {
    vec![
        EndpointConfig::new("https://api.mainnet-beta.solana.com", "Solana Labs", 0),
        EndpointConfig::new("https://solana-rpc.publicnode.com", "PublicNode", 1),
    ]
}

fn default_testnet_endpoints() -> Vec<EndpointConfig> {
    vec![EndpointConfig::new("https://api.testnet.solana.com", "Solana Labs", 0)]
}

fn default_devnet_endpoints() -> Vec<EndpointConfig> {
    vec![
        EndpointConfig::new("https://api.devnet.solana.com", "Solana Labs", 0),
        EndpointConfig::new("https://rpc.ankr.com/solana_devnet", "Ankr", 1),
    ]
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .set_default("rpc.default_network", "devnet")?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix TREASURY_)
            .add_source(
                config::Environment::with_prefix("TREASURY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.vault.keystore_path.trim().is_empty() {
            anyhow::bail!("vault.keystore_path must not be empty");
        }

        let kdf = &self.vault.kdf;
        if !(MIN_KDF_MEMORY_KIB..=MAX_KDF_MEMORY_KIB).contains(&kdf.memory_kib) {
            anyhow::bail!(
                "vault.kdf.memory_kib must be between {} and {}, got {}",
                MIN_KDF_MEMORY_KIB,
                MAX_KDF_MEMORY_KIB,
                kdf.memory_kib
            );
        }
        if kdf.iterations < MIN_KDF_ITERATIONS {
            anyhow::bail!(
                "vault.kdf.iterations must be at least {}, got {}",
                MIN_KDF_ITERATIONS,
                kdf.iterations
            );
        }
        if kdf.parallelism == 0 || kdf.parallelism > MAX_KDF_PARALLELISM {
            anyhow::bail!(
                "vault.kdf.parallelism must be between 1 and {}",
                MAX_KDF_PARALLELISM
            );
        }

        if self.rpc.timeout_ms == 0 {
            anyhow::bail!("rpc.timeout_ms must be positive");
        }

        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.monitor.interval_secs) {
            tracing::warn!(
                "monitor.interval_secs={} is outside {}..={} and will be clamped",
                self.monitor.interval_secs,
                MIN_INTERVAL_SECS,
                MAX_INTERVAL_SECS
            );
        }

        for network in Network::ALL {
            let entries = self.endpoints.for_network(network);
            let mut seen = HashSet::new();
            for entry in entries {
                let parsed = url::Url::parse(&entry.url)
                    .with_context(|| format!("Invalid {} endpoint url: {}", network, entry.url))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    anyhow::bail!(
                        "{} endpoint {} must use http or https",
                        network,
                        mask_url(&entry.url)
                    );
                }
                if !seen.insert(entry.url.as_str()) {
                    anyhow::bail!(
                        "Duplicate {} endpoint: {}",
                        network,
                        mask_url(&entry.url)
                    );
                }
            }
        }

        if self.endpoints.for_network(self.rpc.default_network).is_empty() {
            tracing::warn!(
                "No endpoints configured for default network {}, remote calls will fail",
                self.rpc.default_network
            );
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let mut out = format!(
            r#"Configuration:
  Vault:
    keystore: {}
    inactivity: {}
    kdf: argon2id m={}KiB t={} p={}
  RPC:
    default_network: {}
    timeout: {}ms
  Monitor:
    interval: {}s
  Endpoints:
"#,
            self.vault.resolved_keystore_path().display(),
            if self.vault.inactivity_secs == 0 {
                "disabled".to_string()
            } else {
                format!("{}s", self.vault.inactivity_secs)
            },
            self.vault.kdf.memory_kib,
            self.vault.kdf.iterations,
            self.vault.kdf.parallelism,
            self.rpc.default_network,
            self.rpc.timeout_ms,
            self.monitor.interval_secs,
        );

        for network in Network::ALL {
            out.push_str(&format!("    {}:\n", network));
            let entries = self.endpoints.for_network(network);
            if entries.is_empty() {
                out.push_str("      (none)\n");
            }
            for entry in entries {
                out.push_str(&format!(
                    "      [{}] {} {}\n",
                    entry.priority,
                    entry.label,
                    mask_url(&entry.url)
                ));
            }
        }

        out
    }
}

/// Mask URL for display (hide API keys in query params)
pub fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

/// Expand a leading `~` to `$HOME`
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.vault.inactivity_secs, 300);
        assert_eq!(config.rpc.timeout_ms, 10_000);
        assert_eq!(config.rpc.default_network, Network::Devnet);
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.endpoints.mainnet.len(), 2);
        assert_eq!(config.endpoints.testnet.len(), 1);
        assert_eq!(config.endpoints.devnet.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treasury.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[vault]
keystore_path = "/tmp/treasury/keystore.json"
inactivity_secs = 0

[rpc]
default_network = "mainnet"

[[endpoints.mainnet]]
url = "https://rpc.example.com?api-key=secret"
label = "Private"
priority = -1
"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.vault.inactivity(), Duration::ZERO);
        assert_eq!(config.rpc.default_network, Network::Mainnet);
        assert_eq!(config.endpoints.mainnet.len(), 1);
        assert_eq!(config.endpoints.mainnet[0].priority, -1);
        // Untouched sections keep their defaults
        assert_eq!(config.endpoints.devnet.len(), 2);
        assert_eq!(config.monitor.interval_secs, 30);

        let display = config.masked_display();
        assert!(display.contains("https://rpc.example.com?***"));
        assert!(!display.contains("secret"));
        assert!(display.contains("inactivity: disabled"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.rpc.default_network, Network::Devnet);
        assert_eq!(config.vault.kdf, KdfParams::default());
    }

    #[test]
    fn test_rejects_weak_kdf() {
        let mut config = Config::default();
        config.vault.kdf.memory_kib = 1024;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vault.kdf.iterations = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vault.kdf.parallelism = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vault.kdf.memory_kib = MAX_KDF_MEMORY_KIB + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        let mut config = Config::default();
        config.endpoints.devnet.push(EndpointConfig::new("not a url", "broken", 5));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config
            .endpoints
            .testnet
            .push(EndpointConfig::new("wss://api.testnet.solana.com", "ws", 1));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        let duplicate = config.endpoints.mainnet[0].clone();
        config.endpoints.mainnet.push(duplicate);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pools_cover_every_network() {
        let pools = EndpointsConfig::default().pools();
        assert_eq!(pools.len(), 3);
        assert_eq!(pools[&Network::Testnet][0].url, "https://api.testnet.solana.com");
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://api.example.com"),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/keystore.json"), PathBuf::from("/abs/keystore.json"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home("~/.treasury/keystore.json"),
                PathBuf::from(home).join(".treasury/keystore.json")
            );
        }
    }
}
