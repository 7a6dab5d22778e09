//! Engine configuration.
//!
//! Loaded once from TOML (with optional `.env` overrides for credentials)
//! and injected as an immutable value: the provider list in particular is
//! never global mutable state, which keeps failover deterministic and
//! testable with fake node lists.

use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ordered protocol provider nodes; position defines failover priority.
    #[serde(default = "default_provider_nodes")]
    pub providers: Vec<ProviderNode>,

    /// Gateway tuning.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Satoshi accounting policy.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// UTXO source for the operator CLI.
    #[serde(default)]
    pub utxo: UtxoSourceConfig,
}

/// One redundant protocol node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderNode {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProviderNode {
    /// Basic-auth credentials, when configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Immediate re-attempts against the same node before failing over.
    #[serde(default = "default_attempts_per_node")]
    pub attempts_per_node: u32,

    /// TTL for cached compose responses, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Per-attempt request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Outputs below this value are uneconomical; change under it is folded
    /// into the network fee instead of emitted.
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold_sats: u64,

    /// Network addresses are validated against.
    #[serde(default = "default_network")]
    pub network: Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoSourceConfig {
    /// Base URL of an esplora-style API.
    #[serde(default = "default_esplora_base_url")]
    pub esplora_base_url: String,
}

// Default value functions
fn default_attempts_per_node() -> u32 {
    2
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_dust_threshold() -> u64 {
    546
}
fn default_network() -> Network {
    Network::Bitcoin
}
fn default_esplora_base_url() -> String {
    "https://blockstream.info/api".to_string()
}

fn default_provider_nodes() -> Vec<ProviderNode> {
    vec![
        ProviderNode {
            name: "counterparty.io".to_string(),
            base_url: "https://api.counterparty.io:4000/v2".to_string(),
            username: None,
            password: None,
        },
        ProviderNode {
            name: "dev.counterparty.io".to_string(),
            base_url: "https://dev.counterparty.io:4000/v2".to_string(),
            username: None,
            password: None,
        },
    ]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            attempts_per_node: default_attempts_per_node(),
            cache_ttl_secs: default_cache_ttl_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dust_threshold_sats: default_dust_threshold(),
            network: default_network(),
        }
    }
}

impl Default for UtxoSourceConfig {
    fn default() -> Self {
        Self {
            esplora_base_url: default_esplora_base_url(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: default_provider_nodes(),
            gateway: GatewayConfig::default(),
            policy: PolicyConfig::default(),
            utxo: UtxoSourceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration after sourcing a `.env` file, if present.
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_file(path)
    }

    /// Reject configurations the gateway cannot operate with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one provider node must be configured");
        }
        if self.gateway.attempts_per_node == 0 {
            anyhow::bail!("gateway.attempts_per_node must be at least 1");
        }
        for node in &self.providers {
            if node.base_url.is_empty() {
                anyhow::bail!("provider node '{}' has an empty base_url", node.name);
            }
        }
        Ok(())
    }
}
