use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::network;

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub signer: SignerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Port the relay connects to (JSON-lines channel)
    pub channel_port: u16,
    /// Port of the admin HTTP API
    pub admin_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignerConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_network")]
    pub name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_whitelist_path")]
    pub whitelist_path: String,
    /// JSON snapshot of the wallets the service exposes
    #[serde(default = "default_wallets_path")]
    pub wallets_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            whitelist_path: default_whitelist_path(),
            wallets_path: default_wallets_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_price_interval")]
    pub price_interval_secs: u64,
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    #[serde(default = "default_price_ticker")]
    pub price_ticker: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            price_interval_secs: default_price_interval(),
            status_interval_secs: default_status_interval(),
            price_ticker: default_price_ticker(),
        }
    }
}

impl PollingConfig {
    pub fn price_interval(&self) -> Duration {
        Duration::from_secs(self.price_interval_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

fn default_network() -> String {
    "cardano-mainnet".to_string()
}

fn default_whitelist_path() -> String {
    "./data/whitelist.json".to_string()
}

fn default_wallets_path() -> String {
    "./data/wallets.json".to_string()
}

fn default_price_interval() -> u64 {
    60
}

fn default_status_interval() -> u64 {
    30
}

fn default_price_ticker() -> String {
    "ADA".to_string()
}

impl ConfigFile {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn validate(&self) -> Result<()> {
        if network::by_name(&self.network.name).is_none() {
            anyhow::bail!(
                "Unknown network '{}', expected one of: {}",
                self.network.name,
                network::NETWORKS
                    .iter()
                    .map(|n| n.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if self.server.channel_port == self.server.admin_port {
            anyhow::bail!("server.channel_port and server.admin_port must differ");
        }
        for (section, url) in [("backend", &self.backend.url), ("signer", &self.signer.url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{}.url must be an http(s) URL, got '{}'", section, url);
            }
        }
        if self.polling.price_interval_secs == 0 || self.polling.status_interval_secs == 0 {
            anyhow::bail!("polling intervals must be at least one second");
        }
        Ok(())
    }
}
