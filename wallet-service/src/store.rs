//! Wallet Store boundary.
//!
//! The storage schema belongs to the wallet itself; the service only needs
//! per-wallet address lists and the current UTXO set. [`MemoryWalletStore`]
//! keeps them in memory, seeded from a JSON snapshot.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use connector_protocol::{Protocol, WalletId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// An address in both encodings the connector hands out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAddress {
    pub bech32: String,
    /// Raw address bytes, hex encoded
    pub bytes_hex: String,
}

impl WalletAddress {
    pub fn matches(&self, address: &str) -> bool {
        self.bech32 == address || self.bytes_hex.eq_ignore_ascii_case(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub policy_id: String,
    /// Asset name, hex encoded
    pub name: String,
    pub amount: String,
}

impl Asset {
    /// `policyId` followed by the hex asset name.
    pub fn token_id(&self) -> String {
        format!("{}{}", self.policy_id, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub coin: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Amount {
    pub fn coin_value(&self) -> Result<u128, StoreError> {
        parse_quantity(&self.coin)
    }

    /// Sum of several amounts, merging assets by token id.
    pub fn sum<'a, I>(amounts: I) -> Result<Amount, StoreError>
    where
        I: IntoIterator<Item = &'a Amount>,
    {
        let mut coin: u128 = 0;
        let mut assets: Vec<(Asset, u128)> = Vec::new();

        for amount in amounts {
            coin += amount.coin_value()?;
            for asset in &amount.assets {
                let quantity = parse_quantity(&asset.amount)?;
                match assets
                    .iter_mut()
                    .find(|(known, _)| known.token_id() == asset.token_id())
                {
                    Some((_, total)) => *total += quantity,
                    None => assets.push((asset.clone(), quantity)),
                }
            }
        }

        Ok(Amount {
            coin: coin.to_string(),
            assets: assets
                .into_iter()
                .map(|(asset, total)| Asset {
                    amount: total.to_string(),
                    ..asset
                })
                .collect(),
        })
    }
}

pub fn parse_quantity(value: &str) -> Result<u128, StoreError> {
    value
        .parse::<u128>()
        .map_err(|_| StoreError::InvalidAmount(value.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub tx_hash: String,
    pub index: u32,
    /// Bech32 address holding the output
    pub receiver: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub id: WalletId,
    pub name: String,
    pub protocol: Protocol,
    pub network: String,
    #[serde(default)]
    pub used_addresses: Vec<WalletAddress>,
    #[serde(default)]
    pub unused_addresses: Vec<WalletAddress>,
    pub change_address: WalletAddress,
    #[serde(default)]
    pub reward_addresses: Vec<WalletAddress>,
    #[serde(default)]
    pub utxos: Vec<Utxo>,
}

impl WalletRecord {
    /// Every external and internal address, in a stable order without duplicates.
    pub fn all_addresses(&self) -> Vec<&WalletAddress> {
        let mut seen: Vec<&WalletAddress> = Vec::new();
        for address in self
            .used_addresses
            .iter()
            .chain(&self.unused_addresses)
            .chain(std::iter::once(&self.change_address))
        {
            if !seen.iter().any(|known| known.bech32 == address.bech32) {
                seen.push(address);
            }
        }
        seen
    }

    pub fn owns(&self, address: &str) -> bool {
        self.all_addresses()
            .into_iter()
            .chain(&self.reward_addresses)
            .any(|known| known.matches(address))
    }

    pub fn balance(&self) -> Result<Amount, StoreError> {
        Amount::sum(self.utxos.iter().map(|utxo| &utxo.amount))
    }
}

pub trait WalletStore: Send + Sync {
    fn wallet(&self, id: WalletId) -> Result<WalletRecord, StoreError>;

    fn wallet_ids(&self) -> Vec<WalletId>;

    fn replace_utxos(&self, id: WalletId, utxos: Vec<Utxo>) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryWalletStore {
    wallets: RwLock<HashMap<WalletId, WalletRecord>>,
}

impl MemoryWalletStore {
    pub fn new(records: Vec<WalletRecord>) -> Self {
        Self {
            wallets: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }

    /// Load a JSON array of wallet records. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("Wallet snapshot {} not found, starting empty", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .context(format!("Failed to read wallet snapshot: {}", path.display()))?;
        let records: Vec<WalletRecord> =
            serde_json::from_str(&content).context("Failed to parse wallet snapshot")?;
        tracing::info!("Loaded {} wallet(s) from {}", records.len(), path.display());
        Ok(Self::new(records))
    }
}

impl WalletStore for MemoryWalletStore {
    fn wallet(&self, id: WalletId) -> Result<WalletRecord, StoreError> {
        self.wallets
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::WalletNotFound(id))
    }

    fn wallet_ids(&self) -> Vec<WalletId> {
        let mut ids: Vec<WalletId> = self.wallets.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn replace_utxos(&self, id: WalletId, utxos: Vec<Utxo>) -> Result<(), StoreError> {
        let mut wallets = self.wallets.write();
        let record = wallets.get_mut(&id).ok_or(StoreError::WalletNotFound(id))?;
        record.utxos = utxos;
        Ok(())
    }
}
