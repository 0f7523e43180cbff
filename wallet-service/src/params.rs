//! Epoch-indexed protocol parameter cache.
//!
//! Lookup order: exact hit for the current epoch, then a fresh fetch, then
//! the newest cached entry not after the current epoch, then the network's
//! embedded defaults. A value from a later epoch than the current one is
//! never served; an older one may be.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backend::{Backend, RawProtocolParameters};
use crate::network::{epoch_at, Clock, NetworkInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearFee {
    pub coefficient: String,
    pub constant: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolParameters {
    pub epoch: u64,
    pub linear_fee: LinearFee,
    pub coins_per_utxo_byte: String,
    pub pool_deposit: String,
    pub key_deposit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochData {
    pub current_epoch: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is not a numeric string: {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error("epoch {fetched} is ahead of the current epoch {current}")]
    FutureEpoch { fetched: u64, current: u64 },
}

fn numeric_string(field: &'static str, value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            Ok(s.clone())
        }
        other => Err(ValidationError::NotNumeric {
            field,
            value: other.to_string(),
        }),
    }
}

fn numeric_epoch(value: &Value) -> Result<u64, ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ValidationError::NotNumeric {
        field: "epoch",
        value: value.to_string(),
    })
}

/// Check a backend payload and convert it into cacheable parameters.
pub fn validate(
    raw: &RawProtocolParameters,
    current_epoch: u64,
) -> Result<ProtocolParameters, ValidationError> {
    let epoch = numeric_epoch(&raw.epoch)?;
    if epoch > current_epoch {
        return Err(ValidationError::FutureEpoch {
            fetched: epoch,
            current: current_epoch,
        });
    }
    Ok(ProtocolParameters {
        epoch,
        linear_fee: LinearFee {
            coefficient: numeric_string("linearFee.coefficient", &raw.linear_fee.coefficient)?,
            constant: numeric_string("linearFee.constant", &raw.linear_fee.constant)?,
        },
        coins_per_utxo_byte: numeric_string("coinsPerUtxoByte", &raw.coins_per_utxo_byte)?,
        pool_deposit: numeric_string("poolDeposit", &raw.pool_deposit)?,
        key_deposit: numeric_string("keyDeposit", &raw.key_deposit)?,
    })
}

pub struct ProtocolParameterCache {
    backend: Arc<dyn Backend>,
    clock: Clock,
    entries: Mutex<HashMap<&'static str, Vec<ProtocolParameters>>>,
}

impl ProtocolParameterCache {
    pub fn new(backend: Arc<dyn Backend>, clock: Clock) -> Self {
        Self {
            backend,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_epoch_data(&self, network: &NetworkInfo) -> EpochData {
        EpochData {
            current_epoch: epoch_at(network, (self.clock)()),
        }
    }

    /// Never fails: falls back to older cached values or the embedded defaults.
    pub async fn get_protocol_parameters(
        &self,
        network: &'static NetworkInfo,
    ) -> ProtocolParameters {
        let current = self.get_epoch_data(network).current_epoch;

        if let Some(hit) = self.exact(network, current) {
            return hit;
        }

        match self.backend.epoch_parameters(network.name).await {
            Ok(raw) => match validate(&raw, current) {
                Ok(params) => {
                    tracing::debug!(network = network.name, epoch = params.epoch, "protocol parameters fetched");
                    self.insert(network, params.clone());
                    return params;
                }
                Err(e) => {
                    tracing::warn!(network = network.name, error = %e, "rejecting fetched protocol parameters");
                }
            },
            Err(e) => {
                tracing::warn!(network = network.name, error = %e, "protocol parameter fetch failed");
            }
        }

        if let Some(fallback) = self.latest_at_or_before(network, current) {
            tracing::debug!(
                network = network.name,
                epoch = fallback.epoch,
                current,
                "serving cached protocol parameters"
            );
            return fallback;
        }

        tracing::info!(network = network.name, current, "serving default protocol parameters");
        network.default_parameters(current)
    }

    fn exact(&self, network: &NetworkInfo, epoch: u64) -> Option<ProtocolParameters> {
        self.entries
            .lock()
            .get(network.name)?
            .iter()
            .find(|entry| entry.epoch == epoch)
            .cloned()
    }

    /// Highest cached epoch not after `epoch`.
    pub fn latest_at_or_before(
        &self,
        network: &NetworkInfo,
        epoch: u64,
    ) -> Option<ProtocolParameters> {
        self.entries
            .lock()
            .get(network.name)?
            .iter()
            .filter(|entry| entry.epoch <= epoch)
            .max_by_key(|entry| entry.epoch)
            .cloned()
    }

    /// Store `params`, dropping every entry of an older epoch. Entries of the
    /// same epoch are replaced, newer ones are kept.
    pub fn insert(&self, network: &'static NetworkInfo, params: ProtocolParameters) {
        let mut entries = self.entries.lock();
        let list = entries.entry(network.name).or_default();
        list.retain(|entry| entry.epoch > params.epoch);
        list.push(params);
    }

    pub fn cached_epochs(&self, network: &NetworkInfo) -> Vec<u64> {
        let mut epochs: Vec<u64> = self
            .entries
            .lock()
            .get(network.name)
            .map(|list| list.iter().map(|entry| entry.epoch).collect())
            .unwrap_or_default();
        epochs.sort_unstable();
        epochs
    }
}
