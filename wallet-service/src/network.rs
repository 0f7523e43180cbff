// Built-in networks and wall-clock epoch arithmetic.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use connector_protocol::Protocol;

use crate::params::{LinearFee, ProtocolParameters};

/// Milliseconds since the Unix epoch. Injected so tests can move time.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    })
}

/// A known epoch boundary from which later epochs are derived.
#[derive(Debug, Clone, Copy)]
pub struct EpochAnchor {
    pub epoch: u64,
    pub start_time_ms: i64,
    pub slots_per_epoch: u64,
    pub slot_duration_secs: u64,
}

impl EpochAnchor {
    fn epoch_length_ms(&self) -> i64 {
        (self.slots_per_epoch * self.slot_duration_secs * 1000) as i64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DefaultParameters {
    pub min_fee_a: &'static str,
    pub min_fee_b: &'static str,
    pub coins_per_utxo_byte: &'static str,
    pub pool_deposit: &'static str,
    pub key_deposit: &'static str,
}

#[derive(Debug)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub protocol: Protocol,
    pub network_id: u32,
    pub anchor: EpochAnchor,
    pub defaults: DefaultParameters,
}

impl NetworkInfo {
    /// Embedded parameters, stamped with `epoch`.
    pub fn default_parameters(&self, epoch: u64) -> ProtocolParameters {
        ProtocolParameters {
            epoch,
            linear_fee: LinearFee {
                coefficient: self.defaults.min_fee_a.to_string(),
                constant: self.defaults.min_fee_b.to_string(),
            },
            coins_per_utxo_byte: self.defaults.coins_per_utxo_byte.to_string(),
            pool_deposit: self.defaults.pool_deposit.to_string(),
            key_deposit: self.defaults.key_deposit.to_string(),
        }
    }
}

const MAINNET_DEFAULTS: DefaultParameters = DefaultParameters {
    min_fee_a: "44",
    min_fee_b: "155381",
    coins_per_utxo_byte: "4310",
    pool_deposit: "500000000",
    key_deposit: "2000000",
};

// Ergo has no per-byte fee or deposits; the constant is the minimum miner fee.
const ERGO_DEFAULTS: DefaultParameters = DefaultParameters {
    min_fee_a: "0",
    min_fee_b: "1100000",
    coins_per_utxo_byte: "360",
    pool_deposit: "0",
    key_deposit: "0",
};

pub static NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "cardano-mainnet",
        protocol: Protocol::Cardano,
        network_id: 1,
        anchor: EpochAnchor {
            epoch: 208,
            start_time_ms: 1_596_059_091_000,
            slots_per_epoch: 432_000,
            slot_duration_secs: 1,
        },
        defaults: MAINNET_DEFAULTS,
    },
    NetworkInfo {
        name: "cardano-preprod",
        protocol: Protocol::Cardano,
        network_id: 0,
        anchor: EpochAnchor {
            epoch: 4,
            start_time_ms: 1_655_769_600_000,
            slots_per_epoch: 432_000,
            slot_duration_secs: 1,
        },
        defaults: MAINNET_DEFAULTS,
    },
    NetworkInfo {
        name: "cardano-preview",
        protocol: Protocol::Cardano,
        network_id: 0,
        anchor: EpochAnchor {
            epoch: 0,
            start_time_ms: 1_666_656_000_000,
            slots_per_epoch: 86_400,
            slot_duration_secs: 1,
        },
        defaults: MAINNET_DEFAULTS,
    },
    // voting epochs of 1024 two-minute blocks
    NetworkInfo {
        name: "ergo-mainnet",
        protocol: Protocol::Ergo,
        network_id: 0,
        anchor: EpochAnchor {
            epoch: 0,
            start_time_ms: 1_561_978_800_000,
            slots_per_epoch: 1024,
            slot_duration_secs: 120,
        },
        defaults: ERGO_DEFAULTS,
    },
    NetworkInfo {
        name: "ergo-testnet",
        protocol: Protocol::Ergo,
        network_id: 16,
        anchor: EpochAnchor {
            epoch: 0,
            start_time_ms: 1_561_978_800_000,
            slots_per_epoch: 1024,
            slot_duration_secs: 120,
        },
        defaults: ERGO_DEFAULTS,
    },
];

pub fn by_name(name: &str) -> Option<&'static NetworkInfo> {
    NETWORKS.iter().find(|n| n.name == name)
}

/// First built-in network of `protocol`, its mainnet.
pub fn default_for(protocol: Protocol) -> Option<&'static NetworkInfo> {
    NETWORKS.iter().find(|n| n.protocol == protocol)
}

/// Epoch containing `now_ms`. Times before the anchor clamp to the anchor epoch.
pub fn epoch_at(network: &NetworkInfo, now_ms: i64) -> u64 {
    let anchor = &network.anchor;
    let elapsed = now_ms - anchor.start_time_ms;
    if elapsed <= 0 {
        return anchor.epoch;
    }
    anchor.epoch + (elapsed / anchor.epoch_length_ms()) as u64
}
