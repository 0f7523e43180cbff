// Wallet-domain values in the two encodings a page can ask for.
//
// `json` is the structured serde form. `cbor` is the hex of the CBOR encoding
// of that same structure, except for addresses, which are the CBOR byte string
// of the raw address bytes, and balances, which use the ledger `value` shape
// (`coin` or `[coin, {policy: {name: quantity}}]`).

use std::collections::BTreeMap;

use anyhow::Context;
use connector_protocol::ReturnType;
use serde::Serialize;
use serde_json::Value;

use super::DispatchError;
use crate::store::{parse_quantity, Amount, WalletAddress};

pub fn to_cbor_hex<T: Serialize>(value: &T) -> Result<String, DispatchError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).context("CBOR encoding failed")?;
    Ok(hex::encode(bytes))
}

pub fn encode<T: Serialize>(value: &T, return_type: ReturnType) -> Result<Value, DispatchError> {
    match return_type {
        ReturnType::Json => Ok(serde_json::to_value(value).context("JSON encoding failed")?),
        ReturnType::Cbor => Ok(Value::String(to_cbor_hex(value)?)),
    }
}

pub fn encode_address(
    address: &WalletAddress,
    return_type: ReturnType,
) -> Result<Value, DispatchError> {
    match return_type {
        ReturnType::Json => Ok(Value::String(address.bech32.clone())),
        ReturnType::Cbor => {
            let raw = hex::decode(&address.bytes_hex)
                .context(format!("stored address {} is not hex", address.bech32))?;
            Ok(Value::String(to_cbor_hex(&ciborium::Value::Bytes(raw))?))
        }
    }
}

/// A quantity: decimal string for `json`, hex CBOR unsigned integer for `cbor`.
pub fn encode_quantity(quantity: u128, return_type: ReturnType) -> Result<Value, DispatchError> {
    match return_type {
        ReturnType::Json => Ok(Value::String(quantity.to_string())),
        ReturnType::Cbor => Ok(Value::String(to_cbor_hex(&cbor_uint(quantity)?)?)),
    }
}

/// Whole wallet balance. The JSON form carries only the coin quantity.
pub fn encode_balance(balance: &Amount, return_type: ReturnType) -> Result<Value, DispatchError> {
    let coin = balance.coin_value()?;
    if return_type == ReturnType::Json || balance.assets.is_empty() {
        return encode_quantity(coin, return_type);
    }

    let mut policies: BTreeMap<&str, Vec<(ciborium::Value, ciborium::Value)>> = BTreeMap::new();
    for asset in &balance.assets {
        let name = hex::decode(&asset.name)
            .context(format!("asset name {} is not hex", asset.name))?;
        let quantity = cbor_uint(parse_quantity(&asset.amount)?)?;
        policies
            .entry(asset.policy_id.as_str())
            .or_default()
            .push((ciborium::Value::Bytes(name), quantity));
    }

    let mut multiasset = Vec::with_capacity(policies.len());
    for (policy, names) in policies {
        let policy = hex::decode(policy).context(format!("policy id {policy} is not hex"))?;
        multiasset.push((ciborium::Value::Bytes(policy), ciborium::Value::Map(names)));
    }
    let value = ciborium::Value::Array(vec![cbor_uint(coin)?, ciborium::Value::Map(multiasset)]);
    Ok(Value::String(to_cbor_hex(&value)?))
}

fn cbor_uint(quantity: u128) -> Result<ciborium::Value, DispatchError> {
    let small = u64::try_from(quantity).context("quantity exceeds u64")?;
    Ok(ciborium::Value::Integer(small.into()))
}

/// Parse an amount argument: a decimal string for `json`, hex CBOR unsigned
/// integer for `cbor`.
pub fn decode_amount(raw: &str, return_type: ReturnType) -> Result<u128, DispatchError> {
    let invalid = || DispatchError::InvalidParams(format!("invalid amount: {raw}"));
    match return_type {
        ReturnType::Json => raw.parse::<u128>().map_err(|_| invalid()),
        ReturnType::Cbor => {
            let bytes = hex::decode(raw).map_err(|_| invalid())?;
            let value: ciborium::Value =
                ciborium::from_reader(bytes.as_slice()).map_err(|_| invalid())?;
            match value {
                ciborium::Value::Integer(i) => u128::try_from(i128::from(i)).map_err(|_| invalid()),
                _ => Err(invalid()),
            }
        }
    }
}
