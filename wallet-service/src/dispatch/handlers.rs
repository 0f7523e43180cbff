use std::collections::BTreeMap;

use connector_protocol::{Paginate, Protocol, ReturnType, RpcRequest, SignTxRequest};
use serde_json::{json, Value};

use super::encoding::{decode_amount, encode, encode_address, encode_balance, encode_quantity};
use super::{DispatchError, Handler, HandlerContext, Params};
use crate::connection::{Grant, Session};
use crate::network::{self, NetworkInfo};
use crate::signer::CreateTxInput;
use crate::store::{parse_quantity, Asset, Utxo, WalletAddress, WalletRecord};

/// Collateral may not exceed 5 ADA.
pub const MAX_COLLATERAL: u128 = 5_000_000;
pub const MAX_COLLATERAL_INPUTS: usize = 3;

/// Everything a wallet-bound handler works with.
struct Call<'a> {
    ctx: &'a HandlerContext,
    protocol: Protocol,
    grant: Grant,
    wallet: WalletRecord,
    params: Params,
    return_type: ReturnType,
}

impl Call<'_> {
    /// The wallet's network if it is known for this protocol, otherwise the
    /// protocol's default network.
    fn network(&self) -> &'static NetworkInfo {
        network::by_name(&self.wallet.network)
            .filter(|network| network.protocol == self.protocol)
            .or_else(|| Some(self.ctx.network).filter(|network| network.protocol == self.protocol))
            .or_else(|| network::default_for(self.protocol))
            .unwrap_or(self.ctx.network)
    }

    fn addresses(&self, addresses: &[WalletAddress]) -> Result<Value, DispatchError> {
        addresses
            .iter()
            .map(|address| encode_address(address, self.return_type))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn utxos(&self, utxos: &[Utxo]) -> Result<Value, DispatchError> {
        utxos
            .iter()
            .map(|utxo| encode(utxo, self.return_type))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

pub(super) async fn handle(
    ctx: &HandlerContext,
    session: &Session,
    request: RpcRequest,
) -> Result<Value, DispatchError> {
    let handler = Handler::from_name(&request.function)
        .ok_or_else(|| DispatchError::UnknownFunction(request.function.clone()))?;

    if let Handler::IsEnabled(protocol) = handler {
        return Ok(is_enabled(ctx, session, protocol));
    }

    let grant = session.grant(request.protocol).ok_or_else(|| {
        DispatchError::Refused(format!("no {} wallet connection", request.protocol))
    })?;
    let wallet = ctx.store.wallet(grant.wallet_id)?;
    if wallet.protocol != request.protocol {
        return Err(DispatchError::WalletProtocolMismatch {
            wallet_id: wallet.id,
            protocol: request.protocol,
        });
    }

    let call = Call {
        ctx,
        protocol: request.protocol,
        grant,
        wallet,
        params: Params::new(request.params),
        return_type: request.return_type,
    };

    match handler {
        Handler::Hello => Ok(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "protocol": call.protocol,
        })),
        Handler::GetNetworkId => Ok(json!(call.network().network_id)),
        Handler::GetBalance => get_balance(&call),
        Handler::GetUsedAddresses => {
            let page: Option<Paginate> = call.params.optional(0, "paginate")?;
            call.addresses(&paginate(&call.wallet.used_addresses, page)?)
        }
        Handler::GetUnusedAddresses => call.addresses(&call.wallet.unused_addresses),
        Handler::GetChangeAddress => encode_address(&call.wallet.change_address, call.return_type),
        Handler::GetRewardAddresses => call.addresses(&call.wallet.reward_addresses),
        Handler::GetUtxos => get_utxos(&call),
        Handler::GetCollateralUtxos => get_collateral_utxos(&call),
        Handler::SignTx => sign_tx(&call).await,
        Handler::SubmitTx => submit_tx(&call).await,
        Handler::SignData => sign_data(&call).await,
        Handler::CreateTx => create_tx(&call).await,
        Handler::ListNfts => list_nfts(&call),
        Handler::AuthSignHexPayload => auth_sign(&call).await,
        Handler::AuthCheckHexPayload => auth_check(&call).await,
        Handler::IsEnabled(protocol) => Ok(is_enabled(ctx, session, protocol)),
    }
}

fn is_enabled(ctx: &HandlerContext, session: &Session, protocol: Protocol) -> Value {
    Value::Bool(ctx.whitelist.is_whitelisted(&session.origin, protocol).is_some())
}

fn get_balance(call: &Call<'_>) -> Result<Value, DispatchError> {
    let token_id: String = call.params.required(0, "tokenId")?;
    let balance = call.wallet.balance()?;

    if token_id == "*" {
        return encode_balance(&balance, call.return_type);
    }
    if token_id.is_empty() || token_id.eq_ignore_ascii_case(call.protocol.coin_ticker()) {
        return encode_quantity(balance.coin_value()?, call.return_type);
    }
    let quantity = match balance.assets.iter().find(|asset| asset.token_id() == token_id) {
        Some(asset) => parse_quantity(&asset.amount)?,
        None => 0,
    };
    encode_quantity(quantity, call.return_type)
}

fn get_utxos(call: &Call<'_>) -> Result<Value, DispatchError> {
    let amount: Option<String> = call.params.optional(0, "amount")?;
    let page: Option<Paginate> = call.params.optional(1, "paginate")?;

    let selected = match amount {
        None => call.wallet.utxos.clone(),
        Some(raw) => {
            let target = decode_amount(&raw, call.return_type)?;
            match select_largest_first(&call.wallet.utxos, target)? {
                Some(selected) => selected,
                None => return Ok(Value::Null),
            }
        }
    };
    call.utxos(&paginate(&selected, page)?)
}

fn get_collateral_utxos(call: &Call<'_>) -> Result<Value, DispatchError> {
    let raw: String = call.params.required(0, "requiredAmount")?;
    let required = decode_amount(&raw, call.return_type)?;

    match select_collateral(&call.wallet.utxos, required)? {
        Some(selected) => call.utxos(&selected),
        None => Ok(Value::Null),
    }
}

async fn sign_tx(call: &Call<'_>) -> Result<Value, DispatchError> {
    let request: SignTxRequest = call.params.required(0, "tx")?;
    let signed = call
        .ctx
        .signer
        .sign_tx(call.grant.wallet_id, &request)
        .await?;
    Ok(Value::String(signed))
}

async fn submit_tx(call: &Call<'_>) -> Result<Value, DispatchError> {
    let tx: String = call.params.required(0, "tx")?;
    let tx_id = call
        .ctx
        .backend
        .submit_signed_tx(&tx)
        .await
        .map_err(|e| DispatchError::TxSendFailure(format!("{e:#}")))?;

    tracing::info!(wallet_id = call.grant.wallet_id, %tx_id, "transaction submitted");
    // refresh in the background; the page does not wait for it
    drop(call.ctx.sync.sync_wallet(call.grant.wallet_id));
    Ok(Value::String(tx_id))
}

async fn sign_data(call: &Call<'_>) -> Result<Value, DispatchError> {
    let address: String = call.params.required(0, "address")?;
    let payload: String = call.params.required(1, "payload")?;

    if hex::decode(&payload).is_err() {
        return Err(DispatchError::InvalidParams("payload is not hex".to_string()));
    }
    if !call.wallet.owns(&address) {
        return Err(DispatchError::AddressNotPk(address));
    }
    let signature = call
        .ctx
        .signer
        .sign_data(call.grant.wallet_id, &address, &payload)
        .await?;
    Ok(json!(signature))
}

async fn create_tx(call: &Call<'_>) -> Result<Value, DispatchError> {
    let request: Value = call.params.required(0, "request")?;
    let parameters = call.ctx.params.get_protocol_parameters(call.network()).await;

    let built = call
        .ctx
        .signer
        .create_tx(
            call.grant.wallet_id,
            CreateTxInput {
                request: &request,
                utxos: &call.wallet.utxos,
                change_address: &call.wallet.change_address.bech32,
                protocol_parameters: &parameters,
            },
        )
        .await?;
    Ok(built)
}

fn list_nfts(call: &Call<'_>) -> Result<Value, DispatchError> {
    let balance = call.wallet.balance()?;
    let nfts: BTreeMap<String, Asset> = balance
        .assets
        .into_iter()
        .filter(|asset| asset.amount == "1")
        .map(|asset| (asset.token_id(), asset))
        .collect();
    encode(&nfts, call.return_type)
}

fn require_identification(call: &Call<'_>) -> Result<(), DispatchError> {
    if call.grant.auth.is_none() {
        return Err(DispatchError::Refused(
            "identification was not granted".to_string(),
        ));
    }
    Ok(())
}

async fn auth_sign(call: &Call<'_>) -> Result<Value, DispatchError> {
    require_identification(call)?;
    let payload: String = call.params.required(0, "payload")?;
    let signature = call
        .ctx
        .signer
        .auth_sign(call.grant.wallet_id, &payload)
        .await?;
    Ok(Value::String(signature))
}

async fn auth_check(call: &Call<'_>) -> Result<Value, DispatchError> {
    require_identification(call)?;
    let payload: String = call.params.required(0, "payload")?;
    let signature: String = call.params.required(1, "signature")?;
    let valid = call
        .ctx
        .signer
        .auth_verify(call.grant.wallet_id, &payload, &signature)
        .await?;
    Ok(Value::Bool(valid))
}

/// Slice `items` to the requested page. Pages past the end are an error that
/// reports how many pages exist.
pub fn paginate<T: Clone>(items: &[T], page: Option<Paginate>) -> Result<Vec<T>, DispatchError> {
    let Some(Paginate { page, limit }) = page else {
        return Ok(items.to_vec());
    };
    if limit == 0 {
        return Err(DispatchError::InvalidParams(
            "paginate.limit must be positive".to_string(),
        ));
    }
    let max_size = items.len().div_ceil(limit);
    if page > 0 && page >= max_size {
        return Err(DispatchError::Paginate { max_size });
    }
    Ok(items.iter().skip(page * limit).take(limit).cloned().collect())
}

/// Largest outputs first until `target` coin is covered. `None` if the
/// wallet cannot cover it.
pub fn select_largest_first(
    utxos: &[Utxo],
    target: u128,
) -> Result<Option<Vec<Utxo>>, DispatchError> {
    let mut by_coin = utxos
        .iter()
        .map(|utxo| -> Result<_, DispatchError> { Ok((utxo.amount.coin_value()?, utxo)) })
        .collect::<Result<Vec<_>, _>>()?;
    by_coin.sort_by(|a, b| b.0.cmp(&a.0));

    let mut total = 0;
    let mut selected = Vec::new();
    for (coin, utxo) in by_coin {
        if total >= target {
            break;
        }
        total += coin;
        selected.push(utxo.clone());
    }
    Ok((total >= target).then_some(selected))
}

/// Pure-coin outputs usable as collateral for `required`: the smallest single
/// output that covers it, otherwise up to three of the largest.
pub fn select_collateral(
    utxos: &[Utxo],
    required: u128,
) -> Result<Option<Vec<Utxo>>, DispatchError> {
    if required > MAX_COLLATERAL {
        return Err(DispatchError::InvalidParams(format!(
            "collateral above {MAX_COLLATERAL} is not supported"
        )));
    }

    let mut candidates = utxos
        .iter()
        .filter(|utxo| utxo.amount.assets.is_empty())
        .map(|utxo| -> Result<_, DispatchError> { Ok((utxo.amount.coin_value()?, utxo)) })
        .collect::<Result<Vec<_>, _>>()?;
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some((_, single)) = candidates.iter().find(|(coin, _)| *coin >= required) {
        return Ok(Some(vec![(*single).clone()]));
    }

    let mut total = 0;
    let mut selected = Vec::new();
    for (coin, utxo) in candidates.iter().rev().take(MAX_COLLATERAL_INPUTS) {
        total += coin;
        selected.push((*utxo).clone());
        if total >= required {
            return Ok(Some(selected));
        }
    }
    Ok(None)
}
