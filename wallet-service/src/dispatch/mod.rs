//! RPC dispatch table.
//!
//! Every request runs in its own task and always produces exactly one
//! response: handler errors and handler panics become `{err}` returns.

pub mod encoding;
mod error;
mod handlers;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use connector_protocol::{function, ApiError, Protocol, RpcRequest, RpcResponse, RpcReturn};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backend::Backend;
use crate::connection::Session;
use crate::network::NetworkInfo;
use crate::params::ProtocolParameterCache;
use crate::signer::Signer;
use crate::store::WalletStore;
use crate::sync::SyncCoordinator;
use crate::whitelist::Whitelist;

pub use error::DispatchError;
pub use handlers::{paginate, select_collateral, select_largest_first};

/// Collaborators a handler may reach.
pub struct HandlerContext {
    pub store: Arc<dyn WalletStore>,
    pub signer: Arc<dyn Signer>,
    pub backend: Arc<dyn Backend>,
    pub sync: Arc<SyncCoordinator>,
    pub whitelist: Arc<Whitelist>,
    pub params: Arc<ProtocolParameterCache>,
    /// Network used when a wallet names none the service knows
    pub network: &'static NetworkInfo,
}

/// Handler selected by function name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Hello,
    GetNetworkId,
    GetBalance,
    GetUsedAddresses,
    GetUnusedAddresses,
    GetChangeAddress,
    GetRewardAddresses,
    GetUtxos,
    GetCollateralUtxos,
    SignTx,
    SubmitTx,
    SignData,
    CreateTx,
    ListNfts,
    AuthSignHexPayload,
    AuthCheckHexPayload,
    IsEnabled(Protocol),
}

impl Handler {
    pub fn from_name(name: &str) -> Option<Handler> {
        if let Some(protocol) = name.strip_prefix(function::IS_ENABLED_PREFIX) {
            return protocol.parse().ok().map(Handler::IsEnabled);
        }
        let handler = match name {
            function::HELLO => Handler::Hello,
            function::GET_NETWORK_ID => Handler::GetNetworkId,
            function::GET_BALANCE => Handler::GetBalance,
            function::GET_USED_ADDRESSES => Handler::GetUsedAddresses,
            function::GET_UNUSED_ADDRESSES => Handler::GetUnusedAddresses,
            function::GET_CHANGE_ADDRESS => Handler::GetChangeAddress,
            function::GET_REWARD_ADDRESSES => Handler::GetRewardAddresses,
            function::GET_UTXOS => Handler::GetUtxos,
            function::GET_COLLATERAL_UTXOS => Handler::GetCollateralUtxos,
            function::SIGN_TX => Handler::SignTx,
            function::SUBMIT_TX => Handler::SubmitTx,
            function::SIGN_DATA => Handler::SignData,
            function::CREATE_TX => Handler::CreateTx,
            function::LIST_NFTS => Handler::ListNfts,
            function::AUTH_SIGN_HEX_PAYLOAD => Handler::AuthSignHexPayload,
            function::AUTH_CHECK_HEX_PAYLOAD => Handler::AuthCheckHexPayload,
            _ => return None,
        };
        Some(handler)
    }
}

/// Positional call arguments. A missing or `null` argument is absent.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<Value>);

impl Params {
    pub fn new(raw: Value) -> Self {
        match raw {
            Value::Null => Params(Vec::new()),
            Value::Array(values) => Params(values),
            single => Params(vec![single]),
        }
    }

    pub fn optional<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> Result<Option<T>, DispatchError> {
        match self.0.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| DispatchError::InvalidParams(format!("{name}: {e}"))),
        }
    }

    pub fn required<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, DispatchError> {
        self.optional(index, name)?
            .ok_or_else(|| DispatchError::InvalidParams(format!("missing argument {name}")))
    }
}

pub struct Dispatcher {
    ctx: Arc<HandlerContext>,
}

impl Dispatcher {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub async fn dispatch(&self, session: Arc<Session>, request: RpcRequest) -> RpcResponse {
        let uid = request.uid;
        let function = request.function.clone();

        let outcome = AssertUnwindSafe(handlers::handle(&self.ctx, &session, request))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(value)) => RpcReturn::Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(uid, %function, tab_id = session.tab_id, error = %e, "rpc call failed");
                RpcReturn::Err(e.to_api_error())
            }
            Err(_) => {
                tracing::error!(uid, %function, tab_id = session.tab_id, "rpc handler panicked");
                RpcReturn::Err(ApiError::internal(format!("handler for {function} panicked")))
            }
        };
        RpcResponse { uid, result }
    }
}
