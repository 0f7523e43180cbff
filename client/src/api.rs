// Typed wallet API handed to a page after a successful `enable`.
//
// Parameters travel as a positional JSON array; optional arguments are sent
// as `null`. Wallet-domain values come back hex CBOR encoded or as plain JSON
// depending on the client's return type, so they are surfaced as `Value`.

use std::sync::Arc;

use connector_protocol::{
    function, AuthInfo, ConnectorError, Paginate, Protocol, SignTxRequest,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::client::ClientInner;

#[derive(Clone)]
pub struct WalletApi {
    inner: Arc<ClientInner>,
    protocol: Protocol,
    auth: AuthApi,
}

impl std::fmt::Debug for WalletApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletApi")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl WalletApi {
    pub(crate) fn new(inner: Arc<ClientInner>, protocol: Protocol, auth: Option<AuthInfo>) -> Self {
        let auth = AuthApi {
            inner: inner.clone(),
            protocol,
            info: auth,
        };
        Self {
            inner,
            protocol,
            auth,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Identification sub-API. Its calls refuse unless identification was granted.
    pub fn auth(&self) -> &AuthApi {
        &self.auth
    }

    async fn call(&self, function: &str, params: Value) -> Result<Value, ConnectorError> {
        self.inner.connections.ensure_connected(self.protocol)?;
        self.inner.call(self.protocol, function, params).await
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        function: &str,
        params: Value,
    ) -> Result<T, ConnectorError> {
        let value = self.call(function, params).await?;
        decode(function, value)
    }

    pub async fn hello(&self) -> Result<Value, ConnectorError> {
        self.call(function::HELLO, json!([])).await
    }

    pub async fn get_network_id(&self) -> Result<u32, ConnectorError> {
        self.call_as(function::GET_NETWORK_ID, json!([])).await
    }

    /// Balance of `token_id`; `"*"` returns every asset.
    pub async fn get_balance(&self, token_id: &str) -> Result<Value, ConnectorError> {
        self.call(function::GET_BALANCE, json!([token_id])).await
    }

    pub async fn get_used_addresses(
        &self,
        paginate: Option<Paginate>,
    ) -> Result<Vec<String>, ConnectorError> {
        self.call_as(function::GET_USED_ADDRESSES, json!([paginate]))
            .await
    }

    pub async fn get_unused_addresses(&self) -> Result<Vec<String>, ConnectorError> {
        self.call_as(function::GET_UNUSED_ADDRESSES, json!([])).await
    }

    pub async fn get_change_address(&self) -> Result<String, ConnectorError> {
        self.call_as(function::GET_CHANGE_ADDRESS, json!([])).await
    }

    pub async fn get_reward_addresses(&self) -> Result<Vec<String>, ConnectorError> {
        self.call_as(function::GET_REWARD_ADDRESSES, json!([])).await
    }

    /// `None` when the wallet cannot cover `amount`.
    pub async fn get_utxos(
        &self,
        amount: Option<&str>,
        paginate: Option<Paginate>,
    ) -> Result<Option<Vec<Value>>, ConnectorError> {
        self.call_as(function::GET_UTXOS, json!([amount, paginate]))
            .await
    }

    pub async fn get_collateral_utxos(
        &self,
        required_amount: &str,
    ) -> Result<Option<Vec<Value>>, ConnectorError> {
        self.call_as(function::GET_COLLATERAL_UTXOS, json!([required_amount]))
            .await
    }

    pub async fn sign_tx(&self, request: SignTxRequest) -> Result<String, ConnectorError> {
        self.call_as(function::SIGN_TX, json!([request])).await
    }

    /// Returns the transaction id.
    pub async fn submit_tx(&self, tx: &str) -> Result<String, ConnectorError> {
        self.call_as(function::SUBMIT_TX, json!([tx])).await
    }

    pub async fn sign_data(&self, address: &str, payload_hex: &str) -> Result<Value, ConnectorError> {
        self.call(function::SIGN_DATA, json!([address, payload_hex]))
            .await
    }

    pub async fn create_tx(&self, request: Value) -> Result<Value, ConnectorError> {
        self.call(function::CREATE_TX, json!([request])).await
    }

    pub async fn list_nfts(&self) -> Result<Value, ConnectorError> {
        self.call(function::LIST_NFTS, json!([])).await
    }
}

#[derive(Clone)]
pub struct AuthApi {
    inner: Arc<ClientInner>,
    protocol: Protocol,
    info: Option<AuthInfo>,
}

impl AuthApi {
    pub fn is_enabled(&self) -> bool {
        self.info.is_some()
    }

    pub fn wallet_pubkey(&self) -> Option<&str> {
        self.info.as_ref().map(|info| info.wallet_pubkey.as_str())
    }

    fn guard(&self) -> Result<(), ConnectorError> {
        if self.info.is_none() {
            return Err(ConnectorError::Refused(
                "identification was not granted".to_string(),
            ));
        }
        self.inner.connections.ensure_connected(self.protocol)
    }

    pub async fn sign_hex_payload(&self, payload_hex: &str) -> Result<String, ConnectorError> {
        self.guard()?;
        let value = self
            .inner
            .call(self.protocol, function::AUTH_SIGN_HEX_PAYLOAD, json!([payload_hex]))
            .await?;
        decode(function::AUTH_SIGN_HEX_PAYLOAD, value)
    }

    pub async fn check_hex_payload(
        &self,
        payload_hex: &str,
        signature_hex: &str,
    ) -> Result<bool, ConnectorError> {
        self.guard()?;
        let value = self
            .inner
            .call(
                self.protocol,
                function::AUTH_CHECK_HEX_PAYLOAD,
                json!([payload_hex, signature_hex]),
            )
            .await?;
        decode(function::AUTH_CHECK_HEX_PAYLOAD, value)
    }
}

fn decode<T: DeserializeOwned>(function: &str, value: Value) -> Result<T, ConnectorError> {
    serde_json::from_value(value)
        .map_err(|e| ConnectorError::Internal(format!("malformed {function} response: {e}")))
}
