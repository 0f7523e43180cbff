// Channel message shapes exchanged between page, relay and service.
//
// The JSON form is discriminated by a `type` field. Connect requests encode
// the protocol inside the type string (`connector_connect_request/cardano`),
// so the envelope is converted by hand instead of with an internally tagged
// serde enum.

use std::fmt;
use std::str::FromStr;

use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ApiError, ConnectorError};
use crate::TabId;

pub const CONNECT_REQUEST_PREFIX: &str = "connector_connect_request/";
pub const CONNECTED: &str = "connector_connected";
pub const RPC_REQUEST: &str = "connector_rpc_request";
pub const RPC_RESPONSE: &str = "connector_rpc_response";

/// Function names accepted by the service dispatch table.
pub mod function {
    use super::Protocol;

    pub const HELLO: &str = "hello";
    pub const GET_NETWORK_ID: &str = "get_network_id";
    pub const GET_BALANCE: &str = "get_balance";
    pub const GET_USED_ADDRESSES: &str = "get_used_addresses";
    pub const GET_UNUSED_ADDRESSES: &str = "get_unused_addresses";
    pub const GET_CHANGE_ADDRESS: &str = "get_change_address";
    pub const GET_REWARD_ADDRESSES: &str = "get_reward_addresses";
    pub const GET_UTXOS: &str = "get_utxos";
    pub const GET_COLLATERAL_UTXOS: &str = "get_collateral_utxos";
    pub const SIGN_TX: &str = "sign_tx";
    pub const SUBMIT_TX: &str = "submit_tx";
    pub const SIGN_DATA: &str = "sign_data";
    pub const CREATE_TX: &str = "create_tx";
    pub const LIST_NFTS: &str = "list_nfts";
    pub const AUTH_SIGN_HEX_PAYLOAD: &str = "auth_sign_hex_payload";
    pub const AUTH_CHECK_HEX_PAYLOAD: &str = "auth_check_hex_payload";
    pub const IS_ENABLED_PREFIX: &str = "is_enabled/";

    pub fn is_enabled(protocol: Protocol) -> String {
        format!("{IS_ENABLED_PREFIX}{protocol}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Cardano,
    Ergo,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Cardano => "cardano",
            Protocol::Ergo => "ergo",
        }
    }

    /// Ticker of the chain's native coin, accepted as a token id by `get_balance`.
    pub fn coin_ticker(&self) -> &'static str {
        match self {
            Protocol::Cardano => "ADA",
            Protocol::Ergo => "ERG",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cardano" => Ok(Protocol::Cardano),
            "ergo" => Ok(Protocol::Ergo),
            other => Err(ConnectorError::InvalidRequest(format!(
                "unknown protocol: {other}"
            ))),
        }
    }
}

/// Encoding the service uses for wallet-domain values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    /// Hex of the CBOR encoding
    #[default]
    Cbor,
    /// Plain structured JSON
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub url: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub request_identification: bool,
    #[serde(default)]
    pub only_silent: bool,
}

impl ConnectionRequest {
    pub fn new(url: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            url: url.into(),
            protocol,
            request_identification: false,
            only_silent: false,
        }
    }

    pub fn with_identification(mut self) -> Self {
        self.request_identification = true;
        self
    }

    pub fn silent_only(mut self) -> Self {
        self.only_silent = true;
        self
    }
}

/// Public half of the identification grant handed back to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub wallet_pubkey: String,
}

/// Terminal reply to a connect request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedReply {
    pub protocol: Protocol,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ApiError>,
}

impl ConnectedReply {
    pub fn accepted(protocol: Protocol, auth: Option<AuthInfo>) -> Self {
        Self {
            protocol,
            success: true,
            auth,
            err: None,
        }
    }

    pub fn refused(protocol: Protocol, err: ApiError) -> Self {
        Self {
            protocol,
            success: false,
            auth: None,
            err: Some(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub protocol: Protocol,
    pub uid: u64,
    pub function: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub return_type: ReturnType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcReturn {
    #[serde(rename = "ok")]
    Ok(Value),
    #[serde(rename = "err")]
    Err(ApiError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub uid: u64,
    #[serde(rename = "return")]
    pub result: RpcReturn,
}

/// Page window for address and UTXO listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginate {
    pub page: usize,
    pub limit: usize,
}

/// Argument of `sign_tx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTxRequest {
    pub tx: String,
    #[serde(default)]
    pub partial_sign: bool,
    #[serde(default)]
    pub return_tx: bool,
}

/// First line a relay writes on a service connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortHandshake {
    pub tab_id: TabId,
    pub origin: String,
}

/// First line a page writes on a relay connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHello {
    pub origin: String,
}

/// Everything that travels over a port.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    ConnectRequest(ConnectionRequest),
    Connected(ConnectedReply),
    RpcRequest(RpcRequest),
    RpcResponse(RpcResponse),
}

impl ChannelMessage {
    /// Value of the `type` field on the wire.
    pub fn kind(&self) -> String {
        match self {
            ChannelMessage::ConnectRequest(req) => {
                format!("{CONNECT_REQUEST_PREFIX}{}", req.protocol)
            }
            ChannelMessage::Connected(_) => CONNECTED.to_string(),
            ChannelMessage::RpcRequest(_) => RPC_REQUEST.to_string(),
            ChannelMessage::RpcResponse(_) => RPC_RESPONSE.to_string(),
        }
    }

    fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        let body = match self {
            ChannelMessage::ConnectRequest(req) => {
                let mut body = to_object(req)?;
                body.remove("protocol");
                body
            }
            ChannelMessage::Connected(reply) => to_object(reply)?,
            ChannelMessage::RpcRequest(req) => to_object(req)?,
            ChannelMessage::RpcResponse(resp) => to_object(resp)?,
        };
        Ok(Envelope {
            kind: self.kind(),
            body,
        })
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, serde_json::Error> {
        let Envelope { kind, mut body } = envelope;

        if let Some(protocol) = kind.strip_prefix(CONNECT_REQUEST_PREFIX) {
            body.insert("protocol".to_string(), Value::String(protocol.to_string()));
            return serde_json::from_value(Value::Object(body)).map(ChannelMessage::ConnectRequest);
        }

        let body = Value::Object(body);
        match kind.as_str() {
            CONNECTED => serde_json::from_value(body).map(ChannelMessage::Connected),
            RPC_REQUEST => serde_json::from_value(body).map(ChannelMessage::RpcRequest),
            RPC_RESPONSE => serde_json::from_value(body).map(ChannelMessage::RpcResponse),
            other => Err(de::Error::custom(format!("unknown message type: {other}"))),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    body: Map<String, Value>,
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(ser::Error::custom(format!(
            "message body must be an object, got {other}"
        ))),
    }
}

impl Serialize for ChannelMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_envelope()
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChannelMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let envelope = Envelope::deserialize(deserializer)?;
        ChannelMessage::from_envelope(envelope).map_err(de::Error::custom)
    }
}
