//! Wire contract shared by the three connector contexts.
//!
//! - Page context (`connector-client`): the API object a website talks to
//! - Relay context (`connector-relay`): forwards messages, holds no wallet data
//! - Service context (`wallet-service`): wallet state, caches, dispatch table
//!
//! Everything that crosses a context boundary is a [`ChannelMessage`] carried
//! over a [`PortEnd`]. A closed port is the only disconnect signal.

pub mod error;
pub mod message;
pub mod notifier;
pub mod port;

pub use error::{codes, ApiError, ConnectorError};
pub use message::{
    function, AuthInfo, ChannelMessage, ConnectedReply, ConnectionRequest, PageHello, Paginate,
    PortHandshake, Protocol, ReturnType, RpcRequest, RpcResponse, RpcReturn, SignTxRequest,
};
pub use notifier::DisconnectNotifier;
pub use port::{port_pair, Acceptor, PortEnd};

/// Identifier of a wallet inside the Wallet Store.
pub type WalletId = u32;

/// Identifier of a browser tab (page sessions and UI subscriptions).
pub type TabId = u64;
