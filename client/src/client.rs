use std::sync::Arc;
use std::time::Duration;

use connector_protocol::{
    function, port, ChannelMessage, ConnectionRequest, ConnectorError, DisconnectNotifier,
    PageHello, PortEnd, Protocol, ReturnType,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::WalletApi;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::multiplexer::Multiplexer;

/// Client-side settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientConfig {
    /// Reject calls that get no response in time. `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub return_type: ReturnType,
}

/// Options for `enable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnableOptions {
    pub request_identification: bool,
    pub only_silent: bool,
}

pub(crate) struct ClientInner {
    pub(crate) mux: Multiplexer,
    pub(crate) connections: ConnectionManager,
    pub(crate) notifier: DisconnectNotifier,
    return_type: Mutex<ReturnType>,
    origin: String,
}

impl ClientInner {
    /// Issue an RPC with the return type in effect right now.
    pub(crate) async fn call(
        &self,
        protocol: Protocol,
        function: &str,
        params: Value,
    ) -> Result<Value, ConnectorError> {
        let return_type = *self.return_type.lock();
        self.mux.call(protocol, function, params, return_type).await
    }

    fn teardown(&self) {
        let rejected = self.mux.close();
        self.connections.teardown();
        if self.notifier.fire() {
            tracing::info!(origin = %self.origin, rejected, "wallet connection lost");
        }
    }
}

/// The API object a page holds. One per page; owns the port to the relay.
pub struct ConnectorClient {
    inner: Arc<ClientInner>,
    router: JoinHandle<()>,
}

impl ConnectorClient {
    /// Wrap an already connected port. `origin` is only used for requests and logs;
    /// the relay substitutes the origin it observed.
    pub fn new(port: PortEnd, origin: impl Into<String>, config: ClientConfig) -> Self {
        let (outbound, inbound) = port.split();
        let inner = Arc::new(ClientInner {
            mux: Multiplexer::new(outbound.clone(), config.call_timeout),
            connections: ConnectionManager::new(outbound),
            notifier: DisconnectNotifier::new(),
            return_type: Mutex::new(config.return_type),
            origin: origin.into(),
        });
        let router = tokio::spawn(route_inbound(inner.clone(), inbound));
        Self { inner, router }
    }

    /// Dial a relay over TCP and introduce the page with its origin.
    pub async fn connect_tcp<A: ToSocketAddrs>(
        addr: A,
        origin: impl Into<String>,
        config: ClientConfig,
    ) -> std::io::Result<Self> {
        let origin = origin.into();
        let port = port::connect_stream(
            addr,
            &PageHello {
                origin: origin.clone(),
            },
        )
        .await?;
        Ok(Self::new(port, origin, config))
    }

    /// Ask the wallet for access. Concurrent calls share one connect request.
    pub async fn enable(
        &self,
        protocol: Protocol,
        options: EnableOptions,
    ) -> Result<WalletApi, ConnectorError> {
        let mut request = ConnectionRequest::new(self.inner.origin.clone(), protocol);
        request.request_identification = options.request_identification;
        request.only_silent = options.only_silent;

        let auth = self.inner.connections.enable(request).await?;
        Ok(WalletApi::new(self.inner.clone(), protocol, auth))
    }

    /// Whether the site is whitelisted for `protocol`, without prompting.
    pub async fn is_enabled(&self, protocol: Protocol) -> Result<bool, ConnectorError> {
        let value = self
            .inner
            .call(protocol, &function::is_enabled(protocol), Value::Null)
            .await?;
        value.as_bool().ok_or_else(|| {
            ConnectorError::Internal(format!("malformed is_enabled response: {value}"))
        })
    }

    /// Applies to calls issued after this returns; in-flight calls keep theirs.
    pub fn set_return_type(&self, return_type: ReturnType) {
        *self.inner.return_type.lock() = return_type;
    }

    pub fn return_type(&self) -> ReturnType {
        *self.inner.return_type.lock()
    }

    pub fn connection_state(&self, protocol: Protocol) -> ConnectionState {
        self.inner.connections.state(protocol)
    }

    /// Register a one-shot disconnect listener. Returns `false` if the
    /// connection is already gone.
    pub fn on_disconnect<F>(&self, listener: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.notifier.on_disconnect(listener)
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.notifier.is_disconnected()
    }
}

impl Drop for ConnectorClient {
    fn drop(&mut self) {
        self.router.abort();
        self.inner.teardown();
    }
}

async fn route_inbound(
    inner: Arc<ClientInner>,
    mut inbound: mpsc::UnboundedReceiver<ChannelMessage>,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            ChannelMessage::RpcResponse(response) => {
                inner.mux.resolve(response);
            }
            ChannelMessage::Connected(reply) => inner.connections.settle(reply),
            other => {
                tracing::warn!(kind = %other.kind(), "ignoring unexpected message from relay");
            }
        }
    }
    inner.teardown();
}
