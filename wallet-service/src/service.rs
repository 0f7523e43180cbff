//! Service context wiring.
//!
//! [`WalletService`] owns every registry and cache for its lifetime and
//! serves relay ports: one session per port, one task per incoming request.

use std::sync::Arc;

use connector_protocol::{ChannelMessage, PortEnd, PortHandshake};
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::connection::approval::PendingApprovals;
use crate::connection::{ConnectionManager, Session};
use crate::dispatch::{Dispatcher, HandlerContext};
use crate::network::{Clock, NetworkInfo};
use crate::params::ProtocolParameterCache;
use crate::pollers::Pollers;
use crate::signer::Signer;
use crate::store::WalletStore;
use crate::subscriptions::SubscriptionRegistry;
use crate::sync::{BackendRefresher, SyncCoordinator, WalletRefresher};
use crate::whitelist::Whitelist;

/// External collaborators and settings a service is built from.
pub struct ServiceDeps {
    pub network: &'static NetworkInfo,
    pub store: Arc<dyn WalletStore>,
    pub backend: Arc<dyn Backend>,
    pub signer: Arc<dyn Signer>,
    pub whitelist: Arc<Whitelist>,
    pub clock: Clock,
    pub price_ticker: String,
}

pub struct WalletService {
    pub network: &'static NetworkInfo,
    pub store: Arc<dyn WalletStore>,
    pub whitelist: Arc<Whitelist>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub sync: Arc<SyncCoordinator>,
    pub params: Arc<ProtocolParameterCache>,
    pub pollers: Arc<Pollers>,
    pub approvals: Arc<PendingApprovals>,
    pub connections: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
}

impl WalletService {
    pub fn new(deps: ServiceDeps) -> Arc<Self> {
        let refresher = Arc::new(BackendRefresher::new(deps.store.clone(), deps.backend.clone()));
        Self::with_refresher(deps, refresher)
    }

    /// Build with a custom wallet refresher instead of the backend one.
    pub fn with_refresher(deps: ServiceDeps, refresher: Arc<dyn WalletRefresher>) -> Arc<Self> {
        let ServiceDeps {
            network,
            store,
            backend,
            signer,
            whitelist,
            clock,
            price_ticker,
        } = deps;

        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let sync = SyncCoordinator::new(refresher, subscriptions.clone());
        let params = Arc::new(ProtocolParameterCache::new(backend.clone(), clock.clone()));
        let pollers = Pollers::new(backend.clone(), subscriptions.clone(), clock, price_ticker);
        let approvals = Arc::new(PendingApprovals::new());
        let connections = ConnectionManager::new(whitelist.clone(), approvals.clone(), signer.clone());

        let dispatcher = Arc::new(Dispatcher::new(HandlerContext {
            store: store.clone(),
            signer,
            backend,
            sync: sync.clone(),
            whitelist: whitelist.clone(),
            params: params.clone(),
            network,
        }));

        Arc::new(Self {
            network,
            store,
            whitelist,
            subscriptions,
            sync,
            params,
            pollers,
            approvals,
            connections,
            dispatcher,
        })
    }

    /// Serve a port opened by the relay for one tab. The task ends when the
    /// port closes or the session is revoked.
    pub fn open_port(self: &Arc<Self>, handshake: PortHandshake, port: PortEnd) -> JoinHandle<()> {
        let session = self
            .connections
            .open_session(handshake.tab_id, handshake.origin);
        let service = self.clone();
        tokio::spawn(async move { service.run_session(session, port).await })
    }

    async fn run_session(&self, session: Arc<Session>, port: PortEnd) {
        let (outbound, mut inbound) = port.split();
        // request tasks reply through the session, so closing it closes the port
        session.attach_outbound(outbound);

        loop {
            tokio::select! {
                _ = session.closed() => {
                    tracing::debug!(tab_id = session.tab_id, "closing revoked session port");
                    break;
                }
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(&session, message),
                    None => {
                        tracing::debug!(tab_id = session.tab_id, "port closed by relay");
                        break;
                    }
                },
            }
        }

        self.connections.close_session(&session);
    }

    fn handle_message(&self, session: &Arc<Session>, message: ChannelMessage) {
        match message {
            ChannelMessage::ConnectRequest(request) => {
                tracing::debug!(tab_id = session.tab_id, protocol = %request.protocol, "connect request");
                let connections = self.connections.clone();
                let session = session.clone();
                tokio::spawn(async move {
                    let reply = connections.connect(&session, request).await;
                    reply_unless_closed(&session, ChannelMessage::Connected(reply));
                });
            }
            ChannelMessage::RpcRequest(request) => {
                tracing::debug!(tab_id = session.tab_id, uid = request.uid, function = %request.function, "rpc request");
                let dispatcher = self.dispatcher.clone();
                let session = session.clone();
                tokio::spawn(async move {
                    let response = dispatcher.dispatch(session.clone(), request).await;
                    reply_unless_closed(&session, ChannelMessage::RpcResponse(response));
                });
            }
            other => {
                tracing::warn!(tab_id = session.tab_id, kind = %other.kind(), "unexpected message from relay");
            }
        }
    }
}

fn reply_unless_closed(session: &Session, message: ChannelMessage) {
    let kind = message.kind();
    if !session.send(message) {
        tracing::debug!(tab_id = session.tab_id, %kind, "dropping reply for closed session");
    }
}
