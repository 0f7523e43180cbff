//! Service-side connection lifecycle.
//!
//! Each relay port is a [`Session`] bound to one tab and the origin the relay
//! observed. A connect request either replays a whitelisted grant silently,
//! is refused (`onlySilent`), or goes through a single approval prompt per
//! (tab, protocol) that concurrent requests on the same tab join.

pub mod approval;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use connector_protocol::{
    ApiError, AuthInfo, ChannelMessage, ConnectedReply, ConnectionRequest, DisconnectNotifier,
    Protocol, TabId, WalletId,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::signer::Signer;
use crate::whitelist::{Whitelist, WhitelistEntry, WhitelistEvent};
use approval::{ApprovalDecision, ApprovalPrompt, ApprovalRequest};

/// Access granted to a session for one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub wallet_id: WalletId,
    /// Present when identification was granted.
    pub auth: Option<AuthInfo>,
}

pub struct Session {
    pub tab_id: TabId,
    pub origin: String,
    grants: Mutex<HashMap<Protocol, Grant>>,
    /// Sole sender toward the port. Taken on disconnect so the port closes
    /// even while request tasks are still running.
    outbound: Mutex<Option<UnboundedSender<ChannelMessage>>>,
    notifier: DisconnectNotifier,
    closer: Notify,
}

impl Session {
    fn new(tab_id: TabId, origin: String) -> Self {
        Self {
            tab_id,
            origin,
            grants: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            notifier: DisconnectNotifier::new(),
            closer: Notify::new(),
        }
    }

    pub fn grant(&self, protocol: Protocol) -> Option<Grant> {
        self.grants.lock().get(&protocol).cloned()
    }

    pub fn on_disconnect<F>(&self, listener: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.notifier.on_disconnect(listener)
    }

    pub fn is_disconnected(&self) -> bool {
        self.notifier.is_disconnected()
    }

    /// Hand the port's sender to the session. A session that is already
    /// disconnected drops it instead.
    pub fn attach_outbound(&self, sender: UnboundedSender<ChannelMessage>) -> bool {
        *self.outbound.lock() = Some(sender);
        // a disconnect racing the store above may have found nothing to take
        if self.is_disconnected() {
            self.outbound.lock().take();
            return false;
        }
        true
    }

    /// Send toward the page. `false` once the session is closed.
    pub fn send(&self, message: ChannelMessage) -> bool {
        match self.outbound.lock().as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Fire the disconnect event and ask the session loop to close the port.
    /// Only the first call has any effect.
    pub fn disconnect(&self, reason: &str) -> bool {
        if !self.notifier.fire() {
            return false;
        }
        tracing::info!(tab_id = self.tab_id, origin = %self.origin, reason, "session disconnected");
        self.grants.lock().clear();
        self.outbound.lock().take();
        self.closer.notify_one();
        true
    }

    /// Resolves once `disconnect` was called.
    pub async fn closed(&self) {
        self.closer.notified().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tab_id", &self.tab_id)
            .field("origin", &self.origin)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

type PromptFuture = Shared<BoxFuture<'static, Option<WhitelistEntry>>>;

/// Outstanding prompts keyed by (tab, protocol), tagged with a generation so
/// a settling prompt never removes its successor.
type PromptRegistry = Mutex<HashMap<(TabId, Protocol), (u64, PromptFuture)>>;

pub struct ConnectionManager {
    whitelist: Arc<Whitelist>,
    prompt: Arc<dyn ApprovalPrompt>,
    signer: Arc<dyn Signer>,
    sessions: Mutex<HashMap<TabId, Arc<Session>>>,
    prompts: Arc<PromptRegistry>,
    next_prompt: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        whitelist: Arc<Whitelist>,
        prompt: Arc<dyn ApprovalPrompt>,
        signer: Arc<dyn Signer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            whitelist,
            prompt,
            signer,
            sessions: Mutex::new(HashMap::new()),
            prompts: Arc::new(Mutex::new(HashMap::new())),
            next_prompt: AtomicU64::new(0),
        })
    }

    pub fn open_session(&self, tab_id: TabId, origin: impl Into<String>) -> Arc<Session> {
        let session = Arc::new(Session::new(tab_id, origin.into()));
        let replaced = self.sessions.lock().insert(tab_id, session.clone());
        if let Some(previous) = replaced {
            self.end_session(&previous, "tab reconnected");
        }
        tracing::debug!(tab_id, origin = %session.origin, "session opened");
        session
    }

    /// The port of `session` is gone.
    pub fn close_session(&self, session: &Arc<Session>) {
        self.end_session(session, "port closed");
        let mut sessions = self.sessions.lock();
        if sessions
            .get(&session.tab_id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(&session.tab_id);
        }
    }

    /// Disconnect `session` and withdraw the approval prompts its tab left
    /// open. Only the first call for a session does anything.
    fn end_session(&self, session: &Session, reason: &str) -> bool {
        if !session.disconnect(reason) {
            return false;
        }
        let tab_id = session.tab_id;
        self.prompts.lock().retain(|(tab, _), _| *tab != tab_id);
        self.prompt.withdraw(tab_id);
        true
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub async fn connect(&self, session: &Arc<Session>, request: ConnectionRequest) -> ConnectedReply {
        let protocol = request.protocol;
        if request.url != session.origin {
            tracing::warn!(tab_id = session.tab_id, claimed = %request.url, origin = %session.origin, "connect url differs from session origin");
        }

        if let Some(entry) = self.whitelist.is_whitelisted(&session.origin, protocol) {
            tracing::info!(tab_id = session.tab_id, origin = %session.origin, %protocol, "silent reconnect");
            return self.bind(session, protocol, entry).await;
        }

        if request.only_silent {
            tracing::debug!(tab_id = session.tab_id, origin = %session.origin, "silent-only request for unknown site");
            return ConnectedReply::refused(protocol, ApiError::refused("site is not whitelisted"));
        }

        let approval = ApprovalRequest {
            tab_id: session.tab_id,
            url: session.origin.clone(),
            protocol,
            request_identification: request.request_identification,
        };
        match self.prompt_once(approval).await {
            Some(entry) => self.bind(session, protocol, entry).await,
            None => ConnectedReply::refused(protocol, ApiError::refused("user rejected connection")),
        }
    }

    /// Join the outstanding prompt for (tab, protocol) or start one. The
    /// approved entry is written to the whitelist once, by the prompt itself.
    fn prompt_once(&self, request: ApprovalRequest) -> PromptFuture {
        let key = (request.tab_id, request.protocol);
        let mut prompts = self.prompts.lock();
        if let Some((_, outstanding)) = prompts.get(&key) {
            tracing::debug!(tab_id = key.0, protocol = %key.1, "joining outstanding approval prompt");
            return outstanding.clone();
        }

        let generation = self.next_prompt.fetch_add(1, Ordering::Relaxed);
        let prompt = self.prompt.clone();
        let whitelist = self.whitelist.clone();
        let registry = Arc::downgrade(&self.prompts);
        let future: PromptFuture = async move {
            let decision = prompt.prompt(request.clone()).await;
            if let Some(registry) = registry.upgrade() {
                let mut registry = registry.lock();
                if registry.get(&key).is_some_and(|(current, _)| *current == generation) {
                    registry.remove(&key);
                }
            }
            match decision {
                ApprovalDecision::Approved { wallet_id } => {
                    let entry = WhitelistEntry {
                        url: request.url,
                        protocol: request.protocol,
                        wallet_id,
                        auth_enabled: request.request_identification,
                    };
                    whitelist.upsert(entry.clone());
                    Some(entry)
                }
                ApprovalDecision::Rejected => None,
            }
        }
        .boxed()
        .shared();

        prompts.insert(key, (generation, future.clone()));
        future
    }

    async fn bind(&self, session: &Session, protocol: Protocol, entry: WhitelistEntry) -> ConnectedReply {
        let auth = if entry.auth_enabled {
            match self.signer.auth_pubkey(entry.wallet_id).await {
                Ok(wallet_pubkey) => Some(AuthInfo { wallet_pubkey }),
                Err(e) => {
                    tracing::warn!(wallet_id = entry.wallet_id, "auth pubkey unavailable: {}", e);
                    return ConnectedReply::refused(
                        protocol,
                        ApiError::internal(format!("identification unavailable: {e}")),
                    );
                }
            }
        } else {
            None
        };

        if session.is_disconnected() {
            return ConnectedReply::refused(protocol, ApiError::refused("session closed"));
        }
        session.grants.lock().insert(
            protocol,
            Grant {
                wallet_id: entry.wallet_id,
                auth: auth.clone(),
            },
        );
        ConnectedReply::accepted(protocol, auth)
    }

    /// Disconnect every live session holding a grant for (url, protocol).
    pub fn revoke_sessions(&self, url: &str, protocol: Protocol) -> usize {
        let affected: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .values()
            .filter(|session| session.origin == url && session.grant(protocol).is_some())
            .cloned()
            .collect();

        affected
            .iter()
            .filter(|session| self.end_session(session, "access revoked"))
            .count()
    }

    /// Follow whitelist revocations for as long as the manager lives.
    pub fn watch_revocations(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.whitelist.subscribe();
        let manager: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(WhitelistEvent::Revoked { url, protocol }) => {
                        let Some(manager) = manager.upgrade() else { break };
                        let closed = manager.revoke_sessions(&url, protocol);
                        tracing::info!(%url, %protocol, closed, "revocation applied");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "revocation events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
