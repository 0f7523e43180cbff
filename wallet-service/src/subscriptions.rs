use std::collections::HashMap;

use connector_protocol::{TabId, WalletId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::PriceTicker;
use crate::pollers::ServerStatus;

/// Events published to UI listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServiceEvent {
    #[serde(rename_all = "camelCase")]
    SubscriptionChange { subscribers: usize },
    #[serde(rename_all = "camelCase")]
    WalletStateUpdated { wallet_id: WalletId, success: bool },
    PriceUpdate(PriceTicker),
    ServerStatus(ServerStatus),
}

/// Open UI tabs and the wallet each one shows. Pollers run only while at
/// least one tab is subscribed.
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<TabId, Option<WalletId>>>,
    events: broadcast::Sender<ServiceEvent>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Add or replace the subscription for `tab_id`.
    pub fn subscribe(&self, tab_id: TabId, active_wallet_id: Option<WalletId>) {
        let subscribers = {
            let mut entries = self.entries.lock();
            entries.insert(tab_id, active_wallet_id);
            entries.len()
        };
        tracing::debug!(tab_id, ?active_wallet_id, subscribers, "tab subscribed");
        self.publish(ServiceEvent::SubscriptionChange { subscribers });
    }

    /// Tab closed. Emits a change event even if the tab was not subscribed.
    pub fn unsubscribe(&self, tab_id: TabId) -> bool {
        let (removed, subscribers) = {
            let mut entries = self.entries.lock();
            let removed = entries.remove(&tab_id).is_some();
            (removed, entries.len())
        };
        tracing::debug!(tab_id, removed, subscribers, "tab unsubscribed");
        self.publish(ServiceEvent::SubscriptionChange { subscribers });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Wallets currently shown by at least one tab.
    pub fn active_wallets(&self) -> Vec<WalletId> {
        let mut wallets: Vec<WalletId> = self.entries.lock().values().flatten().copied().collect();
        wallets.sort_unstable();
        wallets.dedup();
        wallets
    }

    pub fn publish(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }

    pub fn events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }
}
