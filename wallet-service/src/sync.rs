//! Deduplicated wallet synchronization.
//!
//! At most one refresh per wallet is in flight. Callers arriving during a
//! refresh get the same shared future; the map entry is inserted before the
//! first suspension point and removed before waiters are woken, so a call
//! after settlement always starts new work.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use connector_protocol::WalletId;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::backend::Backend;
use crate::store::WalletStore;
use crate::subscriptions::{ServiceEvent, SubscriptionRegistry};

/// Resolves to `true` when the refresh succeeded.
pub type SyncFuture = Shared<BoxFuture<'static, bool>>;

#[async_trait]
pub trait WalletRefresher: Send + Sync {
    async fn refresh(&self, wallet_id: WalletId) -> Result<()>;
}

/// Re-reads a wallet's UTXO set from the backend.
pub struct BackendRefresher {
    store: Arc<dyn WalletStore>,
    backend: Arc<dyn Backend>,
}

impl BackendRefresher {
    pub fn new(store: Arc<dyn WalletStore>, backend: Arc<dyn Backend>) -> Self {
        Self { store, backend }
    }
}

#[async_trait]
impl WalletRefresher for BackendRefresher {
    async fn refresh(&self, wallet_id: WalletId) -> Result<()> {
        let record = self.store.wallet(wallet_id)?;
        let addresses: Vec<String> = record
            .all_addresses()
            .into_iter()
            .map(|address| address.bech32.clone())
            .collect();

        let utxos = self.backend.utxos_for_addresses(&addresses).await?;
        tracing::debug!(wallet_id, addresses = addresses.len(), utxos = utxos.len(), "wallet refreshed");
        self.store.replace_utxos(wallet_id, utxos)?;
        Ok(())
    }
}

pub struct SyncCoordinator {
    in_flight: Mutex<HashMap<WalletId, SyncFuture>>,
    refresher: Arc<dyn WalletRefresher>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl SyncCoordinator {
    pub fn new(
        refresher: Arc<dyn WalletRefresher>,
        subscriptions: Arc<SubscriptionRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            in_flight: Mutex::new(HashMap::new()),
            refresher,
            subscriptions,
        })
    }

    /// Join the refresh in flight for `wallet_id`, or start one.
    ///
    /// The refresh runs on its own task, so dropping the returned future does
    /// not cancel it. Must be called within a tokio runtime.
    pub fn sync_wallet(self: &Arc<Self>, wallet_id: WalletId) -> SyncFuture {
        let mut in_flight = self.in_flight.lock();
        if let Some(running) = in_flight.get(&wallet_id) {
            tracing::debug!(wallet_id, "joining in-flight sync");
            return running.clone();
        }

        let (done, settled) = oneshot::channel();
        let future: SyncFuture = async move { settled.await.unwrap_or(false) }
            .boxed()
            .shared();
        in_flight.insert(wallet_id, future.clone());
        drop(in_flight);

        let coordinator = self.clone();
        tokio::spawn(async move {
            tracing::debug!(wallet_id, "sync started");
            let success = match coordinator.refresher.refresh(wallet_id).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(wallet_id, "wallet sync failed: {:#}", e);
                    false
                }
            };

            coordinator.in_flight.lock().remove(&wallet_id);
            coordinator
                .subscriptions
                .publish(ServiceEvent::WalletStateUpdated { wallet_id, success });
            let _ = done.send(success);
        });

        future
    }

    pub fn is_syncing(&self, wallet_id: WalletId) -> bool {
        self.in_flight.lock().contains_key(&wallet_id)
    }
}
