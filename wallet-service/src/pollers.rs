// Background pollers for coin prices and backend status.
//
// Both tick on fixed intervals but only reach the backend while at least one
// UI tab is subscribed. Results are kept as the latest snapshot and published
// as service events.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::MissedTickBehavior;

use crate::backend::{Backend, PriceTicker};
use crate::network::Clock;
use crate::subscriptions::{ServiceEvent, SubscriptionRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub is_server_ok: bool,
    pub is_maintenance: bool,
    pub server_time: i64,
    /// Server clock minus local clock, corrected by half the round trip
    pub clock_skew_ms: i64,
}

/// `server_time + rtt/2 - local_time_at_response`
pub fn clock_skew(server_time: i64, sent_at: i64, received_at: i64) -> i64 {
    let rtt = (received_at - sent_at).max(0);
    server_time + rtt / 2 - received_at
}

pub struct Pollers {
    backend: Arc<dyn Backend>,
    subscriptions: Arc<SubscriptionRegistry>,
    clock: Clock,
    ticker: String,
    latest_price: RwLock<Option<PriceTicker>>,
    latest_status: RwLock<Option<ServerStatus>>,
}

impl Pollers {
    pub fn new(
        backend: Arc<dyn Backend>,
        subscriptions: Arc<SubscriptionRegistry>,
        clock: Clock,
        ticker: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            subscriptions,
            clock,
            ticker: ticker.into(),
            latest_price: RwLock::new(None),
            latest_status: RwLock::new(None),
        })
    }

    /// One price tick. Returns whether the backend was called.
    pub async fn poll_price(&self) -> bool {
        if self.subscriptions.is_empty() {
            return false;
        }
        match self.backend.current_price(&self.ticker).await {
            Ok(ticker) => {
                tracing::debug!(from = %ticker.from, timestamp = ticker.timestamp, "price updated");
                *self.latest_price.write() = Some(ticker.clone());
                self.subscriptions.publish(ServiceEvent::PriceUpdate(ticker));
            }
            Err(e) => tracing::warn!("Price poll failed: {:#}", e),
        }
        true
    }

    /// One status tick. Returns whether the backend was called.
    pub async fn poll_status(&self) -> bool {
        if self.subscriptions.is_empty() {
            return false;
        }
        let sent_at = (self.clock)();
        match self.backend.server_status().await {
            Ok(resp) => {
                let received_at = (self.clock)();
                let status = ServerStatus {
                    is_server_ok: resp.is_server_ok,
                    is_maintenance: resp.is_maintenance,
                    server_time: resp.server_time,
                    clock_skew_ms: clock_skew(resp.server_time, sent_at, received_at),
                };
                if !status.is_server_ok {
                    tracing::warn!("Backend reports server down");
                }
                *self.latest_status.write() = Some(status.clone());
                self.subscriptions.publish(ServiceEvent::ServerStatus(status));
            }
            Err(e) => tracing::warn!("Status poll failed: {:#}", e),
        }
        true
    }

    pub fn latest_price(&self) -> Option<PriceTicker> {
        self.latest_price.read().clone()
    }

    pub fn latest_status(&self) -> Option<ServerStatus> {
        self.latest_status.read().clone()
    }

    /// Tick both pollers forever.
    pub async fn run(self: Arc<Self>, price_every: Duration, status_every: Duration) {
        let mut price = tokio::time::interval(price_every);
        let mut status = tokio::time::interval(status_every);
        price.set_missed_tick_behavior(MissedTickBehavior::Delay);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = price.tick() => {
                    self.poll_price().await;
                }
                _ = status.tick() => {
                    self.poll_status().await;
                }
            }
        }
    }
}
