use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use connector_protocol::{port, Acceptor, PageHello, PortHandshake, TabId};
use tokio::net::TcpStream;

use crate::bridge::bridge;

/// Accepts page connections and opens one service connection per page.
pub struct Relay {
    service: String,
    next_tab: AtomicU64,
}

impl Relay {
    pub fn new(service: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            service: service.into(),
            next_tab: AtomicU64::new(1),
        })
    }

    pub async fn serve<A: Acceptor>(self: Arc<Self>, listener: A) -> Result<()> {
        tracing::info!(
            listen = %listener.local_addr().context("listener has no address")?,
            service = %self.service,
            "relay ready"
        );
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed, retrying");
                    tokio::time::sleep(port::ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let tab_id = self.next_tab.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(%peer, tab_id, "page connected");

            let relay = self.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.handle_page(stream, tab_id).await {
                    tracing::warn!(tab_id, error = %e, "page session failed");
                }
            });
        }
    }

    async fn handle_page(&self, stream: TcpStream, tab_id: TabId) -> Result<()> {
        let (hello, page) = port::accept_stream::<PageHello>(stream)
            .await
            .context("reading page hello")?;

        let handshake = PortHandshake {
            tab_id,
            origin: hello.origin.clone(),
        };
        let service = port::connect_stream(self.service.as_str(), &handshake)
            .await
            .context(format!("connecting to wallet service at {}", self.service))?;

        tracing::info!(tab_id, origin = %hello.origin, "bridging page to service");
        let summary = bridge(page, service, &hello.origin).await;
        tracing::info!(
            tab_id,
            to_service = summary.to_service,
            to_page = summary.to_page,
            dropped = summary.dropped,
            closed_by = ?summary.closed_by,
            "bridge closed"
        );
        Ok(())
    }
}
