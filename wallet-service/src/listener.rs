use std::sync::Arc;

use anyhow::{Context, Result};
use connector_protocol::{port, Acceptor, PortHandshake};

use crate::service::WalletService;

/// Accept relay connections. Each starts with a [`PortHandshake`] line naming
/// the tab and the origin the relay observed.
pub async fn serve_channel<A: Acceptor>(service: Arc<WalletService>, listener: A) -> Result<()> {
    tracing::info!(
        listen = %listener.local_addr().context("listener has no address")?,
        "channel listener ready"
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
        let service = service.clone();
        tokio::spawn(async move {
            match port::accept_stream::<PortHandshake>(stream).await {
                Ok((handshake, port)) => {
                    tracing::info!(%peer, tab_id = handshake.tab_id, origin = %handshake.origin, "port opened");
                    let tab_id = handshake.tab_id;
                    if let Err(e) = service.open_port(handshake, port).await {
                        tracing::error!(tab_id, error = %e, "session task failed");
                    }
                }
                Err(e) => tracing::warn!(%peer, error = %e, "rejecting connection without handshake"),
            }
        });
    }
}
