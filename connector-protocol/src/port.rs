// Ports: bidirectional message channels between contexts.
//
// In-process a port is a pair of unbounded mpsc channels. Across processes
// the same `PortEnd` is backed by a TCP stream carrying one JSON message per
// line, optionally preceded by a preamble line (relay handshake, page hello).

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

use crate::error::ConnectorError;
use crate::message::ChannelMessage;

/// One side of a port. Dropping `tx` closes the port for the other side.
#[derive(Debug)]
pub struct PortEnd {
    pub tx: mpsc::UnboundedSender<ChannelMessage>,
    pub rx: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl PortEnd {
    pub fn send(&self, message: ChannelMessage) -> Result<(), ConnectorError> {
        self.tx
            .send(message)
            .map_err(|_| ConnectorError::Disconnected)
    }

    /// Next message, or `None` once the other side is gone.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }

    pub fn split(
        self,
    ) -> (
        mpsc::UnboundedSender<ChannelMessage>,
        mpsc::UnboundedReceiver<ChannelMessage>,
    ) {
        (self.tx, self.rx)
    }
}

/// Create two connected port ends.
pub fn port_pair() -> (PortEnd, PortEnd) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        PortEnd { tx: a_tx, rx: a_rx },
        PortEnd { tx: b_tx, rx: b_rx },
    )
}

/// Pause after a failed accept so descriptor exhaustion does not spin.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of incoming streams for the accept loops.
///
/// An accept error is per connection: callers log it, back off for
/// [`ACCEPT_BACKOFF`] and keep serving.
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Carry a port over an already established stream, without preamble.
pub fn attach_stream(stream: TcpStream) -> PortEnd {
    let (read, write) = stream.into_split();
    spawn_carrier(BufReader::new(read), write)
}

/// Read the preamble line from an accepted stream, then carry a port over it.
pub async fn accept_stream<T: DeserializeOwned>(stream: TcpStream) -> io::Result<(T, PortEnd)> {
    let (read, write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before preamble",
        ));
    }
    let preamble = serde_json::from_str(line.trim_end())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok((preamble, spawn_carrier(reader, write)))
}

/// Connect, write the preamble line, then carry a port over the stream.
pub async fn connect_stream<A, T>(addr: A, preamble: &T) -> io::Result<PortEnd>
where
    A: ToSocketAddrs,
    T: Serialize,
{
    let stream = TcpStream::connect(addr).await?;
    let (read, mut write) = stream.into_split();

    let mut line = serde_json::to_string(preamble)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    write.write_all(line.as_bytes()).await?;

    Ok(spawn_carrier(BufReader::new(read), write))
}

fn spawn_carrier(reader: BufReader<OwnedReadHalf>, mut writer: OwnedWriteHalf) -> PortEnd {
    let (local, remote) = port_pair();
    let PortEnd {
        tx: inbound,
        rx: mut outbound,
    } = remote;

    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<ChannelMessage>(&line) {
                    Ok(message) => {
                        if inbound.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping malformed channel message"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "stream read failed");
                    break;
                }
            }
        }
        tracing::debug!("stream reader finished");
    });

    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let mut line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode channel message");
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!(error = %e, "stream write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
        tracing::debug!("stream writer finished");
    });

    local
}
