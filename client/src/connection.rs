use std::collections::HashMap;

use connector_protocol::{
    AuthInfo, ChannelMessage, ConnectedReply, ConnectionRequest, ConnectorError, Protocol,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

/// Page-side connection state for one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unconnected,
    Requesting,
    Connected { auth: Option<AuthInfo> },
    /// Terminal: the channel to the relay is gone.
    Disconnected,
}

type Waiter = oneshot::Sender<Result<Option<AuthInfo>, ConnectorError>>;

#[derive(Default)]
struct ProtocolSlot {
    state: ConnectionState,
    waiters: Vec<Waiter>,
}

/// Enable handshake bookkeeping: one outstanding connect request per
/// protocol, with every concurrent `enable` joining it.
pub struct ConnectionManager {
    slots: Mutex<HashMap<Protocol, ProtocolSlot>>,
    outbound: mpsc::UnboundedSender<ChannelMessage>,
}

impl ConnectionManager {
    pub fn new(outbound: mpsc::UnboundedSender<ChannelMessage>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            outbound,
        }
    }

    pub async fn enable(
        &self,
        request: ConnectionRequest,
    ) -> Result<Option<AuthInfo>, ConnectorError> {
        let protocol = request.protocol;
        let response = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(protocol).or_default();
            match &slot.state {
                ConnectionState::Connected { auth } => return Ok(auth.clone()),
                ConnectionState::Disconnected => return Err(ConnectorError::Disconnected),
                ConnectionState::Requesting => {
                    tracing::debug!(%protocol, "joining in-flight connect request");
                    let (waiter, response) = oneshot::channel();
                    slot.waiters.push(waiter);
                    response
                }
                ConnectionState::Unconnected => {
                    if self
                        .outbound
                        .send(ChannelMessage::ConnectRequest(request))
                        .is_err()
                    {
                        return Err(ConnectorError::Internal(
                            "failed to post connect request to relay".to_string(),
                        ));
                    }
                    tracing::info!(%protocol, "connect request sent");
                    let (waiter, response) = oneshot::channel();
                    slot.state = ConnectionState::Requesting;
                    slot.waiters.push(waiter);
                    response
                }
            }
        };

        response.await.unwrap_or(Err(ConnectorError::Disconnected))
    }

    /// Settle the outstanding connect request for `reply.protocol`.
    pub fn settle(&self, reply: ConnectedReply) {
        let protocol = reply.protocol;
        let waiters = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(protocol).or_default();
            if slot.state != ConnectionState::Requesting {
                tracing::debug!(%protocol, state = ?slot.state, "ignoring unsolicited connected reply");
                return;
            }
            slot.state = if reply.success {
                ConnectionState::Connected {
                    auth: reply.auth.clone(),
                }
            } else {
                ConnectionState::Unconnected
            };
            std::mem::take(&mut slot.waiters)
        };

        tracing::info!(
            %protocol,
            success = reply.success,
            requesters = waiters.len(),
            "connect request settled"
        );
        for waiter in waiters {
            let outcome = if reply.success {
                Ok(reply.auth.clone())
            } else {
                Err(reply
                    .err
                    .clone()
                    .map(ConnectorError::Api)
                    .unwrap_or_else(|| ConnectorError::Refused("user rejected connection".into())))
            };
            let _ = waiter.send(outcome);
        }
    }

    /// Move every protocol to `Disconnected` and reject queued requesters.
    pub fn teardown(&self) {
        let waiters: Vec<Waiter> = {
            let mut slots = self.slots.lock();
            for protocol in [Protocol::Cardano, Protocol::Ergo] {
                slots.entry(protocol).or_default();
            }
            slots
                .values_mut()
                .flat_map(|slot| {
                    slot.state = ConnectionState::Disconnected;
                    std::mem::take(&mut slot.waiters)
                })
                .collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(ConnectorError::Disconnected));
        }
    }

    pub fn state(&self, protocol: Protocol) -> ConnectionState {
        self.slots
            .lock()
            .get(&protocol)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    /// `Ok` when calls for `protocol` may be issued.
    pub fn ensure_connected(&self, protocol: Protocol) -> Result<(), ConnectorError> {
        match self.state(protocol) {
            ConnectionState::Connected { .. } => Ok(()),
            ConnectionState::Disconnected => Err(ConnectorError::Disconnected),
            _ => Err(ConnectorError::Refused(
                "no active wallet connection".to_string(),
            )),
        }
    }
}
