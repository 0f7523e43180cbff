use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use connector_protocol::{
    ChannelMessage, ConnectorError, Protocol, ReturnType, RpcRequest, RpcResponse, RpcReturn,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

type Reply = oneshot::Sender<Result<Value, ConnectorError>>;

struct PendingCall {
    protocol: Protocol,
    function: String,
    reply: Reply,
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    calls: HashMap<u64, PendingCall>,
}

/// Request/response correlation on top of a fire-and-forget port.
///
/// Every call gets the next uid (starting at 0) and a slot in the pending
/// table. A slot is removed exactly once: by its response, by `close`, or by
/// the optional call timeout. Responses for unknown uids are ignored.
pub struct Multiplexer {
    next_uid: AtomicU64,
    pending: Mutex<PendingTable>,
    outbound: mpsc::UnboundedSender<ChannelMessage>,
    call_timeout: Option<Duration>,
}

impl Multiplexer {
    pub fn new(
        outbound: mpsc::UnboundedSender<ChannelMessage>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            next_uid: AtomicU64::new(0),
            pending: Mutex::new(PendingTable::default()),
            outbound,
            call_timeout,
        }
    }

    pub async fn call(
        &self,
        protocol: Protocol,
        function: &str,
        params: Value,
        return_type: ReturnType,
    ) -> Result<Value, ConnectorError> {
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        let (reply, response) = oneshot::channel();

        {
            let mut table = self.pending.lock();
            if table.closed {
                return Err(ConnectorError::Disconnected);
            }
            table.calls.insert(
                uid,
                PendingCall {
                    protocol,
                    function: function.to_string(),
                    reply,
                },
            );
        }

        let request = ChannelMessage::RpcRequest(RpcRequest {
            protocol,
            uid,
            function: function.to_string(),
            params,
            return_type,
        });
        if self.outbound.send(request).is_err() {
            self.pending.lock().calls.remove(&uid);
            return Err(ConnectorError::Internal(
                "failed to post request to relay".to_string(),
            ));
        }
        tracing::debug!(uid, function, %protocol, "rpc request posted");

        let outcome = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.lock().calls.remove(&uid);
                    tracing::warn!(uid, function, "rpc call timed out");
                    return Err(ConnectorError::Timeout);
                }
            },
            None => response.await,
        };

        // reply sender dropped without an answer: only happens on teardown
        outcome.unwrap_or(Err(ConnectorError::Disconnected))
    }

    /// Route a response to its caller. Returns `false` for unknown uids.
    pub fn resolve(&self, response: RpcResponse) -> bool {
        let Some(call) = self.pending.lock().calls.remove(&response.uid) else {
            tracing::debug!(uid = response.uid, "ignoring response for unknown uid");
            return false;
        };

        tracing::debug!(
            uid = response.uid,
            function = %call.function,
            protocol = %call.protocol,
            "rpc response received"
        );
        let outcome = match response.result {
            RpcReturn::Ok(value) => Ok(value),
            RpcReturn::Err(err) => Err(ConnectorError::Api(err)),
        };
        let _ = call.reply.send(outcome);
        true
    }

    /// Reject every pending call and refuse new ones. Returns how many were rejected.
    pub fn close(&self) -> usize {
        let drained: Vec<(u64, PendingCall)> = {
            let mut table = self.pending.lock();
            table.closed = true;
            table.calls.drain().collect()
        };

        for (uid, call) in &drained {
            tracing::debug!(uid, function = %call.function, "rejecting pending call on disconnect");
        }
        let count = drained.len();
        for (_, call) in drained {
            let _ = call.reply.send(Err(ConnectorError::Disconnected));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().calls.len()
    }
}
