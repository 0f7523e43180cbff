use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use connector_protocol::{Protocol, TabId, WalletId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub tab_id: TabId,
    pub url: String,
    pub protocol: Protocol,
    pub request_identification: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved { wallet_id: WalletId },
    Rejected,
}

/// Surfaces a connection prompt to the user and waits for the answer.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn prompt(&self, request: ApprovalRequest) -> ApprovalDecision;

    /// The tab went away; outstanding prompts for it resolve as rejected.
    fn withdraw(&self, _tab_id: TabId) {}
}

/// Prompts parked until the user answers through the admin API.
#[derive(Default)]
pub struct PendingApprovals {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, (ApprovalRequest, oneshot::Sender<ApprovalDecision>)>>,
}

impl PendingApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<(u64, ApprovalRequest)> {
        let mut listed: Vec<(u64, ApprovalRequest)> = self
            .pending
            .lock()
            .iter()
            .map(|(id, (request, _))| (*id, request.clone()))
            .collect();
        listed.sort_by_key(|(id, _)| *id);
        listed
    }

    pub fn get(&self, id: u64) -> Option<ApprovalRequest> {
        self.pending.lock().get(&id).map(|(request, _)| request.clone())
    }

    /// Answer prompt `id`. Returns `false` if it is unknown or already answered.
    pub fn resolve(&self, id: u64, decision: ApprovalDecision) -> bool {
        let Some((request, answer)) = self.pending.lock().remove(&id) else {
            return false;
        };
        tracing::info!(id, url = %request.url, ?decision, "approval answered");
        answer.send(decision).is_ok()
    }
}

#[async_trait]
impl ApprovalPrompt for PendingApprovals {
    async fn prompt(&self, request: ApprovalRequest) -> ApprovalDecision {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (answer, decision) = oneshot::channel();
        tracing::info!(id, url = %request.url, protocol = %request.protocol, "awaiting user approval");
        self.pending.lock().insert(id, (request, answer));

        // an abandoned or withdrawn prompt counts as a rejection
        decision.await.unwrap_or(ApprovalDecision::Rejected)
    }

    fn withdraw(&self, tab_id: TabId) {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, (request, _)| request.tab_id != tab_id);
        let withdrawn = before - pending.len();
        if withdrawn > 0 {
            tracing::info!(tab_id, withdrawn, "approval prompts withdrawn");
        }
    }
}
