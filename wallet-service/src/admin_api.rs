//! Admin API for the wallet's own UI.
//!
//! - Whitelist listing and revocation
//! - Pending connection approvals
//! - UI tab subscriptions (gate the pollers)
//! - Service status, manual wallet sync, protocol parameters

use std::collections::HashMap;
use std::sync::Arc;

use connector_protocol::{Protocol, WalletId};
use poem_openapi::param::{Path, Query};
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};

use crate::connection::approval::{ApprovalDecision, ApprovalRequest};
use crate::network;
use crate::params::ProtocolParameters;
use crate::service::WalletService;
use crate::whitelist::WhitelistEntry;

pub struct AdminApi {
    pub service: Arc<WalletService>,
}

#[derive(Debug, Object)]
#[oai(rename_all = "camelCase")]
pub struct WhitelistEntryDto {
    pub url: String,
    pub protocol: String,
    pub wallet_id: u32,
    pub auth_enabled: bool,
}

impl From<WhitelistEntry> for WhitelistEntryDto {
    fn from(entry: WhitelistEntry) -> Self {
        Self {
            url: entry.url,
            protocol: entry.protocol.to_string(),
            wallet_id: entry.wallet_id,
            auth_enabled: entry.auth_enabled,
        }
    }
}

#[derive(Debug, Object)]
pub struct RevokeResponse {
    pub revoked: bool,
}

#[derive(Debug, Object)]
#[oai(rename_all = "camelCase")]
pub struct PendingApprovalDto {
    pub id: u64,
    pub tab_id: u64,
    pub url: String,
    pub protocol: String,
    pub request_identification: bool,
}

impl PendingApprovalDto {
    fn new(id: u64, request: ApprovalRequest) -> Self {
        Self {
            id,
            tab_id: request.tab_id,
            url: request.url,
            protocol: request.protocol.to_string(),
            request_identification: request.request_identification,
        }
    }
}

#[derive(Debug, Object)]
#[oai(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub wallet_id: u32,
}

#[derive(Debug, Object)]
pub struct ResolveResponse {
    pub resolved: bool,
}

#[derive(Debug, Object)]
#[oai(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub tab_id: u64,
    pub active_wallet_id: Option<u32>,
}

#[derive(Debug, Object)]
pub struct SubscriptionResponse {
    pub subscribers: u64,
    pub removed: Option<bool>,
}

#[derive(Debug, Object)]
pub struct PriceDto {
    pub from: String,
    pub timestamp: i64,
    pub prices: HashMap<String, f64>,
}

#[derive(Debug, Object)]
#[oai(rename_all = "camelCase")]
pub struct ServerStatusDto {
    pub is_server_ok: bool,
    pub is_maintenance: bool,
    pub server_time: i64,
    pub clock_skew_ms: i64,
}

#[derive(Debug, Object)]
#[oai(rename_all = "camelCase")]
pub struct StatusResponse {
    pub network: String,
    pub sessions: u64,
    pub subscribers: u64,
    pub whitelisted_sites: u64,
    pub pending_approvals: u64,
    pub price: Option<PriceDto>,
    pub server: Option<ServerStatusDto>,
}

#[derive(Debug, Object)]
#[oai(rename_all = "camelCase")]
pub struct SyncResponse {
    pub wallet_id: u32,
    pub success: bool,
}

#[derive(Debug, Object)]
#[oai(rename_all = "camelCase")]
pub struct ParametersResponse {
    pub network: String,
    pub current_epoch: u64,
    pub epoch: u64,
    pub linear_fee_coefficient: String,
    pub linear_fee_constant: String,
    pub coins_per_utxo_byte: String,
    pub pool_deposit: String,
    pub key_deposit: String,
}

impl ParametersResponse {
    fn new(network: &str, current_epoch: u64, params: ProtocolParameters) -> Self {
        Self {
            network: network.to_string(),
            current_epoch,
            epoch: params.epoch,
            linear_fee_coefficient: params.linear_fee.coefficient,
            linear_fee_constant: params.linear_fee.constant,
            coins_per_utxo_byte: params.coins_per_utxo_byte,
            pool_deposit: params.pool_deposit,
            key_deposit: params.key_deposit,
        }
    }
}

#[derive(Debug, Object)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(ApiResponse)]
pub enum ApiError {
    #[oai(status = 400)]
    BadRequest(Json<ErrorResponse>),
    #[oai(status = 404)]
    NotFound(Json<ErrorResponse>),
}

fn bad_request(error: impl Into<String>) -> ApiError {
    ApiError::BadRequest(Json(ErrorResponse { error: error.into() }))
}

fn not_found(error: impl Into<String>) -> ApiError {
    ApiError::NotFound(Json(ErrorResponse { error: error.into() }))
}

#[OpenApi]
impl AdminApi {
    /// List whitelisted sites
    #[oai(path = "/api/whitelist", method = "get")]
    async fn list_whitelist(&self) -> Json<Vec<WhitelistEntryDto>> {
        Json(
            self.service
                .whitelist
                .list()
                .into_iter()
                .map(WhitelistEntryDto::from)
                .collect(),
        )
    }

    /// Revoke a site; its live sessions are disconnected
    #[oai(path = "/api/whitelist", method = "delete")]
    async fn revoke_site(
        &self,
        Query(url): Query<String>,
        Query(protocol): Query<String>,
    ) -> Result<Json<RevokeResponse>, ApiError> {
        let protocol: Protocol = protocol.parse().map_err(|e| bad_request(format!("{e}")))?;
        let revoked = self.service.whitelist.revoke(&url, protocol);
        tracing::info!(%url, %protocol, revoked, "revocation requested");
        Ok(Json(RevokeResponse { revoked }))
    }

    /// Connection prompts waiting for the user
    #[oai(path = "/api/approvals", method = "get")]
    async fn list_approvals(&self) -> Json<Vec<PendingApprovalDto>> {
        Json(
            self.service
                .approvals
                .list()
                .into_iter()
                .map(|(id, request)| PendingApprovalDto::new(id, request))
                .collect(),
        )
    }

    /// Approve a prompt, binding the site to a wallet
    #[oai(path = "/api/approvals/:id/approve", method = "post")]
    async fn approve(
        &self,
        Path(id): Path<u64>,
        req: Json<ApproveRequest>,
    ) -> Result<Json<ResolveResponse>, ApiError> {
        let wallet_id = req.0.wallet_id;
        let request = self
            .service
            .approvals
            .get(id)
            .ok_or_else(|| not_found(format!("no pending approval {id}")))?;
        let wallet = self
            .service
            .store
            .wallet(wallet_id)
            .map_err(|_| bad_request(format!("wallet {wallet_id} does not exist")))?;
        if wallet.protocol != request.protocol {
            return Err(bad_request(format!(
                "wallet {wallet_id} is a {} wallet, the site asked for {}",
                wallet.protocol, request.protocol
            )));
        }
        self.resolve(id, ApprovalDecision::Approved { wallet_id })
    }

    /// Reject a prompt
    #[oai(path = "/api/approvals/:id/reject", method = "post")]
    async fn reject(&self, Path(id): Path<u64>) -> Result<Json<ResolveResponse>, ApiError> {
        self.resolve(id, ApprovalDecision::Rejected)
    }

    /// Register a UI tab
    #[oai(path = "/api/subscriptions", method = "post")]
    async fn subscribe(&self, req: Json<SubscribeRequest>) -> Json<SubscriptionResponse> {
        let subscriptions = &self.service.subscriptions;
        subscriptions.subscribe(req.0.tab_id, req.0.active_wallet_id);
        Json(SubscriptionResponse {
            subscribers: subscriptions.len() as u64,
            removed: None,
        })
    }

    /// Unregister a UI tab
    #[oai(path = "/api/subscriptions/:tab_id", method = "delete")]
    async fn unsubscribe(&self, Path(tab_id): Path<u64>) -> Json<SubscriptionResponse> {
        let subscriptions = &self.service.subscriptions;
        let removed = subscriptions.unsubscribe(tab_id);
        Json(SubscriptionResponse {
            subscribers: subscriptions.len() as u64,
            removed: Some(removed),
        })
    }

    /// Service status and latest poller results
    #[oai(path = "/api/status", method = "get")]
    async fn status(&self) -> Json<StatusResponse> {
        let service = &self.service;
        Json(StatusResponse {
            network: service.network.name.to_string(),
            sessions: service.connections.session_count() as u64,
            subscribers: service.subscriptions.len() as u64,
            whitelisted_sites: service.whitelist.list().len() as u64,
            pending_approvals: service.approvals.list().len() as u64,
            price: service.pollers.latest_price().map(|ticker| PriceDto {
                from: ticker.from,
                timestamp: ticker.timestamp,
                prices: ticker.prices,
            }),
            server: service.pollers.latest_status().map(|status| ServerStatusDto {
                is_server_ok: status.is_server_ok,
                is_maintenance: status.is_maintenance,
                server_time: status.server_time,
                clock_skew_ms: status.clock_skew_ms,
            }),
        })
    }

    /// Refresh a wallet, joining a sync already in flight
    #[oai(path = "/api/wallets/:id/sync", method = "post")]
    async fn sync_wallet(&self, Path(id): Path<u32>) -> Result<Json<SyncResponse>, ApiError> {
        let wallet_id: WalletId = id;
        if self.service.store.wallet(wallet_id).is_err() {
            return Err(not_found(format!("wallet {wallet_id} not found")));
        }
        let success = self.service.sync.sync_wallet(wallet_id).await;
        Ok(Json(SyncResponse { wallet_id, success }))
    }

    /// Protocol parameters served for the current epoch
    #[oai(path = "/api/parameters/:network", method = "get")]
    async fn parameters(
        &self,
        Path(network): Path<String>,
    ) -> Result<Json<ParametersResponse>, ApiError> {
        let info = network::by_name(&network)
            .ok_or_else(|| not_found(format!("unknown network: {network}")))?;
        let current = self.service.params.get_epoch_data(info).current_epoch;
        let params = self.service.params.get_protocol_parameters(info).await;
        Ok(Json(ParametersResponse::new(info.name, current, params)))
    }
}

impl AdminApi {
    fn resolve(&self, id: u64, decision: ApprovalDecision) -> Result<Json<ResolveResponse>, ApiError> {
        if self.service.approvals.resolve(id, decision) {
            Ok(Json(ResolveResponse { resolved: true }))
        } else {
            Err(not_found(format!("no pending approval {id}")))
        }
    }
}
