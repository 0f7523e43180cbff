// Backend Service boundary: chain data, submission, prices, server status.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Utxo;

/// Protocol parameters as the backend reports them, before validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProtocolParameters {
    pub epoch: Value,
    pub linear_fee: RawLinearFee,
    pub coins_per_utxo_byte: Value,
    pub pool_deposit: Value,
    pub key_deposit: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLinearFee {
    pub coefficient: Value,
    pub constant: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTicker {
    pub from: String,
    pub timestamp: i64,
    pub prices: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_server_ok: bool,
    #[serde(default)]
    pub is_maintenance: bool,
    /// Server wall clock, milliseconds since the Unix epoch
    pub server_time: i64,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn epoch_parameters(&self, network: &str) -> Result<RawProtocolParameters>;

    async fn utxos_for_addresses(&self, addresses: &[String]) -> Result<Vec<Utxo>>;

    /// Returns the transaction id.
    async fn submit_signed_tx(&self, signed_tx_hex: &str) -> Result<String>;

    async fn current_price(&self, ticker: &str) -> Result<PriceTicker>;

    async fn server_status(&self) -> Result<StatusResponse>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct UtxoForAddressesRequest<'a> {
    addresses: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedTxRequest<'a> {
    signed_tx: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedTxResponse {
    tx_id: String,
}

#[derive(Deserialize)]
struct PriceResponse {
    ticker: PriceTicker,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if !resp.status().is_success() {
            let status = resp.status();
            let error = resp.text().await.unwrap_or_else(|_| "Unknown".to_string());
            anyhow::bail!("{} failed ({}): {}", what, status, error);
        }
        Ok(resp)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn epoch_parameters(&self, network: &str) -> Result<RawProtocolParameters> {
        let resp = self
            .client
            .get(format!("{}/api/v2/epoch/parameters", self.base_url))
            .query(&[("network", network)])
            .send()
            .await
            .context("Failed to call epoch parameters endpoint")?;

        Self::check(resp, "epoch parameters")
            .await?
            .json()
            .await
            .context("Failed to parse epoch parameters")
    }

    async fn utxos_for_addresses(&self, addresses: &[String]) -> Result<Vec<Utxo>> {
        let resp = self
            .client
            .post(format!("{}/api/txs/utxoForAddresses", self.base_url))
            .json(&UtxoForAddressesRequest { addresses })
            .send()
            .await
            .context("Failed to call utxoForAddresses")?;

        Self::check(resp, "utxoForAddresses")
            .await?
            .json()
            .await
            .context("Failed to parse utxoForAddresses response")
    }

    async fn submit_signed_tx(&self, signed_tx_hex: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/api/txs/signed", self.base_url))
            .json(&SignedTxRequest {
                signed_tx: signed_tx_hex,
            })
            .send()
            .await
            .context("Failed to submit transaction")?;

        let body: SignedTxResponse = Self::check(resp, "transaction submission")
            .await?
            .json()
            .await
            .context("Failed to parse submission response")?;
        Ok(body.tx_id)
    }

    async fn current_price(&self, ticker: &str) -> Result<PriceTicker> {
        let resp = self
            .client
            .get(format!("{}/api/price/{}/current", self.base_url, ticker))
            .send()
            .await
            .context("Failed to call price endpoint")?;

        let body: PriceResponse = Self::check(resp, "price query")
            .await?
            .json()
            .await
            .context("Failed to parse price response")?;
        Ok(body.ticker)
    }

    async fn server_status(&self) -> Result<StatusResponse> {
        let resp = self
            .client
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await
            .context("Failed to call status endpoint")?;

        Self::check(resp, "status query")
            .await?
            .json()
            .await
            .context("Failed to parse status response")
    }
}
