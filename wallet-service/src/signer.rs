// Signer boundary: every operation that touches key material.

use anyhow::Context;
use async_trait::async_trait;
use connector_protocol::{SignTxRequest, WalletId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::params::ProtocolParameters;
use crate::store::Utxo;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("user declined to sign")]
    UserDeclined,

    /// Producing one of the witnesses failed; `name` identifies the failure.
    #[error("partial witness failed: {name}")]
    PartialWitness { name: String },

    #[error("address is not a public key address: {0}")]
    AddressNotPk(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSignature {
    pub signature: String,
    pub key: String,
}

/// Everything the signer needs to build a transaction for a page request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTxInput<'a> {
    pub request: &'a Value,
    pub utxos: &'a [Utxo],
    pub change_address: &'a str,
    pub protocol_parameters: &'a ProtocolParameters,
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// Witness set hex, or the full signed transaction when `return_tx` is set.
    async fn sign_tx(&self, wallet: WalletId, request: &SignTxRequest) -> Result<String, SignError>;

    async fn sign_data(
        &self,
        wallet: WalletId,
        address: &str,
        payload_hex: &str,
    ) -> Result<DataSignature, SignError>;

    async fn create_tx(&self, wallet: WalletId, input: CreateTxInput<'_>) -> Result<Value, SignError>;

    /// Public key handed to pages that requested identification.
    async fn auth_pubkey(&self, wallet: WalletId) -> Result<String, SignError>;

    async fn auth_sign(&self, wallet: WalletId, payload_hex: &str) -> Result<String, SignError>;

    async fn auth_verify(
        &self,
        wallet: WalletId,
        payload_hex: &str,
        signature_hex: &str,
    ) -> Result<bool, SignError>;
}

/// Signer reached over HTTP.
pub struct HttpSigner {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SignerErrorBody {
    error: String,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignDataRequest<'a> {
    address: &'a str,
    payload: &'a str,
}

#[derive(Serialize)]
struct AuthSignRequest<'a> {
    payload: &'a str,
}

#[derive(Serialize)]
struct AuthVerifyRequest<'a> {
    payload: &'a str,
    signature: &'a str,
}

#[derive(Deserialize)]
struct SignatureResponse {
    signature: String,
}

#[derive(Deserialize)]
struct WitnessResponse {
    result: String,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

#[derive(Deserialize)]
struct PubkeyResponse {
    pubkey: String,
}

impl HttpSigner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, wallet: WalletId, path: &str) -> String {
        format!("{}/api/wallets/{}/{}", self.base_url, wallet, path)
    }

    /// Map a signer response to a typed error. 403 means the user declined,
    /// 422 with `kind = "partial_witness"` or `"address_not_pk"` are signing failures.
    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, SignError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_else(|_| "Unknown".to_string());
        let body: Option<SignerErrorBody> = serde_json::from_str(&text).ok();

        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(SignError::UserDeclined);
        }
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            if let Some(body) = body {
                match body.kind.as_deref() {
                    Some("partial_witness") => {
                        return Err(SignError::PartialWitness { name: body.error })
                    }
                    Some("address_not_pk") => return Err(SignError::AddressNotPk(body.error)),
                    _ => {}
                }
            }
        }
        Err(SignError::Other(anyhow::anyhow!(
            "{} failed ({}): {}",
            what,
            status,
            text
        )))
    }

    async fn post_json<B, R>(&self, url: String, body: &B, what: &str) -> Result<R, SignError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context(format!("Failed to call signer {}", what))?;
        let parsed = Self::check(resp, what)
            .await?
            .json()
            .await
            .context(format!("Failed to parse signer {} response", what))?;
        Ok(parsed)
    }
}

#[async_trait]
impl Signer for HttpSigner {
    async fn sign_tx(&self, wallet: WalletId, request: &SignTxRequest) -> Result<String, SignError> {
        let resp: WitnessResponse = self
            .post_json(self.url(wallet, "sign-tx"), request, "sign-tx")
            .await?;
        Ok(resp.result)
    }

    async fn sign_data(
        &self,
        wallet: WalletId,
        address: &str,
        payload_hex: &str,
    ) -> Result<DataSignature, SignError> {
        self.post_json(
            self.url(wallet, "sign-data"),
            &SignDataRequest {
                address,
                payload: payload_hex,
            },
            "sign-data",
        )
        .await
    }

    async fn create_tx(&self, wallet: WalletId, input: CreateTxInput<'_>) -> Result<Value, SignError> {
        self.post_json(self.url(wallet, "create-tx"), &input, "create-tx")
            .await
    }

    async fn auth_pubkey(&self, wallet: WalletId) -> Result<String, SignError> {
        let resp = self
            .client
            .get(self.url(wallet, "auth/pubkey"))
            .send()
            .await
            .context("Failed to call signer auth/pubkey")?;
        let body: PubkeyResponse = Self::check(resp, "auth/pubkey")
            .await?
            .json()
            .await
            .context("Failed to parse signer auth/pubkey response")?;
        Ok(body.pubkey)
    }

    async fn auth_sign(&self, wallet: WalletId, payload_hex: &str) -> Result<String, SignError> {
        let resp: SignatureResponse = self
            .post_json(
                self.url(wallet, "auth/sign"),
                &AuthSignRequest {
                    payload: payload_hex,
                },
                "auth/sign",
            )
            .await?;
        Ok(resp.signature)
    }

    async fn auth_verify(
        &self,
        wallet: WalletId,
        payload_hex: &str,
        signature_hex: &str,
    ) -> Result<bool, SignError> {
        let resp: VerifyResponse = self
            .post_json(
                self.url(wallet, "auth/verify"),
                &AuthVerifyRequest {
                    payload: payload_hex,
                    signature: signature_hex,
                },
                "auth/verify",
            )
            .await?;
        Ok(resp.valid)
    }
}
