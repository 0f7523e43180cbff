// Fakes for the external collaborators, shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use connector_protocol::{SignTxRequest, WalletId};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::backend::{Backend, PriceTicker, RawProtocolParameters, StatusResponse};
use crate::connection::approval::{ApprovalDecision, ApprovalPrompt, ApprovalRequest};
use crate::signer::{CreateTxInput, DataSignature, SignError, Signer};
use crate::store::Utxo;

#[derive(Default)]
pub struct FakeBackend {
    pub utxos: Mutex<Vec<Utxo>>,
    pub utxo_calls: AtomicUsize,
    pub submitted: Mutex<Vec<String>>,
    pub reject_submissions: bool,
}

impl FakeBackend {
    pub fn with_utxos(utxos: Vec<Utxo>) -> Arc<Self> {
        Arc::new(Self {
            utxos: Mutex::new(utxos),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn epoch_parameters(&self, _network: &str) -> Result<RawProtocolParameters> {
        anyhow::bail!("no parameters in tests")
    }

    async fn utxos_for_addresses(&self, _addresses: &[String]) -> Result<Vec<Utxo>> {
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.utxos.lock().clone())
    }

    async fn submit_signed_tx(&self, signed_tx_hex: &str) -> Result<String> {
        if self.reject_submissions {
            anyhow::bail!("mempool full");
        }
        self.submitted.lock().push(signed_tx_hex.to_string());
        Ok(format!("txid-{}", signed_tx_hex.len()))
    }

    async fn current_price(&self, _ticker: &str) -> Result<PriceTicker> {
        anyhow::bail!("no prices in tests")
    }

    async fn server_status(&self) -> Result<StatusResponse> {
        anyhow::bail!("no status in tests")
    }
}

/// Signer whose behaviour is selected by the input: `"decline"` is declined,
/// `"partial"` fails a witness, anything else succeeds.
#[derive(Default)]
pub struct FakeSigner;

pub const FAKE_PUBKEY: &str = "abababababababababababababababababababababababababababababababab";

#[async_trait]
impl Signer for FakeSigner {
    async fn sign_tx(&self, wallet: WalletId, request: &SignTxRequest) -> Result<String, SignError> {
        match request.tx.as_str() {
            "decline" => Err(SignError::UserDeclined),
            "partial" => Err(SignError::PartialWitness {
                name: "MissingScriptWitness".to_string(),
            }),
            tx if request.return_tx => Ok(format!("{tx}+witness{wallet}")),
            _ => Ok(format!("witness{wallet}")),
        }
    }

    async fn sign_data(
        &self,
        _wallet: WalletId,
        _address: &str,
        payload_hex: &str,
    ) -> Result<DataSignature, SignError> {
        Ok(DataSignature {
            signature: format!("sig{payload_hex}"),
            key: FAKE_PUBKEY.to_string(),
        })
    }

    async fn create_tx(&self, _wallet: WalletId, input: CreateTxInput<'_>) -> Result<Value, SignError> {
        Ok(json!({
            "inputs": input.utxos.len(),
            "change": input.change_address,
            "feeA": input.protocol_parameters.linear_fee.coefficient,
        }))
    }

    async fn auth_pubkey(&self, _wallet: WalletId) -> Result<String, SignError> {
        Ok(FAKE_PUBKEY.to_string())
    }

    async fn auth_sign(&self, _wallet: WalletId, payload_hex: &str) -> Result<String, SignError> {
        Ok(format!("sig{payload_hex}"))
    }

    async fn auth_verify(
        &self,
        _wallet: WalletId,
        payload_hex: &str,
        signature_hex: &str,
    ) -> Result<bool, SignError> {
        Ok(signature_hex == format!("sig{payload_hex}"))
    }
}

/// Answers every prompt with a fixed decision and counts prompts.
pub struct FixedPrompt {
    pub decision: ApprovalDecision,
    pub prompts: AtomicUsize,
}

impl FixedPrompt {
    pub fn new(decision: ApprovalDecision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            prompts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ApprovalPrompt for FixedPrompt {
    async fn prompt(&self, _request: ApprovalRequest) -> ApprovalDecision {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}
