use connector_protocol::{codes, ApiError, Protocol};
use serde_json::json;
use thiserror::Error;

use crate::signer::SignError;
use crate::store::StoreError;

/// Failure of a single RPC call. Converted to an `{err}` response, never fatal
/// for the port.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Refused(String),

    /// The wallet bound to the session no longer exists.
    #[error("wallet {0} is no longer available")]
    AccountChange(u32),

    /// The bound wallet belongs to another protocol than the connection.
    #[error("wallet {wallet_id} is not a {protocol} wallet")]
    WalletProtocolMismatch { wallet_id: u32, protocol: Protocol },

    #[error("{name}")]
    ProofGeneration { name: String },

    #[error("address is not a public key address: {0}")]
    AddressNotPk(String),

    #[error("user declined")]
    UserDeclined,

    #[error("failed to send transaction: {0}")]
    TxSendFailure(String),

    #[error("page out of range")]
    Paginate { max_size: usize },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn to_api_error(&self) -> ApiError {
        let code = match self {
            DispatchError::UnknownFunction(_) | DispatchError::InvalidParams(_) => {
                codes::API_INVALID_REQUEST
            }
            DispatchError::Refused(_) => codes::API_REFUSED,
            DispatchError::AccountChange(_) | DispatchError::WalletProtocolMismatch { .. } => {
                codes::API_ACCOUNT_CHANGE
            }
            DispatchError::ProofGeneration { .. } => codes::PROOF_GENERATION,
            DispatchError::AddressNotPk(_) => codes::ADDRESS_NOT_PK,
            DispatchError::UserDeclined => codes::USER_DECLINED,
            DispatchError::TxSendFailure(_) => codes::TX_SEND_FAILURE,
            DispatchError::Paginate { max_size } => {
                return ApiError::new(codes::PAGINATE, json!({ "maxSize": max_size }).to_string())
            }
            DispatchError::Internal(_) => codes::API_INTERNAL_ERROR,
        };
        ApiError::new(code, self.to_string())
    }
}

impl From<SignError> for DispatchError {
    fn from(err: SignError) -> Self {
        match err {
            SignError::UserDeclined => DispatchError::UserDeclined,
            SignError::PartialWitness { name } => DispatchError::ProofGeneration { name },
            SignError::AddressNotPk(address) => DispatchError::AddressNotPk(address),
            SignError::Other(e) => DispatchError::Internal(e),
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WalletNotFound(id) => DispatchError::AccountChange(id),
            other => DispatchError::Internal(other.into()),
        }
    }
}
