use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric error codes carried in `connector_rpc_response.return.err.code`.
///
/// Negative codes are connection-level API errors, positive codes are
/// per-call business failures reported by individual handlers.
pub mod codes {
    pub const API_INVALID_REQUEST: i32 = -1;
    pub const API_INTERNAL_ERROR: i32 = -2;
    pub const API_REFUSED: i32 = -3;
    pub const API_ACCOUNT_CHANGE: i32 = -4;

    pub const PROOF_GENERATION: i32 = 1;
    pub const ADDRESS_NOT_PK: i32 = 2;
    pub const USER_DECLINED: i32 = 3;
    pub const TX_SEND_FAILURE: i32 = 4;
    pub const PAGINATE: i32 = 5;
}

/// Structured error as it travels over the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{info} (code {code})")]
pub struct ApiError {
    pub code: i32,
    pub info: String,
}

impl ApiError {
    pub fn new(code: i32, info: impl Into<String>) -> Self {
        Self {
            code,
            info: info.into(),
        }
    }

    pub fn refused(info: impl Into<String>) -> Self {
        Self::new(codes::API_REFUSED, info)
    }

    pub fn internal(info: impl Into<String>) -> Self {
        Self::new(codes::API_INTERNAL_ERROR, info)
    }

    pub fn invalid_request(info: impl Into<String>) -> Self {
        Self::new(codes::API_INVALID_REQUEST, info)
    }
}

/// Errors surfaced to code using the connector, on either side of the channel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectorError {
    #[error("wallet disconnected")]
    Disconnected,

    #[error("request timed out")]
    Timeout,

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Error returned by the service for a specific call.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ConnectorError {
    /// Wire representation of this error.
    pub fn api_error(&self) -> ApiError {
        match self {
            ConnectorError::Disconnected | ConnectorError::Timeout => {
                ApiError::internal(self.to_string())
            }
            ConnectorError::Refused(info) => ApiError::refused(info.clone()),
            ConnectorError::InvalidRequest(info) => ApiError::invalid_request(info.clone()),
            ConnectorError::Internal(info) => ApiError::internal(info.clone()),
            ConnectorError::Api(err) => err.clone(),
        }
    }

    pub fn code(&self) -> i32 {
        self.api_error().code
    }
}
