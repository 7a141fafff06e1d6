use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RequestKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    WalletUnavailable,
    ContractUnbound,
    EmptyInput,
    RequestInFlight,
    TransactionReverted,
    PersistenceFailure,
    SigningFailed,
}

/// Failures surfaced by the contract-binding engine.
///
/// The first four are detected locally before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Wallet not connected")]
    WalletUnavailable,
    #[error("Undefined greeterContract")]
    ContractUnbound,
    #[error("{0}")]
    EmptyInput(String),
    #[error("a {0} request is already in flight")]
    RequestInFlight(RequestKind),
    #[error("{0}")]
    TransactionReverted(String),
    #[error("failed to persist contract addresses: {0}")]
    PersistenceFailure(String),
    #[error("{0}")]
    SigningFailed(String),
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::WalletUnavailable => ErrorCode::WalletUnavailable,
            Self::ContractUnbound => ErrorCode::ContractUnbound,
            Self::EmptyInput(_) => ErrorCode::EmptyInput,
            Self::RequestInFlight(_) => ErrorCode::RequestInFlight,
            Self::TransactionReverted(_) => ErrorCode::TransactionReverted,
            Self::PersistenceFailure(_) => ErrorCode::PersistenceFailure,
            Self::SigningFailed(_) => ErrorCode::SigningFailed,
        }
    }

    /// True for failures raised without touching the network.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::WalletUnavailable
                | Self::ContractUnbound
                | Self::EmptyInput(_)
                | Self::RequestInFlight(_)
        )
    }
}
