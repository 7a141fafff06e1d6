use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{Address, Generation, MirrorState, TxHash},
    error::SyncError,
};

/// Static description of the contract surface a binding talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractInterface {
    pub name: &'static str,
    pub greet_selector: [u8; 4],
    pub set_greeting_selector: [u8; 4],
    pub withdraw_selector: [u8; 4],
    pub owner_selector: [u8; 4],
}

pub const GREETER_INTERFACE: ContractInterface = ContractInterface {
    name: "Greeter",
    // greet()
    greet_selector: [0xcf, 0xae, 0x32, 0x17],
    // setGreeting(string)
    set_greeting_selector: [0xa4, 0x13, 0x68, 0x62],
    // withdraw(uint256)
    withdraw_selector: [0x2e, 0x1a, 0x7d, 0x4d],
    // owner()
    owner_selector: [0x8d, 0xa5, 0xcb, 0x5b],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractCall {
    Greet,
    Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutput {
    Text(String),
    Address(Address),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ContractTransaction {
    Deploy {
        initial_greeting: String,
    },
    SetGreeting {
        contract: Address,
        text: String,
        payment_wei: u128,
    },
    Withdraw {
        contract: Address,
        amount_wei: u128,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    pub contract_address: Option<Address>,
    pub revert_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A modal-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn deployed(address: &Address) -> Self {
        Self::success(format!("Greeter deployed to: {address}"))
    }

    pub fn greeting_set(greeting: &str) -> Self {
        Self::success(format!("Success!\n\nGreeting is now: {greeting}"))
    }

    pub fn balance_changed(balance_wei: &str) -> Self {
        Self::success(format!("Success!\n\nBalance is now: {balance_wei}"))
    }
}

impl From<&SyncError> for Notice {
    fn from(err: &SyncError) -> Self {
        match err {
            // Local validation messages are shown as-is.
            SyncError::WalletUnavailable
            | SyncError::ContractUnbound
            | SyncError::EmptyInput(_)
            | SyncError::RequestInFlight(_) => Self::error(err.to_string()),
            _ => Self::error(format!("Error!\n\n{err}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionChanged {
        is_active: bool,
        account: Option<Address>,
    },
    BindingChanged {
        generation: Option<Generation>,
        address: Option<Address>,
    },
    MirrorUpdated(MirrorState),
    Notice(Notice),
}
