use std::{
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use shared::{
    domain::{Address, TxHash},
    protocol::{CallOutput, ContractCall, ContractTransaction, TransactionReceipt},
};
use tokio::sync::broadcast;

pub mod abi;
pub mod devnet;
pub mod rpc;

pub use devnet::{DevChain, DevWallet};
pub use rpc::{JsonRpcClient, JsonRpcSigner, JsonRpcWallet, RpcError};

/// A signing capability attached to one account, able to read contract state
/// through its provider and to submit transactions.
#[async_trait]
pub trait ContractSigner: Send + Sync {
    fn account(&self) -> Address;
    async fn sign_message(&self, message: &str) -> anyhow::Result<String>;
    async fn call(&self, contract: &Address, call: ContractCall) -> anyhow::Result<CallOutput>;
    /// Balance in wei, as a decimal string.
    async fn get_balance(&self, address: &Address) -> anyhow::Result<String>;
    async fn send_transaction(&self, tx: ContractTransaction) -> anyhow::Result<TxHash>;
    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> anyhow::Result<TransactionReceipt>;
}

static NEXT_SIGNER_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a signer. Two handles are the same signer only if they
/// were cloned from one another.
#[derive(Clone)]
pub struct SigningHandle {
    id: u64,
    signer: Arc<dyn ContractSigner>,
}

impl SigningHandle {
    pub fn new(signer: Arc<dyn ContractSigner>) -> Self {
        Self {
            id: NEXT_SIGNER_ID.fetch_add(1, Ordering::Relaxed),
            signer,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Deref for SigningHandle {
    type Target = dyn ContractSigner;

    fn deref(&self) -> &Self::Target {
        self.signer.as_ref()
    }
}

impl PartialEq for SigningHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SigningHandle {}

impl fmt::Debug for SigningHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningHandle")
            .field("id", &self.id)
            .field("account", &self.signer.account())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSession {
    pub account: Address,
    pub signer: SigningHandle,
}

impl WalletSession {
    pub fn new(signer: SigningHandle) -> Self {
        Self {
            account: signer.account(),
            signer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletNotification {
    AccountChanged(WalletSession),
    Disconnected,
}

/// The browser-wallet side of a session: connect/disconnect plus change
/// notifications pushed by the wallet.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<WalletSession>;
    async fn disconnect(&self) -> anyhow::Result<()>;
    fn subscribe_notifications(&self) -> broadcast::Receiver<WalletNotification>;
}
