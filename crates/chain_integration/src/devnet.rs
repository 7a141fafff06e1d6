//! In-process chain executing the Greeter contract rules, for local runs and tests.

use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use shared::{
    domain::{Address, TxHash},
    protocol::{CallOutput, ContractCall, ContractTransaction, ReceiptStatus, TransactionReceipt},
};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::{ContractSigner, SigningHandle, WalletConnector, WalletNotification, WalletSession};

/// Minimum payment accepted by `setGreeting`.
pub const GREETING_PRICE_WEI: u128 = 1000;
pub const DEFAULT_ACCOUNT_FUNDS_WEI: u128 = 10_000 * 1_000_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreeterInstance {
    pub greeting: String,
    pub owner: Address,
    pub balance_wei: u128,
}

#[derive(Default)]
struct DevChainState {
    contracts: HashMap<Address, GreeterInstance>,
    balances: HashMap<Address, u128>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    next_contract: u64,
    next_tx: u64,
}

impl DevChainState {
    fn next_tx_hash(&mut self) -> TxHash {
        self.next_tx += 1;
        TxHash(format!("0x{:064x}", self.next_tx))
    }

    fn next_contract_address(&mut self) -> Address {
        self.next_contract += 1;
        Address(format!("0x{:040x}", 0xc0de_0000_u64 + self.next_contract))
    }

    fn execute(&mut self, from: &Address, tx: ContractTransaction) -> Result<Address, String> {
        match tx {
            ContractTransaction::Deploy { initial_greeting } => {
                let address = self.next_contract_address();
                self.contracts.insert(
                    address.clone(),
                    GreeterInstance {
                        greeting: initial_greeting,
                        owner: from.clone(),
                        balance_wei: 0,
                    },
                );
                Ok(address)
            }
            ContractTransaction::SetGreeting {
                contract,
                text,
                payment_wei,
            } => {
                let funds = self.balances.get(from).copied().unwrap_or_default();
                if funds < payment_wei {
                    return Err("sender doesn't have enough funds".into());
                }
                let instance = self
                    .contracts
                    .get_mut(&contract)
                    .ok_or_else(|| format!("no contract deployed at {contract}"))?;
                if payment_wei < GREETING_PRICE_WEI {
                    return Err("insufficient payment".into());
                }
                instance.greeting = text;
                instance.balance_wei += payment_wei;
                self.balances.insert(from.clone(), funds - payment_wei);
                Ok(contract)
            }
            ContractTransaction::Withdraw {
                contract,
                amount_wei,
            } => {
                let instance = self
                    .contracts
                    .get_mut(&contract)
                    .ok_or_else(|| format!("no contract deployed at {contract}"))?;
                if &instance.owner != from {
                    return Err("Ownable: caller is not the owner".into());
                }
                if instance.balance_wei < amount_wei {
                    return Err("insufficient balance".into());
                }
                instance.balance_wei -= amount_wei;
                *self.balances.entry(from.clone()).or_default() += amount_wei;
                Ok(contract)
            }
        }
    }
}

/// Shared handle to the chain; clones see the same state.
#[derive(Clone, Default)]
pub struct DevChain {
    state: Arc<Mutex<DevChainState>>,
}

impl DevChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic development account `index`.
    pub fn account(index: u64) -> Address {
        Address(format!("0x{:040x}", 0xacc0_0000_u64 + index))
    }

    pub async fn fund(&self, account: &Address, wei: u128) {
        *self
            .state
            .lock()
            .await
            .balances
            .entry(account.clone())
            .or_default() += wei;
    }

    pub async fn instance(&self, contract: &Address) -> Option<GreeterInstance> {
        self.state.lock().await.contracts.get(contract).cloned()
    }

    pub fn signer_for(&self, account: Address) -> SigningHandle {
        SigningHandle::new(Arc::new(DevSigner {
            chain: self.clone(),
            account,
        }))
    }
}

pub struct DevSigner {
    chain: DevChain,
    account: Address,
}

#[async_trait]
impl ContractSigner for DevSigner {
    fn account(&self) -> Address {
        self.account.clone()
    }

    async fn sign_message(&self, message: &str) -> Result<String> {
        // Not a secp256k1 signature; stable per (account, message) for local runs.
        let mut hasher = Sha256::new();
        hasher.update(self.account.as_str().as_bytes());
        hasher.update(message.as_bytes());
        Ok(format!("0x{}", hex::encode(hasher.finalize())))
    }

    async fn call(&self, contract: &Address, call: ContractCall) -> Result<CallOutput> {
        let state = self.chain.state.lock().await;
        let instance = state
            .contracts
            .get(contract)
            .ok_or_else(|| anyhow!("call to non-contract account {contract}"))?;
        Ok(match call {
            ContractCall::Greet => CallOutput::Text(instance.greeting.clone()),
            ContractCall::Owner => CallOutput::Address(instance.owner.clone()),
        })
    }

    async fn get_balance(&self, address: &Address) -> Result<String> {
        let state = self.chain.state.lock().await;
        let balance = match state.contracts.get(address) {
            Some(instance) => instance.balance_wei,
            None => state.balances.get(address).copied().unwrap_or_default(),
        };
        Ok(balance.to_string())
    }

    async fn send_transaction(&self, tx: ContractTransaction) -> Result<TxHash> {
        let mut state = self.chain.state.lock().await;
        let tx_hash = state.next_tx_hash();
        let deploy = matches!(tx, ContractTransaction::Deploy { .. });
        let receipt = match state.execute(&self.account, tx) {
            Ok(target) => TransactionReceipt {
                tx_hash: tx_hash.clone(),
                status: ReceiptStatus::Success,
                contract_address: deploy.then_some(target),
                revert_reason: None,
            },
            Err(reason) => TransactionReceipt {
                tx_hash: tx_hash.clone(),
                status: ReceiptStatus::Reverted,
                contract_address: None,
                revert_reason: Some(reason),
            },
        };
        debug!(
            "devnet: mined tx={} from={} status={:?}",
            tx_hash, self.account, receipt.status
        );
        state.receipts.insert(tx_hash.clone(), receipt);
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> Result<TransactionReceipt> {
        self.chain
            .state
            .lock()
            .await
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| anyhow!("unknown transaction {tx_hash}"))
    }
}

/// Wallet over the chain's development accounts.
pub struct DevWallet {
    chain: DevChain,
    account: Mutex<Address>,
    notifications: broadcast::Sender<WalletNotification>,
}

impl DevWallet {
    pub fn new(chain: DevChain, account: Address) -> Self {
        let (notifications, _) = broadcast::channel(16);
        Self {
            chain,
            account: Mutex::new(account),
            notifications,
        }
    }

    /// Simulates the user switching accounts inside the wallet.
    pub async fn switch_account(&self, account: Address) -> WalletSession {
        *self.account.lock().await = account.clone();
        let session = WalletSession::new(self.chain.signer_for(account));
        let _ = self
            .notifications
            .send(WalletNotification::AccountChanged(session.clone()));
        session
    }
}

#[async_trait]
impl WalletConnector for DevWallet {
    async fn connect(&self) -> Result<WalletSession> {
        let account = self.account.lock().await.clone();
        {
            let mut state = self.chain.state.lock().await;
            state
                .balances
                .entry(account.clone())
                .or_insert(DEFAULT_ACCOUNT_FUNDS_WEI);
        }
        Ok(WalletSession::new(self.chain.signer_for(account)))
    }

    async fn disconnect(&self) -> Result<()> {
        let _ = self.notifications.send(WalletNotification::Disconnected);
        Ok(())
    }

    fn subscribe_notifications(&self) -> broadcast::Receiver<WalletNotification> {
        self.notifications.subscribe()
    }
}
