//! Scripted chain for exercising interleavings: reads and confirmations can
//! be held open until the test releases them.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chain_integration::{
    ContractSigner, SigningHandle, WalletConnector, WalletNotification, WalletSession,
};
use shared::{
    domain::{Address, RequestKind, TxHash},
    protocol::{CallOutput, ContractCall, ContractTransaction, ReceiptStatus, TransactionReceipt},
};
use storage::{KeyValueStore, MemoryKvStore};
use tokio::sync::{broadcast, Notify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedContract {
    pub greeting: String,
    pub owner: Address,
    pub balance_wei: u128,
}

/// A pause point: `entered` fires when an operation reaches it, and the
/// operation continues once `release` is notified.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl Gate {
    pub async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct ChainState {
    contracts: HashMap<Address, ScriptedContract>,
    pending: HashMap<TxHash, (Address, ContractTransaction)>,
    greet_gates: HashMap<Address, Arc<Gate>>,
    confirm_gates: HashMap<RequestKind, Arc<Gate>>,
    reverts: HashMap<RequestKind, String>,
    send_failure: Option<String>,
    next_deploy: Vec<Address>,
    next_tx: u64,
}

#[derive(Clone, Default)]
pub struct ScriptedChain {
    state: Arc<StdMutex<ChainState>>,
    reads: Arc<AtomicUsize>,
    sends: Arc<AtomicUsize>,
}

fn kind_of(tx: &ContractTransaction) -> RequestKind {
    match tx {
        ContractTransaction::Deploy { .. } => RequestKind::Deploy,
        ContractTransaction::SetGreeting { .. } => RequestKind::SetGreeting,
        ContractTransaction::Withdraw { .. } => RequestKind::Withdraw,
    }
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
        let mut state = self.state.lock().expect("chain state");
        f(&mut state)
    }

    pub fn add_contract(&self, address: &str, greeting: &str, owner: &Address, balance_wei: u128) {
        self.with_state(|state| {
            state.contracts.insert(
                Address::from(address),
                ScriptedContract {
                    greeting: greeting.into(),
                    owner: owner.clone(),
                    balance_wei,
                },
            )
        });
    }

    pub fn contract(&self, address: &Address) -> Option<ScriptedContract> {
        self.with_state(|state| state.contracts.get(address).cloned())
    }

    pub fn next_deploy_address(&self, address: &str) {
        self.with_state(|state| state.next_deploy.push(Address::from(address)));
    }

    pub fn hold_greet(&self, address: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.with_state(|state| {
            state
                .greet_gates
                .insert(Address::from(address), Arc::clone(&gate))
        });
        gate
    }

    pub fn hold_confirmation(&self, kind: RequestKind) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.with_state(|state| state.confirm_gates.insert(kind, Arc::clone(&gate)));
        gate
    }

    pub fn revert_next(&self, kind: RequestKind, reason: &str) {
        self.with_state(|state| state.reverts.insert(kind, reason.to_string()));
    }

    pub fn fail_sends(&self, reason: &str) {
        self.with_state(|state| state.send_failure = Some(reason.to_string()));
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.reads() + self.sends()
    }

    pub fn signer(&self, account: &Address) -> SigningHandle {
        SigningHandle::new(Arc::new(ScriptedSigner {
            chain: self.clone(),
            account: account.clone(),
        }))
    }
}

pub struct ScriptedSigner {
    chain: ScriptedChain,
    account: Address,
}

#[async_trait]
impl ContractSigner for ScriptedSigner {
    fn account(&self) -> Address {
        self.account.clone()
    }

    async fn sign_message(&self, message: &str) -> Result<String> {
        Ok(format!("signed:{}:{message}", self.account))
    }

    async fn call(&self, contract: &Address, call: ContractCall) -> Result<CallOutput> {
        self.chain.reads.fetch_add(1, Ordering::SeqCst);
        if call == ContractCall::Greet {
            let gate = self
                .chain
                .with_state(|state| state.greet_gates.remove(contract));
            if let Some(gate) = gate {
                gate.pass().await;
            }
        }
        let instance = self
            .chain
            .contract(contract)
            .ok_or_else(|| anyhow!("call to non-contract account {contract}"))?;
        Ok(match call {
            ContractCall::Greet => CallOutput::Text(instance.greeting),
            ContractCall::Owner => CallOutput::Address(instance.owner),
        })
    }

    async fn get_balance(&self, address: &Address) -> Result<String> {
        self.chain.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .chain
            .contract(address)
            .map(|instance| instance.balance_wei)
            .unwrap_or_default()
            .to_string())
    }

    async fn send_transaction(&self, tx: ContractTransaction) -> Result<TxHash> {
        self.chain.sends.fetch_add(1, Ordering::SeqCst);
        self.chain.with_state(|state| {
            if let Some(reason) = &state.send_failure {
                return Err(anyhow!("{reason}"));
            }
            state.next_tx += 1;
            let hash = TxHash(format!("0xtx{}", state.next_tx));
            state
                .pending
                .insert(hash.clone(), (self.account.clone(), tx));
            Ok(hash)
        })
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> Result<TransactionReceipt> {
        let (from, tx) = self
            .chain
            .with_state(|state| state.pending.remove(tx_hash))
            .ok_or_else(|| anyhow!("unknown transaction {tx_hash}"))?;
        let kind = kind_of(&tx);

        let gate = self
            .chain
            .with_state(|state| state.confirm_gates.remove(&kind));
        if let Some(gate) = gate {
            gate.pass().await;
        }

        self.chain.with_state(|state| {
            if let Some(reason) = state.reverts.remove(&kind) {
                return Ok(TransactionReceipt {
                    tx_hash: tx_hash.clone(),
                    status: ReceiptStatus::Reverted,
                    contract_address: None,
                    revert_reason: Some(reason),
                });
            }

            let mut contract_address = None;
            match tx {
                ContractTransaction::Deploy { initial_greeting } => {
                    let address = if state.next_deploy.is_empty() {
                        Address(format!("0xdeployed{}", state.next_tx))
                    } else {
                        state.next_deploy.remove(0)
                    };
                    state.contracts.insert(
                        address.clone(),
                        ScriptedContract {
                            greeting: initial_greeting,
                            owner: from,
                            balance_wei: 0,
                        },
                    );
                    contract_address = Some(address);
                }
                ContractTransaction::SetGreeting {
                    contract,
                    text,
                    payment_wei,
                } => {
                    let instance = state
                        .contracts
                        .get_mut(&contract)
                        .ok_or_else(|| anyhow!("no contract at {contract}"))?;
                    instance.greeting = text;
                    instance.balance_wei += payment_wei;
                }
                ContractTransaction::Withdraw {
                    contract,
                    amount_wei,
                } => {
                    let instance = state
                        .contracts
                        .get_mut(&contract)
                        .ok_or_else(|| anyhow!("no contract at {contract}"))?;
                    instance.balance_wei = instance.balance_wei.saturating_sub(amount_wei);
                }
            }

            Ok(TransactionReceipt {
                tx_hash: tx_hash.clone(),
                status: ReceiptStatus::Success,
                contract_address,
                revert_reason: None,
            })
        })
    }
}

/// Wallet whose notifications are pushed by the test.
pub struct ScriptedWallet {
    session: StdMutex<Option<WalletSession>>,
    notifications: broadcast::Sender<WalletNotification>,
}

impl ScriptedWallet {
    pub fn new(session: WalletSession) -> Self {
        let (notifications, _) = broadcast::channel(16);
        Self {
            session: StdMutex::new(Some(session)),
            notifications,
        }
    }

    pub fn push(&self, notification: WalletNotification) {
        let _ = self.notifications.send(notification);
    }
}

#[async_trait]
impl WalletConnector for ScriptedWallet {
    async fn connect(&self) -> Result<WalletSession> {
        self.session
            .lock()
            .expect("wallet session")
            .clone()
            .ok_or_else(|| anyhow!("wallet locked"))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe_notifications(&self) -> broadcast::Receiver<WalletNotification> {
        self.notifications.subscribe()
    }
}

/// Key/value store whose writes can be held open or made to fail.
#[derive(Default)]
pub struct ControlledStore {
    inner: MemoryKvStore,
    failing: AtomicBool,
    held: StdMutex<Option<Arc<Gate>>>,
}

impl ControlledStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next write pauses at the returned gate.
    pub fn hold_next_write(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.held.lock().expect("held gate") = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for ControlledStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let gate = self.held.lock().expect("held gate").take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("disk full"));
        }
        self.inner.set(key, value).await
    }
}
