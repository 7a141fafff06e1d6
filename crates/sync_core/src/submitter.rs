use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use chain_integration::SigningHandle;
use chrono::{DateTime, Utc};
use shared::{
    domain::{Address, RequestKind, RequestStatus, TxHash},
    error::SyncError,
    protocol::{ContractTransaction, Notice, ReceiptStatus, TransactionReceipt},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{address_store::AddressStore, binding::Binding, mirror::StateMirror};

pub const DEFAULT_GREETING_FEE_WEI: u128 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitRequest {
    Deploy { initial_greeting: String },
    SetGreeting { text: String },
    Withdraw { amount_wei: i128 },
}

impl SubmitRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Deploy { .. } => RequestKind::Deploy,
            Self::SetGreeting { .. } => RequestKind::SetGreeting,
            Self::Withdraw { .. } => RequestKind::Withdraw,
        }
    }

    /// Input checks that need neither a wallet nor a binding.
    pub fn validate(&self) -> Result<(), SyncError> {
        match self {
            Self::Deploy { initial_greeting } if initial_greeting.is_empty() => Err(
                SyncError::EmptyInput("Initial greeting cannot be empty".into()),
            ),
            Self::SetGreeting { text } if text.is_empty() => {
                Err(SyncError::EmptyInput("Greeting cannot be empty".into()))
            }
            Self::Withdraw { amount_wei } if *amount_wei <= 0 => {
                Err(SyncError::EmptyInput("Withdraw cannot be empty".into()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Deployed {
        address: Address,
        tx_hash: TxHash,
        /// Set when the new address is selected in memory but could not be
        /// written to the store.
        persistence: Option<SyncError>,
    },
    GreetingSet {
        greeting: Option<String>,
        tx_hash: TxHash,
    },
    Withdrawn {
        balance_wei: Option<String>,
        tx_hash: TxHash,
    },
}

impl SubmitOutcome {
    pub fn tx_hash(&self) -> &TxHash {
        match self {
            Self::Deployed { tx_hash, .. }
            | Self::GreetingSet { tx_hash, .. }
            | Self::Withdrawn { tx_hash, .. } => tx_hash,
        }
    }

    pub fn notice(&self) -> Notice {
        match self {
            Self::Deployed { address, .. } => Notice::deployed(address),
            Self::GreetingSet { greeting, .. } => {
                Notice::greeting_set(greeting.as_deref().unwrap_or("<unavailable>"))
            }
            Self::Withdrawn { balance_wei, .. } => {
                Notice::balance_changed(balance_wei.as_deref().unwrap_or("<unavailable>"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub submitted_at: DateTime<Utc>,
}

type PendingTable = StdMutex<HashMap<RequestKind, PendingRequest>>;

/// Sends contract writes, one in flight per request kind.
pub struct TransactionSubmitter {
    pending: PendingTable,
    mirror: Arc<StateMirror>,
    addresses: Arc<AddressStore>,
    greeting_fee_wei: u128,
}

impl TransactionSubmitter {
    pub fn new(mirror: Arc<StateMirror>, addresses: Arc<AddressStore>) -> Self {
        Self::with_fee(mirror, addresses, DEFAULT_GREETING_FEE_WEI)
    }

    pub fn with_fee(
        mirror: Arc<StateMirror>,
        addresses: Arc<AddressStore>,
        greeting_fee_wei: u128,
    ) -> Self {
        Self {
            pending: StdMutex::new(HashMap::new()),
            mirror,
            addresses,
            greeting_fee_wei,
        }
    }

    pub fn greeting_fee_wei(&self) -> u128 {
        self.greeting_fee_wei
    }

    /// `Idle` unless a request of this kind is currently in flight.
    pub fn status(&self, kind: RequestKind) -> RequestStatus {
        self.pending(kind)
            .map(|request| request.status)
            .unwrap_or_default()
    }

    pub fn pending(&self, kind: RequestKind) -> Option<PendingRequest> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    /// Validates, sends and awaits confirmation. Every local check runs
    /// before the first suspension point.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        signer: Option<&SigningHandle>,
        binding: Option<Arc<Binding>>,
    ) -> Result<SubmitOutcome, SyncError> {
        request.validate()?;
        let signer = signer.ok_or(SyncError::WalletUnavailable)?;
        let binding = match request.kind() {
            RequestKind::Deploy => None,
            _ => Some(binding.ok_or(SyncError::ContractUnbound)?),
        };
        let guard = InFlightGuard::claim(&self.pending, request.kind())?;

        let result = match (request, binding) {
            (SubmitRequest::Deploy { initial_greeting }, _) => {
                self.deploy(signer, initial_greeting).await
            }
            (SubmitRequest::SetGreeting { text }, Some(binding)) => {
                self.set_greeting(&binding, text).await
            }
            (SubmitRequest::Withdraw { amount_wei }, Some(binding)) => {
                self.withdraw(&binding, amount_wei.unsigned_abs()).await
            }
            (_, None) => Err(SyncError::ContractUnbound),
        };

        match &result {
            Ok(outcome) => guard.finish(RequestStatus::Confirmed, outcome.tx_hash().as_str()),
            Err(err) => guard.finish(RequestStatus::Rejected, &err.to_string()),
        }
        result
    }

    async fn deploy(
        &self,
        signer: &SigningHandle,
        initial_greeting: String,
    ) -> Result<SubmitOutcome, SyncError> {
        let tx_hash = signer
            .send_transaction(ContractTransaction::Deploy { initial_greeting })
            .await
            .map_err(rejected)?;
        let receipt = confirm(signer, &tx_hash).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            SyncError::TransactionReverted("deployment receipt has no contract address".into())
        })?;

        info!("submit: deployed address={address} tx={tx_hash}");
        let persistence = match self.addresses.activate(address.clone()).await {
            Ok(()) => None,
            Err(err) => {
                warn!("submit: deployed contract kept in memory only: {err}");
                Some(err)
            }
        };
        Ok(SubmitOutcome::Deployed {
            address,
            tx_hash,
            persistence,
        })
    }

    async fn set_greeting(
        &self,
        binding: &Binding,
        text: String,
    ) -> Result<SubmitOutcome, SyncError> {
        let tx_hash = binding
            .set_greeting(&text, self.greeting_fee_wei)
            .await
            .map_err(rejected)?;
        confirm(binding.signer(), &tx_hash).await?;

        let report = self.mirror.refresh(binding).await;
        Ok(SubmitOutcome::GreetingSet {
            greeting: report.fetched.greeting,
            tx_hash,
        })
    }

    async fn withdraw(&self, binding: &Binding, amount_wei: u128) -> Result<SubmitOutcome, SyncError> {
        let tx_hash = binding.withdraw(amount_wei).await.map_err(rejected)?;
        confirm(binding.signer(), &tx_hash).await?;

        let report = self.mirror.refresh(binding).await;
        Ok(SubmitOutcome::Withdrawn {
            balance_wei: report.fetched.balance_wei,
            tx_hash,
        })
    }
}

fn rejected(err: anyhow::Error) -> SyncError {
    SyncError::TransactionReverted(format!("{err:#}"))
}

async fn confirm(signer: &SigningHandle, tx_hash: &TxHash) -> Result<TransactionReceipt, SyncError> {
    let receipt = signer.wait_for_confirmation(tx_hash).await.map_err(rejected)?;
    match receipt.status {
        ReceiptStatus::Success => Ok(receipt),
        ReceiptStatus::Reverted => Err(SyncError::TransactionReverted(
            receipt
                .revert_reason
                .unwrap_or_else(|| "transaction reverted".into()),
        )),
    }
}

/// Holds the kind's slot in the pending table; the slot is released on drop,
/// including when the submitting future is dropped mid-flight.
struct InFlightGuard<'a> {
    table: &'a PendingTable,
    kind: RequestKind,
    id: Uuid,
}

impl<'a> InFlightGuard<'a> {
    fn claim(table: &'a PendingTable, kind: RequestKind) -> Result<Self, SyncError> {
        let mut pending = table.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.contains_key(&kind) {
            return Err(SyncError::RequestInFlight(kind));
        }
        let request = PendingRequest {
            id: Uuid::new_v4(),
            kind,
            status: RequestStatus::InFlight,
            submitted_at: Utc::now(),
        };
        info!("submit: {kind} in flight request_id={}", request.id);
        let id = request.id;
        pending.insert(kind, request);
        Ok(Self { table, kind, id })
    }

    fn finish(self, status: RequestStatus, detail: &str) {
        if let Some(request) = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&self.kind)
        {
            request.status = status;
        }
        match status {
            RequestStatus::Confirmed => {
                info!("submit: {} confirmed request_id={} {detail}", self.kind, self.id)
            }
            _ => warn!("submit: {} rejected request_id={}: {detail}", self.kind, self.id),
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(&self.kind).is_some_and(|request| request.id == self.id) {
            pending.remove(&self.kind);
        }
    }
}

#[cfg(test)]
#[path = "tests/submitter_tests.rs"]
mod tests;
