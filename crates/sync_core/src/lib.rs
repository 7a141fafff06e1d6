pub mod address_store;
pub mod binding;
pub mod mirror;
pub mod owner_gate;
pub mod session;
pub mod submitter;

use std::sync::{Arc, Weak};

use chain_integration::{WalletConnector, WalletNotification};
use shared::{
    domain::{Address, AddressRecord, MirrorState, RequestKind, RequestStatus},
    error::SyncError,
    protocol::{EngineEvent, Notice},
};
use storage::KeyValueStore;
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, watch, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub use address_store::{AddressStore, CONTRACT_ADDRESSES};
pub use binding::{Binding, BindingResolver, Resolution};
pub use mirror::{CommitOutcome, RefreshReport, StateMirror};
pub use owner_gate::{select_view, OwnerView};
pub use session::{Session, SessionTracker};
pub use submitter::{
    PendingRequest, SubmitOutcome, SubmitRequest, TransactionSubmitter, DEFAULT_GREETING_FEE_WEI,
};

pub const DEFAULT_INITIAL_GREETING: &str = "Hello, Hardhat!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Value sent with every `setGreeting` call.
    pub greeting_fee_wei: u128,
    pub initial_greeting: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            greeting_fee_wei: DEFAULT_GREETING_FEE_WEI,
            initial_greeting: DEFAULT_INITIAL_GREETING.to_string(),
        }
    }
}

struct ConnectedWallet {
    connector: Arc<dyn WalletConnector>,
    notifications: JoinHandle<()>,
}

/// Wires wallet session, address selection, binding and mirror together.
/// Every input change funnels into [`ContractSyncEngine::sync`], which is the
/// only place a binding is installed or torn down.
pub struct ContractSyncEngine {
    options: EngineOptions,
    sessions: SessionTracker,
    addresses: Arc<AddressStore>,
    resolver: Mutex<BindingResolver>,
    installed: watch::Receiver<Option<Arc<Binding>>>,
    mirror: Arc<StateMirror>,
    submitter: TransactionSubmitter,
    wallet: Mutex<Option<ConnectedWallet>>,
    events: broadcast::Sender<EngineEvent>,
}

impl ContractSyncEngine {
    pub async fn open(store: Arc<dyn KeyValueStore>, options: EngineOptions) -> Arc<Self> {
        let addresses = Arc::new(AddressStore::load(store).await);
        let resolver = BindingResolver::new();
        let installed = resolver.subscribe();
        let mirror = Arc::new(StateMirror::new(resolver.subscribe()));
        let submitter = TransactionSubmitter::with_fee(
            Arc::clone(&mirror),
            Arc::clone(&addresses),
            options.greeting_fee_wei,
        );
        let (events, _) = broadcast::channel(256);

        info!(
            "engine: opened current={} known={}",
            addresses.record().current,
            addresses.record().addresses.len()
        );
        Arc::new(Self {
            options,
            sessions: SessionTracker::new(),
            addresses,
            resolver: Mutex::new(resolver),
            installed,
            mirror,
            submitter,
            wallet: Mutex::new(None),
            events,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> Session {
        self.sessions.current()
    }

    pub fn address_record(&self) -> AddressRecord {
        self.addresses.record()
    }

    pub fn has_unsynced_addresses(&self) -> bool {
        self.addresses.has_unsynced_changes()
    }

    pub fn mirror(&self) -> MirrorState {
        self.mirror.snapshot()
    }

    pub fn current_binding(&self) -> Option<Arc<Binding>> {
        self.installed.borrow().clone()
    }

    pub fn view(&self) -> OwnerView {
        let session = self.sessions.current();
        let mirror = self.mirror.snapshot();
        select_view(session.account.as_ref(), mirror.owner.as_ref())
    }

    pub fn request_status(&self, kind: RequestKind) -> RequestStatus {
        self.submitter.status(kind)
    }

    /// Connects the wallet and forwards its later notifications until the
    /// wallet is disconnected or the engine is dropped.
    pub async fn connect_wallet(
        self: &Arc<Self>,
        connector: Arc<dyn WalletConnector>,
    ) -> Result<Session, SyncError> {
        let notifications = connector.subscribe_notifications();
        let session = match self.sessions.connect(connector.as_ref()).await {
            Ok(session) => session,
            Err(err) => {
                self.notify(Notice::from(&err));
                return Err(err);
            }
        };

        let task = self.spawn_notification_forwarder(notifications);
        let previous = self.wallet.lock().await.replace(ConnectedWallet {
            connector,
            notifications: task,
        });
        if let Some(previous) = previous {
            previous.notifications.abort();
        }

        self.emit_session(&session);
        self.sync().await;
        Ok(session)
    }

    pub async fn disconnect_wallet(&self) {
        let connected = self.wallet.lock().await.take();
        match connected {
            Some(connected) => {
                connected.notifications.abort();
                self.sessions.disconnect(connected.connector.as_ref()).await;
            }
            None => {
                self.sessions.apply(WalletNotification::Disconnected);
            }
        }
        self.emit_session(&self.sessions.current());
        self.sync().await;
    }

    /// Returns whether the session changed.
    pub async fn apply_wallet_notification(&self, notification: WalletNotification) -> bool {
        if !self.sessions.apply(notification) {
            return false;
        }
        self.emit_session(&self.sessions.current());
        self.sync().await;
        true
    }

    fn spawn_notification_forwarder(
        self: &Arc<Self>,
        mut notifications: broadcast::Receiver<WalletNotification>,
    ) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let notification = match notifications.recv().await {
                    Ok(notification) => notification,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("engine: skipped {skipped} wallet notifications");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.apply_wallet_notification(notification).await;
            }
        })
    }

    /// Selects `address` and rebinds. A persistence failure is reported but
    /// the selection still takes effect in memory.
    pub async fn select_address(&self, address: Address) -> Result<Option<Arc<Binding>>, SyncError> {
        let persisted = self.addresses.set_current(address).await;
        if let Err(err) = &persisted {
            self.notify(Notice::from(err));
        }
        let binding = self.sync().await;
        persisted.map(|()| binding)
    }

    /// Remembers `address` without selecting it.
    pub async fn add_address(&self, address: Address) -> Result<(), SyncError> {
        let persisted = self.addresses.push(address).await;
        if let Err(err) = &persisted {
            self.notify(Notice::from(err));
        }
        persisted
    }

    /// One resolver pass over the latest signer and selection. A fresh
    /// binding starts from an empty mirror and is refreshed immediately.
    pub async fn sync(&self) -> Option<Arc<Binding>> {
        let resolution = {
            let mut resolver = self.resolver.lock().await;
            let session = self.sessions.current();
            let address = self.addresses.current();
            let resolution = resolver.resolve(session.signer.as_ref(), address.as_ref());
            match &resolution {
                Resolution::Installed(binding) => self.mirror.reset(Some(binding.generation())),
                Resolution::TornDown => self.mirror.reset(None),
                Resolution::Unchanged => {}
            }
            resolution
        };

        match resolution {
            Resolution::Unchanged => self.current_binding(),
            Resolution::Installed(binding) => {
                self.emit(EngineEvent::BindingChanged {
                    generation: Some(binding.generation()),
                    address: Some(binding.address().clone()),
                });
                self.emit(EngineEvent::MirrorUpdated(self.mirror.snapshot()));
                self.refresh_binding(&binding).await;
                Some(binding)
            }
            Resolution::TornDown => {
                self.emit(EngineEvent::BindingChanged {
                    generation: None,
                    address: None,
                });
                self.emit(EngineEvent::MirrorUpdated(self.mirror.snapshot()));
                None
            }
        }
    }

    /// Re-reads greeting, balance and owner for the binding matching the
    /// current selection and signer.
    pub async fn refresh(&self) -> Result<RefreshReport, SyncError> {
        let binding = self
            .aligned_binding()
            .await
            .ok_or(SyncError::ContractUnbound)?;
        Ok(self.refresh_binding(&binding).await)
    }

    /// The installed binding if it still targets the selected address with
    /// the session's signer; otherwise resolves first. A selection committed
    /// in memory while its write is still pending is picked up here.
    async fn aligned_binding(&self) -> Option<Arc<Binding>> {
        let session = self.sessions.current();
        let address = self.addresses.current();
        let installed = self.current_binding();
        let aligned = match &installed {
            Some(binding) => {
                Some(binding.address()) == address.as_ref()
                    && Some(binding.signer()) == session.signer.as_ref()
            }
            None => address.is_none() || session.signer.is_none(),
        };
        if aligned {
            installed
        } else {
            self.sync().await
        }
    }

    async fn refresh_binding(&self, binding: &Binding) -> RefreshReport {
        let report = self.mirror.refresh(binding).await;
        if report.committed > 0 {
            self.emit(EngineEvent::MirrorUpdated(self.mirror.snapshot()));
        }
        report
    }

    /// Deploy request carrying the configured constructor greeting.
    pub fn deploy_request(&self) -> SubmitRequest {
        SubmitRequest::Deploy {
            initial_greeting: self.options.initial_greeting.clone(),
        }
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, SyncError> {
        let session = self.sessions.current();
        // Requests that fail local checks must not suspend before failing.
        let needs_binding = request.validate().is_ok()
            && session.signer.is_some()
            && request.kind() != RequestKind::Deploy;
        let binding = if needs_binding {
            self.aligned_binding().await
        } else {
            self.current_binding()
        };
        let result = self
            .submitter
            .submit(request, session.signer.as_ref(), binding)
            .await;

        match &result {
            Ok(outcome) => {
                match outcome {
                    SubmitOutcome::Deployed { persistence, .. } => {
                        self.sync().await;
                        self.notify(outcome.notice());
                        if let Some(err) = persistence {
                            self.notify(Notice::from(err));
                        }
                    }
                    _ => {
                        self.emit(EngineEvent::MirrorUpdated(self.mirror.snapshot()));
                        self.notify(outcome.notice());
                    }
                }
            }
            Err(err) => self.notify(Notice::from(err)),
        }
        result
    }

    pub async fn sign_message(&self, message: &str) -> Result<String, SyncError> {
        let result = match self.sessions.current().signer {
            None => Err(SyncError::WalletUnavailable),
            Some(signer) => signer
                .sign_message(message)
                .await
                .map_err(|err| SyncError::SigningFailed(format!("{err:#}"))),
        };
        if let Err(err) = &result {
            self.notify(Notice::from(err));
        }
        result
    }

    fn emit_session(&self, session: &Session) {
        self.emit(EngineEvent::SessionChanged {
            is_active: session.is_active,
            account: session.account.clone(),
        });
    }

    fn notify(&self, notice: Notice) {
        self.emit(EngineEvent::Notice(notice));
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for ContractSyncEngine {
    fn drop(&mut self) {
        if let Some(connected) = self.wallet.get_mut().take() {
            connected.notifications.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
