use chain_integration::{SigningHandle, WalletConnector, WalletNotification, WalletSession};
use shared::{domain::Address, error::SyncError};
use tokio::sync::watch;
use tracing::{info, warn};

/// Snapshot of the wallet connection. Always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub is_active: bool,
    pub account: Option<Address>,
    pub signer: Option<SigningHandle>,
}

impl Session {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn from_wallet(wallet: WalletSession) -> Self {
        Self {
            is_active: true,
            account: Some(wallet.account),
            signer: Some(wallet.signer),
        }
    }
}

/// Live mirror of the external wallet's state.
pub struct SessionTracker {
    session: watch::Sender<Session>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        let (session, _) = watch::channel(Session::inactive());
        Self { session }
    }

    pub fn current(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub async fn connect(&self, wallet: &dyn WalletConnector) -> Result<Session, SyncError> {
        let connected = wallet.connect().await.map_err(|err| {
            warn!("session: wallet connect failed: {err:#}");
            SyncError::WalletUnavailable
        })?;
        let session = Session::from_wallet(connected);
        self.replace(session.clone());
        Ok(session)
    }

    /// Marks the session inactive even if the wallet reports an error.
    pub async fn disconnect(&self, wallet: &dyn WalletConnector) {
        if let Err(err) = wallet.disconnect().await {
            warn!("session: wallet disconnect reported an error: {err:#}");
        }
        self.replace(Session::inactive());
    }

    /// Applies a wallet notification; returns whether the session changed.
    pub fn apply(&self, notification: WalletNotification) -> bool {
        let next = match notification {
            WalletNotification::AccountChanged(wallet) => Session::from_wallet(wallet),
            WalletNotification::Disconnected => Session::inactive(),
        };
        self.replace(next)
    }

    fn replace(&self, next: Session) -> bool {
        let changed = self.session.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            let session = self.session.borrow();
            info!(
                "session: active={} account={}",
                session.is_active,
                session
                    .account
                    .as_ref()
                    .map(Address::as_str)
                    .unwrap_or("<none>")
            );
        }
        changed
    }
}
