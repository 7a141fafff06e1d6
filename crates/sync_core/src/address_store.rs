use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::{
    domain::{Address, AddressRecord},
    error::SyncError,
};
use storage::KeyValueStore;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

pub const CONTRACT_ADDRESSES: &str = "CONTRACT_ADDRESSES";

/// Known contract instances plus the selected one, written through to the
/// key/value store on every mutation.
pub struct AddressStore {
    store: Arc<dyn KeyValueStore>,
    record: watch::Sender<AddressRecord>,
    write_lock: Mutex<()>,
    unsynced: AtomicBool,
}

impl AddressStore {
    /// Loads the persisted record, falling back to the default when it is
    /// absent or unreadable.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let record = match store.get(CONTRACT_ADDRESSES).await {
            Ok(Some(raw)) => serde_json::from_str::<AddressRecord>(&raw).unwrap_or_else(|err| {
                warn!("address store: discarding unreadable record: {err}");
                AddressRecord::default()
            }),
            Ok(None) => AddressRecord::default(),
            Err(err) => {
                warn!("address store: load failed, starting from default: {err:#}");
                AddressRecord::default()
            }
        };
        let (record, _) = watch::channel(record);
        Self {
            store,
            record,
            write_lock: Mutex::new(()),
            unsynced: AtomicBool::new(false),
        }
    }

    pub fn record(&self) -> AddressRecord {
        self.record.borrow().clone()
    }

    pub fn current(&self) -> Option<Address> {
        self.record.borrow().selected().cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<AddressRecord> {
        self.record.subscribe()
    }

    /// True while the in-memory record is ahead of the durable copy.
    pub fn has_unsynced_changes(&self) -> bool {
        self.unsynced.load(Ordering::Acquire)
    }

    /// Appends `address` without changing the selection.
    pub async fn push(&self, address: Address) -> Result<(), SyncError> {
        self.commit(|record| {
            let mut next = record.clone();
            next.addresses.push(address);
            next
        })
        .await
    }

    /// Appends `address` if unknown and selects it, as one record write.
    pub async fn activate(&self, address: Address) -> Result<(), SyncError> {
        self.commit(|record| {
            let mut next = record.clone();
            if !next.contains(&address) {
                next.addresses.push(address.clone());
            }
            next.current = address;
            next
        })
        .await
    }

    /// Selects `address`; membership in the known list is not required.
    pub async fn set_current(&self, address: Address) -> Result<(), SyncError> {
        self.commit(|record| AddressRecord {
            addresses: record.addresses.clone(),
            current: address,
        })
        .await
    }

    async fn commit(
        &self,
        next: impl FnOnce(&AddressRecord) -> AddressRecord,
    ) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().await;
        let next = next(&self.record.borrow());
        info!(
            "address store: current={} known={}",
            next.current,
            next.addresses.len()
        );
        self.record.send_replace(next.clone());

        let raw = serde_json::to_string(&next)
            .map_err(|err| SyncError::PersistenceFailure(err.to_string()))?;
        match self.store.set(CONTRACT_ADDRESSES, &raw).await {
            Ok(()) => {
                self.unsynced.store(false, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                self.unsynced.store(true, Ordering::Release);
                warn!("address store: persist failed, keeping record in memory: {err:#}");
                Err(SyncError::PersistenceFailure(format!("{err:#}")))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/address_store_tests.rs"]
mod tests;
