//! Server-side configuration storage.

use cfgsync_protocol::{ConfigSnapshot, UpdateBatch};
use parking_lot::RwLock;

/// The authoritative configuration.
///
/// Every accepted write bumps the revision by one.
#[derive(Debug, Default)]
pub struct ConfigStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    snapshot: ConfigSnapshot,
    revision: u64,
}

impl ConfigStore {
    /// Creates a store holding `snapshot` at revision 0.
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                snapshot,
                revision: 0,
            }),
        }
    }

    /// Returns a copy of the configuration.
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.inner.read().snapshot.clone()
    }

    /// Returns the subset of the configuration named by `fields`.
    pub fn select(&self, fields: &[String]) -> ConfigSnapshot {
        let inner = self.inner.read();
        fields
            .iter()
            .filter_map(|name| {
                inner
                    .snapshot
                    .get(name)
                    .map(|value| (name.clone(), value))
            })
            .collect()
    }

    /// Applies a write and returns the new revision.
    pub fn apply(&self, batch: &UpdateBatch) -> u64 {
        let mut inner = self.inner.write();
        inner.snapshot.apply_batch(batch);
        inner.revision += 1;
        inner.revision
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }
}
