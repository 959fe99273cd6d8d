//! Per-volume mutual exclusion.
//!
//! Publish and unpublish both inspect the mount table and then act on it.
//! Two calls for the same volume interleaving between those steps could
//! both decide to stage the device, so every node call holds the volume's
//! lock for its whole inspect-then-act sequence.  Calls for different
//! volumes never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::VolumeId;

type Slot = Arc<Mutex<()>>;

/// Keyed lock table.  Entries exist only while someone holds or waits for
/// them.
#[derive(Clone, Default)]
pub struct VolumeLocks {
    inner: Arc<DashMap<VolumeId, Slot>>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `volume_id`.
    pub async fn lock(&self, volume_id: &VolumeId) -> VolumeGuard {
        // Clone the slot out so no map shard stays locked across the await.
        let slot = Arc::clone(
            self.inner
                .entry(volume_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = slot.lock_owned().await;
        VolumeGuard {
            locks: Arc::clone(&self.inner),
            volume_id: volume_id.clone(),
            guard: Some(guard),
        }
    }

    /// Number of volumes currently locked or waited on.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held while a volume is being worked on.  Dropping it releases the lock
/// and forgets the entry if no one else is queued for it.
pub struct VolumeGuard {
    locks: Arc<DashMap<VolumeId, Slot>>,
    volume_id: VolumeId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        // Release first so our own guard no longer counts as a holder.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.volume_id, |_, slot| Arc::strong_count(slot) == 1);
    }
}
