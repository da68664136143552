//! Per-volume exclusivity.
//!
//! [`LockArena`] hands out one async mutex per [`VolumeId`], created on first
//! use and evicted as soon as the last holder or waiter lets go.  Calls on
//! different volumes never contend; calls on the same volume are strictly
//! serialized.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::context::CallContext;
use crate::error::CsiError;
use crate::types::VolumeId;

type LockMap = DashMap<VolumeId, Arc<Mutex<()>>>;

/// Arena of lazily created per-volume locks.
#[derive(Debug, Default)]
pub struct LockArena {
    locks: Arc<LockMap>,
}

/// Proof that the holder has exclusive access to one volume.
///
/// Registry mutations take a `&VolumeGuard` so they cannot be performed
/// without holding the lock of the volume they touch.
#[derive(Debug)]
pub struct VolumeGuard {
    volume_id: VolumeId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl LockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `volume_id`.
    ///
    /// Returns [`CsiError::Canceled`] if `ctx` is cancelled first; nothing is
    /// held in that case.
    pub async fn acquire(
        &self,
        ctx: &CallContext,
        volume_id: &VolumeId,
        op: &str,
    ) -> Result<VolumeGuard, CsiError> {
        let mutex = self.locks.entry(volume_id.clone()).or_default().value().clone();

        let acquired = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            guard = mutex.lock_owned() => Some(guard),
        };

        match acquired {
            Some(guard) => {
                trace!(%volume_id, op, "volume lock acquired");
                Ok(VolumeGuard {
                    volume_id: volume_id.clone(),
                    guard: Some(guard),
                    locks: Arc::clone(&self.locks),
                })
            }
            None => {
                evict_idle(&self.locks, volume_id);
                Err(CsiError::Canceled(format!("{op}({volume_id})")))
            }
        }
    }

    /// Number of volumes that currently have a live lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl VolumeGuard {
    /// The volume this guard grants access to.
    pub fn volume_id(&self) -> &VolumeId {
        &self.volume_id
    }
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        // Release first so our own Arc no longer counts as a user.
        drop(self.guard.take());
        evict_idle(&self.locks, &self.volume_id);
    }
}

/// Drop the arena entry if the map holds the only reference.
///
/// Waiters clone the `Arc` under the shard lock, so a zero-waiter check made
/// under the same lock cannot race with a new waiter.
fn evict_idle(locks: &LockMap, volume_id: &VolumeId) {
    locks.remove_if(volume_id, |_, mutex| Arc::strong_count(mutex) == 1);
}
