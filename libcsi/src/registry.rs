//! In-process volume registry.
//!
//! The registry is the authoritative record of every provisioned volume.  It
//! is keyed by [`VolumeId`], which is itself derived from the requested name,
//! and every mutation requires the [`VolumeGuard`] of the volume being
//! touched.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::CallContext;
use crate::error::CsiError;
use crate::lock::{LockArena, VolumeGuard};
use crate::types::{Volume, VolumeId, VolumeState};

/// Prefix of every id this driver hands out.
pub const VOLUME_ID_PREFIX: &str = "hostpath-";

/// Derive the volume id for a requested name.
///
/// Ids are a pure function of the name, so a retried `CreateVolume` always
/// lands on the same id, lock and backing path.
pub fn volume_id_for_name(name: &str) -> VolumeId {
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    VolumeId(format!("{VOLUME_ID_PREFIX}{uuid}"))
}

/// Everything the driver knows about one volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeRecord {
    pub id: VolumeId,
    pub requested_name: String,
    pub capacity_bytes: u64,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub backing_path: PathBuf,
    pub state: VolumeState,
    /// Target paths the volume is currently published at.
    #[serde(default)]
    pub mount_refs: BTreeSet<PathBuf>,
}

impl VolumeRecord {
    /// Whether a creation request with these arguments is a retry of the one
    /// that produced this record.
    pub fn matches(&self, capacity_bytes: u64, parameters: &HashMap<String, String>) -> bool {
        self.capacity_bytes == capacity_bytes && &self.parameters == parameters
    }

    /// Descriptor returned to the orchestrator.
    pub fn to_volume(&self) -> Volume {
        Volume {
            volume_id: self.id.clone(),
            capacity_bytes: self.capacity_bytes,
            volume_context: self.parameters.clone(),
            accessible_topology: Vec::new(),
        }
    }
}

/// Concurrent volume registry with per-volume locking.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: DashMap<VolumeId, VolumeRecord>,
    locks: LockArena,
    ready: AtomicBool,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `volume_id`; see [`LockArena::acquire`].
    pub async fn lock(
        &self,
        ctx: &CallContext,
        volume_id: &VolumeId,
        op: &str,
    ) -> Result<VolumeGuard, CsiError> {
        self.locks.acquire(ctx, volume_id, op).await
    }

    pub fn get(&self, volume_id: &VolumeId) -> Option<VolumeRecord> {
        self.volumes.get(volume_id).map(|r| r.value().clone())
    }

    pub fn contains(&self, volume_id: &VolumeId) -> bool {
        self.volumes.contains_key(volume_id)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Insert (or replace) the record of the guarded volume.
    pub fn insert(&self, guard: &VolumeGuard, record: VolumeRecord) {
        debug_assert_eq!(guard.volume_id(), &record.id);
        self.volumes.insert(record.id.clone(), record);
    }

    /// Remove the guarded volume, returning its final record marked
    /// [`VolumeState::Deleted`].
    pub fn evict(&self, guard: &VolumeGuard) -> Option<VolumeRecord> {
        let (_, mut record) = self.volumes.remove(guard.volume_id())?;
        record.state = VolumeState::Deleted;
        Some(record)
    }

    /// Number of volume locks currently alive.
    pub fn live_locks(&self) -> usize {
        self.locks.len()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
