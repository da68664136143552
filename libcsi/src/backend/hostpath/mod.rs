//! Host-path storage backend for CSI.
//!
//! [`HostPathBackend`] implements [`CsiIdentity`](crate::CsiIdentity),
//! [`CsiController`](crate::CsiController) and [`CsiNode`](crate::CsiNode)
//! on top of plain directories on the local host.  Volumes never leave the
//! node they were created on; publishing a volume links its backing
//! directory into the workload's target path.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/
//!   <volume-id>/            # backing directory of the volume
//!   <volume-id>.meta.json   # persisted registry record (used for recovery)
//! ```
//!
//! The sidecar is rewritten under the volume lock whenever the record
//! changes, including the set of targets the volume is published at, so a
//! restarted driver still refuses to delete a volume that is in use.

mod controller;
mod identity;
mod node;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{DriverConfig, TOPOLOGY_NODE_KEY};
use crate::context::CallContext;
use crate::error::CsiError;
use crate::lock::VolumeGuard;
use crate::registry::{VolumeRecord, VolumeRegistry, volume_id_for_name};
use crate::types::{Topology, VolumeId};

const META_SUFFIX: &str = ".meta.json";

/// Concrete CSI backend storing volumes as host directories.
///
/// # Thread safety
///
/// All mutable state lives in the [`VolumeRegistry`], whose per-volume locks
/// let calls on different volumes run concurrently while calls on the same
/// volume are serialized.
#[derive(Debug)]
pub struct HostPathBackend {
    config: DriverConfig,
    /// Absolute form of `config.root`; links must not be relative.
    root: PathBuf,
    registry: VolumeRegistry,
}

impl HostPathBackend {
    /// Create a new backend.
    ///
    /// Call [`Self::init`] before serving requests; until then
    /// `Probe` reports not-ready.
    pub fn new(config: DriverConfig) -> Self {
        let root = std::path::absolute(&config.root).unwrap_or_else(|_| config.root.clone());
        Self {
            config,
            root,
            registry: VolumeRegistry::new(),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    /// Resolve the backing directory for a given volume.
    pub fn backing_path(&self, volume_id: &VolumeId) -> PathBuf {
        self.root.join(volume_id.as_str())
    }

    /// Resolve the path to the persisted metadata sidecar for a volume.
    fn meta_path(&self, volume_id: &VolumeId) -> PathBuf {
        self.root.join(format!("{volume_id}{META_SUFFIX}"))
    }

    fn topology(&self) -> Topology {
        Topology {
            segments: HashMap::from([(TOPOLOGY_NODE_KEY.to_owned(), self.config.node_id.clone())]),
        }
    }

    /// Prepare the root directory, rebuild the registry from the sidecars
    /// found there and mark the backend ready.
    ///
    /// Returns the number of recovered volumes.
    pub async fn init(&self) -> Result<usize, CsiError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CsiError::io("create dir", self.root.display(), e))?;

        let recovered = self.recover().await?;
        self.registry.mark_ready();
        info!(root = %self.root.display(), recovered, "host-path backend ready");
        Ok(recovered)
    }

    /// Scan the root for persisted volume records.
    ///
    /// This is best-effort: sidecars that cannot be read, do not parse, or
    /// whose backing directory is gone are skipped with a warning.
    async fn recover(&self) -> Result<usize, CsiError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CsiError::io("read dir", self.root.display(), e))?;

        let ctx = CallContext::background();
        let mut recovered = 0;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CsiError::io("read dir", self.root.display(), e))?
        {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(META_SUFFIX) {
                continue;
            }

            let Some(mut record) = read_record(&path).await else {
                continue;
            };
            if record.id != volume_id_for_name(&record.requested_name) {
                warn!(path = %path.display(), volume_id = %record.id,
                    "volume id does not match its name, skipping");
                continue;
            }

            record.backing_path = self.backing_path(&record.id);
            if !tokio::fs::try_exists(&record.backing_path)
                .await
                .unwrap_or(false)
            {
                warn!(volume_id = %record.id, "backing directory missing, skipping recovery");
                continue;
            }

            let guard = self.registry.lock(&ctx, &record.id, "Recover").await?;
            if self.prune_mount_refs(&mut record).await {
                if let Err(e) = self.write_meta(&record).await {
                    warn!(volume_id = %record.id, error = %e, "failed to rewrite pruned metadata");
                }
            }
            debug!(volume_id = %record.id, name = %record.requested_name,
                mount_refs = record.mount_refs.len(), "volume recovered");
            self.registry.insert(&guard, record);
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Forget published targets that no longer link to the volume, e.g.
    /// because the workload was torn down while the driver was stopped.
    ///
    /// Returns whether anything was dropped.
    async fn prune_mount_refs(&self, record: &mut VolumeRecord) -> bool {
        let mut live = BTreeSet::new();
        let mut pruned = false;
        for target in std::mem::take(&mut record.mount_refs) {
            match node::inspect_target(&target, &record.backing_path).await {
                Ok(node::Target::Linked) => {
                    live.insert(target);
                }
                Ok(_) => {
                    warn!(volume_id = %record.id, target = %target.display(),
                        "published link is gone, forgetting it");
                    pruned = true;
                }
                Err(e) => {
                    warn!(volume_id = %record.id, target = %target.display(), error = %e,
                        "cannot inspect published target, keeping it");
                    live.insert(target);
                }
            }
        }
        record.mount_refs = live;
        pruned
    }

    /// Write the sidecar of the guarded volume, then make `record` the
    /// registry's view of it.  Nothing changes in memory if the write fails.
    async fn persist(&self, guard: &VolumeGuard, record: VolumeRecord) -> Result<(), CsiError> {
        self.write_meta(&record).await?;
        self.registry.insert(guard, record);
        Ok(())
    }

    /// Persist `record` next to its backing directory.
    ///
    /// The sidecar is replaced with a rename so a crash never leaves a
    /// truncated record behind.
    async fn write_meta(&self, record: &VolumeRecord) -> Result<(), CsiError> {
        let meta_path = self.meta_path(&record.id);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| CsiError::io("encode meta", meta_path.display(), e))?;

        let tmp = self
            .root
            .join(format!(".{}{META_SUFFIX}.{}.tmp", record.id, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CsiError::io("write meta", tmp.display(), e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &meta_path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CsiError::io("write meta", meta_path.display(), e));
        }
        Ok(())
    }
}

async fn read_record(path: &Path) -> Option<VolumeRecord> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read volume metadata, skipping");
            return None;
        }
    };
    match serde_json::from_str(&json) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse volume metadata, skipping");
            None
        }
    }
}

/// Treat a missing path as already removed.
fn ignore_not_found(res: std::io::Result<()>) -> std::io::Result<()> {
    match res {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
