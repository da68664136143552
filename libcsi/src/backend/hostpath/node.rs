use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{HostPathBackend, ignore_not_found};
use crate::context::CallContext;
use crate::error::CsiError;
use crate::node::CsiNode;
use crate::types::*;

/// What currently occupies a target path.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Target {
    Absent,
    /// A link to the expected backing directory.
    Linked,
    /// A link to somewhere else.
    OtherLink(PathBuf),
    Directory,
    File,
}

pub(super) async fn inspect_target(target: &Path, backing_path: &Path) -> Result<Target, CsiError> {
    let meta = match tokio::fs::symlink_metadata(target).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Target::Absent),
        Err(e) => return Err(CsiError::io("stat", target.display(), e)),
    };

    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let dest = tokio::fs::read_link(target)
            .await
            .map_err(|e| CsiError::io("read link", target.display(), e))?;
        return Ok(if dest == backing_path {
            Target::Linked
        } else {
            Target::OtherLink(dest)
        });
    }
    Ok(if file_type.is_dir() {
        Target::Directory
    } else {
        Target::File
    })
}

/// Point `target` at `backing_path`, replacing whatever link or file is there
/// in a single rename so the target is never seen half-linked.
async fn link_atomically(backing_path: &Path, target: &Path) -> Result<(), CsiError> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CsiError::InvalidArgument(format!("bad target path {}", target.display())))?;
    let tmp = target.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    tokio::fs::symlink(backing_path, &tmp)
        .await
        .map_err(|e| CsiError::io("symlink", tmp.display(), e))?;
    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CsiError::io("rename link", target.display(), e));
    }
    Ok(())
}

impl HostPathBackend {
    /// Check a workload target path before anything on disk is touched.
    ///
    /// Publishing may clear whatever sits at the target, so the path must
    /// name a single entry of its own, outside the volume root.
    fn checked_target(&self, target_path: &str) -> Result<PathBuf, CsiError> {
        let invalid = |why: &str| {
            CsiError::InvalidArgument(format!("target path {target_path:?} {why}"))
        };
        if target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path must not be empty".into()));
        }
        let target = PathBuf::from(target_path);
        if !target.is_absolute() {
            return Err(invalid("must be absolute"));
        }
        if target.components().any(|c| c == Component::ParentDir) {
            return Err(invalid("must not contain `..`"));
        }
        if target.file_name().is_none() {
            return Err(invalid("has no file name"));
        }
        if target.starts_with(&self.root) || self.root.starts_with(&target) {
            return Err(invalid("overlaps the volume root"));
        }
        Ok(target)
    }
}

#[async_trait]
impl CsiNode for HostPathBackend {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        // Publishes link straight to the backing directory; there is no
        // node-global mount to prepare.
        debug!(staging_target_path = %req.staging_target_path, "stage not needed, skipping");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        debug!("unstage not needed, skipping");
        Ok(())
    }

    #[instrument(skip(self, ctx, req), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    async fn publish_volume(
        &self,
        ctx: &CallContext,
        req: NodePublishVolumeRequest,
    ) -> Result<(), CsiError> {
        let target = self.checked_target(&req.target_path)?;

        let guard = self
            .registry
            .lock(ctx, &req.volume_id, "NodePublishVolume")
            .await?;
        let mut record = self
            .registry
            .get(&req.volume_id)
            .ok_or_else(|| CsiError::VolumeNotFound(req.volume_id.to_string()))?;
        let backing_path = record.backing_path.clone();

        match tokio::fs::metadata(&backing_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(CsiError::PathNotFound(backing_path.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CsiError::PathNotFound(backing_path.display().to_string()));
            }
            Err(e) => return Err(CsiError::io("stat", backing_path.display(), e)),
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CsiError::io("create dir", parent.display(), e))?;
        }

        match inspect_target(&target, &backing_path).await? {
            Target::Linked => {
                debug!("target already linked, assuming idempotent retry");
                if record.mount_refs.insert(target) {
                    self.persist(&guard, record).await?;
                }
                return Ok(());
            }
            Target::Absent => {}
            Target::OtherLink(dest) => {
                info!(stale = %dest.display(), "replacing stale link at target");
            }
            Target::File => info!("replacing file at target"),
            Target::Directory => {
                // A directory cannot be renamed over; clear it first.
                info!("replacing directory at target");
                tokio::fs::remove_dir_all(&target)
                    .await
                    .map_err(|e| CsiError::io("remove dir", target.display(), e))?;
            }
        }

        if req.read_only {
            debug!("read-only publish requested, links cannot enforce it");
        }
        link_atomically(&backing_path, &target).await?;

        // An unrecorded link would let a restarted driver delete the volume
        // underneath it.
        record.mount_refs.insert(target.clone());
        if let Err(e) = self.persist(&guard, record).await {
            if let Err(cleanup) = tokio::fs::remove_file(&target).await {
                warn!(error = %cleanup, "failed to roll back published link");
            }
            return Err(e);
        }

        info!(backing_path = %backing_path.display(), "volume published");
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn unpublish_volume(
        &self,
        ctx: &CallContext,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        let target = self.checked_target(target_path)?;

        let guard = self
            .registry
            .lock(ctx, volume_id, "NodeUnpublishVolume")
            .await?;

        // The expected link is derived from the id alone, so a target is
        // recognized even if its volume is no longer registered.
        match inspect_target(&target, &self.backing_path(volume_id)).await? {
            Target::Absent => debug!("target does not exist, nothing to unpublish"),
            Target::Linked => {
                ignore_not_found(tokio::fs::remove_file(&target).await)
                    .map_err(|e| CsiError::io("remove link", target.display(), e))?;
                info!("volume unpublished");
            }
            Target::OtherLink(dest) => {
                warn!(dest = %dest.display(), "target links elsewhere, leaving it untouched");
            }
            Target::Directory | Target::File => {
                warn!("target is not a link, leaving it untouched");
            }
        }

        if let Some(mut record) = self.registry.get(volume_id) {
            if record.mount_refs.remove(&target) {
                self.persist(&guard, record).await?;
            }
        }
        Ok(())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes: self.config.max_volumes_per_node,
            accessible_topology: Some(self.topology()),
        })
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CsiController;
    use crate::config::{DriverConfig, TOPOLOGY_NODE_KEY};

    async fn backend_with_volume(dir: &Path) -> (HostPathBackend, VolumeId) {
        let backend = HostPathBackend::new(DriverConfig::new(dir.join("volumes"), "test-node"));
        backend.init().await.unwrap();
        let vol = backend
            .create_volume(
                &CallContext::background(),
                CreateVolumeRequest {
                    name: "v1".into(),
                    capacity_range: CapacityRange::required(1 << 30),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (backend, vol.volume_id)
    }

    fn target(dir: &Path, name: &str) -> String {
        dir.join("pods").join(name).to_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn publish_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let ctx = CallContext::background();
        let target_path = target(tmp.path(), "a");

        for _ in 0..2 {
            backend
                .publish_volume(&ctx, NodePublishVolumeRequest::new(id.clone(), &*target_path))
                .await
                .unwrap();
        }

        let link = tokio::fs::read_link(&target_path).await.unwrap();
        assert_eq!(link, backend.backing_path(&id));
        let record = backend.registry().get(&id).unwrap();
        assert_eq!(record.mount_refs.len(), 1);

        // No temporary links are left next to the target.
        let mut entries = tokio::fs::read_dir(tmp.path().join("pods")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("a")]);
    }

    #[tokio::test]
    async fn publish_unknown_volume_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend_with_volume(tmp.path()).await;
        let err = backend
            .publish_volume(
                &CallContext::background(),
                NodePublishVolumeRequest::new("hostpath-missing", target(tmp.path(), "a")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::VolumeNotFound(_)));
    }

    #[tokio::test]
    async fn publish_without_backing_dir_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        tokio::fs::remove_dir_all(backend.backing_path(&id)).await.unwrap();

        let target_path = target(tmp.path(), "a");
        let err = backend
            .publish_volume(
                &CallContext::background(),
                NodePublishVolumeRequest::new(id, &*target_path),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::PathNotFound(_)));
        assert!(!Path::new(&target_path).exists());
    }

    #[tokio::test]
    async fn publish_replaces_stale_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let ctx = CallContext::background();
        tokio::fs::create_dir_all(tmp.path().join("pods")).await.unwrap();

        let stale_link = target(tmp.path(), "link");
        tokio::fs::symlink(tmp.path(), &stale_link).await.unwrap();
        let plain_file = target(tmp.path(), "file");
        tokio::fs::write(&plain_file, b"junk").await.unwrap();
        let plain_dir = target(tmp.path(), "dir");
        tokio::fs::create_dir_all(Path::new(&plain_dir).join("inner")).await.unwrap();

        for path in [&stale_link, &plain_file, &plain_dir] {
            backend
                .publish_volume(&ctx, NodePublishVolumeRequest::new(id.clone(), path.as_str()))
                .await
                .unwrap();
            let link = tokio::fs::read_link(path).await.unwrap();
            assert_eq!(link, backend.backing_path(&id));
        }
        assert_eq!(backend.registry().get(&id).unwrap().mount_refs.len(), 3);
    }

    #[tokio::test]
    async fn publish_rejects_parent_dir_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let ctx = CallContext::background();
        let pods = tmp.path().join("pods");
        tokio::fs::create_dir_all(&pods).await.unwrap();
        tokio::fs::write(pods.join("precious.txt"), b"keep me").await.unwrap();

        let escaping = pods.join("x/..");
        let err = backend
            .publish_volume(
                &ctx,
                NodePublishVolumeRequest::new(id.clone(), escaping.to_str().unwrap()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
        assert!(pods.join("precious.txt").exists());
        assert!(!pods.join("x").exists());

        let err = backend
            .unpublish_volume(&ctx, &id, escaping.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
        assert!(backend.registry().get(&id).unwrap().mount_refs.is_empty());
    }

    #[tokio::test]
    async fn publish_rejects_unusable_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let ctx = CallContext::background();

        for bad in ["", "pods/relative", "/"] {
            let err = backend
                .publish_volume(&ctx, NodePublishVolumeRequest::new(id.clone(), bad))
                .await
                .unwrap_err();
            assert!(matches!(err, CsiError::InvalidArgument(_)), "{bad:?}: {err}");
        }
        assert!(!tmp.path().join("pods").exists());
    }

    #[tokio::test]
    async fn publish_never_targets_the_volume_root() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let ctx = CallContext::background();
        let root = tmp.path().join("volumes");
        tokio::fs::write(backend.backing_path(&id).join("data"), b"payload")
            .await
            .unwrap();

        let overlapping = [
            root.clone(),
            backend.backing_path(&id),
            root.join("elsewhere"),
            tmp.path().to_path_buf(),
        ];
        for target in &overlapping {
            let err = backend
                .publish_volume(
                    &ctx,
                    NodePublishVolumeRequest::new(id.clone(), target.to_str().unwrap()),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, CsiError::InvalidArgument(_)), "{}: {err}", target.display());
        }

        let content = tokio::fs::read(backend.backing_path(&id).join("data")).await.unwrap();
        assert_eq!(content, b"payload");
        assert!(backend.meta_path(&id).is_file());
        assert!(!root.join("elsewhere").exists());
        assert!(backend.registry().get(&id).unwrap().mount_refs.is_empty());
    }

    #[tokio::test]
    async fn publish_persists_mount_refs() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let ctx = CallContext::background();
        let target_path = target(tmp.path(), "a");

        backend
            .publish_volume(&ctx, NodePublishVolumeRequest::new(id.clone(), &*target_path))
            .await
            .unwrap();
        let on_disk = super::super::read_record(&backend.meta_path(&id)).await.unwrap();
        assert!(on_disk.mount_refs.contains(Path::new(&target_path)));

        backend.unpublish_volume(&ctx, &id, &target_path).await.unwrap();
        let on_disk = super::super::read_record(&backend.meta_path(&id)).await.unwrap();
        assert!(on_disk.mount_refs.is_empty());
    }

    #[tokio::test]
    async fn publish_removes_link_when_ref_cannot_be_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let target_path = target(tmp.path(), "a");

        // A directory squatting on the sidecar path makes the rewrite fail.
        let meta_path = backend.meta_path(&id);
        tokio::fs::remove_file(&meta_path).await.unwrap();
        tokio::fs::create_dir(&meta_path).await.unwrap();

        let err = backend
            .publish_volume(
                &CallContext::background(),
                NodePublishVolumeRequest::new(id.clone(), &*target_path),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Internal { .. }));
        assert!(tokio::fs::symlink_metadata(&target_path).await.is_err());
        assert!(backend.registry().get(&id).unwrap().mount_refs.is_empty());
    }

    #[tokio::test]
    async fn unpublish_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let ctx = CallContext::background();
        let target_path = target(tmp.path(), "a");

        backend
            .publish_volume(&ctx, NodePublishVolumeRequest::new(id.clone(), &*target_path))
            .await
            .unwrap();
        backend.unpublish_volume(&ctx, &id, &target_path).await.unwrap();
        assert!(tokio::fs::symlink_metadata(&target_path).await.is_err());
        assert!(backend.registry().get(&id).unwrap().mount_refs.is_empty());
        // The backing data is untouched.
        assert!(backend.backing_path(&id).is_dir());

        backend.unpublish_volume(&ctx, &id, &target_path).await.unwrap();
    }

    #[tokio::test]
    async fn unpublish_leaves_foreign_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let ctx = CallContext::background();
        tokio::fs::create_dir_all(tmp.path().join("pods")).await.unwrap();

        let dir = target(tmp.path(), "dir");
        tokio::fs::create_dir(&dir).await.unwrap();
        tokio::fs::write(Path::new(&dir).join("data"), b"keep me").await.unwrap();
        backend.unpublish_volume(&ctx, &id, &dir).await.unwrap();
        assert!(Path::new(&dir).join("data").exists());

        let other = target(tmp.path(), "other");
        tokio::fs::symlink(tmp.path(), &other).await.unwrap();
        backend.unpublish_volume(&ctx, &id, &other).await.unwrap();
        assert!(tokio::fs::symlink_metadata(&other).await.is_ok());
    }

    #[tokio::test]
    async fn stage_and_unstage_are_noops() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, id) = backend_with_volume(tmp.path()).await;
        let staging = target(tmp.path(), "staging");

        backend
            .stage_volume(NodeStageVolumeRequest {
                volume_id: id.clone(),
                staging_target_path: staging.clone(),
                volume_capability: VolumeCapability::default(),
                volume_context: Default::default(),
            })
            .await
            .unwrap();
        backend.unstage_volume(&id, &staging).await.unwrap();
        assert!(!Path::new(&staging).exists());
    }

    #[tokio::test]
    async fn node_info_and_capabilities() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend_with_volume(tmp.path()).await;

        let info = backend.get_info().await.unwrap();
        assert_eq!(info.node_id, "test-node");
        assert_eq!(info.max_volumes, 0);
        let topology = info.accessible_topology.unwrap();
        assert_eq!(
            topology.segments.get(TOPOLOGY_NODE_KEY).map(String::as_str),
            Some("test-node")
        );

        assert!(backend.get_capabilities().await.unwrap().is_empty());
    }
}
