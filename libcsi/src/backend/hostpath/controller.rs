use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{HostPathBackend, ignore_not_found};
use crate::context::CallContext;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::registry::{VolumeRecord, volume_id_for_name};
use crate::types::*;

#[async_trait]
impl CsiController for HostPathBackend {
    #[instrument(skip(self, ctx, req), fields(name = %req.name))]
    async fn create_volume(
        &self,
        ctx: &CallContext,
        req: CreateVolumeRequest,
    ) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("volume name must not be empty".into()));
        }
        let capacity_bytes = req.capacity_range.resolve()?;
        if let Some(cap) = req
            .volume_capabilities
            .iter()
            .find(|cap| !cap.access_mode.is_single_node())
        {
            return Err(CsiError::InvalidArgument(format!(
                "access mode {:?} needs multi-node access, host-path volumes are node-local",
                cap.access_mode
            )));
        }

        // The id is derived from the name, so this also serializes concurrent
        // creations of the same name.
        let volume_id = volume_id_for_name(&req.name);
        let guard = self
            .registry
            .lock(ctx, &volume_id, "CreateVolume")
            .await?;

        if let Some(existing) = self.registry.get(&volume_id) {
            if existing.matches(capacity_bytes, &req.parameters) {
                debug!(%volume_id, "returning existing volume for idempotent create");
                return Ok(existing.to_volume());
            }
            let conflict = if existing.capacity_bytes != capacity_bytes {
                "capacity"
            } else {
                "parameters"
            };
            return Err(CsiError::AlreadyExists {
                name: req.name,
                conflict: conflict.to_owned(),
            });
        }

        let backing_path = self.backing_path(&volume_id);
        tokio::fs::create_dir_all(&backing_path)
            .await
            .map_err(|e| CsiError::io("create dir", backing_path.display(), e))?;

        let record = VolumeRecord {
            id: volume_id.clone(),
            requested_name: req.name,
            capacity_bytes,
            parameters: req.parameters,
            backing_path,
            state: VolumeState::Provisioned,
            mount_refs: Default::default(),
        };

        let volume = record.to_volume();
        let backing_path = record.backing_path.clone();
        // Roll the directory back so a retry starts from a clean slate.
        if let Err(e) = self.persist(&guard, record).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&backing_path).await {
                warn!(%volume_id, error = %cleanup, "failed to roll back backing directory");
            }
            return Err(e);
        }

        info!(
            %volume_id,
            capacity_bytes,
            path = %backing_path.display(),
            "volume created",
        );
        Ok(volume)
    }

    #[instrument(skip(self, ctx))]
    async fn delete_volume(
        &self,
        ctx: &CallContext,
        volume_id: &VolumeId,
    ) -> Result<(), CsiError> {
        if !self.registry.contains(volume_id) {
            debug!("volume unknown, nothing to delete");
            return Ok(());
        }

        let guard = self.registry.lock(ctx, volume_id, "DeleteVolume").await?;
        // A concurrent delete may have won the race for the lock.
        let Some(record) = self.registry.get(volume_id) else {
            debug!("volume deleted concurrently");
            return Ok(());
        };

        if !record.mount_refs.is_empty() {
            warn!(targets = ?record.mount_refs, "refusing to delete a published volume");
            return Err(CsiError::VolumeInUse {
                volume_id: volume_id.to_string(),
                targets: record.mount_refs.len(),
            });
        }

        // Delete on-disk data *first* so that if removal fails the registry
        // entry is still intact and the caller can safely retry.
        ignore_not_found(tokio::fs::remove_dir_all(&record.backing_path).await)
            .map_err(|e| CsiError::io("remove dir", record.backing_path.display(), e))?;

        let meta_path = self.meta_path(volume_id);
        ignore_not_found(tokio::fs::remove_file(&meta_path).await)
            .map_err(|e| CsiError::io("remove meta", meta_path.display(), e))?;

        self.registry.evict(&guard);
        info!("volume deleted");
        Ok(())
    }

    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<(), CsiError> {
        debug!(volume_id = %req.volume_id, node_id = %req.node_id, "rejecting controller publish");
        Err(CsiError::Unsupported("ControllerPublishVolume".into()))
    }

    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError> {
        debug!(%volume_id, node_id, "rejecting controller unpublish");
        Err(CsiError::Unsupported("ControllerUnpublishVolume".into()))
    }

    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError> {
        if capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities must not be empty".into(),
            ));
        }
        if !self.registry.contains(volume_id) {
            return Err(CsiError::VolumeNotFound(volume_id.to_string()));
        }
        Ok(capabilities
            .iter()
            .all(|cap| cap.access_mode.is_single_node()))
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![ControllerCapability::CreateDeleteVolume])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::CsiNode;
    use crate::config::DriverConfig;

    const GIB: u64 = 1 << 30;

    async fn make_backend(dir: &Path) -> HostPathBackend {
        let backend = HostPathBackend::new(DriverConfig::new(dir.join("volumes"), "test-node"));
        backend.init().await.unwrap();
        backend
    }

    fn request(name: &str, capacity: u64) -> CreateVolumeRequest {
        CreateVolumeRequest {
            name: name.into(),
            capacity_range: CapacityRange::required(capacity),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_and_delete_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let ctx = CallContext::background();

        let vol = backend
            .create_volume(&ctx, request("test-vol", 64 * 1024 * 1024))
            .await
            .unwrap();

        assert!(vol.volume_id.as_str().starts_with("hostpath-"));
        assert_eq!(vol.capacity_bytes, 64 * 1024 * 1024);
        assert!(backend.backing_path(&vol.volume_id).is_dir());
        assert!(backend.meta_path(&vol.volume_id).exists());
        assert_eq!(backend.registry().len(), 1);

        backend.delete_volume(&ctx, &vol.volume_id).await.unwrap();
        assert!(!backend.backing_path(&vol.volume_id).exists());
        assert!(!backend.meta_path(&vol.volume_id).exists());
        assert!(backend.registry().is_empty());
        assert_eq!(backend.registry().live_locks(), 0);
    }

    #[tokio::test]
    async fn create_volume_idempotent_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let ctx = CallContext::background();

        let vol1 = backend.create_volume(&ctx, request("v1", GIB)).await.unwrap();
        let vol2 = backend.create_volume(&ctx, request("v1", GIB)).await.unwrap();
        assert_eq!(vol1, vol2);
        assert_eq!(backend.registry().len(), 1);

        let err = backend
            .create_volume(&ctx, request("v1", 2 * GIB))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::AlreadyExists { ref conflict, .. } if conflict == "capacity"));
    }

    #[tokio::test]
    async fn create_volume_conflicting_parameters() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let ctx = CallContext::background();

        backend.create_volume(&ctx, request("v1", GIB)).await.unwrap();
        let mut req = request("v1", GIB);
        req.parameters = HashMap::from([("tier".into(), "slow".into())]);
        let err = backend.create_volume(&ctx, req).await.unwrap_err();
        assert!(matches!(err, CsiError::AlreadyExists { ref conflict, .. } if conflict == "parameters"));
    }

    #[tokio::test]
    async fn create_volume_echoes_parameters_and_zero_capacity() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let mut req = request("ctx-vol", 0);
        req.parameters = HashMap::from([("owner".into(), "team-a".into())]);

        let vol = backend
            .create_volume(&CallContext::background(), req)
            .await
            .unwrap();
        assert_eq!(vol.capacity_bytes, 0);
        assert_eq!(vol.volume_context.get("owner").map(String::as_str), Some("team-a"));
    }

    #[tokio::test]
    async fn create_volume_rejects_bad_requests() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let ctx = CallContext::background();

        let err = backend.create_volume(&ctx, request("", GIB)).await.unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        let mut inverted = request("v1", 2 * GIB);
        inverted.capacity_range.limit_bytes = GIB;
        let err = backend.create_volume(&ctx, inverted).await.unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        let mut shared = request("v1", GIB);
        shared.volume_capabilities = vec![VolumeCapability {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: Vec::new(),
        }];
        let err = backend.create_volume(&ctx, shared).await.unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        assert!(backend.registry().is_empty());
    }

    #[tokio::test]
    async fn failed_create_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let ctx = CallContext::background();

        // A directory squatting on the sidecar path makes the metadata write fail.
        let id = volume_id_for_name("doomed");
        tokio::fs::create_dir(backend.meta_path(&id)).await.unwrap();

        let err = backend.create_volume(&ctx, request("doomed", GIB)).await.unwrap_err();
        assert!(matches!(err, CsiError::Internal { .. }));
        assert!(!backend.backing_path(&id).exists());
        assert!(backend.registry().is_empty());

        // Once the obstacle is gone a retry succeeds cleanly.
        tokio::fs::remove_dir(backend.meta_path(&id)).await.unwrap();
        let vol = backend.create_volume(&ctx, request("doomed", GIB)).await.unwrap();
        assert_eq!(vol.volume_id, id);
    }

    #[tokio::test]
    async fn delete_unknown_volume_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let ctx = CallContext::background();

        backend
            .delete_volume(&ctx, &VolumeId::from("nonexistent"))
            .await
            .unwrap();

        let vol = backend.create_volume(&ctx, request("v1", GIB)).await.unwrap();
        backend.delete_volume(&ctx, &vol.volume_id).await.unwrap();
        backend.delete_volume(&ctx, &vol.volume_id).await.unwrap();
    }

    #[tokio::test]
    async fn delete_refuses_published_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let ctx = CallContext::background();

        let vol = backend.create_volume(&ctx, request("busy", GIB)).await.unwrap();
        let target = tmp.path().join("pods/a/mount");
        backend
            .publish_volume(
                &ctx,
                NodePublishVolumeRequest::new(vol.volume_id.clone(), target.to_str().unwrap()),
            )
            .await
            .unwrap();

        let err = backend.delete_volume(&ctx, &vol.volume_id).await.unwrap_err();
        assert!(matches!(err, CsiError::VolumeInUse { targets: 1, .. }));
        assert!(backend.backing_path(&vol.volume_id).is_dir());

        backend
            .unpublish_volume(&ctx, &vol.volume_id, target.to_str().unwrap())
            .await
            .unwrap();
        backend.delete_volume(&ctx, &vol.volume_id).await.unwrap();
        assert!(!backend.backing_path(&vol.volume_id).exists());
    }

    #[tokio::test]
    async fn cancelled_create_does_not_mutate() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(make_backend(tmp.path()).await);
        let id = volume_id_for_name("slow");

        // Hold the volume lock so the create has to wait for it.
        let held = backend
            .registry()
            .lock(&CallContext::background(), &id, "test")
            .await
            .unwrap();

        let (ctx, handle) = CallContext::with_cancel();
        let waiter = tokio::spawn({
            let backend = Arc::clone(&backend);
            async move { backend.create_volume(&ctx, request("slow", GIB)).await }
        });
        // Let the create run until it parks on the held lock.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(!waiter.is_finished());

        handle.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, CsiError::Canceled(_)));
        assert!(!backend.backing_path(&id).exists());
        assert!(backend.registry().is_empty());

        drop(held);
        assert_eq!(backend.registry().live_locks(), 0);
    }

    #[tokio::test]
    async fn published_volume_stays_in_use_across_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = CallContext::background();
        let target = tmp.path().join("pods/a/mount");

        let id = {
            let backend = make_backend(tmp.path()).await;
            let vol = backend.create_volume(&ctx, request("busy", GIB)).await.unwrap();
            backend
                .publish_volume(
                    &ctx,
                    NodePublishVolumeRequest::new(vol.volume_id.clone(), target.to_str().unwrap()),
                )
                .await
                .unwrap();
            vol.volume_id
        };

        let restarted = make_backend(tmp.path()).await;
        let err = restarted.delete_volume(&ctx, &id).await.unwrap_err();
        assert!(matches!(err, CsiError::VolumeInUse { targets: 1, .. }));
        assert!(restarted.backing_path(&id).is_dir());
        assert!(target.is_dir(), "published link must still resolve");
    }

    #[tokio::test]
    async fn controller_publish_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;

        let err = backend
            .controller_publish_volume(ControllerPublishVolumeRequest {
                volume_id: "v1".into(),
                node_id: "test-node".into(),
                volume_capability: VolumeCapability::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Unsupported(_)));

        let err = backend
            .controller_unpublish_volume(&"v1".into(), "test-node")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Unsupported(_)));
    }

    #[tokio::test]
    async fn capabilities_are_create_delete_only() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        assert_eq!(
            backend.controller_get_capabilities().await.unwrap(),
            vec![ControllerCapability::CreateDeleteVolume]
        );
    }

    #[tokio::test]
    async fn validate_capabilities() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = make_backend(tmp.path()).await;
        let ctx = CallContext::background();

        let missing = backend
            .validate_volume_capabilities(&VolumeId("nope".into()), &[VolumeCapability::default()])
            .await;
        assert!(matches!(missing, Err(CsiError::VolumeNotFound(_))));

        let vol = backend.create_volume(&ctx, request("v1", GIB)).await.unwrap();
        assert!(
            backend
                .validate_volume_capabilities(&vol.volume_id, &[VolumeCapability::default()])
                .await
                .unwrap()
        );
        let shared = VolumeCapability {
            access_mode: AccessMode::ReadOnlyMany,
            mount_flags: Vec::new(),
        };
        assert!(
            !backend
                .validate_volume_capabilities(&vol.volume_id, &[shared])
                .await
                .unwrap()
        );
    }
}
