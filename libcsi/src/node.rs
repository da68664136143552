//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local filesystem
//! operations required to make a volume available to workloads:
//!
//! 1. **Stage**: optional node-global preparation shared by all publishes.
//! 2. **Publish**: bind the volume into the workload's target path.
//! 3. **Unpublish**: remove that binding.
//! 4. **Unstage**: undo the node-global preparation.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::CsiError;
use crate::types::{
    NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId,
};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at a node-global path.
    ///
    /// This is idempotent: calling it again for an already-staged volume
    /// should succeed without error.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Undo [`CsiNode::stage_volume`].
    ///
    /// This is idempotent: calling it on an already-unstaged volume should
    /// succeed without error.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume at `req.target_path`.
    ///
    /// This is idempotent: calling it again for the same `target_path` should
    /// succeed without error.
    async fn publish_volume(
        &self,
        ctx: &CallContext,
        req: NodePublishVolumeRequest,
    ) -> Result<(), CsiError>;

    /// Unpublish a volume from `target_path`.
    ///
    /// This is idempotent.
    async fn unpublish_volume(
        &self,
        ctx: &CallContext,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;

    /// Optional node RPCs this plugin implements.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;
}
