//! CSI Controller service trait.
//!
//! The Controller service owns provisioning: it creates and deletes the
//! storage behind a volume, independently of where it is mounted.  It is
//! invoked by the external provisioner and attacher sidecars.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::CsiError;
use crate::types::{
    ControllerCapability, ControllerPublishVolumeRequest, CreateVolumeRequest, Volume,
    VolumeCapability, VolumeId,
};

/// Controller service: centralized volume management.
///
/// The orchestrator retries every call at least once, so implementations must
/// make `create_volume` and `delete_volume` idempotent.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume, or return the existing one when the request is
    /// a retry of an earlier, identical request.
    ///
    /// The returned [`Volume`] contains the assigned `volume_id` and
    /// `volume_context` that must be forwarded to subsequent Node operations.
    async fn create_volume(
        &self,
        ctx: &CallContext,
        req: CreateVolumeRequest,
    ) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.  Unknown ids succeed.
    async fn delete_volume(
        &self,
        ctx: &CallContext,
        volume_id: &VolumeId,
    ) -> Result<(), CsiError>;

    /// Attach a volume to a node.
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<(), CsiError>;

    /// Detach a volume from a node.
    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError>;

    /// Optional controller RPCs this plugin implements.
    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;
}
