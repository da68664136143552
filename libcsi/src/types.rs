//! Core CSI types: volumes, capabilities, requests, and topology.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over the Unix socket as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::CsiError;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Single-node, single-workload read-write.
    ReadWriteOncePod,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

impl AccessMode {
    /// Whether the mode can be honoured by a volume that never leaves its
    /// node.
    pub fn is_single_node(self) -> bool {
        matches!(self, Self::ReadWriteOnce | Self::ReadWriteOncePod)
    }
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`). Host-path volumes are
    /// linked, not mounted, so these are accepted and ignored.
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteOnce,
            mount_flags: Vec::new(),
        }
    }
}

/// Requested size bounds for a new volume. A bound of `0` means "unset".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    /// Minimum capacity the volume must have.
    #[serde(default)]
    pub required_bytes: u64,
    /// Maximum capacity the volume may have.
    #[serde(default)]
    pub limit_bytes: u64,
}

impl CapacityRange {
    /// A range with only a lower bound.
    pub fn required(bytes: u64) -> Self {
        Self {
            required_bytes: bytes,
            limit_bytes: 0,
        }
    }

    /// Check the range and return the capacity to provision.
    pub fn resolve(&self) -> Result<u64, CsiError> {
        if self.limit_bytes != 0 && self.required_bytes > self.limit_bytes {
            return Err(CsiError::InvalidArgument(format!(
                "required_bytes {} exceeds limit_bytes {}",
                self.required_bytes, self.limit_bytes
            )));
        }
        Ok(self.required_bytes)
    }
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Volume descriptor returned by `CreateVolume`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes, echoed from the request.
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations. This is the
    /// creation parameters, echoed back verbatim.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Topology constraints (e.g. node affinity).
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    /// Topology segments, e.g. `{"topology.hostpath.csi/node": "node1"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Volume lifecycle state
// ---------------------------------------------------------------------------

/// Lifecycle state of a registry entry.
///
/// Controller-level publish is not a state of its own: local volumes are
/// "attached" to their node from the moment they exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeState {
    /// Backing directory exists and the volume may be published.
    Provisioned,
    /// Backing directory has been reclaimed; the entry is about to be evicted.
    Deleted,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Orchestrator-supplied logical name; the idempotency key.
    pub name: String,
    /// Desired capacity bounds.
    #[serde(default)]
    pub capacity_range: CapacityRange,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Opaque parameters, echoed back as the volume context.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Request to attach a volume to a node at the controller level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerPublishVolumeRequest {
    /// Volume to attach.
    pub volume_id: VolumeId,
    /// Node the volume should be attached to.
    pub node_id: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: VolumeCapability,
}

/// Request to stage (globally mount) a volume on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Global staging mount point.
    pub staging_target_path: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: VolumeCapability,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to publish a volume into a workload-visible path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Path the workload will see, e.g.
    /// `/var/lib/kubelet/pods/<pod-uid>/volumes/<vol-name>`.
    pub target_path: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: VolumeCapability,
    /// Whether the workload should only read the volume.
    #[serde(default)]
    pub read_only: bool,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

impl NodePublishVolumeRequest {
    /// Publish request with default capability and empty context.
    pub fn new(volume_id: impl Into<VolumeId>, target_path: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            target_path: target_path.into(),
            volume_capability: VolumeCapability::default(),
            read_only: false,
            volume_context: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"hostpath.csi.k8s.io"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// Optional Controller RPCs a plugin may advertise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    GetCapacity,
}

/// Optional Node RPCs a plugin may advertise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host; `0` means unlimited.
    pub max_volumes: u64,
    /// Optional topology of this node.
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
        assert_eq!(id.as_str(), "vol-abc");
    }

    #[test]
    fn capacity_range_resolves_required() {
        assert_eq!(CapacityRange::default().resolve().unwrap(), 0);
        assert_eq!(CapacityRange::required(1 << 30).resolve().unwrap(), 1 << 30);

        let bounded = CapacityRange {
            required_bytes: 10,
            limit_bytes: 10,
        };
        assert_eq!(bounded.resolve().unwrap(), 10);
    }

    #[test]
    fn capacity_range_rejects_inverted() {
        let inverted = CapacityRange {
            required_bytes: 20,
            limit_bytes: 10,
        };
        assert!(matches!(
            inverted.resolve(),
            Err(CsiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn access_mode_locality() {
        assert!(AccessMode::ReadWriteOnce.is_single_node());
        assert!(AccessMode::ReadWriteOncePod.is_single_node());
        assert!(!AccessMode::ReadOnlyMany.is_single_node());
        assert!(!AccessMode::ReadWriteMany.is_single_node());
    }

    #[test]
    fn create_volume_request_default() {
        let req = CreateVolumeRequest::default();
        assert!(req.name.is_empty());
        assert_eq!(req.capacity_range, CapacityRange::default());
    }

    #[test]
    fn publish_request_defaults_from_json() {
        let req: NodePublishVolumeRequest =
            serde_json::from_str(r#"{"volume_id":"v1","target_path":"/mnt/a"}"#)
                .expect("deserialize");
        assert_eq!(req.volume_id, VolumeId::from("v1"));
        assert_eq!(req.volume_capability, VolumeCapability::default());
        assert!(!req.read_only);
    }
}
