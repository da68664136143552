//! CSI protocol messages transmitted over the Unix socket.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the orchestrator-side client and the plugin.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope.
///
/// Each connection carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Identity requests ----------------------------------------------
    GetPluginInfo,
    GetPluginCapabilities,
    Probe,

    // ----- Controller requests --------------------------------------------
    CreateVolume(CreateVolumeRequest),
    DeleteVolume(VolumeId),
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    ControllerUnpublishVolume {
        volume_id: VolumeId,
        node_id: String,
    },
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    ControllerGetCapabilities,

    // ----- Node requests --------------------------------------------------
    NodeStageVolume(NodeStageVolumeRequest),
    NodeUnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    NodePublishVolume(NodePublishVolumeRequest),
    NodeUnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    NodeGetInfo,
    NodeGetCapabilities,

    // ----- Responses -------------------------------------------------------
    /// A volume was created (or an identical one already existed).
    VolumeCreated(Volume),
    PluginInfoResponse(PluginInfo),
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    ProbeResult(bool),
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// Whether the requested capabilities are supported by the volume.
    CapabilitiesValid(bool),
    NodeInfoResponse(NodeInfo),
    NodeCapabilitiesResponse(Vec<NodeCapability>),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(CsiError),
}

impl CsiMessage {
    /// Whether this variant is only ever sent by the server.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::VolumeCreated(_)
                | Self::PluginInfoResponse(_)
                | Self::PluginCapabilitiesResponse(_)
                | Self::ProbeResult(_)
                | Self::ControllerCapabilitiesResponse(_)
                | Self::CapabilitiesValid(_)
                | Self::NodeInfoResponse(_)
                | Self::NodeCapabilitiesResponse(_)
                | Self::Ok
                | Self::Error(_)
        )
    }
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::Probe => f.write_str("Probe"),
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({})", id),
            Self::ControllerPublishVolume(req) => {
                write!(f, "ControllerPublishVolume({})", req.volume_id)
            }
            Self::ControllerUnpublishVolume { volume_id, .. } => {
                write!(f, "ControllerUnpublishVolume({})", volume_id)
            }
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({})", volume_id)
            }
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::NodeStageVolume(req) => write!(f, "NodeStageVolume({})", req.volume_id),
            Self::NodeUnstageVolume { volume_id, .. } => {
                write!(f, "NodeUnstageVolume({})", volume_id)
            }
            Self::NodePublishVolume(req) => write!(
                f,
                "NodePublishVolume({} -> {})",
                req.volume_id, req.target_path
            ),
            Self::NodeUnpublishVolume {
                volume_id,
                target_path,
            } => write!(f, "NodeUnpublishVolume({} -> {})", volume_id, target_path),
            Self::NodeGetInfo => f.write_str("NodeGetInfo"),
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ProbeResult(ready) => write!(f, "ProbeResult({})", ready),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::CapabilitiesValid(v) => write!(f, "CapabilitiesValid({})", v),
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({}: {})", e.code(), e),
        }
    }
}
