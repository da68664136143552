//! Host-path driver configuration.

use std::path::PathBuf;

/// Default directory under which volume backing directories are created.
pub const DEFAULT_ROOT: &str = "/tmp/csi/hostpath";

/// Default reverse-DNS plugin name.
pub const DEFAULT_PLUGIN_NAME: &str = "hostpath.csi.k8s.io";

/// Topology key advertised by `NodeGetInfo`.
pub const TOPOLOGY_NODE_KEY: &str = "topology.hostpath.csi/node";

/// Settings for [`HostPathBackend`](crate::backend::hostpath::HostPathBackend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Base directory holding `<volume-id>/` and `<volume-id>.meta.json`.
    pub root: PathBuf,
    /// Stable identifier of this node.
    pub node_id: String,
    /// Advertised volume limit; `0` means unlimited.
    pub max_volumes_per_node: u64,
    pub plugin_name: String,
    pub vendor_version: String,
}

impl DriverConfig {
    pub fn new(root: impl Into<PathBuf>, node_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            node_id: node_id.into(),
            ..Self::default()
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            node_id: "node1".to_owned(),
            max_volumes_per_node: 0,
            plugin_name: DEFAULT_PLUGIN_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}
