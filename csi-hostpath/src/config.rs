//! Command-line / environment configuration for the host-path plugin.
//!
//! Every flag can also be supplied through the environment variable named
//! next to it, which is how the plugin is usually configured inside a pod.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use libcsi::DriverConfig;
use libcsi::config::{DEFAULT_PLUGIN_NAME, DEFAULT_ROOT};

/// Default socket the node agent's registrar looks for.
pub const DEFAULT_ENDPOINT: &str = "/var/lib/kubelet/plugins/hostpath.csi.k8s.io/csi.sock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "csi-hostpath")]
#[command(version, about = "CSI plugin for node-local host-path volumes", long_about = None)]
pub struct Cli {
    /// Unix socket to serve the CSI services on.
    #[arg(long, env = "CSI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: PathBuf,

    /// Directory holding the volume backing directories.
    #[arg(long, env = "HOSTPATH_ROOT", default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Node identifier reported by NodeGetInfo. Defaults to the host name.
    #[arg(long, env = "NODE_ID")]
    pub node_id: Option<String>,

    /// Volume limit reported by NodeGetInfo; 0 means unlimited.
    #[arg(long, env = "MAX_VOLUMES_PER_NODE", default_value_t = 0)]
    pub max_volumes_per_node: u64,

    /// Plugin name reported by GetPluginInfo.
    #[arg(long, env = "PLUGIN_NAME", default_value = DEFAULT_PLUGIN_NAME)]
    pub plugin_name: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Backend configuration; `hostname` is used when no node id was given.
    pub fn driver_config(&self, hostname: impl FnOnce() -> Option<String>) -> DriverConfig {
        let node_id = self
            .node_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(hostname)
            .unwrap_or_else(|| "node1".to_owned());
        DriverConfig {
            root: self.root.clone(),
            node_id,
            max_volumes_per_node: self.max_volumes_per_node,
            plugin_name: self.plugin_name.clone(),
            ..DriverConfig::default()
        }
    }
}

/// Host name of this machine, if it can be read.
pub fn hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}
