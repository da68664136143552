//! # libcsi: CSI host-path driver core
//!
//! `libcsi` implements the [Container Storage Interface][csi] services for
//! node-local volumes backed by plain host directories.  It follows the usual
//! conventions of this workspace (Tokio async runtime, `tracing` for
//! observability, `thiserror` for structured errors) and talks to its callers
//! over a Unix domain socket.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`context`] | [`CallContext`] cancellation carried by mutating calls. |
//! | [`lock`] | Per-volume lock arena. |
//! | [`registry`] | [`VolumeRegistry`], the in-process record of every volume. |
//! | [`config`] | [`DriverConfig`] for the host-path backend. |
//! | [`message`] | [`CsiMessage`] protocol envelope for the socket transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & readiness. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, unpublish, unstage. |
//! | [`transport`] | Unix-socket client/server. |
//! | [`backend`] | Storage backends (host path). |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod identity;
pub mod lock;
pub mod message;
pub mod node;
pub mod registry;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::hostpath::HostPathBackend;
pub use config::DriverConfig;
pub use context::{CallContext, CancelHandle};
pub use controller::CsiController;
pub use error::{Code, CsiError};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use registry::VolumeRegistry;
pub use types::*;
