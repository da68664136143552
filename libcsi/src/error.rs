//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! Unix-socket transport.
//!
//! Every variant is safe to retry blindly: operations never commit a partial
//! mutation before returning an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// The caller supplied a malformed request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced volume is unknown to the registry.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// A path whose existence was required is missing.
    #[error("path {0} not found")]
    PathNotFound(String),

    /// A creation request reused a name with incompatible parameters.
    #[error("volume {name} already exists with different {conflict}")]
    AlreadyExists {
        /// Requested volume name.
        name: String,
        /// Which part of the request conflicts (e.g. `"capacity"`).
        conflict: String,
    },

    /// The volume still has mount targets and cannot be deleted.
    #[error("volume {volume_id} is still published at {targets} target(s)")]
    VolumeInUse {
        /// Volume that was asked to be deleted.
        volume_id: String,
        /// Number of live mount targets.
        targets: usize,
    },

    /// The operation is deliberately not implemented by this plugin.
    #[error("{0} is not supported")]
    Unsupported(String),

    /// The caller cancelled the call before it could take effect.
    #[error("{0} canceled before completion")]
    Canceled(String),

    /// A host filesystem operation failed.
    #[error("{op} {path}: {reason}")]
    Internal {
        /// Operation that failed, e.g. `"create dir"`.
        op: String,
        /// Path the operation was applied to.
        path: String,
        /// Underlying I/O cause.
        reason: String,
    },

    /// A Unix-socket / transport-level error.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CsiError {
    /// Create a [`CsiError::Internal`] describing a failed filesystem
    /// operation on `path`.
    pub fn io<P: fmt::Display, E: fmt::Display>(op: &str, path: P, e: E) -> Self {
        Self::Internal {
            op: op.to_owned(),
            path: path.to_string(),
            reason: e.to_string(),
        }
    }

    /// Create a [`CsiError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Status code for this error, following the gRPC code space used by CSI.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::VolumeNotFound(_) | Self::PathNotFound(_) => Code::NotFound,
            Self::AlreadyExists { .. } => Code::AlreadyExists,
            Self::VolumeInUse { .. } => Code::FailedPrecondition,
            Self::Unsupported(_) => Code::Unimplemented,
            Self::Canceled(_) => Code::Cancelled,
            Self::Internal { .. } => Code::Internal,
            Self::Transport(_) => Code::Unavailable,
        }
    }
}

/// gRPC status codes that CSI operations can surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// The operation was cancelled.
    Cancelled = 1,
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Some requested entity was not found.
    NotFound = 5,
    /// Some entity that we attempted to create already exists.
    AlreadyExists = 6,
    /// The system is not in a state required for the operation's execution.
    FailedPrecondition = 9,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::Cancelled => "Cancelled",
            Code::InvalidArgument => "InvalidArgument",
            Code::NotFound => "NotFound",
            Code::AlreadyExists => "AlreadyExists",
            Code::FailedPrecondition => "FailedPrecondition",
            Code::Unimplemented => "Unimplemented",
            Code::Internal => "Internal",
            Code::Unavailable => "Unavailable",
        };
        f.write_str(name)
    }
}
