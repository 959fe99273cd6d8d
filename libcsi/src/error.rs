//! CSI error types.
//!
//! Every failure reported to the orchestration platform is a [`CsiError`].
//! The variants are the error *kinds* of the CSI contract rather than wire
//! codes; they derive [`thiserror::Error`] for local handling and
//! [`Serialize`]/[`Deserialize`] so they travel across the QUIC transport.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// The referenced volume has no device in the device directory.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The request is malformed or contradicts existing mounts.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A path the caller must pre-create is missing or of the wrong kind.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// A host operation failed or the host state is inconsistent.
    #[error("internal error: {0}")]
    Internal(String),

    /// The operation is deliberately not provided by this plugin.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),
}

impl CsiError {
    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }
}
