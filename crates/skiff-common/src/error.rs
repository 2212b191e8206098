//! Unified error types for the skiff workspace.
//!
//! Errors fall into four families: configuration errors raised before any
//! resource is touched, topology errors raised while the graph is assembled,
//! platform rejections reported by a provider, and interrupted convergence.
//! Every variant that concerns a resource carries its logical name so the
//! operator can find it.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum SkiffError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A required input is missing or malformed.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An assembled topology breaks one of its cross-entity invariants.
    #[error("invalid topology at {resource}.{field}: {message}")]
    InvalidTopology {
        /// Logical name of the offending resource.
        resource: String,
        /// Field that holds the inconsistent value.
        field: String,
        /// Description of the violated invariant.
        message: String,
    },

    /// A deferred value was read before the resource producing it existed.
    #[error("unresolved reference {resource}.{attribute}")]
    Unresolved {
        /// Logical name of the referenced resource.
        resource: String,
        /// Attribute that has no known value yet.
        attribute: String,
    },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency detected in resource graph")]
    Cycle,

    /// The target platform refused a resource.
    #[error("{kind} {resource} rejected by platform: {message}")]
    PlatformRejected {
        /// Logical name of the rejected resource.
        resource: String,
        /// Resource kind.
        kind: String,
        /// Verbatim message reported by the platform.
        message: String,
    },

    /// Convergence was interrupted before every step ran.
    #[error("convergence cancelled after {completed} step(s)")]
    Cancelled {
        /// Number of steps that completed before the interruption.
        completed: usize,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl SkiffError {
    /// Shorthand for a [`SkiffError::Config`] with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a [`SkiffError::InvalidTopology`].
    pub fn topology(
        resource: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidTopology {
            resource: resource.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors raised before any resource mutation.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SkiffError>;
