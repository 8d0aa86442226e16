//! Error types for topology assembly

use crate::config::ConfigError;
use netforge_kernel::{GraphError, ResourceKind, ResourceName};

/// Errors raised while turning configuration into a resource graph
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Configuration is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Graph construction failed
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A handle of the wrong kind was passed to a constructor
    #[error("{role} must be a {expected}, but '{resource}' is a {actual}")]
    KindMismatch {
        /// Role of the handle in the call
        role: &'static str,
        /// Handle that was passed
        resource: ResourceName,
        /// Kind the constructor needs
        expected: ResourceKind,
        /// Kind of the handle passed
        actual: ResourceKind,
    },

    /// Structurally invalid request, e.g. a load balancer with one subnet
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
}

/// Result alias for topology assembly
pub type TopologyResult<T> = Result<T, TopologyError>;
