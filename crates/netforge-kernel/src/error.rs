//! Error types for the netforge kernel
//!
//! Covers both phases:
//! - Graph construction and resolution (fatal before apply)
//! - Apply (fatal to the current pass, never retried here)

use crate::types::{AttributeRef, ResourceKind, ResourceName};

/// Errors raised while building or resolving a resource graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Name already declared in this graph
    #[error("resource '{name}' is already declared")]
    DuplicateName {
        /// The repeated name
        name: ResourceName,
    },

    /// Dependency or parameter reference to an undeclared resource
    #[error("resource '{resource}' references undeclared resource '{reference}'")]
    InvalidReference {
        /// Resource holding the reference
        resource: ResourceName,
        /// Name that is not declared
        reference: ResourceName,
    },

    /// Empty resource or export name
    #[error("resource names must not be empty")]
    EmptyName,

    /// Dependency cycle; lists the first cycle found
    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CycleDetected {
        /// Cycle members, each depending on the next, the last on the first
        cycle: Vec<ResourceName>,
    },
}

fn format_cycle(cycle: &[ResourceName]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(ResourceName::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

/// Failure reported by a provider adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Human-readable cause
    pub message: String,
}

impl ProviderError {
    /// Error with a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised during apply
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// Realization of one resource failed; apply stopped
    #[error("failed to realize {kind} '{resource}': {source}")]
    Provider {
        /// Resource that failed
        resource: ResourceName,
        /// Kind of the failed resource
        kind: ResourceKind,
        /// Adapter failure
        #[source]
        source: ProviderError,
        /// Resources that were realized before the failure and remain
        realized: Vec<ResourceName>,
    },

    /// Apply was cancelled before every resource was realized
    #[error("apply cancelled after {} resource(s)", .realized.len())]
    Cancelled {
        /// Resources realized before cancellation took effect
        realized: Vec<ResourceName>,
    },

    /// A realized dependency did not produce a referenced attribute
    #[error("resource '{resource}' references missing attribute '{reference}'")]
    MissingAttribute {
        /// Resource whose parameters could not be resolved
        resource: ResourceName,
        /// Reference with no value
        reference: AttributeRef,
        /// Resources realized before the halt
        realized: Vec<ResourceName>,
    },
}

impl ApplyError {
    /// Resources that remain realized after the failed pass
    #[must_use]
    pub fn realized(&self) -> &[ResourceName] {
        match self {
            Self::Provider { realized, .. }
            | Self::Cancelled { realized }
            | Self::MissingAttribute { realized, .. } => realized,
        }
    }

    /// Name of the resource that failed, if any
    #[must_use]
    pub fn failed_resource(&self) -> Option<&ResourceName> {
        match self {
            Self::Provider { resource, .. } | Self::MissingAttribute { resource, .. } => {
                Some(resource)
            }
            Self::Cancelled { .. } => None,
        }
    }
}

/// Combined kernel error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// Construction or resolution failure
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Apply failure
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),
}

/// Result alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_display_closes_the_loop() {
        let err = GraphError::CycleDetected {
            cycle: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn provider_error_names_resource_and_kind() {
        let err = ApplyError::Provider {
            resource: "web-sg".into(),
            kind: ResourceKind::SecurityGroup,
            source: ProviderError::new("quota exceeded"),
            realized: vec!["vpc".into()],
        };
        assert_eq!(
            err.to_string(),
            "failed to realize SecurityGroup 'web-sg': quota exceeded"
        );
        assert_eq!(err.failed_resource().map(ResourceName::as_str), Some("web-sg"));
        assert_eq!(err.realized().len(), 1);
    }

    #[test]
    fn error_conversions() {
        let graph_err = GraphError::EmptyName;
        let kernel_err: KernelError = graph_err.into();
        assert!(matches!(kernel_err, KernelError::Graph(_)));
    }
}
