//! Error types for graph building, planning, provider calls and state.
//!
//! Build and plan errors are fatal and raised before any provider call.
//! Provider errors are per-operation and carry whether a retry can help.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ResourceKind;

/// Errors raised while building a resource graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The resource document is malformed
    #[error("invalid resource '{node}': {message}")]
    Schema { node: String, message: String },

    /// A reference names a node or attribute that does not exist
    #[error("resource '{node}' references unknown attribute '{reference}'")]
    UnresolvedReference { node: String, reference: String },

    /// The dependency edges contain a cycle
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

impl GraphError {
    pub(crate) fn schema(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            node: node.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while computing a change set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A resource must be deleted while a kept resource still depends on it
    #[error(
        "cannot delete '{node}': '{dependent}' still depends on it and is not being replaced"
    )]
    DependentStillPresent { node: String, dependent: String },
}

/// Errors returned by a [`Provider`](crate::Provider)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The remote resource does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    /// Throttling, timeouts, connection resets: worth retrying
    #[error("transient provider error: {message}")]
    Transient { message: String },

    /// Validation failures, permission errors and the like
    #[error("provider error: {message}")]
    Permanent { message: String },
}

impl ProviderError {
    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the remote resource is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised by a [`StateStore`](crate::StateStore)
#[derive(Error, Debug)]
pub enum StateError {
    /// IO error
    #[error("state IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A state file could not be parsed or written
    #[error("invalid state file {}: {source}", .path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Resource name cannot be used as a state key
    #[error("invalid state key: {0}")]
    InvalidKey(String),
}

/// Result type for state store operations
pub type StateResult<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = GraphError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(
            ProviderError::Transient {
                message: "throttled".into()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::Permanent {
                message: "denied".into()
            }
            .is_retryable()
        );
        let missing = ProviderError::NotFound {
            kind: ResourceKind::Cluster,
            id: "c-1".into(),
        };
        assert!(!missing.is_retryable());
        assert!(missing.is_not_found());
    }
}
