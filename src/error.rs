//! Error types for the Converge provisioning engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, planning, state storage, provider
//! operations, and execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Converge engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Execution errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },
}

/// Errors raised while building the dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The declarations contain a dependency cycle.
    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle {
        /// Resources on the cycle, in edge order. The first entry is repeated
        /// at the end.
        cycle: Vec<String>,
    },

    /// A reference or explicit dependency names an undeclared resource.
    #[error("Resource '{resource}' references undeclared resource '{target}'")]
    UnresolvedReference {
        /// The referencing resource.
        resource: String,
        /// The missing target.
        target: String,
    },

    /// A reference expression could not be parsed.
    #[error("Invalid reference '{expression}' in resource '{resource}': {reason}")]
    InvalidReference {
        /// The resource holding the expression.
        resource: String,
        /// The offending expression.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A declared kind or name is not a valid identity part.
    #[error("Invalid resource identity '{kind}.{name}': {reason}")]
    InvalidIdentity {
        /// Declared kind.
        kind: String,
        /// Declared name.
        name: String,
        /// Which rule was broken.
        reason: String,
    },

    /// Two declarations share the same identity.
    #[error("Duplicate resource identity: {resource}")]
    DuplicateIdentity {
        /// The duplicated identity.
        resource: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A resource that must exist depends on a resource scheduled for deletion.
    #[error("Resource '{resource}' depends on '{target}', which is scheduled for deletion")]
    DependsOnDeleted {
        /// The dependent resource.
        resource: String,
        /// The resource being deleted.
        target: String,
    },

    /// A reference names an output the target never produced.
    #[error("Resource '{resource}' references unknown output '{reference}'")]
    UnknownOutput {
        /// The referencing resource.
        resource: String,
        /// The reference expression.
        reference: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// A compare-and-swap update lost against a concurrent writer.
    #[error("Stale state for {resource}: expected revision {expected}, found {found}")]
    Stale {
        /// Resource whose record changed.
        resource: String,
        /// Revision the writer expected.
        expected: String,
        /// Revision actually stored.
        found: String,
    },

    /// A stored record could not be read back.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A record lock is held by another process.
    #[error("State record {resource} is locked by {holder} (since: {since})")]
    LockedByOther {
        /// Locked resource.
        resource: String,
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Filesystem failure in a state backend.
    #[error("State backend IO error: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Errors reported by resource providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected or failed an operation on a specific resource.
    #[error("{action} of {resource} failed: {message}")]
    Operation {
        /// Resource the operation targeted.
        resource: String,
        /// Operation name (create, update, delete).
        action: String,
        /// Provider-supplied message.
        message: String,
    },

    /// No provider is registered for a resource kind.
    #[error("No provider registered for kind '{kind}'")]
    UnknownKind {
        /// The unsupported kind.
        kind: String,
    },

    /// The provider does not know the given identifier.
    #[error("Provider resource not found: {provider_id}")]
    NotFound {
        /// Provider-assigned identifier.
        provider_id: String,
    },
}

/// Execution-level errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// One or more nodes failed during a run.
    #[error("{failed} of {total} changes failed: {}", .failures.join("; "))]
    RunFailed {
        /// Number of failed or skipped nodes.
        failed: usize,
        /// Number of actionable nodes.
        total: usize,
        /// One message per failed node.
        failures: Vec<String>,
    },

    /// The run was cancelled before every node started.
    #[error("Run cancelled: {not_started} changes were not started")]
    Cancelled {
        /// Number of nodes left unstarted.
        not_started: usize,
    },
}

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the failure came from a concurrent state update and a
    /// fresh plan is likely to succeed.
    #[must_use]
    pub const fn is_stale_state(&self) -> bool {
        matches!(self, Self::State(StateError::Stale { .. }))
    }

    /// Returns true if the error was raised before any resource was mutated.
    #[must_use]
    pub const fn is_pre_mutation(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Graph(_) | Self::Plan(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates an IO error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an operation error.
    #[must_use]
    pub fn operation(
        resource: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Operation {
            resource: resource.into(),
            action: action.into(),
            message: message.into(),
        }
    }
}
