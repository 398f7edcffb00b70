//! Error types for the terragraph planning and apply system.
//!
//! This module provides the error hierarchy for every stage of a cycle:
//! configuration loading, graph construction, provider calls, convergence
//! polling, graph walking and state persistence.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for terragraph.
#[derive(Debug, Error)]
pub enum TerragraphError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Structural graph errors, detected before any remote call.
    #[error("Graph error: {0}")]
    Structural(#[from] StructuralError),

    /// Provider capability errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Convergence polling errors.
    #[error("Convergence error: {0}")]
    Convergence(#[from] ConvergenceError),

    /// A node failed while being planned or applied.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Composite error returned by a graph walk.
    #[error(transparent)]
    Walk(#[from] WalkError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

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
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An interpolation reference is malformed.
    #[error("Invalid reference '{expression}' in {node}: {reason}")]
    InvalidReference {
        /// Node containing the reference.
        node: String,
        /// The offending expression.
        expression: String,
        /// Why the reference is invalid.
        reason: String,
    },

    /// An interpolation uses syntax the resolver does not evaluate.
    #[error("Unsupported expression '{expression}' in {node}")]
    UnsupportedExpression {
        /// Node containing the expression.
        node: String,
        /// The offending expression.
        expression: String,
    },

    /// A variable has neither a supplied value nor a default.
    #[error("No value for variable {name}")]
    MissingVariable {
        /// Stable name of the variable.
        name: String,
    },

    /// Duplicate declaration.
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName {
        /// Kind of declaration (resource, variable, ...).
        kind: String,
        /// The duplicated name.
        name: String,
    },
}

/// Structural errors in the dependency graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// The dependency relation contains a cycle.
    #[error("Dependency cycle: {}", .path.join(" -> "))]
    Cycle {
        /// Nodes on the cycle, first node repeated at the end.
        path: Vec<String>,
    },

    /// A reference points to a node that does not exist.
    #[error("Unresolved reference '{expression}' in {node}")]
    UnresolvedReference {
        /// Node containing the reference.
        node: String,
        /// The unresolvable expression.
        expression: String,
    },

    /// A resource or data source names a provider that is not declared.
    #[error("{node} requires provider '{provider}', which is not configured")]
    UnresolvedProvider {
        /// Node needing the provider.
        node: String,
        /// The provider key that did not resolve.
        provider: String,
    },

    /// Two nodes share a stable name.
    #[error("Duplicate node: {name}")]
    DuplicateNode {
        /// The duplicated stable name.
        name: String,
    },
}

/// Errors surfaced by provider capabilities.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The remote object does not exist.
    #[error("Remote object not found: {id}")]
    NotFound {
        /// Remote identifier.
        id: String,
    },

    /// No provider implementation is registered for a provider node.
    #[error("No provider registered for {provider}")]
    NotRegistered {
        /// Provider node name or key.
        provider: String,
    },

    /// The provider does not manage the requested type.
    #[error("Provider {provider} does not support type {resource_type}")]
    UnsupportedType {
        /// Provider name.
        provider: String,
        /// Requested resource or data type.
        resource_type: String,
    },

    /// A remote API call failed.
    #[error("Remote API call failed: {message}")]
    Api {
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised while waiting for a remote object to converge.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    /// The target status was not reached in time.
    #[error(
        "Timeout after {timeout:?} waiting for '{target}' (last status: {})",
        .last_status.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        /// Status that was awaited.
        target: String,
        /// Last status observed before giving up.
        last_status: Option<String>,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The remote object reached a status that is neither target nor pending.
    #[error("Unexpected status '{status}' while waiting for '{target}'")]
    UnexpectedState {
        /// Observed status.
        status: String,
        /// Status that was awaited.
        target: String,
    },

    /// The remote object kept reporting not found.
    #[error(
        "Remote object not found after {attempts} consecutive checks while waiting for '{target}'"
    )]
    NotFound {
        /// Status that was awaited.
        target: String,
        /// Number of consecutive not-found answers.
        attempts: u32,
    },

    /// The refresh call failed with a non-recoverable error.
    #[error("Refresh failed: {0}")]
    Refresh(#[source] Box<TerragraphError>),

    /// The wait was canceled.
    #[error(
        "Canceled while waiting (last status: {})",
        .last_status.as_deref().unwrap_or("unknown")
    )]
    Canceled {
        /// Last status observed before cancellation.
        last_status: Option<String>,
    },
}

/// A node-level failure during plan or apply, tagged with the attempted action.
#[derive(Debug, Error)]
#[error("{node}: {action} failed: {source}")]
pub struct ApplyError {
    /// Stable name of the failing node.
    pub node: String,
    /// Action that was attempted.
    pub action: String,
    /// Underlying cause.
    #[source]
    pub source: Box<TerragraphError>,
}

/// Why a node did not complete during a walk.
#[derive(Debug)]
pub enum FailureReason {
    /// The visit returned an error.
    Error(TerragraphError),
    /// The node was skipped because an ancestor failed.
    SkippedAncestor {
        /// The ancestor whose failure caused the skip.
        ancestor: String,
    },
    /// The node never started because the walk stopped early.
    NotStarted,
}

/// One entry of a composite walk error.
#[derive(Debug)]
pub struct NodeFailure {
    /// Stable node name.
    pub node: String,
    /// What happened.
    pub reason: FailureReason,
}

/// Composite error returned by a graph walk.
#[derive(Debug, Error)]
pub enum WalkError {
    /// One or more nodes failed.
    #[error("Walk failed: {}", summarize(.failures))]
    Failed {
        /// Every failed, skipped or never-started node.
        failures: Vec<NodeFailure>,
    },

    /// The walk was interrupted by external cancellation.
    #[error("Walk canceled: {}", summarize(.failures))]
    Canceled {
        /// Every failed, skipped or never-started node.
        failures: Vec<NodeFailure>,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// The backing storage could not be written.
    #[error("State write failed: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Result type alias for terragraph operations.
pub type Result<T> = std::result::Result<T, TerragraphError>;

impl TerragraphError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error reports a missing remote object.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::NotFound { .. }))
    }

    /// Returns true if this error stems from cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Convergence(ConvergenceError::Canceled { .. })
            | Self::Walk(WalkError::Canceled { .. }) => true,
            Self::Apply(apply) => apply.source.is_canceled(),
            _ => false,
        }
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

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl ProviderError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an API error.
    #[must_use]
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ApplyError {
    /// Wraps an error with the node and action it happened on.
    #[must_use]
    pub fn new(
        node: impl Into<String>,
        action: impl fmt::Display,
        source: TerragraphError,
    ) -> Self {
        Self {
            node: node.into(),
            action: action.to_string(),
            source: Box::new(source),
        }
    }
}

impl NodeFailure {
    /// Returns true if the node was skipped because of an ancestor failure.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self.reason, FailureReason::SkippedAncestor { .. })
    }

    /// Returns the visit error, if the node itself failed.
    #[must_use]
    pub const fn error(&self) -> Option<&TerragraphError> {
        match &self.reason {
            FailureReason::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl WalkError {
    /// Returns every node-level entry.
    #[must_use]
    pub fn failures(&self) -> &[NodeFailure] {
        match self {
            Self::Failed { failures } | Self::Canceled { failures } => failures,
        }
    }

    /// Returns true if the walk was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// Returns the names of nodes whose visit returned an error.
    #[must_use]
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.failures()
            .iter()
            .filter(|f| matches!(f.reason, FailureReason::Error(_)))
            .map(|f| f.node.as_str())
            .collect()
    }

    /// Returns the names of nodes skipped due to an ancestor failure.
    #[must_use]
    pub fn skipped_nodes(&self) -> Vec<&str> {
        self.failures()
            .iter()
            .filter(|f| f.is_skipped())
            .map(|f| f.node.as_str())
            .collect()
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FailureReason::Error(err) => write!(f, "{}: {err}", self.node),
            FailureReason::SkippedAncestor { ancestor } => {
                write!(f, "{}: skipped due to failure of {ancestor}", self.node)
            }
            FailureReason::NotStarted => write!(f, "{}: not started", self.node),
        }
    }
}

fn summarize(failures: &[NodeFailure]) -> String {
    let errors = failures
        .iter()
        .filter(|f| matches!(f.reason, FailureReason::Error(_)))
        .count();
    let skipped = failures.iter().filter(|f| f.is_skipped()).count();
    let not_started = failures.len() - errors - skipped;

    let mut out = format!("{errors} failed, {skipped} skipped, {not_started} not started");
    for failure in failures {
        out.push_str("\n  - ");
        out.push_str(&failure.to_string());
    }
    out
}
