//! Error types for the edgestack reconciler.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph building, state management, provider calls,
//! planning, and reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the edgestack reconciler.
#[derive(Debug, Error)]
pub enum StackError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph validation errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
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

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors raised while building the resource dependency graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two resources share the same logical id.
    #[error("Duplicate logical id: {logical_id}")]
    DuplicateId {
        /// The duplicated logical id.
        logical_id: String,
    },

    /// A dependency or reference names an unknown logical id.
    #[error("Resource '{logical_id}' references unknown resource '{missing}'")]
    DanglingReference {
        /// Resource holding the reference.
        logical_id: String,
        /// The logical id that does not exist.
        missing: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Logical ids along the cycle, first id repeated at the end.
        cycle: Vec<String>,
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

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The run lock expired and was taken, or removed, while a run held it.
    #[error("State lock {lock_id} is no longer held by this run")]
    LockLost {
        /// Lock the run believed it held.
        lock_id: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local filesystem backend error.
    #[error("Local state backend error: {message}")]
    Storage {
        /// Description of the filesystem error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
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

    /// The snapshot belongs to another stack.
    #[error("State belongs to stack '{found}', refusing to use it for '{expected}'")]
    StackMismatch {
        /// Stack named in the configuration.
        expected: String,
        /// Stack recorded in the snapshot.
        found: String,
    },
}

/// Provider API errors.
///
/// Every variant is either transient (worth retrying) or permanent,
/// see [`ProviderError::is_transient`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Rate limited by the provider.
    #[error("Provider rate limited the request{}", retry_after_secs.map(|s| format!(", retry after {s} seconds")).unwrap_or_default())]
    RateLimited {
        /// Seconds to wait before retrying, when the provider said so.
        retry_after_secs: Option<u64>,
    },

    /// The request or the remote operation timed out.
    #[error("Provider request timed out: {message}")]
    Timeout {
        /// Description of the timeout.
        message: String,
    },

    /// The provider is temporarily unavailable.
    #[error("Provider temporarily unavailable: {status} - {message}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Credentials were rejected or lack permission.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Description of the auth failure.
        message: String,
    },

    /// A property value was rejected.
    #[error("Invalid property value: {message}")]
    InvalidProperty {
        /// Description of the rejected value.
        message: String,
    },

    /// The resource conflicts with an existing one.
    #[error("Conflicting resource: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Remote resource not found.
    #[error("Remote resource not found: {remote_id}")]
    NotFound {
        /// Remote id that was not found.
        remote_id: String,
    },

    /// The remote operation finished in a failed state.
    #[error("Remote operation failed for {remote_id}: {message}")]
    OperationFailed {
        /// Remote id of the resource.
        remote_id: String,
        /// Failure reason reported by the provider.
        message: String,
    },

    /// API request failed with an unclassified status.
    #[error("Provider API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// An action is missing data it needs.
    #[error("Invalid action for '{logical_id}': {message}")]
    InvalidAction {
        /// Resource the action targets.
        logical_id: String,
        /// What is wrong with the action.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A provider call failed for a specific resource.
    #[error("Failed to {action} {kind} '{logical_id}': {source}")]
    ResourceFailed {
        /// Action being applied.
        action: String,
        /// Kind of resource.
        kind: String,
        /// Logical id of the resource.
        logical_id: String,
        /// Underlying provider error.
        source: ProviderError,
    },

    /// Maximum retry attempts exceeded.
    #[error("Maximum retry attempts ({attempts}) exceeded for '{logical_id}': {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        logical_id: String,
        /// Last transient error seen.
        last_error: ProviderError,
    },

    /// A reference could not be resolved against recorded state.
    #[error("Resource '{logical_id}' references '{reference}' which has no recorded value")]
    UnresolvedReference {
        /// Resource holding the reference.
        logical_id: String,
        /// The reference text.
        reference: String,
    },

    /// The resource did not become ready in time.
    #[error("Timed out after {waited_secs}s waiting for '{logical_id}' ({remote_id}) to become ready")]
    ReadinessTimeout {
        /// Resource being waited on.
        logical_id: String,
        /// Remote id being polled.
        remote_id: String,
        /// Seconds waited.
        waited_secs: u64,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for edgestack operations.
pub type Result<T> = std::result::Result<T, StackError>;

/// Result type alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl StackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_transient(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(err) => err.retry_after_secs(),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }

    /// Returns true for errors raised before any remote call because the
    /// declared stack is invalid.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Graph(_)
                | Self::Config(
                    ConfigError::ValidationError { .. } | ConfigError::ParseError { .. }
                )
        )
    }

    /// Process exit code for this error: 2 for validation errors, 1 otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.is_validation() { 2 } else { 1 }
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

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
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
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true for rate limits, timeouts, unavailability and network
    /// failures. Everything else is permanent.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::Unavailable { .. }
                | Self::NetworkError { .. }
        )
    }

    /// Delay hint supplied by the provider, if any.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: None }.is_transient());
        assert!(ProviderError::network("reset").is_transient());
        assert!(
            ProviderError::Unavailable {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!ProviderError::PermissionDenied { message: String::new() }.is_transient());
        assert!(!ProviderError::InvalidProperty { message: String::new() }.is_transient());
        assert!(!ProviderError::api_error(418, "teapot").is_transient());
    }

    #[test]
    fn test_exit_codes() {
        let cycle = StackError::Graph(GraphError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        });
        assert_eq!(cycle.exit_code(), 2);
        assert_eq!(cycle.to_string(), "Graph error: Cyclic dependency: a -> b -> a");

        let corrupt = StackError::State(StateError::corrupted("bad json"));
        assert_eq!(corrupt.exit_code(), 1);
    }

    #[test]
    fn test_retry_delay_hint() {
        let err = StackError::Provider(ProviderError::RateLimited {
            retry_after_secs: Some(7),
        });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(7));
    }
}
