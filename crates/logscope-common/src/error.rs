//! Error types for the LoggingScope operator
//!
//! Errors carry the resource they relate to so a failed pass can be traced
//! back to a namespace and object without extra logging at the call site.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for LoggingScope operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Create rejected because the object already exists (HTTP 409)
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Kind of the object being created
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// A workload referenced by a scope could not be found
    #[error("workload {kind} {namespace}/{name} not found")]
    WorkloadNotFound {
        /// Workload kind
        kind: String,
        /// Workload namespace
        namespace: String,
        /// Workload name
        name: String,
    },

    /// A workload object is missing or has malformed fields
    #[error("invalid workload {workload}: {message}")]
    InvalidWorkload {
        /// Workload identity (`kind namespace/name`)
        workload: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "adapter")
        context: String,
    },
}

impl Error {
    /// Create an AlreadyExists error for the given object
    pub fn already_exists(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a WorkloadNotFound error
    pub fn workload_not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::WorkloadNotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an InvalidWorkload error
    pub fn invalid_workload(workload: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidWorkload {
            workload: workload.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for HTTP 409 conflicts on create
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Returns true if this error is likely transient and retrying may succeed
    ///
    /// Missing workloads are retryable because the outer orchestration layer
    /// may create them after the scope references them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { .. } => true,
            Self::WorkloadNotFound { .. } => true,
            Self::AlreadyExists { .. } => false,
            Self::InvalidWorkload { .. } => false,
            Self::Serialization { .. } => false,
            Self::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
