//! Error types shared across the control plane.

use crate::meta::{Kind, ResourceKey};

/// Result type alias for control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can cross component boundaries. The API layer maps these
/// directly onto HTTP status codes; controllers use the kind to decide
/// between retry, condition reporting, and silent continuation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Target object absent. Success for controllers during cleanup.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: Kind,
        namespace: String,
        name: String,
    },

    /// Key collision on create.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: Kind,
        namespace: String,
        name: String,
    },

    /// Schema or semantic violation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Runtime glitch expected to self-heal; retried with backoff.
    #[error("transient runtime failure: {0}")]
    RuntimeTransient(String),

    /// Runtime failure that will not self-heal; recorded in the object's
    /// status conditions and not retried on the same object.
    #[error("runtime failure: {reason}: {message}")]
    RuntimeFatal { reason: String, message: String },

    /// Unexpected invariant breach.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(key: &ResourceKey) -> Self {
        Error::NotFound {
            kind: key.kind,
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }

    pub fn already_exists(key: &ResourceKey) -> Self {
        Error::AlreadyExists {
            kind: key.kind,
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Short machine-readable label for condition reporting.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NotFound",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::Validation(_) => "ValidationError",
            Error::RuntimeTransient(_) => "RuntimeTransient",
            Error::RuntimeFatal { .. } => "RuntimeFatal",
            Error::Internal(_) => "Internal",
        }
    }
}
