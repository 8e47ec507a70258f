//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Object does not exist in the store.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    /// Object with the same identity already exists.
    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: String },

    /// Write was based on a stale resource version.
    #[error("{kind} '{key}' was modified concurrently")]
    Conflict { kind: String, key: String },

    /// Store operation failed for another reason.
    #[error("store operation '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },

    /// Pulling, rendering or property parsing failed.
    #[error(transparent)]
    Registry(#[from] catsrc_registry::Error),

    /// An object or kind was unusable.
    #[error(transparent)]
    Core(#[from] catsrc_core::Error),

    /// Reconciliation failed.
    #[error("reconciliation failed: {reason}")]
    ReconcileFailed { reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a reconcile failed error.
    pub fn reconcile_failed(reason: impl Into<String>) -> Self {
        Self::ReconcileFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this is a not-found error.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is an already-exists error.
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Combinators for store results.
pub trait ResultExt<T> {
    /// Turn a not-found error into `Ok(None)`; other errors pass through.
    ///
    /// # Errors
    ///
    /// Returns every error except [`Error::NotFound`].
    fn ignore_not_found(self) -> Result<Option<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn ignore_not_found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
