//! Core error types for catalog resource handling.
//!
//! All errors are explicit and typed; nothing in this crate panics.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// An object is missing a field the controllers rely on.
    #[error("invalid object '{key}': {reason}")]
    InvalidObject { key: String, reason: String },

    /// A kind was looked up that was never registered.
    #[error("kind '{kind}' is not registered")]
    UnknownKind { kind: String },

    /// A kind was registered twice.
    #[error("kind '{kind}' is already registered")]
    DuplicateKind { kind: String },
}

impl Error {
    /// Create an invalid object error.
    pub fn invalid_object(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown kind error.
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind { kind: kind.into() }
    }

    /// Create a duplicate kind error.
    pub fn duplicate_kind(kind: impl Into<String>) -> Self {
        Self::DuplicateKind { kind: kind.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_object("operators/acme", "missing uid");
        assert!(err.to_string().contains("operators/acme"));
        assert!(err.to_string().contains("missing uid"));
    }

    #[test]
    fn test_unknown_kind_display() {
        let err = Error::unknown_kind("Widget");
        assert_eq!(err.to_string(), "kind 'Widget' is not registered");
    }
}
