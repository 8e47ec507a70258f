//! Error types for pulling, rendering and property parsing.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Registry, render and property errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid image reference '{image}': {reason}")]
    InvalidReference { image: String, reason: String },

    #[error("failed to pull '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    #[error("image '{image}' has no unpackable layers")]
    NoLayers { image: String },

    #[error("failed to unpack '{image}' into '{path}': {reason}")]
    UnpackFailed {
        image: String,
        path: PathBuf,
        reason: String,
    },

    #[error("failed to render '{path}': {reason}")]
    RenderFailed { path: PathBuf, reason: String },

    #[error("catalog content not found at '{path}'")]
    ConfigsNotFound { path: PathBuf },

    #[error("invalid '{property_type}' property: {reason}")]
    InvalidProperty {
        property_type: String,
        reason: String,
    },

    #[error("registry client already destroyed")]
    Destroyed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a pull failed error.
    pub fn pull_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PullFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Create an unpack failed error.
    pub fn unpack_failed(
        image: impl Into<String>,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnpackFailed {
            image: image.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a render failed error.
    pub fn render_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::RenderFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid property error.
    pub fn invalid_property(property_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            property_type: property_type.into(),
            reason: reason.into(),
        }
    }
}
