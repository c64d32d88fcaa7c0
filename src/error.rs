//! Error types for prompt fences.

use std::fmt;

/// Coarse classification of a [`FenceError`], stable for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownLabel,
    MalformedMarker,
    SignatureMismatch,
    Configuration,
    Validation,
}

/// Unified error type for signing, rendering, verifying and configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum FenceError {
    /// A fence type or rating outside the closed vocabulary
    UnknownLabel { field: String, value: String },
    /// Broken delimiters, bad escaping, or a missing required attribute
    MalformedMarker { reason: String },
    /// Recomputed signature disagrees with the claimed one
    SignatureMismatch { reason: String },
    /// No usable key material
    Configuration { message: String },
    /// Draft field rejected before signing
    Validation { field: String, message: String },
}

impl FenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownLabel { .. } => ErrorKind::UnknownLabel,
            Self::MalformedMarker { .. } => ErrorKind::MalformedMarker,
            Self::SignatureMismatch { .. } => ErrorKind::SignatureMismatch,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMarker { reason: reason.into() }
    }

    pub(crate) fn mismatch(reason: impl Into<String>) -> Self {
        Self::SignatureMismatch { reason: reason.into() }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

impl fmt::Display for FenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownLabel { field, value } => {
                write!(f, "unknown {} label: '{}'", field, value)
            }
            Self::MalformedMarker { reason } => {
                write!(f, "malformed fence marker: {}", reason)
            }
            Self::SignatureMismatch { reason } => {
                write!(f, "signature verification failed: {}", reason)
            }
            Self::Configuration { message } => {
                write!(f, "configuration error: {}", message)
            }
            Self::Validation { field, message } => {
                write!(f, "validation error on '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for FenceError {}

/// Result type alias for fence operations.
pub type FenceResult<T> = Result<T, FenceError>;

impl From<toml::de::Error> for FenceError {
    fn from(e: toml::de::Error) -> Self {
        Self::config(format!("invalid TOML: {}", e))
    }
}

impl From<std::io::Error> for FenceError {
    fn from(e: std::io::Error) -> Self {
        Self::config(format!("failed to read configuration: {}", e))
    }
}

impl From<hex::FromHexError> for FenceError {
    fn from(e: hex::FromHexError) -> Self {
        Self::config(format!("key secret is not valid hex: {}", e))
    }
}
