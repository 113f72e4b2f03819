//! Error types for Kino Bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error types
#[derive(Error, Debug)]
pub enum Error {
    // Command errors
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid argument for {action}: {reason}")]
    InvalidArgument { action: String, reason: String },

    // RPC errors
    #[error("Timeout")]
    Timeout,

    #[error("{0}")]
    Remote(String),

    #[error("Failed to decode result: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Frame not found: {0}")]
    EndpointNotFound(String),

    #[error("Transport closed")]
    TransportClosed,

    // Source errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Unsupported source: {0}")]
    Unsupported(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a remote error from the string carried by a response
    pub fn remote(msg: impl Into<String>) -> Self {
        Error::Remote(msg.into())
    }

    /// Returns true if retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::TransportClosed | Error::ManifestFetch(_)
        )
    }

    /// Returns the error code for logs and diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::UnknownAction(_) => "UNKNOWN_ACTION",
            Error::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Error::Timeout => "TIMEOUT",
            Error::Remote(_) => "REMOTE",
            Error::Decode(_) => "DECODE",
            Error::EndpointNotFound(_) => "ENDPOINT_NOT_FOUND",
            Error::TransportClosed => "TRANSPORT_CLOSED",
            Error::ManifestFetch(_) => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::Unsupported(_) => "UNSUPPORTED",
            Error::Internal(_) => "INTERNAL",
        }
    }
}
