//! Error types for the firewall sync system
//!
//! This module defines all error types used throughout the crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the firewall sync system
#[derive(Error, Debug)]
pub enum Error {
    /// Registry (ROR) client errors
    #[error("Registry error: {0}")]
    Registry(String),

    /// Firewall client errors
    #[error("Firewall error: {0}")]
    Firewall(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An outbound call exceeded its deadline
    #[error("Timed out after {after:?}: {operation}")]
    Timeout {
        /// The operation that was cut off
        operation: String,
        /// The deadline that was exceeded
        after: Duration,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Client-specific error
    #[error("Client error ({client}): {message}")]
    Client {
        /// Client name
        client: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a registry error
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a firewall error
    pub fn firewall(msg: impl Into<String>) -> Self {
        Self::Firewall(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a client-specific error
    pub fn client(client: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Client {
            client: client.into(),
            message: message.into(),
        }
    }

    /// Whether the next scheduled cycle is likely to succeed without intervention
    ///
    /// Only used to pick wording in logs; the core never retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Http(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
