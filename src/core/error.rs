//! # Error Handling Module
//!
//! All fallible operations in the crate return [`BalancerResult`], backed by
//! the [`BalancerError`] enum defined with `thiserror`. Refresh-loop errors
//! are logged and swallowed by the resolver; construction errors propagate
//! to the caller.

use thiserror::Error;

/// Main result type used throughout the crate.
pub type BalancerResult<T> = Result<T, BalancerError>;

/// Error types for discovery and load balancing operations.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// Configuration-related errors (invalid interval, bad threshold, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Registry errors (query failed, unexpected response shape, etc.)
    #[error("Registry error: {message}")]
    Registry { message: String },

    /// Local system probe errors (CPU sampling, zone lookup)
    #[error("System probe error: {message}")]
    SystemProbe { message: String },

    /// I/O errors (subprocess probes, network plumbing)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors when talking to the registry
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl BalancerError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a registry error with a custom message
    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Create a system probe error with a custom message
    pub fn system_probe<S: Into<String>>(message: S) -> Self {
        Self::SystemProbe {
            message: message.into(),
        }
    }

    /// Check if this error is transient.
    ///
    /// Transient errors resolve themselves on a later refresh tick; the
    /// resolver keeps the last successful view and retries at its normal
    /// cadence.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Registry { .. } => true,
            Self::HttpClient(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Io(_) => true,
            Self::SystemProbe { .. } => true,
            _ => false,
        }
    }
}
