//! Unified error handling for the weread-pacer crate
//!
//! Every domain module keeps its own error enum (`TransportError`,
//! `CredentialsError`, `RangeError`, ...) and the crate-level [`Error`]
//! wraps them so callers crossing module boundaries deal with one type.
//!
//! # Architecture
//!
//! - [`PacerErrorTrait`] - Common interface implemented by the error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use weread_pacer::error::{Error, PacerErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "retrying: {err}");
//!     } else {
//!         tracing::error!("fatal: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::client::credentials::CredentialsError;
pub use crate::client::transport::TransportError;
pub use crate::config::range::RangeError;

/// Common trait for all weread-pacer error types
pub trait PacerErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the surrounding loop may go on)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport failures (timeouts, connection resets, 5xx)
    Network,
    /// Session key expired or rejected
    Auth,
    /// No usable book or chapter
    Catalog,
    /// Configuration and captured-session validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in log fields and notifications
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Catalog => "catalog",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the weread-pacer crate
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure that survived the bounded retry loop
    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    /// The session key could not be renewed
    #[error("Session expired: cookie renewal did not return a new session key")]
    AuthExpired,

    /// No book or chapter is available to report
    #[error("No usable book or chapter to start reading from")]
    CatalogExhausted,

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed range value in the configuration
    #[error("Config error: {0}")]
    Range(#[from] RangeError),

    /// Captured session (curl command) problems
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PacerErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_recoverable(),
            Self::AuthExpired => false,
            Self::CatalogExhausted => false,
            Self::Config(_) | Self::Range(_) | Self::Credentials(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Toml(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::Network,
            Self::AuthExpired => ErrorCategory::Auth,
            Self::CatalogExhausted => ErrorCategory::Catalog,
            Self::Config(_) | Self::Range(_) | Self::Credentials(_) | Self::Toml(_) => {
                ErrorCategory::Config
            }
            Self::Io(_) | Self::Json(_) => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type alias using the unified Error
pub type Result<T> = std::result::Result<T, Error>;
