//! Common error types for the capture relay crates.

use thiserror::Error;

/// Errors shared by the identifier and configuration helpers in this crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// An identifier (stream name, subject id) was empty or malformed
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
