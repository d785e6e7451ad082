//! Common utilities and types shared across the capture relay crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common identifier types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
