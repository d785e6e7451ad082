//! Capture client error types.
//!
//! Local failures (validation, configuration) are returned to the caller.
//! Once a relay is open its failures never surface as `Err` from a public
//! call; they become state transitions and are logged with a
//! [`ConnectionError`] as the cause.

use crate::capture::validation::ValidationError;
use common::error::CommonError;
use relay_protocol::address::AddressError;
use thiserror::Error;

/// Capture client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A selected file was rejected.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A channel URL could not be built.
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// A relay channel could not be opened.
    #[error("Relay error: {0}")]
    Connection(#[from] ConnectionError),

    /// The REST collaborator refused or could not be reached.
    #[error(transparent)]
    External(#[from] ExternalRequestFailure),

    /// An identifier (stream name) was malformed.
    #[error("Invalid identifier: {0}")]
    Identifier(#[from] CommonError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a relay channel went down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The channel URL could not be built.
    #[error("Address error: {0}")]
    Address(String),

    /// TCP, TLS or WebSocket upgrade failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Read error on an open channel.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server sent a close frame.
    #[error("Closed by server (code {code}): {reason}")]
    ClosedByServer { code: u16, reason: String },

    /// The stream ended without a close frame.
    #[error("Connection ended")]
    Ended,
}

impl ConnectionError {
    /// Close code the relay server uses for a rejected token.
    pub const UNAUTHORIZED_CLOSE_CODE: u16 = 4401;

    /// Whether the server rejected the access token.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::ClosedByServer { code, .. } if *code == Self::UNAUTHORIZED_CLOSE_CODE
        )
    }
}

/// A REST call to the stream/attendance collaborator failed.
///
/// `reason` is the server's `detail` message when it sent one, otherwise
/// `HTTP <status>`, or the transport error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {reason}")]
pub struct ExternalRequestFailure {
    /// Operation name (e.g. `stream start`)
    pub operation: &'static str,
    /// Human-readable failure reason
    pub reason: String,
}

impl ExternalRequestFailure {
    /// Create a failure for an operation.
    #[must_use]
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}
