//! Secret types for protecting the access token from accidental logging.
//!
//! The client never issues or refreshes tokens. It receives an opaque bearer
//! string from outside and forwards it in two places: as the `token` query
//! parameter of both relay channel URLs, and as the `Authorization` header of
//! REST calls. Everywhere in between it travels as an [`AccessToken`].
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds a token logs `[REDACTED]` instead of the value. The
//! value is only reachable through [`ExposeSecret::expose_secret`], which
//! keeps every use site greppable.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{bearer_value, AccessToken, ExposeSecret};
//!
//! let token = AccessToken::from("eyJhbGciOi...");
//! assert_eq!(bearer_value(&token), "Bearer eyJhbGciOi...");
//! assert!(format!("{token:?}").contains("REDACTED"));
//! assert_eq!(token.expose_secret(), "eyJhbGciOi...");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Opaque bearer token obtained from the authentication service.
pub type AccessToken = SecretString;

/// Build the `Authorization` header value for a token.
#[must_use]
pub fn bearer_value(token: &AccessToken) -> String {
    format!("Bearer {}", token.expose_secret())
}

/// Whether a token is present (non-blank).
#[must_use]
pub fn is_present(token: &AccessToken) -> bool {
    !token.expose_secret().trim().is_empty()
}
