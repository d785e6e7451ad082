//! Common identifier types for the capture relay crates.

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a server-side stream (the `{name}` in `/stream/ws/{name}`).
///
/// Always trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamName(String);

impl StreamName {
    /// Create a stream name, rejecting blank input.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::InvalidIdentifier` if the name is empty after trimming.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CommonError::InvalidIdentifier(
                "stream name must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The stream name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamName {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<StreamName> for String {
    fn from(value: StreamName) -> Self {
        value.0
    }
}

/// Identity of a recognized subject (student or guest).
///
/// Events that arrive without any identity get a generated id so they can
/// still be keyed; [`SubjectId::is_generated`] tells the two apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId {
    value: String,
    generated: bool,
}

impl SubjectId {
    /// Prefix used for generated fallback ids.
    pub const GENERATED_PREFIX: &'static str = "unknown-";

    /// Wrap an identity reported by the server.
    #[must_use]
    pub fn known(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            generated: false,
        }
    }

    /// Create a fresh fallback id for an event without identity.
    #[must_use]
    pub fn generated() -> Self {
        Self {
            value: format!("{}{}", Self::GENERATED_PREFIX, Uuid::new_v4()),
            generated: true,
        }
    }

    /// The id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Whether this id was generated locally rather than reported.
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        self.generated
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name_is_trimmed() {
        let name = StreamName::new("  cam-101 ").unwrap();
        assert_eq!(name.as_str(), "cam-101");
        assert_eq!(name.to_string(), "cam-101");
    }

    #[test]
    fn test_stream_name_rejects_blank() {
        assert!(matches!(
            StreamName::new("   "),
            Err(CommonError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_stream_name_deserialize_validates() {
        let ok: StreamName = serde_json::from_str(r#""hall-a""#).unwrap();
        assert_eq!(ok.as_str(), "hall-a");

        let err = serde_json::from_str::<StreamName>(r#""""#);
        assert!(err.is_err());
    }

    #[test]
    fn test_generated_subject_ids_are_unique() {
        let a = SubjectId::generated();
        let b = SubjectId::generated();

        assert_ne!(a, b);
        assert!(a.is_generated());
        assert!(a.as_str().starts_with(SubjectId::GENERATED_PREFIX));
    }

    #[test]
    fn test_known_subject_id() {
        let id = SubjectId::known("S123");
        assert!(!id.is_generated());
        assert_eq!(id.as_str(), "S123");
    }
}
