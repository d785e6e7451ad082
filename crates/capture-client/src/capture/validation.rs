//! Candidate file validation.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Default maximum file size (5 MiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Default accepted MIME types.
pub const DEFAULT_ALLOWED_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/jpg"];

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Why a file was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Declared MIME type is not in the allowed set.
    #[error("Invalid file type: {declared}. Allowed: JPEG, PNG")]
    InvalidType { declared: String },

    /// File exceeds the size limit.
    #[error("File too large: {}MB. Max: {}MB", size_mb(.actual), limit_mb(.max))]
    TooLarge { actual: u64, max: u64 },
}

#[allow(clippy::cast_precision_loss)]
fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MEGABYTE
}

fn size_mb(bytes: &u64) -> String {
    format!("{:.2}", megabytes(*bytes))
}

/// Whole limits print without decimals (`5`), others as-is (`2.5`).
fn limit_mb(bytes: &u64) -> String {
    let mb = megabytes(*bytes);
    if mb.fract().abs() < f64::EPSILON {
        format!("{mb:.0}")
    } else {
        format!("{mb}")
    }
}

/// A file offered for a capture slot.
#[derive(Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// File name as selected
    pub name: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
    /// File contents
    pub data: Bytes,
}

impl FileDescriptor {
    /// Describe a file; the size is taken from the contents.
    #[must_use]
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
            data,
        }
    }
}

impl fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Accept/reject rules for candidate files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    allowed_types: Vec<String>,
    max_size_bytes: u64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            allowed_types: DEFAULT_ALLOWED_TYPES.iter().map(ToString::to_string).collect(),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

impl ValidationPolicy {
    /// Create a policy with custom limits.
    #[must_use]
    pub fn new<I, S>(allowed_types: I, max_size_bytes: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_types: allowed_types.into_iter().map(Into::into).collect(),
            max_size_bytes,
        }
    }

    /// Maximum accepted size in bytes
    #[must_use]
    pub const fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Check a file. Type is checked before size.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidType` for a disallowed MIME type and
    /// `ValidationError::TooLarge` when the file exceeds the size limit.
    pub fn validate(&self, file: &FileDescriptor) -> Result<(), ValidationError> {
        if !self.allowed_types.iter().any(|t| *t == file.mime_type) {
            return Err(ValidationError::InvalidType {
                declared: file.mime_type.clone(),
            });
        }

        if file.size > self.max_size_bytes {
            return Err(ValidationError::TooLarge {
                actual: file.size,
                max: self.max_size_bytes,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn file(mime: &str, size: usize) -> FileDescriptor {
        FileDescriptor::new("photo", mime, Bytes::from(vec![0u8; size]))
    }

    #[test]
    fn test_gif_is_invalid_type() {
        let policy = ValidationPolicy::default();
        let err = policy.validate(&file("image/gif", 10));

        assert_eq!(
            err,
            Err(ValidationError::InvalidType {
                declared: "image/gif".to_string()
            })
        );
        assert_eq!(
            err.map_err(|e| e.to_string()),
            Err("Invalid file type: image/gif. Allowed: JPEG, PNG".to_string())
        );
    }

    #[test]
    fn test_oversized_png_is_too_large() {
        let policy = ValidationPolicy::default();
        let err = policy.validate(&file("image/png", 6_291_456));

        assert_eq!(
            err,
            Err(ValidationError::TooLarge {
                actual: 6_291_456,
                max: 5_242_880
            })
        );
        assert_eq!(
            err.map_err(|e| e.to_string()),
            Err("File too large: 6.00MB. Max: 5MB".to_string())
        );
    }

    #[test]
    fn test_type_checked_before_size() {
        let policy = ValidationPolicy::default();
        let err = policy.validate(&file("image/gif", 6_291_456));
        assert!(matches!(err, Err(ValidationError::InvalidType { .. })));
    }

    #[test]
    fn test_accepts_allowed_types_at_limit() {
        let policy = ValidationPolicy::default();
        assert_eq!(policy.validate(&file("image/jpeg", 5_242_880)), Ok(()));
        assert_eq!(policy.validate(&file("image/jpg", 1)), Ok(()));
        assert_eq!(policy.validate(&file("image/png", 0)), Ok(()));
    }

    #[test]
    fn test_custom_policy() {
        let policy = ValidationPolicy::new(["image/webp"], 2_621_440);
        assert!(policy.validate(&file("image/webp", 100)).is_ok());
        assert!(policy.validate(&file("image/png", 100)).is_err());

        let err = policy.validate(&file("image/webp", 3_000_000)).unwrap_err();
        assert_eq!(err.to_string(), "File too large: 2.86MB. Max: 2.5MB");
    }
}
