//! Recognition event types.

use chrono::{DateTime, Utc};
use common::types::SubjectId;
use serde::{Deserialize, Serialize};

/// Biometric modality that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Facial match
    #[default]
    Face,
    /// Body shape match
    Body,
    /// Eye region match
    Periocular,
    /// Multi-modal fusion
    Fused,
    /// Walking pattern match
    Gait,
}

impl Modality {
    /// Parse a wire modality tag, case-insensitively.
    ///
    /// Returns `None` for tags outside the closed set.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "face" => Some(Self::Face),
            "body" => Some(Self::Body),
            "periocular" => Some(Self::Periocular),
            "fused" => Some(Self::Fused),
            "gait" => Some(Self::Gait),
            _ => None,
        }
    }

    /// Wire tag
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Body => "body",
            Self::Periocular => "periocular",
            Self::Fused => "fused",
            Self::Gait => "gait",
        }
    }

    /// Human-readable label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Face => "Facial",
            Self::Body => "Body Shape",
            Self::Periocular => "Eye Region",
            Self::Fused => "Multi-modal",
            Self::Gait => "Walking Pattern",
        }
    }
}

/// Bounding box of a detection, `[x, y, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Box covering the whole frame, used when the server sends none.
    pub const FULL_FRAME: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 100.0,
        height: 100.0,
    };

    /// Build from the wire array form. Returns `None` unless exactly four
    /// finite numbers are given.
    #[must_use]
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [x, y, width, height] if values.iter().all(|v| v.is_finite()) => Some(Self {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            }),
            _ => None,
        }
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::FULL_FRAME
    }
}

/// One recognition result decoded from the event feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionEvent {
    /// Subject identity, generated when the server sent none
    pub subject_id: SubjectId,
    /// Display name (`Unknown Student` when absent)
    pub display_name: String,
    /// Match confidence normalized to `0.0..=1.0`; 0 means absent
    pub confidence: f64,
    /// Modality that produced the match
    pub modality: Modality,
    /// When the subject was seen; `None` if absent or unparseable
    pub timestamp: Option<DateTime<Utc>>,
    /// Timestamp exactly as sent, for display
    pub raw_timestamp: Option<String>,
    /// Location of the detection in the frame
    pub bbox: BoundingBox,
    /// Whether the subject matched an enrolled identity
    pub matched: bool,
    /// Whether the subject is a registered guest
    pub is_guest: bool,
    /// Registration number
    pub reg_no: Option<String>,
    /// Department
    pub department: Option<String>,
    /// Semester
    pub semester: Option<String>,
    /// Section
    pub section: Option<String>,
}

impl RecognitionEvent {
    /// Display name used when the server sends none.
    pub const UNKNOWN_NAME: &'static str = "Unknown Student";

    /// Minimal event for a subject; remaining fields take their defaults.
    #[must_use]
    pub fn new(subject_id: SubjectId, display_name: impl Into<String>) -> Self {
        Self {
            subject_id,
            display_name: display_name.into(),
            confidence: 0.0,
            modality: Modality::default(),
            timestamp: None,
            raw_timestamp: None,
            bbox: BoundingBox::default(),
            matched: false,
            is_guest: false,
            reg_no: None,
            department: None,
            semester: None,
            section: None,
        }
    }

    /// Set the confidence, normalized into `0.0..=1.0`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = normalize_confidence(confidence);
        self
    }

    /// Set the timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Whether the event carries a usable (positive) confidence.
    #[must_use]
    pub fn has_positive_confidence(&self) -> bool {
        self.confidence > 0.0
    }

    /// Confidence as a percentage string, e.g. `92.0%`; `0%` when absent.
    #[must_use]
    pub fn confidence_percent(&self) -> String {
        if self.has_positive_confidence() {
            format!("{:.1}%", self.confidence * 100.0)
        } else {
            "0%".to_string()
        }
    }

    /// Department, semester and section joined for display, e.g. `CSE 5A`.
    #[must_use]
    pub fn cohort_label(&self) -> String {
        let department = self.department.as_deref().unwrap_or_default();
        let semester = self.semester.as_deref().unwrap_or_default();
        let section = self.section.as_deref().unwrap_or_default();
        format!("{department} {semester}{section}").trim().to_string()
    }
}

/// Clamp a wire confidence into `0.0..=1.0`.
///
/// Values in `(1, 100]` are read as percentages. Non-finite and negative
/// values count as absent (0).
#[must_use]
pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        0.0
    } else if raw <= 1.0 {
        raw
    } else if raw <= 100.0 {
        raw / 100.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_parse_closed_set() {
        assert_eq!(Modality::parse("FACE"), Some(Modality::Face));
        assert_eq!(Modality::parse(" periocular "), Some(Modality::Periocular));
        assert_eq!(Modality::parse("gait"), Some(Modality::Gait));
        assert_eq!(Modality::parse("voice"), None);
        assert_eq!(Modality::default(), Modality::Face);
    }

    #[test]
    fn test_modality_labels() {
        assert_eq!(Modality::Face.label(), "Facial");
        assert_eq!(Modality::Body.label(), "Body Shape");
        assert_eq!(Modality::Periocular.label(), "Eye Region");
        assert_eq!(Modality::Fused.label(), "Multi-modal");
        assert_eq!(Modality::Gait.label(), "Walking Pattern");
    }

    #[test]
    fn test_bbox_from_slice() {
        assert_eq!(
            BoundingBox::from_slice(&[1.0, 2.0, 3.0, 4.0]),
            Some(BoundingBox {
                x: 1.0,
                y: 2.0,
                width: 3.0,
                height: 4.0
            })
        );
        assert_eq!(BoundingBox::from_slice(&[1.0, 2.0, 3.0]), None);
        assert_eq!(BoundingBox::from_slice(&[1.0, f64::NAN, 3.0, 4.0]), None);
        assert_eq!(BoundingBox::default(), BoundingBox::FULL_FRAME);
    }

    #[test]
    fn test_normalize_confidence() {
        assert!((normalize_confidence(0.92) - 0.92).abs() < f64::EPSILON);
        assert!((normalize_confidence(87.5) - 0.875).abs() < f64::EPSILON);
        assert!(normalize_confidence(-0.3).abs() < f64::EPSILON);
        assert!(normalize_confidence(f64::NAN).abs() < f64::EPSILON);
        assert!((normalize_confidence(250.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_percent() {
        let event = RecognitionEvent::new(SubjectId::known("S1"), "Asha").with_confidence(0.923);
        assert_eq!(event.confidence_percent(), "92.3%");

        let absent = RecognitionEvent::new(SubjectId::known("S1"), "Asha");
        assert_eq!(absent.confidence_percent(), "0%");
        assert!(!absent.has_positive_confidence());
    }

    #[test]
    fn test_cohort_label() {
        let mut event = RecognitionEvent::new(SubjectId::known("S1"), "Asha");
        assert_eq!(event.cohort_label(), "");

        event.department = Some("CSE".to_string());
        event.semester = Some("5".to_string());
        event.section = Some("A".to_string());
        assert_eq!(event.cohort_label(), "CSE 5A");
    }
}
