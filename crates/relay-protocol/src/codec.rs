//! Decoder for event feed messages.
//!
//! Every text message on the live-events channel is a JSON object with a
//! `type` tag. Two tags carry recognition results:
//!
//! - `recognition` with a single `student` object
//! - `recognition_event` with a `detections` array
//!
//! Any other tag decodes to [`EventMessage::Ignored`]. Payloads that are not
//! JSON objects, lack a `type`, or lack the body their tag requires are
//! reported as [`CodecError`] so the caller can log and drop them.

use crate::event::{normalize_confidence, BoundingBox, Modality, RecognitionEvent};
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Utc};
use common::types::SubjectId;
use serde::Deserialize;
use tracing::debug;

/// Tag of a single-subject recognition message.
pub const RECOGNITION_TYPE: &str = "recognition";

/// Tag of a batched recognition message.
pub const RECOGNITION_BATCH_TYPE: &str = "recognition_event";

/// Error type for event decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Payload is not valid JSON of the expected shape
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// Envelope has no `type` tag
    #[error("Missing message type")]
    MissingType,

    /// A recognized message lacks its body
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// A decoded event feed message.
#[derive(Debug, Clone, PartialEq)]
pub enum EventMessage {
    /// One or more recognition results, in wire order
    Recognition(Vec<RecognitionEvent>),
    /// A well-formed message with a type this client does not handle
    Ignored {
        /// The unrecognized `type` tag
        kind: String,
    },
}

impl EventMessage {
    /// Recognition events carried by this message (empty when ignored)
    #[must_use]
    pub fn events(&self) -> &[RecognitionEvent] {
        match self {
            Self::Recognition(events) => events,
            Self::Ignored { .. } => &[],
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    student: Option<StudentPayload>,
    detections: Option<Vec<StudentPayload>>,
}

/// String or number on the wire (ids, semesters and times come as either).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_text(self) -> Option<String> {
        let text = match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Number(number) => number.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StudentPayload {
    student_id: Option<Scalar>,
    student_name: Option<String>,
    match_confidence: Option<f64>,
    match_modality: Option<String>,
    frame_time: Option<Scalar>,
    timestamp: Option<Scalar>,
    bbox: Option<Vec<f64>>,
    is_guest: Option<bool>,
    matched: Option<bool>,
    department: Option<String>,
    semester: Option<Scalar>,
    section: Option<String>,
    reg_no: Option<Scalar>,
    name: Option<String>,
    confidence: Option<f64>,
}

/// Decode one event feed message, resolving time-of-day stamps against the
/// local clock.
///
/// # Errors
///
/// Returns a `CodecError` for malformed payloads.
pub fn decode_event_message(text: &str) -> Result<EventMessage, CodecError> {
    decode_event_message_at(text, Local::now())
}

/// Decode one event feed message with an explicit reference time for
/// time-of-day stamps.
///
/// # Errors
///
/// Returns a `CodecError` for malformed payloads.
pub fn decode_event_message_at(
    text: &str,
    reference: DateTime<Local>,
) -> Result<EventMessage, CodecError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| CodecError::InvalidJson(e.to_string()))?;

    let kind = envelope.kind.ok_or(CodecError::MissingType)?;

    match kind.as_str() {
        RECOGNITION_TYPE => {
            let student = envelope.student.ok_or(CodecError::MissingField("student"))?;
            Ok(EventMessage::Recognition(vec![into_event(
                student, reference,
            )]))
        }
        RECOGNITION_BATCH_TYPE => {
            let detections = envelope
                .detections
                .ok_or(CodecError::MissingField("detections"))?;
            Ok(EventMessage::Recognition(
                detections
                    .into_iter()
                    .map(|student| into_event(student, reference))
                    .collect(),
            ))
        }
        _ => Ok(EventMessage::Ignored { kind }),
    }
}

fn into_event(student: StudentPayload, reference: DateTime<Local>) -> RecognitionEvent {
    let student_id = student.student_id.and_then(Scalar::into_text);
    let reg_no = student.reg_no.and_then(Scalar::into_text);

    let subject_id = match student_id.clone().or_else(|| reg_no.clone()) {
        Some(id) => SubjectId::known(id),
        None => SubjectId::generated(),
    };

    let display_name = student
        .student_name
        .or(student.name)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| RecognitionEvent::UNKNOWN_NAME.to_string());

    let confidence = student
        .match_confidence
        .or(student.confidence)
        .map_or(0.0, normalize_confidence);

    let modality = match student.match_modality.as_deref() {
        Some(raw) => Modality::parse(raw).unwrap_or_else(|| {
            debug!(target: "relay.codec", modality = %raw, "Unknown modality, using face");
            Modality::Face
        }),
        None => Modality::Face,
    };

    let raw_time = student.timestamp.or(student.frame_time);
    let timestamp = raw_time.as_ref().and_then(|t| parse_timestamp(t, reference));
    let raw_timestamp = raw_time.and_then(Scalar::into_text);

    let bbox = student
        .bbox
        .as_deref()
        .and_then(BoundingBox::from_slice)
        .unwrap_or_default();

    // Messages that name a subject are only broadcast once the server has
    // matched them, so identity implies a match unless stated otherwise.
    let matched = student.matched.unwrap_or(!subject_id.is_generated());

    RecognitionEvent {
        subject_id,
        display_name,
        confidence,
        modality,
        timestamp,
        raw_timestamp,
        bbox,
        matched,
        is_guest: student.is_guest.unwrap_or(false),
        reg_no,
        department: student.department.filter(|d| !d.trim().is_empty()),
        semester: student.semester.and_then(Scalar::into_text),
        section: student.section.filter(|s| !s.trim().is_empty()),
    }
}

fn parse_timestamp(raw: &Scalar, reference: DateTime<Local>) -> Option<DateTime<Utc>> {
    match raw {
        Scalar::Number(number) => {
            let value = number.as_f64()?;
            // Millisecond epochs are 13 digits; second epochs are 10.
            let seconds = if value > 1e12 { value / 1000.0 } else { value };
            #[allow(clippy::cast_possible_truncation)]
            let millis = (seconds * 1000.0) as i64;
            DateTime::from_timestamp_millis(millis)
        }
        Scalar::Text(text) => parse_text_timestamp(text.trim(), reference),
    }
}

fn parse_text_timestamp(text: &str, reference: DateTime<Local>) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }

    // The attendance worker stamps broadcasts with a local time-of-day only.
    for format in ["%H:%M:%S%.f", "%H:%M:%S"] {
        if let Ok(time) = NaiveTime::parse_from_str(text, format) {
            return reference
                .date_naive()
                .and_time(time)
                .and_local_timezone(Local)
                .earliest()
                .map(|local| local.with_timezone(&Utc));
        }
    }

    None
}
