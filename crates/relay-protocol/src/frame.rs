//! Relay frame types.

use bytes::Bytes;

/// Encoding of a relay frame payload, detected from its magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// JPEG (`FF D8 FF`)
    Jpeg,
    /// PNG (`89 50 4E 47 0D 0A 1A 0A`)
    Png,
    /// Anything else; presented as an opaque blob
    Unknown,
}

impl FrameFormat {
    const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];
    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    /// Detect the format of a payload
    #[must_use]
    pub fn detect(payload: &[u8]) -> Self {
        if payload.starts_with(&Self::JPEG_MAGIC) {
            Self::Jpeg
        } else if payload.starts_with(&Self::PNG_MAGIC) {
            Self::Png
        } else {
            Self::Unknown
        }
    }

    /// MIME type used when the frame is wrapped into a presentable resource.
    ///
    /// Unknown payloads are assumed to be JPEG, which is what the relay
    /// server encodes.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg | Self::Unknown => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// One binary message received on a frame relay channel.
///
/// Each message is a complete encoded image; there is no framing header on
/// the wire. The sequence number is assigned locally, per connection, in
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// Arrival sequence number (starts at 0 for each connection)
    pub sequence: u64,
    /// Encoded image bytes
    pub payload: Bytes,
}

impl RelayFrame {
    /// Create a frame
    #[must_use]
    pub const fn new(sequence: u64, payload: Bytes) -> Self {
        Self { sequence, payload }
    }

    /// Detected payload format
    #[must_use]
    pub fn format(&self) -> FrameFormat {
        FrameFormat::detect(&self.payload)
    }

    /// Payload size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
