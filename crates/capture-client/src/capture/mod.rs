//! Staged multi-angle image capture.
//!
//! - [`validation`] - MIME type and size checks for candidate files
//! - [`slots`] - The five named capture slots and their owned previews

pub mod slots;
pub mod validation;

pub use slots::{CaptureSlotStore, CaptureSnapshot, SlotChange, SlotName, SlotView};
pub use validation::{FileDescriptor, ValidationError, ValidationPolicy};
