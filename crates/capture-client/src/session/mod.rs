//! Stream and attendance sessions.
//!
//! - [`control`] - REST collaborator trait, HTTP implementation and mock
//! - [`controller`] - Orchestration of REST calls and relay channels

pub mod control;
pub mod controller;

pub use control::{AttendanceStartRequest, HttpStreamControl, StreamControl, StreamStartRequest};
pub use controller::{SessionChannels, SessionController};
