//! Capture Relay Client Library
//!
//! Client-side core for an enrollment and live-attendance station:
//!
//! - Staged five-angle image capture with validation and owned previews
//! - Persistent WebSocket relays for stream frames and recognition events,
//!   with fixed-backoff reconnection
//! - Frame presentation with acknowledged handoff between frames
//! - A bounded recognition feed grouped by subject
//! - Session orchestration against the stream/attendance REST API
//!
//! # Architecture
//!
//! ```text
//! SessionController
//! ├── StreamControl (REST: /stream/*, /attendance/*)
//! ├── RelayConnection (frames)  ──> FramePresenter
//! └── RelayConnection (events)  ──> RecognitionFeed
//!
//! CaptureSlotStore ── ValidationPolicy
//!        └── OwnedResource previews (ResourceBackend)
//! ```
//!
//! Every connection runs in its own task and reports through an ordered
//! channel; consumers never share mutable state with the I/O tasks.
//!
//! # Modules
//!
//! - [`capture`] - Slot store and file validation
//! - [`relay`] - Connection state machine and WebSocket task
//! - [`presenter`] - Frame presentation handoff
//! - [`feed`] - Recognition feed and grouping
//! - [`session`] - REST collaborator and session orchestration
//! - [`resource`] - Owned preview/frame resources
//! - [`config`] - Client configuration from environment
//! - [`errors`] - Error types

#![warn(clippy::pedantic)]

pub mod capture;
pub mod config;
pub mod errors;
pub mod feed;
pub mod presenter;
pub mod relay;
pub mod resource;
pub mod session;
