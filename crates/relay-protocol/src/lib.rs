//! Wire types for the capture relay channels.
//!
//! The relay server exposes two independent WebSocket channels:
//!
//! - a per-stream binary channel where every message is one complete encoded
//!   image (usually JPEG), see [`frame`]
//! - a live-events channel carrying JSON envelopes tagged with a `type`, see
//!   [`codec`] and [`event`]
//!
//! [`address`] builds the channel URLs from the REST base URL and the access
//! token.

#![warn(clippy::pedantic)]

pub mod address;
pub mod codec;
pub mod event;
pub mod frame;
