//! TOUCHLINE Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Envelopes keep the exact JSON shape of the upstream sports feed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod envelope;
pub mod error;
pub mod time;

// Re-exports
pub use capture::{CaptureLine, MAX_LINE_BYTES, decode_line, is_sentinel, unquote};
pub use envelope::{
    Competitor, EventEnvelope, FixtureSnapshot, GameTime, Header, MatchStateUpdate, Payload,
    PayloadKind, Period, Role, Score,
};
pub use error::{DecodeError, DecodeResult};
