//! TOUCHLINE Replay
//!
//! Producer side of the pipeline: parses a capture file into a
//! timestamp-ordered record sequence and re-emits it against the ingestion
//! boundary at a fixed cadence.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod parser;
pub mod scheduler;
pub mod transport;

pub use parser::{CaptureParser, MAX_LINE_BYTES, ParseError, ParsedRecord, parse_file};
pub use scheduler::{
    ReplayConfig, ReplayError, ReplayOutcome, ReplayPhase, ReplayScheduler, ReplaySummary,
};
pub use transport::{EventSink, HttpSink, HttpSinkConfig, TransportError};
