//! Capture file parser.
//!
//! Produces the replay input: every decodable, complete envelope in the file,
//! ordered by original timestamp. Records sharing a timestamp keep file order.

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
pub use touchline_core::MAX_LINE_BYTES;
use touchline_core::{CaptureLine, EventEnvelope, PayloadKind, decode_line};
use tracing::Span;

/// Parser errors. Any of these aborts the whole parse.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Capture file could not be opened
    #[error("failed to open {path}: {source}")]
    Open {
        /// Path that was opened
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Read failed part way through the file
    #[error("error reading line {line_number}: {source}")]
    Read {
        /// Line being read
        line_number: usize,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Line exceeded the length limit
    #[error("line {line_number} exceeds {limit} bytes")]
    LineTooLong {
        /// Offending line
        line_number: usize,
        /// Configured limit
        limit: usize,
    },
}

/// A complete envelope ready for replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    /// 1-based source line
    pub line_number: usize,
    /// Decoded envelope
    pub envelope: EventEnvelope,
    /// Header timestamp at capture time, used for ordering
    pub original_timestamp: DateTime<Utc>,
}

impl ParsedRecord {
    /// Build a record from a decoded envelope.
    ///
    /// Returns `None` when the envelope has no payload, an empty guid, or a
    /// zero timestamp.
    #[must_use]
    pub fn admit(line_number: usize, envelope: EventEnvelope) -> Option<Self> {
        envelope.payload.as_ref()?;
        if envelope.header.message_guid.is_empty() {
            return None;
        }
        let original_timestamp = envelope.timestamp()?;
        Some(Self {
            line_number,
            envelope,
            original_timestamp,
        })
    }

    /// Message guid
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.envelope.header.message_guid
    }

    /// Payload kind
    #[must_use]
    pub fn kind(&self) -> Option<PayloadKind> {
        self.envelope.kind()
    }
}

/// Capture parser
pub struct CaptureParser {
    span: Span,
    max_line_bytes: usize,
}

impl CaptureParser {
    /// Create a parser with the default line limit
    #[must_use]
    pub fn new() -> Self {
        Self {
            span: tracing::info_span!("capture_parser"),
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Emit log events under the given span
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Override the line length limit
    #[must_use]
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Parse a capture file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or read
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Vec<ParsedRecord>, ParseError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_reader(BufReader::new(file))
    }

    /// Parse capture lines from any buffered reader
    ///
    /// # Errors
    ///
    /// Returns error if reading fails or a line is too long
    pub fn parse_reader<R: BufRead>(&self, mut reader: R) -> Result<Vec<ParsedRecord>, ParseError> {
        let limit = self.max_line_bytes as u64 + 1;
        let mut records = Vec::new();
        let mut buf = Vec::new();
        let mut line_number = 0usize;
        let mut undecodable = 0usize;
        let mut incomplete = 0usize;

        loop {
            buf.clear();
            let read = (&mut reader)
                .take(limit)
                .read_until(b'\n', &mut buf)
                .map_err(|source| ParseError::Read {
                    line_number: line_number + 1,
                    source,
                })?;
            if read == 0 {
                break;
            }
            line_number += 1;

            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            } else if read as u64 == limit {
                return Err(ParseError::LineTooLong {
                    line_number,
                    limit: self.max_line_bytes,
                });
            }

            let Ok(line) = std::str::from_utf8(&buf) else {
                undecodable += 1;
                tracing::warn!(parent: &self.span, line_number, "capture line is not valid UTF-8");
                continue;
            };

            let data = match CaptureLine::classify(line_number, line) {
                CaptureLine::Sentinel | CaptureLine::Blank => continue,
                CaptureLine::Data(data) => data,
            };

            match decode_line(data) {
                Ok(envelope) => match ParsedRecord::admit(line_number, envelope) {
                    Some(record) => records.push(record),
                    None => incomplete += 1,
                },
                Err(err) => {
                    undecodable += 1;
                    tracing::warn!(
                        parent: &self.span,
                        line_number,
                        error = %err,
                        "failed to parse line as JSON"
                    );
                }
            }
        }

        // sort_by_key is stable
        records.sort_by_key(|r| r.original_timestamp);

        tracing::info!(
            parent: &self.span,
            message_count = records.len(),
            undecodable,
            incomplete,
            "successfully parsed messages"
        );
        Ok(records)
    }
}

impl Default for CaptureParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a capture file with default settings
///
/// # Errors
///
/// Returns error if the file cannot be opened or read
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<ParsedRecord>, ParseError> {
    CaptureParser::new().parse_file(path)
}
