//! Capture-line decoding.
//!
//! Capture files hold one envelope per line, exported as a single quoted CSV
//! column: every line is wrapped in `"` and internal quotes are doubled.
//! Undoing that quoting is kept separate from envelope decoding.

use crate::envelope::EventEnvelope;
use crate::error::DecodeResult;
use std::borrow::Cow;

/// Longest encoded envelope accepted anywhere in the pipeline (10 MiB)
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Header line written by the capture export
pub const SENTINEL: &str = "\"extracted_data\"";

/// Classification of one raw capture line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureLine<'a> {
    /// Export header on the first line
    Sentinel,
    /// Empty line
    Blank,
    /// Line carrying an encoded envelope
    Data(&'a str),
}

impl<'a> CaptureLine<'a> {
    /// Classify a line. `line_number` is 1-based.
    #[must_use]
    pub fn classify(line_number: usize, line: &'a str) -> Self {
        if line.is_empty() {
            Self::Blank
        } else if line_number == 1 && is_sentinel(line) {
            Self::Sentinel
        } else {
            Self::Data(line)
        }
    }
}

/// Whether a line is the export header
#[must_use]
pub fn is_sentinel(line: &str) -> bool {
    line == SENTINEL
}

/// Collapse doubled quotes, then strip one layer of surrounding quotes.
#[must_use]
pub fn unquote(line: &str) -> Cow<'_, str> {
    let collapsed = if line.contains("\"\"") {
        Cow::Owned(line.replace("\"\"", "\""))
    } else {
        Cow::Borrowed(line)
    };

    let wrapped = collapsed.len() >= 2 && collapsed.starts_with('"') && collapsed.ends_with('"');
    if !wrapped {
        return collapsed;
    }
    match collapsed {
        Cow::Borrowed(s) => Cow::Borrowed(&s[1..s.len() - 1]),
        Cow::Owned(s) => Cow::Owned(s[1..s.len() - 1].to_string()),
    }
}

/// Decode one data line into an envelope
///
/// # Errors
///
/// Returns error if the unquoted line is not a valid envelope
pub fn decode_line(line: &str) -> DecodeResult<EventEnvelope> {
    EventEnvelope::from_json(unquote(line).as_bytes())
}
