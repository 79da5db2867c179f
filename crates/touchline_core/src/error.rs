//! Decode error types for TOUCHLINE.

/// Decode result type
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Failure to turn one capture line or request body into an envelope
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Line is not valid UTF-8
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    /// JSON did not match the envelope shape
    #[error("invalid envelope JSON: {message}")]
    Json {
        /// Parser message
        message: String,
    },

    /// Both payload members were present
    #[error("envelope carries both Fixture and AmericanFootballMatchState")]
    AmbiguousPayload,
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}
