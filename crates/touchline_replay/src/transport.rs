//! Transport client for the ingestion boundary.
//!
//! One attempt per call; failures are reported to the caller, never retried.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use touchline_core::EventEnvelope;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection, timeout or I/O failure
    #[error("request failed: {0}")]
    Request(String),

    /// Remote answered with an unexpected status
    #[error(
        "{operation} returned status {status}: {}",
        body.as_deref().unwrap_or("<unreadable body>")
    )]
    Status {
        /// Call that failed
        operation: &'static str,
        /// HTTP status code
        status: u16,
        /// Response body, if it could be read
        body: Option<String>,
    },

    /// Envelope could not be serialized
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// Client could not be constructed
    #[error("invalid transport configuration: {0}")]
    Configuration(String),
}

/// Delivery target for replayed events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Send a liveness ping
    ///
    /// # Errors
    ///
    /// Returns error if the ping is not acknowledged
    async fn send_heartbeat(&self) -> Result<(), TransportError>;

    /// Deliver one envelope
    ///
    /// # Errors
    ///
    /// Returns error if the envelope is not accepted
    async fn send_message(&self, envelope: EventEnvelope) -> Result<(), TransportError>;
}

/// HTTP sink configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSinkConfig {
    /// Base URL of the ingestion service
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpSinkConfig {
    /// Create a config for the given base URL
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

/// Sink posting to `/heartbeat` and `/process-msg`
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    base_url: String,
}

impl HttpSink {
    /// Create a new HTTP sink
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(config: HttpSinkConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn failure(operation: &'static str, response: reqwest::Response) -> TransportError {
        let status = response.status().as_u16();
        let body = response.text().await.ok();
        TransportError::Status {
            operation,
            status,
            body,
        }
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn send_heartbeat(&self) -> Result<(), TransportError> {
        let url = format!("{}/heartbeat", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(Self::failure("heartbeat", response).await);
        }
        Ok(())
    }

    async fn send_message(&self, mut envelope: EventEnvelope) -> Result<(), TransportError> {
        let url = format!("{}/process-msg", self.base_url);

        // Header carries send time, not capture time.
        envelope.stamp(Utc::now());
        let body =
            serde_json::to_vec(&envelope).map_err(|e| TransportError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(()),
            _ => Err(Self::failure("message processing", response).await),
        }
    }
}
