//! TOUCHLINE Server
//!
//! HTTP ingestion boundary: accepts heartbeats and envelopes, and applies
//! each envelope to the latest-state store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod handler;

pub use api::{
    ApiServer, AppState, MAX_BODY_BYTES, ServerConfig, ServerError, router, shutdown_signal,
};
pub use handler::HandlerError;
