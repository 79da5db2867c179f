//! TOUCHLINE Ingest
//!
//! Consumer side of the pipeline: folds each incoming envelope into the
//! latest-known-state record of its fixture.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod durable;
pub mod reducer;
pub mod store;

pub use durable::RedbStore;
pub use reducer::{
    ReduceError, StateReducer, StoredState, fields, fixture_fields, fixture_key, match_state_fields,
};
pub use store::{FieldMap, FieldValue, MemoryStore, StateStore, StoreError};
