//! Ingestion Regulator
//!
//! Decides, per series, which incoming samples are written: debounce,
//! block time, value filters, change detection, relog heartbeats, counter
//! resets and null gap markers.
//!
//! # Components
//!
//! - [`SeriesState`]: mutable per-series regulator state
//! - [`regulate`] / [`debounce_elapsed`] / [`relog_due`] / [`finish`]: decision functions
//! - [`Verdict`] / [`Effect`]: decisions expressed as ordered side effects
//! - [`IngestOutcome`]: what the caller is told

mod error;
mod regulator;
mod state;

pub use error::IngestError;
pub use regulator::{
    NULL_MARKER_OFFSET_MS, debounce_elapsed, finish, regulate, relog_due, start_marker,
};
pub use state::{DropReason, Effect, IngestOutcome, SeriesState, Verdict};
