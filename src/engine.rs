//! Engine
//!
//! Ties the regulator, write buffer, backend and query coordinator together
//! behind one actor task.
//!
//! # Components
//!
//! - [`HistorianBuilder`]: container check, schema init, actor spawn
//! - [`Historian`]: cloneable facade (enable, ingest, query, flush, shutdown)
//! - engine actor: owns the series registry and all timers
//! - flush jobs: background writes of buffer snapshots with retention

mod actor;
mod builder;
mod error;
mod flush;
mod handle;
#[cfg(test)]
mod testing;

pub use actor::SeriesStatus;
pub use builder::HistorianBuilder;
pub use error::HistorianError;
pub use handle::{ALL_SERIES, Historian};
