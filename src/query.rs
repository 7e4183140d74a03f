//! History Query Coordinator
//!
//! Combines the write buffer snapshot of a series with persisted rows,
//! avoiding double counting of batches that are still in flight, and hands
//! the merged sequence to the aggregation engine.

mod coordinator;
mod error;

pub use coordinator::{SeriesView, run};
pub use error::QueryError;
