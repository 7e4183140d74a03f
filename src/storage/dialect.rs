//! SQL text generation contract.
//!
//! A dialect turns storage requests into statement text. It holds no state
//! and never talks to the database itself; the [`Backend`](super::Backend)
//! executes whatever it produces.

use super::types::{Sample, SeriesIndex, StorageType};

/// Maximum number of rows in one generated INSERT statement.
pub const INSERT_CHUNK_ROWS: usize = 500;

/// Parameters of a history fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    /// Window start (inclusive). `None` fetches everything up to `end`.
    pub start: Option<i64>,
    /// Window end (inclusive).
    pub end: i64,
    /// Limit on in-window rows.
    pub count: Option<usize>,
    /// With `count`, keep the newest rows instead of the oldest.
    pub return_newest_entries: bool,
    /// Add the nearest row before `start` and after `end`.
    pub border_rows: bool,
}

/// Statement templates for one SQL vendor.
pub trait Dialect: Send + Sync + 'static {
    /// Vendor name for logs.
    fn name(&self) -> &'static str;

    /// Whether pooled connections may run statements concurrently.
    fn supports_concurrency(&self) -> bool;

    /// Schema creation statements.
    fn init(&self, database: &str) -> Vec<String>;

    /// Returns at most one row `{id, type}` for `name`.
    fn lookup_series(&self, database: &str, name: &str) -> String;

    /// Registers `name` with `storage_type` if it is not registered yet.
    fn create_series(&self, database: &str, name: &str, storage_type: StorageType) -> String;

    /// Batched multi-row inserts, each with at most [`INSERT_CHUNK_ROWS`] rows.
    fn insert(&self, database: &str, index: SeriesIndex, samples: &[Sample]) -> Vec<String>;

    /// Returns rows `{ts, val, ack, q, _from}` ordered by `ts`.
    fn range_query(&self, database: &str, index: SeriesIndex, query: &RangeQuery) -> String;

    /// Deletes rows older than `cutoff` (epoch ms).
    fn retention_delete(&self, database: &str, index: SeriesIndex, cutoff: i64) -> String;
}
