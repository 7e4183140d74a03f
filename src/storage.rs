//! Storage Layer
//!
//! Persistence of series samples through a pooled backend:
//! - **Dialect**: statement text for one SQL vendor
//! - **Backend**: executes dialect statements on pooled connections
//! - **WriteBuffer**: per-series live list plus in-flight flush snapshots
//!
//! # Components
//!
//! - [`Backend`]: typed series/sample operations (resolve, insert, history, retention)
//! - [`Dialect`] / [`RangeQuery`]: statement generation contract
//! - [`PooledExecutor`] / [`QueryConnection`]: statement execution through the pool
//! - [`WriteBuffer`] / [`CacheSnapshot`]: buffering ahead of batched inserts
//! - [`db::sqlite`]: reference SQLite backend

mod backend;
mod buffer;
pub mod db;
mod dialect;
mod error;
mod schema;
mod types;

pub use backend::{Backend, Executor, PooledExecutor, QueryConnection};
pub use buffer::{CacheSnapshot, WriteBuffer};
pub use dialect::{Dialect, INSERT_CHUNK_ROWS, RangeQuery};
pub use error::StorageError;
pub use schema::value_table;
pub use types::{IncomingSample, Row, Sample, SeriesIndex, StorageType, Value, now_ms};
