//! Historian - time-series write/query core
//!
//! Accepts a stream of timestamped samples per series, decides which of them
//! are persisted, buffers them for batched inserts through a pooled backend,
//! and answers range queries by merging unflushed samples with stored rows
//! and reducing them through an aggregation mode.
//!
//! # Architecture
//!
//! - **Ingest**: per-series regulator (debounce, block time, change detection, relog)
//! - **Storage**: write buffer, dialect contract and the SQLite backend
//! - **Pool**: generic resource pool with admission guard and serial queue
//! - **Aggregate**: bucketing, statistics, integrals and result shaping
//! - **Query**: merge of buffered and persisted samples
//! - **Engine**: actor owning every series behind the [`Historian`] facade
//!
//! # Example
//!
//! ```rust,no_run
//! use historian::{AggregationRequest, Historian, IncomingSample, SeriesConfig};
//! use historian::config::AppConfig;
//!
//! # async fn run() -> Result<(), historian::HistorianError> {
//! let historian = Historian::start(&AppConfig::default()).await?;
//! historian.enable("boiler.temp", SeriesConfig::default()).await?;
//!
//! let sample: IncomingSample = serde_json::from_str(r#"{"val": 21.5}"#).unwrap();
//! historian.ingest("boiler.temp", sample).await?;
//!
//! let points = historian
//!     .query("boiler.temp", &AggregationRequest::default())
//!     .await?;
//! println!("{} points", points.len());
//!
//! historian.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod container;
pub mod engine;
pub mod ingest;
pub mod pool;
pub mod query;
pub mod server;
pub mod storage;

pub use aggregate::{AggregateMode, AggregationRequest, HistoryPoint};
pub use config::{AppConfig, SeriesConfig};
pub use engine::{Historian, HistorianBuilder, HistorianError};
pub use ingest::IngestOutcome;
pub use storage::{IncomingSample, Sample, Value};
