//! Database backends.
//!
//! Currently supports SQLite. Another vendor plugs in by providing a
//! [`Dialect`](crate::storage::Dialect) and a pool [`Manager`](crate::pool::Manager)
//! whose resource implements [`QueryConnection`](crate::storage::QueryConnection).
//!
//! # Example
//!
//! ```ignore
//! let backend = sqlite::open(&config.database, &config.pool)?;
//! backend.init().await?;
//! ```

pub mod sqlite;

pub use sqlite::{SqliteDialect, SqliteManager};
