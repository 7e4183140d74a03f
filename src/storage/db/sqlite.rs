//! SQLite backend implementation using sqlx.
//!
//! - [`SqliteManager`]: pool lifecycle hooks for raw `SqliteConnection`s
//! - [`SqliteDialect`]: statement templates for the historian schema
//! - [`open`]: build a ready-to-use [`Backend`] from configuration

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, ConnectOptions, Connection, Row as _};

use crate::config::DatabaseConfig;
use crate::pool::{Manager, Pool, PoolConfig};
use crate::storage::backend::{Backend, Executor, PooledExecutor, QueryConnection};
use crate::storage::dialect::{Dialect, INSERT_CHUNK_ROWS, RangeQuery};
use crate::storage::schema::{all_ddl, value_table};
use crate::storage::types::{Row, Sample, SeriesIndex, StorageType, Value};
use crate::storage::StorageError;

/// Time a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Connection management
// =============================================================================

/// Pool lifecycle hooks for SQLite connections.
///
/// Configuration:
/// - WAL journal mode for better concurrency
/// - Normal synchronous mode for performance with durability
/// - Create database if not exists
pub struct SqliteManager {
    options: SqliteConnectOptions,
}

impl std::fmt::Debug for SqliteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteManager").finish_non_exhaustive()
    }
}

impl SqliteManager {
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:data/historian.db`
    pub fn new(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);
        Ok(Self { options })
    }
}

#[async_trait]
impl Manager for SqliteManager {
    type Resource = SqliteConnection;
    type Error = StorageError;

    async fn create(&self) -> Result<SqliteConnection, StorageError> {
        Ok(self.options.connect().await?)
    }

    async fn validate(&self, conn: &mut SqliteConnection) -> bool {
        conn.ping().await.is_ok()
    }
}

#[async_trait]
impl QueryConnection for SqliteConnection {
    async fn execute(&mut self, statement: &str) -> Result<Vec<Row>, StorageError> {
        // generated statements are one-off text; keep them out of the statement cache
        let rows = sqlx::query(statement)
            .persistent(false)
            .fetch_all(&mut *self)
            .await?;
        Ok(rows.iter().map(decode_row).collect())
    }
}

/// Decode a row into column name → JSON value, trying integer, real, then text.
fn decode_row(row: &SqliteRow) -> Row {
    let mut map = HashMap::new();
    for column in row.columns() {
        let i = column.ordinal();
        let val = if let Ok(v) = row.try_get::<i64, _>(i) {
            serde_json::Value::Number(v.into())
        } else if let Ok(v) = row.try_get::<f64, _>(i) {
            serde_json::Number::from_f64(v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)
        } else if let Ok(v) = row.try_get::<String, _>(i) {
            serde_json::Value::String(v)
        } else {
            serde_json::Value::Null
        };
        map.insert(column.name().to_string(), val);
    }
    map
}

/// Build a backend for `config`.
///
/// Without `multi_requests` every statement goes through one serial queue.
/// Requires a running tokio runtime.
pub fn open(database: &DatabaseConfig, pool: &PoolConfig) -> Result<Backend, StorageError> {
    let manager = SqliteManager::new(&database.url)?;
    let pool = Pool::new(manager, pool.clone());

    let executor: Arc<dyn Executor> = if database.multi_requests {
        Arc::new(PooledExecutor::concurrent(pool, database.max_connections))
    } else {
        Arc::new(PooledExecutor::serial(pool, database.request_interval))
    };

    tracing::debug!(
        url = %database.url,
        multi_requests = database.multi_requests,
        max_connections = database.max_connections,
        "SQLite backend configured"
    );
    Ok(Backend::new(executor, Arc::new(SqliteDialect), &database.database))
}

// =============================================================================
// Dialect
// =============================================================================

/// Statement templates for SQLite.
///
/// A SQLite file holds a single schema, so the database name is not used.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn value_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Number(n) if n.is_finite() => n.to_string(),
        Value::Number(_) => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Text(s) => quote(s),
    }
}

fn row_literal(index: SeriesIndex, sample: &Sample) -> String {
    format!(
        "({}, {}, {}, {}, {}, {})",
        index.id,
        sample.ts,
        value_literal(&sample.val),
        if sample.ack.unwrap_or(false) { 1 } else { 0 },
        sample.source.as_deref().map(quote).unwrap_or_else(|| "NULL".to_string()),
        sample.quality.unwrap_or(0),
    )
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_concurrency(&self) -> bool {
        false
    }

    fn init(&self, _database: &str) -> Vec<String> {
        all_ddl().iter().map(|ddl| ddl.trim().to_string()).collect()
    }

    fn lookup_series(&self, _database: &str, name: &str) -> String {
        format!("SELECT id, type FROM datapoints WHERE name = {};", quote(name))
    }

    fn create_series(&self, _database: &str, name: &str, storage_type: StorageType) -> String {
        format!(
            "INSERT OR IGNORE INTO datapoints (name, type) VALUES ({}, {});",
            quote(name),
            storage_type.code()
        )
    }

    fn insert(&self, _database: &str, index: SeriesIndex, samples: &[Sample]) -> Vec<String> {
        let table = value_table(index.storage_type);
        samples
            .chunks(INSERT_CHUNK_ROWS)
            .map(|chunk| {
                let rows: Vec<String> = chunk.iter().map(|s| row_literal(index, s)).collect();
                format!(
                    "INSERT INTO {table} (id, ts, val, ack, _from, q) VALUES {};",
                    rows.join(", ")
                )
            })
            .collect()
    }

    fn range_query(&self, _database: &str, index: SeriesIndex, query: &RangeQuery) -> String {
        let table = value_table(index.storage_type);
        let columns = "ts, val, ack, _from, q";
        let id = index.id;

        let window = match query.start {
            Some(start) => format!("ts >= {start} AND ts <= {}", query.end),
            None => format!("ts <= {}", query.end),
        };
        let limited = match query.count {
            Some(count) => {
                let order = if query.return_newest_entries { "DESC" } else { "ASC" };
                format!(" ORDER BY ts {order} LIMIT {count}")
            }
            None => String::new(),
        };
        let inner = format!("SELECT {columns} FROM {table} WHERE id = {id} AND {window}{limited}");

        let mut parts = Vec::with_capacity(3);
        if let (Some(start), true) = (query.start, query.border_rows) {
            parts.push(format!(
                "SELECT * FROM (SELECT {columns} FROM {table} WHERE id = {id} AND ts < {start} ORDER BY ts DESC LIMIT 1)"
            ));
        }
        parts.push(format!("SELECT * FROM ({inner})"));
        if query.start.is_some() && query.border_rows {
            parts.push(format!(
                "SELECT * FROM (SELECT {columns} FROM {table} WHERE id = {id} AND ts > {} ORDER BY ts ASC LIMIT 1)",
                query.end
            ));
        }

        format!(
            "SELECT {columns} FROM ({}) ORDER BY ts ASC;",
            parts.join(" UNION ALL ")
        )
    }

    fn retention_delete(&self, _database: &str, index: SeriesIndex, cutoff: i64) -> String {
        format!(
            "DELETE FROM {} WHERE id = {} AND ts < {cutoff};",
            value_table(index.storage_type),
            index.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const NUMBER: SeriesIndex = SeriesIndex {
        id: 1,
        storage_type: StorageType::Number,
    };

    #[test]
    fn test_insert_is_chunked() {
        let samples: Vec<Sample> = (0..1001).map(|i| Sample::new(i, i as f64)).collect();
        let statements = SqliteDialect.insert("db", NUMBER, &samples);

        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("INSERT INTO ts_number"));
        assert_eq!(statements[2].matches("(1, ").count(), 1);
    }

    #[test]
    fn test_literals_are_escaped() {
        let sample = Sample::new(5, "it's").with_source("o'clock");
        let index = SeriesIndex {
            id: 3,
            storage_type: StorageType::String,
        };
        let statement = SqliteDialect.insert("db", index, &[sample]).remove(0);
        assert!(statement.contains("'it''s'"));
        assert!(statement.contains("'o''clock'"));

        assert_eq!(value_literal(&Value::Number(f64::NAN)), "NULL");
        assert_eq!(value_literal(&Value::Bool(true)), "1");
    }

    #[test]
    fn test_range_query_with_borders() {
        let sql = SqliteDialect.range_query(
            "db",
            NUMBER,
            &RangeQuery {
                start: Some(100),
                end: 200,
                count: Some(10),
                return_newest_entries: true,
                border_rows: true,
            },
        );
        assert!(sql.contains("ts < 100 ORDER BY ts DESC LIMIT 1"));
        assert!(sql.contains("ts >= 100 AND ts <= 200 ORDER BY ts DESC LIMIT 10"));
        assert!(sql.contains("ts > 200 ORDER BY ts ASC LIMIT 1"));
        assert!(sql.ends_with("ORDER BY ts ASC;"));
    }

    #[test]
    fn test_range_query_without_start_has_no_borders() {
        let sql = SqliteDialect.range_query(
            "db",
            NUMBER,
            &RangeQuery {
                start: None,
                end: 200,
                count: None,
                return_newest_entries: false,
                border_rows: true,
            },
        );
        assert!(!sql.contains("UNION ALL"));
        assert!(sql.contains("ts <= 200"));
    }

    async fn open_temp(dir: &tempfile::TempDir) -> Backend {
        let url = format!("sqlite:{}", dir.path().join("test.db").display());
        let database = DatabaseConfig {
            url,
            ..Default::default()
        };
        let backend = open(&database, &PoolConfig::default()).unwrap();
        backend.init().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_resolve_registers_once() {
        let dir = tempdir().unwrap();
        let backend = open_temp(&dir).await;

        assert_eq!(backend.lookup("a.b").await.unwrap(), None);
        let first = backend.resolve("a.b", StorageType::Boolean).await.unwrap();
        let second = backend.resolve("a.b", StorageType::Number).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.storage_type, StorageType::Boolean);

        backend.close().unwrap();
    }

    #[tokio::test]
    async fn test_insert_history_and_retention() {
        let dir = tempdir().unwrap();
        let backend = open_temp(&dir).await;
        let index = backend.resolve("temp", StorageType::Number).await.unwrap();

        let samples = vec![
            Sample::new(10, 1.0),
            Sample::new(20, 2.5).with_ack(true),
            Sample::null(30),
            Sample::new(40, 4.0).with_source("system"),
        ];
        assert_eq!(backend.insert(index, &samples).await.unwrap(), 4);

        let rows = backend
            .history(
                index,
                &RangeQuery {
                    start: Some(15),
                    end: 35,
                    count: None,
                    return_newest_entries: false,
                    border_rows: true,
                },
            )
            .await
            .unwrap();
        let ts: Vec<i64> = rows.iter().map(|s| s.ts).collect();
        assert_eq!(ts, vec![10, 20, 30, 40]);
        assert_eq!(rows[1].val, Value::Number(2.5));
        assert_eq!(rows[1].ack, Some(true));
        assert_eq!(rows[2].val, Value::Null);
        assert_eq!(rows[3].source.as_deref(), Some("system"));

        backend.apply_retention(index, 25).await.unwrap();
        let rows = backend
            .history(
                index,
                &RangeQuery {
                    start: None,
                    end: 100,
                    count: None,
                    return_newest_entries: false,
                    border_rows: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(rows.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![30, 40]);

        backend.close().unwrap();
    }

    #[tokio::test]
    async fn test_newest_entries_limit() {
        let dir = tempdir().unwrap();
        let backend = open_temp(&dir).await;
        let index = backend.resolve("counter", StorageType::Number).await.unwrap();
        let samples: Vec<Sample> = (1..=10).map(|i| Sample::new(i * 10, i as f64)).collect();
        backend.insert(index, &samples).await.unwrap();

        let rows = backend
            .history(
                index,
                &RangeQuery {
                    start: Some(0),
                    end: 1000,
                    count: Some(3),
                    return_newest_entries: true,
                    border_rows: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(rows.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![80, 90, 100]);

        backend.close().unwrap();
    }

    #[tokio::test]
    async fn test_ping() {
        let dir = tempdir().unwrap();
        let backend = open_temp(&dir).await;
        backend.ping().await.unwrap();
        backend.close().unwrap();
    }
}
