//! Statement execution through the pool, and the typed backend facade.
//!
//! - [`QueryConnection`]: a handle that can run statement text and return rows
//! - [`Executor`]: runs one statement on some pooled handle
//! - [`PooledExecutor`]: admission-guarded pool, optionally behind a [`SerialQueue`]
//! - [`Backend`]: dialect + executor, speaking in series and samples

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::StorageError;
use super::dialect::{Dialect, RangeQuery};
use super::types::{Row, Sample, SeriesIndex, StorageType};
use crate::pool::{AdmissionGuard, Manager, Pool, SerialQueue};

/// A connection that executes statement text.
#[async_trait]
pub trait QueryConnection: Send {
    async fn execute(&mut self, statement: &str) -> Result<Vec<Row>, StorageError>;
}

/// Runs statements on behalf of the backend.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self, statement: String) -> Result<Vec<Row>, StorageError>;

    /// Release every pooled resource.
    fn close(&self) -> Result<(), StorageError>;
}

// =============================================================================
// PooledExecutor
// =============================================================================

/// Executes statements on connections borrowed through an [`AdmissionGuard`].
pub struct PooledExecutor<M: Manager> {
    guard: AdmissionGuard<M>,
    queue: Option<SerialQueue>,
}

impl<M: Manager> std::fmt::Debug for PooledExecutor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledExecutor")
            .field("guard", &self.guard)
            .field("serial", &self.queue.is_some())
            .finish_non_exhaustive()
    }
}

impl<M> PooledExecutor<M>
where
    M: Manager,
    M::Resource: QueryConnection,
{
    /// Statements run concurrently, bounded by `max_connections`.
    pub fn concurrent(pool: Pool<M>, max_connections: usize) -> Self {
        Self {
            guard: AdmissionGuard::new(pool, max_connections),
            queue: None,
        }
    }

    /// Statements run one at a time with `request_interval` between them.
    /// Requires a running tokio runtime.
    pub fn serial(pool: Pool<M>, request_interval: Duration) -> Self {
        Self {
            guard: AdmissionGuard::new(pool, 1),
            queue: Some(SerialQueue::spawn(request_interval)),
        }
    }
}

async fn run_statement<M>(guard: &AdmissionGuard<M>, statement: &str) -> Result<Vec<Row>, StorageError>
where
    M: Manager,
    M::Resource: QueryConnection,
{
    let mut conn = guard.acquire().await?;
    conn.execute(statement).await.inspect_err(|e| {
        tracing::debug!(error = %e, statement, "Statement failed");
    })
}

#[async_trait]
impl<M> Executor for PooledExecutor<M>
where
    M: Manager,
    M::Resource: QueryConnection,
{
    async fn execute(&self, statement: String) -> Result<Vec<Row>, StorageError> {
        match &self.queue {
            Some(queue) => {
                let guard = self.guard.clone();
                queue
                    .run(async move { run_statement(&guard, &statement).await })
                    .await?
            }
            None => run_statement(&self.guard, &statement).await,
        }
    }

    fn close(&self) -> Result<(), StorageError> {
        self.guard.pool().close()?;
        Ok(())
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Typed storage operations for one logical database.
#[derive(Clone)]
pub struct Backend {
    executor: Arc<dyn Executor>,
    dialect: Arc<dyn Dialect>,
    database: String,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("dialect", &self.dialect.name())
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Backend {
    pub fn new(
        executor: Arc<dyn Executor>,
        dialect: Arc<dyn Dialect>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            dialect,
            database: database.into(),
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Create the schema if needed.
    pub async fn init(&self) -> Result<(), StorageError> {
        for statement in self.dialect.init(&self.database) {
            self.executor.execute(statement).await?;
        }
        tracing::info!(
            dialect = self.dialect.name(),
            database = %self.database,
            "Schema initialized"
        );
        Ok(())
    }

    /// Cheap round-trip used by readiness checks.
    pub async fn ping(&self) -> Result<(), StorageError> {
        self.executor.execute("SELECT 1".to_string()).await?;
        Ok(())
    }

    /// Find a registered series.
    pub async fn lookup(&self, name: &str) -> Result<Option<SeriesIndex>, StorageError> {
        let rows = self
            .executor
            .execute(self.dialect.lookup_series(&self.database, name))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let id = row
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| StorageError::InvalidData(format!("series '{name}' has no id")))?;
        let code = row
            .get("type")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| StorageError::InvalidData(format!("series '{name}' has no type")))?;
        let storage_type = StorageType::from_code(code).ok_or_else(|| {
            StorageError::InvalidData(format!("series '{name}' has unknown type code {code}"))
        })?;

        Ok(Some(SeriesIndex { id, storage_type }))
    }

    /// Find a series, registering it with `storage_type` on first use.
    pub async fn resolve(
        &self,
        name: &str,
        storage_type: StorageType,
    ) -> Result<SeriesIndex, StorageError> {
        if let Some(index) = self.lookup(name).await? {
            return Ok(index);
        }

        self.executor
            .execute(self.dialect.create_series(&self.database, name, storage_type))
            .await?;
        let index = self.lookup(name).await?.ok_or_else(|| {
            StorageError::InvalidData(format!("series '{name}' was not registered"))
        })?;
        tracing::debug!(series = name, id = index.id, storage_type = %index.storage_type, "Series registered");
        Ok(index)
    }

    /// Insert samples already coerced to the series' storage type.
    pub async fn insert(&self, index: SeriesIndex, samples: &[Sample]) -> Result<usize, StorageError> {
        if samples.is_empty() {
            return Ok(0);
        }
        for statement in self.dialect.insert(&self.database, index, samples) {
            self.executor.execute(statement).await?;
        }
        Ok(samples.len())
    }

    /// Fetch persisted samples ordered by `ts`.
    pub async fn history(
        &self,
        index: SeriesIndex,
        query: &RangeQuery,
    ) -> Result<Vec<Sample>, StorageError> {
        let rows = self
            .executor
            .execute(self.dialect.range_query(&self.database, index, query))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| Sample::from_row(row, index.storage_type))
            .collect())
    }

    /// Delete samples older than `cutoff` (epoch ms).
    pub async fn apply_retention(&self, index: SeriesIndex, cutoff: i64) -> Result<(), StorageError> {
        self.executor
            .execute(self.dialect.retention_delete(&self.database, index, cutoff))
            .await?;
        Ok(())
    }

    /// Close the underlying pool.
    pub fn close(&self) -> Result<(), StorageError> {
        self.executor.close()
    }
}
