//! Backend with switchable insert faults for flush tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::pool::{Pool, PoolConfig};
use crate::storage::db::{SqliteDialect, SqliteManager};
use crate::storage::{Backend, Executor, PooledExecutor, Row, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Sample inserts return an error.
    Fail,
    /// Sample inserts panic inside the flush task.
    Panic,
}

/// Wraps a SQLite executor; series registration always passes through.
pub struct FaultyInserts {
    inner: PooledExecutor<SqliteManager>,
    fault: Arc<Mutex<Fault>>,
}

#[async_trait]
impl Executor for FaultyInserts {
    async fn execute(&self, statement: String) -> Result<Vec<Row>, StorageError> {
        if statement.starts_with("INSERT INTO ts_") {
            let fault = *self.fault.lock();
            match fault {
                Fault::None => {}
                Fault::Fail => {
                    return Err(StorageError::Internal("disk full".to_string()));
                }
                Fault::Panic => panic!("insert crashed"),
            }
        }
        self.inner.execute(statement).await
    }

    fn close(&self) -> Result<(), StorageError> {
        self.inner.close()
    }
}

/// An initialized backend over `dir` plus the switch for its inserts.
pub async fn faulty_backend(dir: &tempfile::TempDir) -> (Backend, Arc<Mutex<Fault>>) {
    let url = format!("sqlite:{}", dir.path().join("faulty.db").display());
    let pool = Pool::new(SqliteManager::new(&url).unwrap(), PoolConfig::default());
    let fault = Arc::new(Mutex::new(Fault::None));
    let executor = FaultyInserts {
        inner: PooledExecutor::concurrent(pool, 4),
        fault: Arc::clone(&fault),
    };
    let backend = Backend::new(Arc::new(executor), Arc::new(SqliteDialect), "historian");
    backend.init().await.unwrap();
    (backend, fault)
}
