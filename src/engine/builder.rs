//! Engine builder.
//!
//! Brings the database container up, creates the schema, spawns the actor
//! and enables the configured series.

use std::sync::Arc;

use crate::config::{EngineConfig, SeriesEntry};
use crate::container::{ContainerSupervisor, NoContainers};
use crate::storage::Backend;

use super::actor::EngineActor;
use super::error::HistorianError;
use super::handle::Historian;

/// Builder for a running [`Historian`].
pub struct HistorianBuilder {
    backend: Backend,
    engine: EngineConfig,
    series: Vec<SeriesEntry>,
    supervisor: Arc<dyn ContainerSupervisor>,
}

impl HistorianBuilder {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            engine: EngineConfig::default(),
            series: Vec::new(),
            supervisor: Arc::new(NoContainers),
        }
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Series enabled right after start.
    pub fn series(mut self, series: Vec<SeriesEntry>) -> Self {
        self.series = series;
        self
    }

    /// Set the container supervisor awaited before the first connection.
    ///
    /// Default: [`NoContainers`].
    pub fn supervisor(mut self, supervisor: impl ContainerSupervisor) -> Self {
        self.supervisor = Arc::new(supervisor);
        self
    }

    /// Start the engine.
    ///
    /// # Errors
    /// Fails when the container does not come up, the schema cannot be
    /// created, or a configured series is invalid.
    pub async fn build(self) -> Result<Historian, HistorianError> {
        self.supervisor.ensure_running().await?;
        self.backend.init().await?;

        let (actor, tx) = EngineActor::spawn(self.backend.clone(), self.engine.clone());
        let historian = Historian::new(tx, actor, self.backend, self.engine, self.supervisor);

        let count = self.series.len();
        for entry in self.series {
            historian.enable(entry.id, entry.config).await?;
        }
        tracing::info!(series = count, "Historian started");
        Ok(historian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateMode, AggregationRequest};
    use crate::config::{DatabaseConfig, SeriesConfig};
    use crate::container::{ContainerError, ContainerStatus};
    use crate::ingest::IngestOutcome;
    use crate::pool::PoolConfig;
    use crate::storage::db::sqlite;
    use crate::storage::{IncomingSample, Sample, Value, now_ms};
    use async_trait::async_trait;
    use tempfile::tempdir;

    fn backend(dir: &tempfile::TempDir) -> Backend {
        let database = DatabaseConfig {
            url: format!("sqlite:{}", dir.path().join("historian.db").display()),
            ..Default::default()
        };
        sqlite::open(&database, &PoolConfig::default()).unwrap()
    }

    fn raw(start: i64, end: i64) -> AggregationRequest {
        AggregationRequest {
            start: Some(start),
            end: Some(end),
            aggregate: AggregateMode::None,
            ..Default::default()
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ContainerSupervisor for Unreachable {
        async fn ensure_running(&self) -> Result<(), ContainerError> {
            Err(ContainerError::Unavailable("no docker".into()))
        }

        async fn status(&self) -> ContainerStatus {
            ContainerStatus::Stopped
        }
    }

    #[tokio::test]
    async fn test_supervisor_failure_aborts_start() {
        let dir = tempdir().unwrap();
        let err = HistorianBuilder::new(backend(&dir))
            .supervisor(Unreachable)
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, HistorianError::Container(_)));
    }

    #[tokio::test]
    async fn test_configured_series_are_enabled() {
        let dir = tempdir().unwrap();
        let historian = HistorianBuilder::new(backend(&dir))
            .series(vec![SeriesEntry {
                id: "boiler.temp".into(),
                config: SeriesConfig::default(),
            }])
            .build()
            .await
            .unwrap();

        let series = historian.series().await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].id, "boiler.temp");
        historian.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_through_sqlite() {
        let dir = tempdir().unwrap();
        let historian = HistorianBuilder::new(backend(&dir)).build().await.unwrap();
        historian.enable("s", SeriesConfig::default()).await.unwrap();

        // equal timestamps are bumped by 1ms
        for (ts, val) in [(1_000, 1.0), (1_000, 2.0), (2_000, 3.0)] {
            let outcome = historian
                .ingest("s", Sample::new(ts, val).into())
                .await
                .unwrap();
            assert_eq!(outcome, IngestOutcome::Committed { written: 1 });
        }
        assert_eq!(historian.flush(["s"]).await.unwrap(), 1);

        let points = historian.query("s", &raw(0, 10_000)).await.unwrap();
        let shape: Vec<(i64, Value)> = points
            .into_iter()
            .map(|p| (p.sample.ts, p.sample.val))
            .collect();
        assert_eq!(
            shape,
            vec![
                (1_000, Value::Number(1.0)),
                (1_001, Value::Number(2.0)),
                (2_000, Value::Number(3.0)),
            ]
        );
        historian.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_merges_buffer_and_backend() {
        let dir = tempdir().unwrap();
        let historian = HistorianBuilder::new(backend(&dir)).build().await.unwrap();
        historian.enable("s", SeriesConfig::default()).await.unwrap();

        historian.ingest("s", Sample::new(100, 1.0).into()).await.unwrap();
        historian.flush_all().await.unwrap();
        historian.ingest("s", Sample::new(200, 2.0).into()).await.unwrap();

        let points = historian.query("s", &raw(0, 1_000)).await.unwrap();
        assert_eq!(
            points.iter().map(|p| p.sample.ts).collect::<Vec<_>>(),
            vec![100, 200]
        );
        historian.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_all_tags_ids() {
        let dir = tempdir().unwrap();
        let historian = HistorianBuilder::new(backend(&dir)).build().await.unwrap();
        for id in ["a", "b"] {
            historian.enable(id, SeriesConfig::default()).await.unwrap();
            historian.ingest(id, Sample::new(500, 1.0).into()).await.unwrap();
        }

        let points = historian.query("*", &raw(0, 1_000)).await.unwrap();
        let ids: Vec<Option<String>> = points.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![Some("a".into()), Some("b".into())]);
        historian.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_series_query_and_undefined_value() {
        let dir = tempdir().unwrap();
        let historian = HistorianBuilder::new(backend(&dir)).build().await.unwrap();

        let err = historian.query("ghost", &raw(0, 1_000)).await.unwrap_err();
        assert!(matches!(err, HistorianError::Query(_)));

        historian.enable("s", SeriesConfig::default()).await.unwrap();
        let err = historian
            .ingest("s", IncomingSample::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HistorianError::Ingest(_)));
        historian.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_writes_null_terminator() {
        let dir = tempdir().unwrap();
        let config = SeriesConfig {
            write_nulls: true,
            ..Default::default()
        };
        let historian = HistorianBuilder::new(backend(&dir)).build().await.unwrap();
        historian.enable("s", config).await.unwrap();
        let now = now_ms();
        historian.ingest("s", Sample::new(now, 5.0).into()).await.unwrap();
        historian.shutdown().await.unwrap();

        let err = historian.series().await.unwrap_err();
        assert!(matches!(err, HistorianError::Closed));

        // reopen and read what the drain wrote
        let historian = HistorianBuilder::new(backend(&dir)).build().await.unwrap();
        historian.enable("s", SeriesConfig::default()).await.unwrap();
        let points = historian
            .query("s", &raw(now - 10_000, now + 10_000))
            .await
            .unwrap();
        let vals: Vec<Value> = points.into_iter().map(|p| p.sample.val).collect();
        assert_eq!(vals, vec![Value::Null, Value::Number(5.0), Value::Null]);
        historian.shutdown().await.unwrap();
    }
}
