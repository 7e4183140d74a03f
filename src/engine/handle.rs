//! Public engine facade.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::aggregate::{AggregationRequest, HistoryPoint, Plan};
use crate::config::{AppConfig, EngineConfig, SeriesConfig};
use crate::container::{ContainerStatus, ContainerSupervisor};
use crate::ingest::{IngestError, IngestOutcome};
use crate::query;
use crate::storage::db::sqlite;
use crate::storage::{Backend, IncomingSample, now_ms};

use super::HistorianBuilder;
use super::actor::{Command, SeriesStatus, Selector};
use super::error::HistorianError;

/// Series id that addresses every enabled series in a query.
pub const ALL_SERIES: &str = "*";

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct Historian {
    tx: mpsc::Sender<Command>,
    backend: Backend,
    config: Arc<EngineConfig>,
    supervisor: Arc<dyn ContainerSupervisor>,
    actor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Historian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Historian")
            .field("backend", &self.backend)
            .field("instance_id", &self.config.instance_id)
            .finish_non_exhaustive()
    }
}

impl Historian {
    pub(super) fn new(
        tx: mpsc::Sender<Command>,
        actor: JoinHandle<()>,
        backend: Backend,
        config: EngineConfig,
        supervisor: Arc<dyn ContainerSupervisor>,
    ) -> Self {
        Self {
            tx,
            backend,
            config: Arc::new(config),
            supervisor,
            actor: Arc::new(Mutex::new(Some(actor))),
        }
    }

    /// Open the configured SQLite backend and start the engine with the
    /// configured series enabled.
    pub async fn start(config: &AppConfig) -> Result<Self, HistorianError> {
        let backend = sqlite::open(&config.database, &config.pool)?;
        HistorianBuilder::new(backend)
            .engine(config.engine.clone())
            .series(config.series.clone())
            .build()
            .await
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HistorianError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| HistorianError::Closed)?;
        rx.await.map_err(|_| HistorianError::Closed)
    }

    /// Enable a series, or swap the policy of an enabled one.
    ///
    /// Returns `true` when the series was newly enabled.
    pub async fn enable(
        &self,
        id: impl Into<String>,
        config: SeriesConfig,
    ) -> Result<bool, HistorianError> {
        config.validate()?;
        let id = id.into();
        self.call(|reply| Command::Enable { id, config, reply }).await
    }

    /// Flush a series and drop its state. Returns `false` if it was not enabled.
    pub async fn disable(&self, id: impl Into<String>) -> Result<bool, HistorianError> {
        let id = id.into();
        self.call(|reply| Command::Disable { id, reply }).await
    }

    /// Submit one sample.
    pub async fn ingest(
        &self,
        id: impl Into<String>,
        sample: IncomingSample,
    ) -> Result<IngestOutcome, HistorianError> {
        let id = id.into();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Ingest { id, sample, reply })
            .await
            .map_err(|_| IngestError::ChannelClosed)?;
        let outcome = rx.await.map_err(|_| IngestError::ChannelClosed)??;
        Ok(outcome)
    }

    /// History of one series. [`ALL_SERIES`] runs [`Historian::query_all`].
    pub async fn query(
        &self,
        id: &str,
        request: &AggregationRequest,
    ) -> Result<Vec<HistoryPoint>, HistorianError> {
        if id == ALL_SERIES {
            return self.query_all(request).await;
        }
        self.run_query(Selector::One(id.to_string()), request, false)
            .await
    }

    /// History of every enabled series, each point tagged with its id.
    pub async fn query_all(
        &self,
        request: &AggregationRequest,
    ) -> Result<Vec<HistoryPoint>, HistorianError> {
        self.run_query(Selector::All, request, true).await
    }

    /// Validate a request against the engine limits.
    pub fn plan(&self, request: &AggregationRequest) -> Result<Plan, HistorianError> {
        Ok(request.normalize(now_ms(), self.config.bucket_limit, self.config.default_count)?)
    }

    async fn run_query(
        &self,
        selector: Selector,
        request: &AggregationRequest,
        force_id: bool,
    ) -> Result<Vec<HistoryPoint>, HistorianError> {
        let mut plan = self.plan(request)?;
        plan.add_id |= force_id;

        let (start, end) = (plan.start, plan.end);
        let views = self
            .call(|reply| Command::Snapshot {
                selector,
                start,
                end,
                reply,
            })
            .await?;

        let mut points = Vec::new();
        for view in views {
            points.extend(query::run(&self.backend, view, &plan).await?);
        }
        Ok(points)
    }

    /// Flush the given series and wait for the writes. Returns the number of
    /// buffer snapshots written.
    pub async fn flush<I, S>(&self, ids: I) -> Result<usize, HistorianError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        self.call(|reply| Command::Flush {
            ids: Some(ids),
            reply,
        })
        .await
    }

    /// Flush every series and wait for the writes.
    pub async fn flush_all(&self) -> Result<usize, HistorianError> {
        self.call(|reply| Command::Flush { ids: None, reply }).await
    }

    /// Registered series, including disabled ones with writes still pending.
    pub async fn series(&self) -> Result<Vec<SeriesStatus>, HistorianError> {
        self.call(|reply| Command::List { reply }).await
    }

    /// Backend round-trip for readiness checks.
    pub async fn ping(&self) -> Result<(), HistorianError> {
        self.backend.ping().await?;
        Ok(())
    }

    pub async fn container_status(&self) -> ContainerStatus {
        self.supervisor.status().await
    }

    /// Drain every series, wait for the writes and close the backend.
    ///
    /// Later calls on any clone return [`HistorianError::Closed`].
    pub async fn shutdown(&self) -> Result<(), HistorianError> {
        let _ = self.tx.send(Command::Shutdown).await;
        let handle = self.actor.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| {
                tracing::error!(error = %e, "Engine task failed");
                HistorianError::Closed
            })?;
        }
        Ok(())
    }
}
