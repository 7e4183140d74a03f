//! Engine actor with the series registry and an MPSC command channel.
//!
//! Single-owner pattern: one task owns every series (regulator state, write
//! buffer, timers) and processes commands strictly in order. Backend writes
//! run as spawned flush jobs whose results come back through a `JoinSet`;
//! timers are spawned sleeps that post a command tagged with a generation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::{EngineConfig, SeriesConfig};
use crate::ingest::{self, Effect, IngestError, IngestOutcome, SeriesState, Verdict};
use crate::query::SeriesView;
use crate::storage::{
    Backend, IncomingSample, Sample, SeriesIndex, StorageType, WriteBuffer, now_ms,
};

use super::flush::{FlushDone, FlushJob, FlushTarget};

// =============================================================================
// Commands
// =============================================================================

/// Which series a query snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    One(String),
    /// Every enabled series.
    All,
}

/// Commands sent to the engine actor.
#[derive(Debug)]
pub enum Command {
    /// Enable or reconfigure a series. Replies `true` when newly enabled.
    Enable {
        id: String,
        config: SeriesConfig,
        reply: oneshot::Sender<bool>,
    },
    /// Finish and flush a series. Replies `false` when it was not enabled.
    Disable {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Ingest {
        id: String,
        sample: IncomingSample,
        reply: oneshot::Sender<Result<IngestOutcome, IngestError>>,
    },
    /// Buffered samples inside `[start, end]` for a query.
    Snapshot {
        selector: Selector,
        start: i64,
        end: i64,
        reply: oneshot::Sender<Vec<SeriesView>>,
    },
    /// Flush the given series (all when `None`). Replies once the writes
    /// finished, with the number of snapshots written.
    Flush {
        ids: Option<Vec<String>>,
        reply: oneshot::Sender<usize>,
    },
    List {
        reply: oneshot::Sender<Vec<SeriesStatus>>,
    },
    DebounceElapsed {
        id: String,
        generation: u64,
    },
    RelogDue {
        id: String,
        generation: u64,
    },
    /// Drain every series and stop.
    Shutdown,
}

/// Registry view of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesStatus {
    pub id: String,
    pub enabled: bool,
    /// Samples in the live buffer.
    pub buffered: usize,
    /// Snapshots still being written.
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<StorageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Sample>,
}

// =============================================================================
// Registry
// =============================================================================

/// A running timer. Dropping it cancels the sleep.
#[derive(Debug)]
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn arm(tx: &mpsc::WeakSender<Command>, delay: Duration, generation: u64, command: Command) -> Timer {
    let tx = tx.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(command).await;
        }
    });
    Timer { generation, handle }
}

fn is_current(timer: &Option<Timer>, generation: u64) -> bool {
    timer.as_ref().is_some_and(|t| t.generation == generation)
}

/// One series in the registry.
///
/// A disabled entry stays until its in-flight snapshots are written so
/// queries keep seeing them.
#[derive(Debug)]
struct Entry {
    state: SeriesState,
    buffer: WriteBuffer,
    enabled: bool,
    index: Option<SeriesIndex>,
    target: Arc<AsyncMutex<FlushTarget>>,
    debounce: Option<Timer>,
    relog: Option<Timer>,
}

impl Entry {
    fn new(state: SeriesState) -> Self {
        Self {
            state,
            buffer: WriteBuffer::new(),
            enabled: true,
            index: None,
            target: Arc::default(),
            debounce: None,
            relog: None,
        }
    }

    fn cancel_timers(&mut self) {
        self.debounce = None;
        self.relog = None;
    }

    fn view(&self, id: &str, start: i64, end: i64) -> SeriesView {
        SeriesView {
            id: id.to_string(),
            cache: self.buffer.snapshot_range(Some(start), end),
            index: self.index,
            enabled: self.enabled,
        }
    }

    fn status(&self, id: &str) -> SeriesStatus {
        SeriesStatus {
            id: id.to_string(),
            enabled: self.enabled,
            buffered: self.buffer.len(),
            in_flight: self.buffer.in_flight_ids().len(),
            storage_type: self
                .index
                .map(|index| index.storage_type)
                .or(self.state.config.storage_type),
            last: self.state.last.clone(),
        }
    }
}

// =============================================================================
// Actor
// =============================================================================

pub struct EngineActor {
    config: EngineConfig,
    backend: Backend,
    series: BTreeMap<String, Entry>,
    rx: mpsc::Receiver<Command>,
    tx: mpsc::WeakSender<Command>,
    flushes: JoinSet<FlushDone>,
    /// Series and snapshot of every running flush task.
    flushing: HashMap<task::Id, (String, u64)>,
    next_generation: u64,
}

impl EngineActor {
    /// Spawn the actor task.
    ///
    /// The actor only keeps a weak sender, so it also stops once every
    /// returned sender is dropped.
    pub fn spawn(backend: Backend, config: EngineConfig) -> (JoinHandle<()>, mpsc::Sender<Command>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let actor = Self {
            config,
            backend,
            series: BTreeMap::new(),
            rx,
            tx: tx.downgrade(),
            flushes: JoinSet::new(),
            flushing: HashMap::new(),
            next_generation: 0,
        };
        (tokio::spawn(actor.run()), tx)
    }

    async fn run(mut self) {
        tracing::info!(instance = %self.config.instance_id, "Engine started");

        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        sweep.tick().await;

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(joined) = self.flushes.join_next_with_id() => self.on_flushed(joined),
                _ = sweep.tick() => self.sweep(),
            }
        }

        self.drain().await;
        tracing::info!("Engine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enable { id, config, reply } => {
                let _ = reply.send(self.enable(id, config));
            }
            Command::Disable { id, reply } => {
                let _ = reply.send(self.disable(&id));
            }
            Command::Ingest { id, sample, reply } => {
                let _ = reply.send(self.ingest(&id, sample));
            }
            Command::Snapshot {
                selector,
                start,
                end,
                reply,
            } => {
                let views = match selector {
                    Selector::One(id) => match self.series.get(&id) {
                        Some(entry) => vec![entry.view(&id, start, end)],
                        None => vec![SeriesView {
                            id,
                            ..Default::default()
                        }],
                    },
                    Selector::All => self
                        .series
                        .iter()
                        .filter(|(_, entry)| entry.enabled)
                        .map(|(id, entry)| entry.view(id, start, end))
                        .collect(),
                };
                let _ = reply.send(views);
            }
            Command::Flush { ids, reply } => self.flush(ids, reply),
            Command::List { reply } => {
                let statuses = self
                    .series
                    .iter()
                    .map(|(id, entry)| entry.status(id))
                    .collect();
                let _ = reply.send(statuses);
            }
            Command::DebounceElapsed { id, generation } => {
                let Some(entry) = self.series.get_mut(&id) else {
                    return;
                };
                if !entry.enabled || !is_current(&entry.debounce, generation) {
                    return;
                }
                entry.debounce = None;
                let verdict = ingest::debounce_elapsed(&mut entry.state);
                tracing::trace!(series = %id, outcome = ?verdict.outcome, "Debounce settled");
                self.apply(&id, verdict);
            }
            Command::RelogDue { id, generation } => {
                let Some(entry) = self.series.get_mut(&id) else {
                    return;
                };
                if !entry.enabled || !is_current(&entry.relog, generation) {
                    return;
                }
                entry.relog = None;
                let verdict = ingest::relog_due(&mut entry.state, now_ms(), &self.config.instance_id);
                self.apply(&id, verdict);
            }
            Command::Shutdown => {}
        }
    }

    // =========================================================================
    // Series lifecycle
    // =========================================================================

    fn enable(&mut self, id: String, config: SeriesConfig) -> bool {
        let config = Arc::new(config);
        let write_nulls = config.write_nulls;

        let fresh = match self.series.get_mut(&id) {
            Some(entry) if entry.enabled => {
                if !(config.changes_only && !config.changes_relog_interval.is_zero()) {
                    entry.relog = None;
                }
                entry.state.reconfigure(config);
                tracing::debug!(series = %id, "Series reconfigured");
                false
            }
            Some(entry) => {
                entry.state = SeriesState::new(id.clone(), config);
                entry.enabled = true;
                true
            }
            None => {
                let entry = Entry::new(SeriesState::new(id.clone(), config));
                self.series.insert(id.clone(), entry);
                true
            }
        };

        if fresh {
            tracing::info!(series = %id, write_nulls, "Series enabled");
            if write_nulls && let Some(entry) = self.series.get_mut(&id) {
                entry.buffer.append(ingest::start_marker(now_ms()));
            }
        }
        fresh
    }

    fn disable(&mut self, id: &str) -> bool {
        let Some(entry) = self.series.get_mut(id).filter(|entry| entry.enabled) else {
            return false;
        };
        entry.cancel_timers();
        for sample in ingest::finish(&mut entry.state, now_ms()) {
            entry.buffer.append(sample);
        }
        entry.enabled = false;

        self.flush_series(id, None);
        self.remove_if_retired(id);
        tracing::info!(series = %id, "Series disabled");
        true
    }

    fn remove_if_retired(&mut self, id: &str) {
        if self
            .series
            .get(id)
            .is_some_and(|entry| !entry.enabled && entry.buffer.is_drained())
        {
            self.series.remove(id);
        }
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    fn ingest(&mut self, id: &str, incoming: IncomingSample) -> Result<IngestOutcome, IngestError> {
        let sample = incoming
            .into_sample(now_ms())
            .ok_or(IngestError::UndefinedValue)?;
        let entry = self
            .series
            .get_mut(id)
            .filter(|entry| entry.enabled)
            .ok_or_else(|| IngestError::UnknownSeries(id.to_string()))?;

        let verdict = ingest::regulate(&mut entry.state, sample, false);
        tracing::trace!(series = %id, outcome = ?verdict.outcome, "Sample regulated");
        let outcome = verdict.outcome;
        self.apply(id, verdict);
        Ok(outcome)
    }

    /// Apply regulator effects in order, then flush on overflow.
    fn apply(&mut self, id: &str, verdict: Verdict) {
        let Some(entry) = self.series.get_mut(id) else {
            return;
        };

        for effect in verdict.effects {
            match effect {
                Effect::Write(sample) => entry.buffer.append(sample),
                Effect::ArmDebounce(delay) => {
                    self.next_generation += 1;
                    let generation = self.next_generation;
                    let command = Command::DebounceElapsed {
                        id: id.to_string(),
                        generation,
                    };
                    entry.debounce = Some(arm(&self.tx, delay, generation, command));
                }
                Effect::CancelDebounce => entry.debounce = None,
                Effect::ArmRelog(delay) => {
                    self.next_generation += 1;
                    let generation = self.next_generation;
                    let command = Command::RelogDue {
                        id: id.to_string(),
                        generation,
                    };
                    entry.relog = Some(arm(&self.tx, delay, generation, command));
                }
                Effect::CancelRelog => entry.relog = None,
            }
        }

        if entry.buffer.len() > entry.state.config.max_buffered_length {
            self.flush_series(id, None);
        }
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Start writing the live buffer of `id`. Returns whether a job was spawned.
    fn flush_series(&mut self, id: &str, done: Option<mpsc::Sender<()>>) -> bool {
        let Some(entry) = self.series.get_mut(id) else {
            return false;
        };
        let Some((snapshot, samples)) = entry.buffer.take_snapshot() else {
            return false;
        };
        tracing::debug!(series = %id, snapshot, samples = samples.len(), "Flushing");

        let job = FlushJob {
            id: id.to_string(),
            snapshot,
            samples,
            storage_type: entry.state.config.storage_type,
            retention: entry.state.config.retention,
            retention_check_interval: self.config.retention_check_interval,
            target: Arc::clone(&entry.target),
            backend: self.backend.clone(),
            _done: done,
        };
        let task = self.flushes.spawn(job.run());
        self.flushing.insert(task.id(), (id.to_string(), snapshot));
        true
    }

    fn flush(&mut self, ids: Option<Vec<String>>, reply: oneshot::Sender<usize>) {
        let ids = ids.unwrap_or_else(|| self.series.keys().cloned().collect());
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

        let mut started = 0;
        for id in &ids {
            if self.flush_series(id, Some(done_tx.clone())) {
                started += 1;
            } else if let Some(entry) = self.series.get(id)
                && !entry.buffer.in_flight_ids().is_empty()
            {
                // earlier jobs hold the target lock until their write ends
                let target = Arc::clone(&entry.target);
                let done = done_tx.clone();
                tokio::spawn(async move {
                    let _written = target.lock().await;
                    drop(done);
                });
            }
        }
        drop(done_tx);

        // recv() yields None once every job dropped its sender
        tokio::spawn(async move {
            let _ = done_rx.recv().await;
            let _ = reply.send(started);
        });
    }

    fn sweep(&mut self) {
        let due: Vec<String> = self
            .series
            .iter()
            .filter(|(_, entry)| !entry.buffer.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        if due.is_empty() {
            return;
        }
        tracing::debug!(series = due.len(), "Periodic flush");
        for id in &due {
            self.flush_series(id, None);
        }
    }

    /// Release the snapshot of a finished flush task, whatever its outcome.
    fn on_flushed(&mut self, joined: Result<(task::Id, FlushDone), JoinError>) {
        let task = match &joined {
            Ok((task, _)) => *task,
            Err(e) => e.id(),
        };
        let Some((id, snapshot)) = self.flushing.remove(&task) else {
            tracing::warn!(%task, "Finished flush task was not tracked");
            return;
        };

        let index = match joined {
            Ok((_, done)) => {
                if let Ok(written) = &done.result {
                    tracing::trace!(series = %id, snapshot, written, "Snapshot completed");
                }
                done.index
            }
            Err(e) => {
                tracing::error!(series = %id, snapshot, error = %e, "Flush task failed, batch dropped");
                None
            }
        };
        if let Some(entry) = self.series.get_mut(&id) {
            entry.buffer.complete(snapshot);
            if index.is_some() {
                entry.index = index;
            }
        }
        self.remove_if_retired(&id);
    }

    /// Finish every series, flush with pacing and wait for all writes.
    async fn drain(&mut self) {
        let ids: Vec<String> = self.series.keys().cloned().collect();
        tracing::info!(series = ids.len(), "Draining series");

        let now = now_ms();
        let every = self.config.shutdown_pacing_every;
        for (n, id) in ids.iter().enumerate() {
            if let Some(entry) = self.series.get_mut(id) {
                entry.cancel_timers();
                if entry.enabled {
                    for sample in ingest::finish(&mut entry.state, now) {
                        entry.buffer.append(sample);
                    }
                    entry.enabled = false;
                }
            }
            self.flush_series(id, None);
            if every > 0 && (n + 1) % every == 0 {
                tokio::time::sleep(self.config.shutdown_pacing_delay).await;
            }
        }

        while let Some(joined) = self.flushes.join_next_with_id().await {
            self.on_flushed(joined);
        }
        if let Err(e) = self.backend.close() {
            tracing::warn!(error = %e, "Backend close failed");
        }
    }
}
