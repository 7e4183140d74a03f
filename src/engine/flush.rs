//! Background write of one buffer snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::storage::{Backend, Sample, SeriesIndex, StorageError, StorageType, now_ms};

/// Backend-side state of one series, shared by its flush jobs.
///
/// The lock is held for the whole write so snapshots of a series reach the
/// backend one at a time.
#[derive(Debug, Default)]
pub struct FlushTarget {
    pub index: Option<SeriesIndex>,
    pub last_retention_check: Option<Instant>,
}

/// Result reported back to the actor, which tracks the series and
/// snapshot of each job by its task id.
#[derive(Debug)]
pub struct FlushDone {
    pub index: Option<SeriesIndex>,
    pub result: Result<usize, StorageError>,
}

pub struct FlushJob {
    pub id: String,
    pub snapshot: u64,
    pub samples: Arc<Vec<Sample>>,
    pub storage_type: Option<StorageType>,
    pub retention: Duration,
    pub retention_check_interval: Duration,
    pub target: Arc<AsyncMutex<FlushTarget>>,
    pub backend: Backend,
    /// Dropped when the job ends; lets an explicit flush wait for its jobs.
    pub _done: Option<mpsc::Sender<()>>,
}

impl FlushJob {
    pub async fn run(self) -> FlushDone {
        let mut target = self.target.lock().await;
        let result = self.write(&mut target).await;
        match &result {
            Ok(written) => {
                tracing::debug!(series = %self.id, snapshot = self.snapshot, written, "Flushed");
            }
            Err(e) => {
                tracing::error!(
                    series = %self.id,
                    error = %e,
                    dropped = self.samples.len(),
                    "Flush failed, batch dropped"
                );
            }
        }
        FlushDone {
            index: target.index,
            result,
        }
    }

    async fn write(&self, target: &mut FlushTarget) -> Result<usize, StorageError> {
        let index = match target.index {
            Some(index) => index,
            None => {
                let storage_type = self.storage_type.unwrap_or_else(|| {
                    self.samples
                        .iter()
                        .map(|s| &s.val)
                        .find(|v| !v.is_null())
                        .map_or(StorageType::Number, StorageType::infer)
                });
                let index = self.backend.resolve(&self.id, storage_type).await?;
                target.index = Some(index);
                index
            }
        };

        let rows: Vec<Sample> = self
            .samples
            .iter()
            .filter_map(|sample| match index.storage_type.coerce(&sample.val) {
                Some(val) => Some(Sample {
                    val,
                    ..sample.clone()
                }),
                None => {
                    tracing::warn!(
                        series = %self.id,
                        ts = sample.ts,
                        storage_type = %index.storage_type,
                        "Dropped value that does not convert to the series type"
                    );
                    None
                }
            })
            .collect();

        let written = self.backend.insert(index, &rows).await?;
        self.apply_retention(target, index).await;
        Ok(written)
    }

    async fn apply_retention(&self, target: &mut FlushTarget, index: SeriesIndex) {
        if self.retention.is_zero() {
            return;
        }
        if target
            .last_retention_check
            .is_some_and(|checked| checked.elapsed() < self.retention_check_interval)
        {
            return;
        }
        target.last_retention_check = Some(Instant::now());

        let cutoff = now_ms() - self.retention.as_millis() as i64;
        if let Err(e) = self.backend.apply_retention(index, cutoff).await {
            tracing::warn!(series = %self.id, error = %e, "Retention cleanup failed");
        } else {
            tracing::debug!(series = %self.id, cutoff, "Retention applied");
        }
    }
}
