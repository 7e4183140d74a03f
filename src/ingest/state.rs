//! Per-series regulator state and outcomes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::SeriesConfig;
use crate::storage::Sample;

/// Mutable regulator state of one enabled series.
#[derive(Debug, Clone)]
pub struct SeriesState {
    pub id: String,
    pub config: Arc<SeriesConfig>,
    /// Last committed sample.
    pub last: Option<Sample>,
    /// Timestamp of the last committed sample, relogs included.
    pub last_log_time: Option<i64>,
    /// Latest unchanged sample that was not written.
    pub skipped: Option<Sample>,
    /// Latest sample seen inside a running debounce window.
    pub pending: Option<Sample>,
}

impl SeriesState {
    pub fn new(id: impl Into<String>, config: Arc<SeriesConfig>) -> Self {
        Self {
            id: id.into(),
            config,
            last: None,
            last_log_time: None,
            skipped: None,
            pending: None,
        }
    }

    /// Swap in a new policy. Pending and skipped samples survive.
    pub fn reconfigure(&mut self, config: Arc<SeriesConfig>) {
        self.config = config;
    }
}

/// Why a sample was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Arrived within `block_time` of the last stored sample.
    Blocked,
    /// Null or zero with `ignore_zero`.
    Zero,
    BelowThreshold,
    AboveThreshold,
}

/// What happened to an ingested sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Written to the buffer, together with any remembered skipped sample.
    Committed { written: usize },
    /// Held until the debounce window settles.
    Debounced,
    /// Unchanged value, remembered but not written.
    Skipped,
    /// Re-delivery of the event already pending.
    Ignored,
    Dropped { reason: DropReason },
}

/// Side effect the engine applies after a regulator decision, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append to the write buffer.
    Write(Sample),
    ArmDebounce(Duration),
    CancelDebounce,
    ArmRelog(Duration),
    CancelRelog,
}

/// Regulator decision: the outcome plus the effects to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub outcome: IngestOutcome,
    pub effects: Vec<Effect>,
}

impl Verdict {
    pub fn new(outcome: IngestOutcome, effects: Vec<Effect>) -> Self {
        Self { outcome, effects }
    }

    /// Samples this verdict writes.
    pub fn writes(&self) -> impl Iterator<Item = &Sample> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Write(sample) => Some(sample),
            _ => None,
        })
    }
}
