//! Ingestion decisions.
//!
//! Pure functions over [`SeriesState`]. They never touch timers or the
//! buffer directly; every side effect is returned as an [`Effect`] for the
//! engine to apply in order.
//!
//! Decision order for a sample, first match wins:
//! 1. numeric text becomes a number (unless the series stores strings)
//! 2. debounce re-delivery is ignored, any other sample restarts the window
//! 3. `block_time`
//! 4. `ignore_zero`, `ignore_below_number`, `ignore_above_number`
//! 5. `changes_only` (with the optional relog heartbeat)
//! 6. `changes_min_delta`
//! 7. counter reset
//! 8. null transitions bypass debounce
//! 9. debounce or commit

use crate::storage::{Sample, StorageType, Value};

use super::state::{DropReason, Effect, IngestOutcome, SeriesState, Verdict};

/// Offset of the null gap markers from the surrounding samples, in ms.
pub const NULL_MARKER_OFFSET_MS: i64 = 2;

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => a == b,
    }
}

/// A sample inside a running debounce window that carries no new information.
fn same_event(pending: &Sample, sample: &Sample) -> bool {
    match sample.lc {
        Some(lc) => lc != sample.ts,
        None => same_value(&pending.val, &sample.val),
    }
}

/// The sample repeats the last committed value.
fn unchanged(last: &Sample, sample: &Sample) -> bool {
    if last.val.is_null() != sample.val.is_null() {
        return false;
    }
    match sample.lc {
        Some(lc) => lc != sample.ts,
        None => same_value(&last.val, &sample.val),
    }
}

/// Run one sample through the series policy.
///
/// `timed_relog` marks re-assertions produced by the relog timer; they skip
/// `block_time`, change detection and debounce.
pub fn regulate(state: &mut SeriesState, mut sample: Sample, timed_relog: bool) -> Verdict {
    let config = state.config.clone();
    let mut effects = Vec::new();

    if config.storage_type != Some(StorageType::String) {
        sample.val = sample.val.coerce_numeric_text();
    }

    let mut debounce_running = false;
    if let Some(pending) = &state.pending {
        if !timed_relog && same_event(pending, &sample) {
            tracing::trace!(series = %state.id, ts = sample.ts, "Ignored re-delivered event");
            return Verdict::new(IngestOutcome::Ignored, effects);
        }
        state.pending = None;
        effects.push(Effect::CancelDebounce);
        debounce_running = true;
    }

    if !timed_relog
        && !debounce_running
        && !config.block_time.is_zero()
        && let Some(last) = &state.last
        && sample.ts - last.ts < config.block_ms()
    {
        tracing::trace!(series = %state.id, ts = sample.ts, "Dropped inside block time");
        return Verdict::new(IngestOutcome::Dropped { reason: DropReason::Blocked }, effects);
    }

    let zero = match sample.val {
        Value::Null => true,
        Value::Number(n) => n == 0.0,
        _ => false,
    };
    if config.ignore_zero && zero {
        return Verdict::new(IngestOutcome::Dropped { reason: DropReason::Zero }, effects);
    }
    if let Value::Number(n) = sample.val {
        if config.ignore_below_number.is_some_and(|below| n < below) {
            return Verdict::new(
                IngestOutcome::Dropped { reason: DropReason::BelowThreshold },
                effects,
            );
        }
        if config.ignore_above_number.is_some_and(|above| n > above) {
            return Verdict::new(
                IngestOutcome::Dropped { reason: DropReason::AboveThreshold },
                effects,
            );
        }
    }

    let mut force = timed_relog;

    if config.changes_only
        && !timed_relog
        && let Some(last) = &state.last
    {
        if unchanged(last, &sample) {
            let relog_ms = config.relog_ms();
            let heartbeat_due = relog_ms > 0
                && state
                    .last_log_time
                    .is_none_or(|logged| (logged - sample.ts).abs() >= relog_ms);
            if !heartbeat_due {
                tracing::trace!(series = %state.id, ts = sample.ts, "Skipped unchanged value");
                state.skipped = Some(sample);
                return Verdict::new(IngestOutcome::Skipped, effects);
            }
            force = true;
        } else if config.changes_min_delta > 0.0
            && let (Value::Number(prev), Value::Number(next)) = (&last.val, &sample.val)
            && (next - prev).abs() < config.changes_min_delta
        {
            tracing::trace!(series = %state.id, ts = sample.ts, "Skipped change below min delta");
            state.skipped = Some(sample);
            return Verdict::new(IngestOutcome::Skipped, effects);
        }
    }

    let mut batch = Vec::with_capacity(2);
    if config.is_counter
        && let Some(last) = &state.last
        && let (Value::Number(prev), Value::Number(next)) = (&last.val, &sample.val)
        && next < prev
    {
        tracing::debug!(series = %state.id, prev, next, "Counter reset");
        if sample.ts - 1 > last.ts {
            let mut carried = last.clone();
            carried.ts = sample.ts - 1;
            carried.lc = None;
            batch.push(carried);
        }
        force = true;
    }

    let null_transition = match &state.last {
        Some(last) => last.val.is_null() != sample.val.is_null(),
        None => sample.val.is_null(),
    };
    if null_transition {
        force = true;
    }

    if !config.debounce_time.is_zero() && !force {
        state.pending = Some(sample);
        effects.push(Effect::ArmDebounce(config.debounce_time));
        return Verdict::new(IngestOutcome::Debounced, effects);
    }

    batch.push(sample);
    let written = commit(state, batch, &mut effects);
    Verdict::new(IngestOutcome::Committed { written }, effects)
}

/// Write `batch` (preceded by the remembered skipped sample) and re-arm relog.
fn commit(state: &mut SeriesState, batch: Vec<Sample>, effects: &mut Vec<Effect>) -> usize {
    let config = state.config.clone();
    let relog = config.changes_only && !config.changes_relog_interval.is_zero();
    if relog {
        effects.push(Effect::CancelRelog);
    }

    let mut written = 0;
    let first_ts = batch.first().map(|s| s.ts);
    if let Some(skipped) = state.skipped.take()
        && !config.disable_skipped_value_logging
        && first_ts.is_none_or(|ts| skipped.ts < ts)
    {
        effects.push(Effect::Write(skipped));
        written += 1;
    }

    for sample in batch {
        state.last_log_time = Some(sample.ts);
        state.last = Some(sample.clone());
        effects.push(Effect::Write(sample));
        written += 1;
    }

    if relog {
        effects.push(Effect::ArmRelog(config.changes_relog_interval));
    }
    written
}

/// The debounce window settled: commit the latest sample seen in it.
pub fn debounce_elapsed(state: &mut SeriesState) -> Verdict {
    let mut effects = Vec::new();
    match state.pending.take() {
        Some(sample) => {
            let written = commit(state, vec![sample], &mut effects);
            Verdict::new(IngestOutcome::Committed { written }, effects)
        }
        None => Verdict::new(IngestOutcome::Ignored, effects),
    }
}

/// The relog timer fired: re-assert the skipped or last value at `now`.
///
/// Nothing happens while a debounce window is open; its commit re-arms relog.
pub fn relog_due(state: &mut SeriesState, now: i64, source: &str) -> Verdict {
    if state.pending.is_some() {
        return Verdict::new(IngestOutcome::Ignored, Vec::new());
    }

    let base = match state.skipped.take() {
        Some(skipped) => skipped,
        None => match &state.last {
            Some(last) if !last.val.is_null() => last.clone(),
            _ => return Verdict::new(IngestOutcome::Ignored, Vec::new()),
        },
    };

    let sample = Sample {
        ts: now,
        lc: None,
        source: Some(source.to_string()),
        ..base
    };
    tracing::trace!(series = %state.id, ts = now, "Relog");
    regulate(state, sample, true)
}

/// Null marker written when a series with `write_nulls` is enabled.
pub fn start_marker(now: i64) -> Sample {
    Sample::null(now - NULL_MARKER_OFFSET_MS)
}

/// Everything a series still has to write before its state is dropped.
///
/// Commits the pending debounce sample, the remembered skipped sample and,
/// with `write_nulls`, a null terminator after the last committed sample.
pub fn finish(state: &mut SeriesState, now: i64) -> Vec<Sample> {
    let mut effects = Vec::new();
    if let Some(pending) = state.pending.take() {
        commit(state, vec![pending], &mut effects);
    }

    let mut out: Vec<Sample> = effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Write(sample) => Some(sample),
            _ => None,
        })
        .collect();

    if let Some(skipped) = state.skipped.take()
        && !state.config.disable_skipped_value_logging
    {
        out.push(skipped);
    }

    if state.config.write_nulls {
        let after_last = out
            .iter()
            .map(|s| s.ts)
            .chain(state.last.as_ref().map(|s| s.ts))
            .max()
            .map_or(now, |ts| ts + NULL_MARKER_OFFSET_MS);
        out.push(Sample::null(now.max(after_last)));
    }

    out.sort_by_key(|s| s.ts);
    out
}
