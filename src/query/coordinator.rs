//! Merges buffered samples with persisted rows and aggregates them.

use crate::aggregate::{HistoryPoint, Plan, aggregate};
use crate::storage::{Backend, CacheSnapshot, RangeQuery, SeriesIndex};

use super::QueryError;

/// Everything the engine knows about a series at query time.
#[derive(Debug, Clone, Default)]
pub struct SeriesView {
    pub id: String,
    /// Buffered samples inside the window.
    pub cache: CacheSnapshot,
    /// Backend identity, when already resolved.
    pub index: Option<SeriesIndex>,
    /// Whether the series is currently enabled.
    pub enabled: bool,
}

/// Answer one history query.
///
/// # Errors
/// `UnknownSeries` when the series is neither enabled nor registered,
/// `Storage` when the backend fetch fails.
pub async fn run(
    backend: &Backend,
    view: SeriesView,
    plan: &Plan,
) -> Result<Vec<HistoryPoint>, QueryError> {
    let SeriesView {
        id,
        cache,
        index,
        enabled,
    } = view;
    let raw = plan.mode.is_raw();

    if raw
        && plan.return_newest_entries
        && let Some(count) = plan.count
        && cache.samples.len() >= count
    {
        tracing::trace!(series = %id, count, "History served from buffer");
        return Ok(aggregate(&cache.samples, plan, &id));
    }

    let index = match index {
        Some(index) => Some(index),
        None => backend.lookup(&id).await?,
    };

    let earliest_cached = cache.samples.iter().map(|s| s.ts).min();
    let overlap_from = earliest_cached.filter(|_| cache.in_flight);

    let mut rows = match index {
        Some(index) => {
            let end = match overlap_from {
                Some(earliest) => earliest.saturating_sub(1).min(plan.end).max(plan.start),
                None => plan.end,
            };
            let query = RangeQuery {
                start: Some(plan.start),
                end,
                count: if raw { plan.count } else { None },
                return_newest_entries: plan.return_newest_entries,
                border_rows: true,
            };
            backend.history(index, &query).await?
        }
        None if enabled => Vec::new(),
        None => return Err(QueryError::UnknownSeries(id)),
    };

    if let Some(earliest) = overlap_from {
        rows.retain(|row| row.ts < earliest);
    }

    let mut merged = if plan.return_newest_entries {
        let mut merged = cache.samples;
        merged.extend(rows);
        merged
    } else {
        rows.extend(cache.samples);
        rows
    };
    merged.sort_by_key(|s| s.ts);

    if raw && plan.count.is_some() && !plan.return_newest_entries {
        let leading = merged.partition_point(|s| s.ts < plan.start);
        merged.drain(..leading);
    }

    tracing::trace!(series = %id, samples = merged.len(), mode = %plan.mode, "History merged");
    Ok(aggregate(&merged, plan, &id))
}
