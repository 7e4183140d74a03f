//! Bucketing and per-bucket reduction.
//!
//! Slot 0 is the pre-range bucket, `1..=n` the in-range buckets and `n + 1`
//! the post-range bucket. Samples further outside than one bucket width are
//! kept aside and stand in for an empty pre/post bucket, so border
//! interpolation always has a seed.

use crate::storage::{Sample, Value};

use super::request::{AggregateMode, Interval, Plan};

/// Where a timestamp falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// More than one bucket before the window.
    TooEarly,
    Index(usize),
    /// More than one bucket after the window.
    TooLate,
    /// Inside the window but between explicit intervals.
    Gap,
}

/// Bucket boundaries of a plan.
#[derive(Debug, Clone)]
pub enum Layout {
    Uniform {
        start: i64,
        end: i64,
        step: i64,
        max_index: i64,
    },
    Intervals(Vec<Interval>),
}

impl Layout {
    pub fn from_plan(plan: &Plan) -> Self {
        if plan.intervals.is_empty() {
            Self::Uniform {
                start: plan.start,
                end: plan.end,
                step: plan.step,
                max_index: plan.max_index,
            }
        } else {
            Self::Intervals(plan.intervals.clone())
        }
    }

    /// Number of in-range buckets.
    pub fn len(&self) -> usize {
        match self {
            Self::Uniform { max_index, .. } => (*max_index + 1) as usize,
            Self::Intervals(intervals) => intervals.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket slot of `ts`.
    pub fn slot(&self, ts: i64) -> Slot {
        let post = self.len() + 1;
        match self {
            Self::Uniform {
                start,
                end,
                step,
                max_index,
            } => {
                if ts < *start {
                    if ts >= start - step { Slot::Index(0) } else { Slot::TooEarly }
                } else if ts > *end {
                    if ts <= end + step { Slot::Index(post) } else { Slot::TooLate }
                } else {
                    let index = (ts - start).div_euclid(*step) + 1;
                    Slot::Index(index.min(max_index + 1) as usize)
                }
            }
            Self::Intervals(intervals) => {
                let (Some(first), Some(last)) = (intervals.first(), intervals.last()) else {
                    return Slot::Gap;
                };
                if ts < first.start {
                    return if ts >= first.start - first.width() {
                        Slot::Index(0)
                    } else {
                        Slot::TooEarly
                    };
                }
                if ts >= last.end {
                    // the window end is inclusive, like the uniform layout
                    if ts == last.end {
                        return Slot::Index(intervals.len());
                    }
                    return if ts <= last.end + last.width() {
                        Slot::Index(post)
                    } else {
                        Slot::TooLate
                    };
                }
                let i = intervals.partition_point(|iv| iv.start <= ts);
                match i.checked_sub(1).map(|i| (i, &intervals[i])) {
                    Some((i, iv)) if ts < iv.end => Slot::Index(i + 1),
                    _ => Slot::Gap,
                }
            }
        }
    }

    /// `[from, to)` of a slot, with the last in-range bucket ending at the window end.
    pub fn bounds(&self, index: usize) -> (i64, i64) {
        let post = self.len() + 1;
        match self {
            Self::Uniform {
                start, end, step, ..
            } => {
                if index == 0 {
                    (start - step, *start)
                } else if index == post {
                    (*end, end + step)
                } else {
                    let from = start + (index as i64 - 1) * step;
                    (from, (from + step).min(*end))
                }
            }
            Self::Intervals(intervals) => {
                let first = intervals.first().copied().unwrap_or(Interval { start: 0, end: 0 });
                let last = intervals.last().copied().unwrap_or(first);
                if index == 0 {
                    (first.start - first.width(), first.start)
                } else if index == post {
                    (last.end, last.end + last.width())
                } else {
                    let iv = intervals[index - 1];
                    (iv.start, iv.end)
                }
            }
        }
    }

    /// Timestamp of a bucket's aggregated point.
    pub fn midpoint(&self, index: usize) -> i64 {
        let (from, to) = self.bounds(index);
        from + (to - from) / 2
    }
}

/// Samples sorted into slots.
#[derive(Debug, Default)]
pub struct Buckets<'a> {
    /// `len + 2` slots.
    pub slots: Vec<Vec<&'a Sample>>,
    /// Nearest sample before the pre-range bucket.
    pub too_early: Option<&'a Sample>,
    /// Nearest sample after the post-range bucket.
    pub too_late: Option<&'a Sample>,
}

impl<'a> Buckets<'a> {
    /// Distribute samples (sorted by `ts`) into the layout's slots.
    pub fn collect(layout: &Layout, samples: &'a [Sample]) -> Self {
        let mut buckets = Self {
            slots: vec![Vec::new(); layout.len() + 2],
            too_early: None,
            too_late: None,
        };
        for sample in samples {
            match layout.slot(sample.ts) {
                Slot::Index(i) => buckets.slots[i].push(sample),
                Slot::TooEarly => buckets.too_early = Some(sample),
                Slot::TooLate => {
                    if buckets.too_late.is_none() {
                        buckets.too_late = Some(sample);
                    }
                }
                Slot::Gap => {}
            }
        }
        buckets
    }
}

/// Numeric view of a value; non-numeric text does not take part.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        other => other.as_f64(),
    }
}

/// Running reduction of one bucket.
#[derive(Debug, Default)]
struct Accumulator {
    count: usize,
    sum: f64,
    min: Option<(i64, f64)>,
    max: Option<(i64, f64)>,
    first: Option<(i64, f64)>,
    last: Option<(i64, f64)>,
    values: Vec<f64>,
}

impl Accumulator {
    fn add(&mut self, sample: &Sample) {
        let Some(v) = numeric(&sample.val) else {
            return;
        };
        self.count += 1;
        self.sum += v;
        if self.min.is_none_or(|(_, m)| v < m) {
            self.min = Some((sample.ts, v));
        }
        if self.max.is_none_or(|(_, m)| v > m) {
            self.max = Some((sample.ts, v));
        }
        if self.first.is_none() {
            self.first = Some((sample.ts, v));
        }
        self.last = Some((sample.ts, v));
        self.values.push(v);
    }
}

/// Sort with NaN first, then `idx = n*q`: an integral index averages
/// `list[idx-1]` and `list[idx]`, otherwise `list[ceil(idx-1)]`.
pub fn quantile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| match (a.is_nan(), b.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        (false, false) => a.total_cmp(b),
    });
    let last = values.len() - 1;
    let idx = values.len() as f64 * q;
    if idx.fract() == 0.0 {
        let i = idx as usize;
        let lower = values[i.saturating_sub(1).min(last)];
        let upper = values[i.min(last)];
        Some((lower + upper) / 2.0)
    } else {
        Some(values[((idx - 1.0).ceil().max(0.0) as usize).min(last)])
    }
}

/// Reduce one slot. Empty slots yield nothing; all-null slots yield a null at `ts`.
pub fn reduce(mode: AggregateMode, q: f64, ts: i64, samples: &[&Sample]) -> Vec<Sample> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut acc = Accumulator::default();
    for sample in samples {
        acc.add(sample);
    }
    if acc.count == 0 {
        return vec![Sample::null(ts)];
    }

    let value = match mode {
        AggregateMode::Max => acc.max.map(|(_, v)| v),
        AggregateMode::Min => acc.min.map(|(_, v)| v),
        AggregateMode::Average => Some(acc.sum / acc.count as f64),
        AggregateMode::Total => Some(acc.sum),
        AggregateMode::Count => Some(acc.count as f64),
        AggregateMode::Percentile | AggregateMode::Quantile => quantile(&mut acc.values, q),
        AggregateMode::Minmax => return minmax_points(&acc),
        AggregateMode::Integral
        | AggregateMode::IntegralTotal
        | AggregateMode::None
        | AggregateMode::Onchange => None,
    };
    value.map(|v| Sample::new(ts, v)).into_iter().collect()
}

/// Start, min, max and end of a bucket, chronological and de-duplicated.
fn minmax_points(acc: &Accumulator) -> Vec<Sample> {
    let mut points: Vec<(i64, f64)> = [acc.first, acc.min, acc.max, acc.last]
        .into_iter()
        .flatten()
        .collect();
    points.sort_by_key(|(ts, _)| *ts);
    points.dedup_by_key(|(ts, _)| *ts);
    points.into_iter().map(|(ts, v)| Sample::new(ts, v)).collect()
}

/// Bucketed aggregation for the statistical modes.
pub fn aggregate_buckets(plan: &Plan, samples: &[Sample]) -> Vec<Sample> {
    let layout = Layout::from_plan(plan);
    let buckets = Buckets::collect(&layout, samples);
    let post = layout.len() + 1;

    let mut out = Vec::new();
    for (index, slot) in buckets.slots.iter().enumerate() {
        let substitute = match index {
            0 => buckets.too_early,
            i if i == post => buckets.too_late,
            _ => None,
        };
        match (slot.is_empty(), substitute) {
            (true, Some(sample)) => {
                let own_ts = sample.ts;
                out.extend(reduce(plan.mode, plan.q, own_ts, &[sample]));
            }
            _ => out.extend(reduce(plan.mode, plan.q, layout.midpoint(index), slot)),
        }
    }
    out
}
