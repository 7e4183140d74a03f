//! Aggregation Engine
//!
//! Pure reduction of a time-ordered sample sequence into history points.
//!
//! # Components
//!
//! - [`AggregationRequest`] / [`Plan`]: caller request and its validated form
//! - [`aggregate`]: dispatch on [`AggregateMode`] followed by [`beautify`]
//! - bucketing with pre/post slots, statistical reductions, trapezoidal integrals

mod beautify;
mod bucket;
mod integral;
mod request;

pub use beautify::{HistoryPoint, beautify};
pub use bucket::{Layout, Slot, quantile};
pub use integral::segment_area;
pub use request::{
    AggregateMode, AggregationRequest, DAY_MS, DEFAULT_INTEGRAL_UNIT_MS, IntegralInterpolation,
    Interval, NullPolicy, Plan,
};

use crate::storage::Sample;

/// Raw samples without consecutive repeats.
fn onchange(samples: &[Sample]) -> Vec<Sample> {
    let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
    for sample in samples {
        if out.last().is_none_or(|last| last.val != sample.val) {
            out.push(sample.clone());
        }
    }
    out
}

/// Reduce `samples` according to `plan` and shape the result.
///
/// `id` tags the points when the plan asks for it.
pub fn aggregate(samples: &[Sample], plan: &Plan, id: &str) -> Vec<HistoryPoint> {
    let sorted;
    let samples = if samples.is_sorted_by_key(|s| s.ts) {
        samples
    } else {
        let mut owned = samples.to_vec();
        owned.sort_by_key(|s| s.ts);
        sorted = owned;
        &sorted
    };

    let points = match plan.mode {
        AggregateMode::None => samples.to_vec(),
        AggregateMode::Onchange => onchange(samples),
        AggregateMode::Integral => integral::aggregate_integral(plan, samples),
        AggregateMode::IntegralTotal => integral::aggregate_integral_total(plan, samples),
        _ => bucket::aggregate_buckets(plan, samples),
    };
    beautify(points, plan, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;

    fn plan(mode: AggregateMode, start: i64, end: i64, step: i64) -> Plan {
        AggregationRequest {
            start: Some(start),
            end: Some(end),
            step: Some(step),
            aggregate: mode,
            ..Default::default()
        }
        .normalize(0, 2000, 500)
        .unwrap()
    }

    #[test]
    fn test_onchange_drops_repeats() {
        let samples = vec![
            Sample::new(10, 1.0),
            Sample::new(20, 1.0),
            Sample::new(30, 2.0),
            Sample::null(40),
            Sample::null(50),
            Sample::new(60, 2.0),
        ];
        let out = aggregate(&samples, &plan(AggregateMode::Onchange, 0, 100, 10), "s");
        let ts: Vec<i64> = out.iter().map(|p| p.sample.ts).collect();
        assert_eq!(ts, vec![10, 30, 40, 60]);
    }

    #[test]
    fn test_raw_keeps_metadata_and_sorts() {
        let samples = vec![
            Sample::new(30, 3.0),
            Sample::new(10, 1.0).with_ack(true),
            Sample::new(20, 2.0),
        ];
        let out = aggregate(&samples, &plan(AggregateMode::None, 0, 100, 10), "s");
        let ts: Vec<i64> = out.iter().map(|p| p.sample.ts).collect();
        assert_eq!(ts, vec![10, 20, 30]);
        assert_eq!(out[0].sample.ack, Some(true));
        assert!(out[0].id.is_none());
    }

    #[test]
    fn test_minmax_never_exceeds_four_points_per_bucket() {
        let samples: Vec<Sample> = (0..100)
            .map(|i| Sample::new(i * 10, ((i * 37) % 11) as f64))
            .collect();
        let p = AggregationRequest {
            start: Some(0),
            end: Some(999),
            step: Some(100),
            aggregate: AggregateMode::Minmax,
            remove_border_values: true,
            ..Default::default()
        }
        .normalize(0, 2000, 500)
        .unwrap();
        let out = aggregate(&samples, &p, "s");

        for bucket in 0..10 {
            let in_bucket: Vec<&HistoryPoint> = out
                .iter()
                .filter(|pt| pt.sample.ts / 100 == bucket)
                .collect();
            assert!(!in_bucket.is_empty() && in_bucket.len() <= 4);
            assert_eq!(in_bucket[0].sample.ts, bucket * 100);
            assert_eq!(in_bucket.last().unwrap().sample.ts, bucket * 100 + 90);
        }
    }

    #[test]
    fn test_average_end_to_end_with_borders() {
        let samples = vec![
            Sample::new(0, 0.0),
            Sample::new(1100, 10.0),
            Sample::new(1900, 20.0),
            Sample::new(3000, 30.0),
        ];
        let out = aggregate(&samples, &plan(AggregateMode::Average, 1000, 2000, 1000), "s");
        let shape: Vec<(i64, Value)> = out.iter().map(|p| (p.sample.ts, p.sample.val.clone())).collect();
        assert_eq!(shape[1], (1500, Value::Number(15.0)));
        assert_eq!(shape.first().unwrap().0, 1000);
        assert_eq!(shape.last().unwrap().0, 2000);
    }
}
