//! Trapezoidal integrals.
//!
//! Null and non-numeric samples do not take part; the neighbouring values
//! span the gap.

use crate::storage::{Sample, Value};

use super::bucket::Layout;
use super::request::{IntegralInterpolation, Plan};

type Point = (i64, f64);

fn numeric_points(samples: &[Sample]) -> Vec<Point> {
    samples
        .iter()
        .filter_map(|s| match &s.val {
            Value::Null => None,
            other => other.as_f64().map(|v| (s.ts, v)),
        })
        .collect()
}

fn lerp(a: Point, b: Point, ts: i64) -> f64 {
    if a.0 == b.0 {
        return a.1;
    }
    a.1 + (b.1 - a.1) * (ts - a.0) as f64 / (b.0 - a.0) as f64
}

/// Area between two consecutive points.
///
/// Linear: rectangle at the smaller magnitude plus a triangle when both
/// values share a sign, two triangles split at the zero crossing otherwise.
/// No interpolation: the first value holds for the whole segment.
pub fn segment_area(from: Point, to: Point, interpolation: IntegralInterpolation) -> f64 {
    let (t0, v0) = from;
    let (t1, v1) = to;
    let dt = (t1 - t0) as f64;
    if dt <= 0.0 {
        return 0.0;
    }
    match interpolation {
        IntegralInterpolation::None => v0 * dt,
        IntegralInterpolation::Linear if v0 * v1 >= 0.0 => {
            let (near, far) = if v0.abs() <= v1.abs() { (v0, v1) } else { (v1, v0) };
            near * dt + (far - near) * dt / 2.0
        }
        IntegralInterpolation::Linear => {
            let crossing = dt * v0.abs() / (v0.abs() + v1.abs());
            v0 * crossing / 2.0 + v1 * (dt - crossing) / 2.0
        }
    }
}

fn area(points: &[Point], interpolation: IntegralInterpolation) -> f64 {
    points
        .windows(2)
        .map(|pair| segment_area(pair[0], pair[1], interpolation))
        .sum()
}

/// Per-bucket integral. Boundary values come from the nearest known
/// points outside the bucket, even across empty buckets.
pub fn aggregate_integral(plan: &Plan, samples: &[Sample]) -> Vec<Sample> {
    let layout = Layout::from_plan(plan);
    let points = numeric_points(samples);
    let linear = plan.interpolation == IntegralInterpolation::Linear;

    let mut out = Vec::new();
    for index in 1..=layout.len() {
        let (from, to) = layout.bounds(index);
        let lo = points.partition_point(|p| p.0 < from);
        let hi = if index == layout.len() {
            points.partition_point(|p| p.0 <= to)
        } else {
            points.partition_point(|p| p.0 < to)
        };
        let (Some(&first), Some(&last)) = (points[lo..hi].first(), points[lo..hi].last()) else {
            continue;
        };
        let prev = lo.checked_sub(1).map(|i| points[i]);
        let next = points.get(hi).copied();

        let mut segment = Vec::with_capacity(hi - lo + 2);
        if first.0 > from
            && let Some(prev) = prev
        {
            let v = if linear { lerp(prev, first, from) } else { prev.1 };
            segment.push((from, v));
        }
        segment.extend_from_slice(&points[lo..hi]);
        if last.0 < to {
            let v = match next {
                Some(next) if linear => lerp(last, next, to),
                _ => last.1,
            };
            segment.push((to, v));
        }

        let value = area(&segment, plan.interpolation) / plan.integral_unit;
        out.push(Sample::new(layout.midpoint(index), value));
    }
    out
}

/// One integral over the whole window, reported at `start`.
pub fn aggregate_integral_total(plan: &Plan, samples: &[Sample]) -> Vec<Sample> {
    let points = numeric_points(samples);
    let (start, end) = (plan.start, plan.end);
    let linear = plan.interpolation == IntegralInterpolation::Linear;

    let lo = points.partition_point(|p| p.0 < start);
    let hi = points.partition_point(|p| p.0 <= end);
    let inside = &points[lo..hi];
    let before = lo.checked_sub(1).map(|i| points[i]);
    let after = points.get(hi).copied();

    let mut segment = Vec::with_capacity(inside.len() + 2);
    match (inside.first(), inside.last()) {
        (Some(&first), Some(&last)) => {
            if first.0 > start {
                let v = match before {
                    Some(before) if linear => lerp(before, first, start),
                    Some(before) => before.1,
                    None if linear && inside.len() >= 2 => lerp(inside[0], inside[1], start),
                    None => first.1,
                };
                segment.push((start, v));
            }
            segment.extend_from_slice(inside);
            if last.0 < end {
                let n = inside.len();
                let v = match after {
                    Some(after) if linear => lerp(last, after, end),
                    _ if linear && n >= 2 => lerp(inside[n - 2], inside[n - 1], end),
                    _ => last.1,
                };
                segment.push((end, v));
            }
        }
        _ => match (before, after) {
            (Some(before), Some(after)) if linear => {
                segment.push((start, lerp(before, after, start)));
                segment.push((end, lerp(before, after, end)));
            }
            (Some(before), _) => {
                segment.push((start, before.1));
                segment.push((end, before.1));
            }
            _ => return Vec::new(),
        },
    }

    let value = area(&segment, plan.interpolation) / plan.integral_unit;
    vec![Sample::new(start, value)]
}
