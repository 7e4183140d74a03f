//! Result shaping applied after every aggregation.
//!
//! Clips to `[start, end]`, synthesizes border points from the nearest
//! points outside the window, applies the null policy, truncates raw
//! results to `count`, rounds and tags.

use serde::Serialize;

use crate::storage::{Sample, Value};

use super::request::{AggregateMode, NullPolicy, Plan};

/// One point of a history response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    #[serde(flatten)]
    pub sample: Sample,
    /// Series id, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Value at `ts` between two points. Nulls stay null; text holds the left value.
fn interpolate(left: &Sample, right: &Sample, ts: i64) -> Value {
    if left.val.is_null() || right.val.is_null() {
        return Value::Null;
    }
    match (left.val.as_f64(), right.val.as_f64()) {
        (Some(a), Some(b)) if right.ts != left.ts => {
            let ratio = (ts - left.ts) as f64 / (right.ts - left.ts) as f64;
            Value::Number(a + (b - a) * ratio)
        }
        _ => left.val.clone(),
    }
}

fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

pub fn beautify(mut points: Vec<Sample>, plan: &Plan, id: &str) -> Vec<HistoryPoint> {
    let (start, end) = (plan.start, plan.end);
    points.sort_by_key(|p| p.ts);

    let mut before: Option<Sample> = None;
    let mut after: Option<Sample> = None;
    let mut window = Vec::with_capacity(points.len() + 2);
    for point in points {
        if point.ts < start {
            before = Some(point);
        } else if point.ts > end {
            if after.is_none() {
                after = Some(point);
            }
        } else {
            window.push(point);
        }
    }

    let borders = !plan.remove_border_values
        && !matches!(plan.mode, AggregateMode::None | AggregateMode::IntegralTotal);
    if borders {
        let step_wise = plan.mode == AggregateMode::Onchange;

        if window.first().is_none_or(|first| first.ts > start)
            && let Some(before) = &before
        {
            let val = match window.first().or(after.as_ref()) {
                Some(next) if !step_wise => interpolate(before, next, start),
                _ => before.val.clone(),
            };
            window.insert(0, Sample::new(start, val));
        }

        if window.last().is_none_or(|last| last.ts < end)
            && let Some(after) = &after
            && let Some(last) = window.last()
        {
            let val = if step_wise {
                last.val.clone()
            } else {
                interpolate(last, after, end)
            };
            window.push(Sample::new(end, val));
        }
    }

    match plan.null_policy {
        NullPolicy::Keep => {}
        NullPolicy::Drop => window.retain(|p| !p.val.is_null()),
        NullPolicy::Zero => {
            for point in window.iter_mut().filter(|p| p.val.is_null()) {
                point.val = Value::Number(0.0);
            }
        }
        NullPolicy::Previous => {
            let mut previous = before.map(|b| b.val).filter(|v| !v.is_null());
            for point in &mut window {
                if point.val.is_null() {
                    if let Some(value) = &previous {
                        point.val = value.clone();
                    }
                } else {
                    previous = Some(point.val.clone());
                }
            }
        }
    }

    if plan.mode.is_raw()
        && let Some(count) = plan.count
        && window.len() > count
    {
        if plan.return_newest_entries {
            window.drain(..window.len() - count);
        } else {
            window.truncate(count);
        }
    }

    window
        .into_iter()
        .map(|mut sample| {
            if let (Some(digits), Value::Number(n)) = (plan.round, &sample.val) {
                sample.val = Value::Number(round_to(*n, digits));
            }
            HistoryPoint {
                sample,
                id: plan.add_id.then(|| id.to_string()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::request::AggregationRequest;
    use serde_json::json;

    fn plan(request: AggregationRequest) -> Plan {
        request.normalize(0, 2000, 500).unwrap()
    }

    fn window(mode: AggregateMode) -> AggregationRequest {
        AggregationRequest {
            start: Some(1000),
            end: Some(2000),
            step: Some(1000),
            aggregate: mode,
            ..Default::default()
        }
    }

    fn shape(points: &[HistoryPoint]) -> Vec<(i64, Value)> {
        points.iter().map(|p| (p.sample.ts, p.sample.val.clone())).collect()
    }

    #[test]
    fn test_interpolated_borders() {
        let points = vec![
            Sample::new(500, 0.0),
            Sample::new(1500, 10.0),
            Sample::new(2500, 20.0),
        ];
        let out = beautify(points, &plan(window(AggregateMode::Average)), "s");
        assert_eq!(
            shape(&out),
            vec![
                (1000, Value::Number(5.0)),
                (1500, Value::Number(10.0)),
                (2000, Value::Number(15.0)),
            ]
        );
    }

    #[test]
    fn test_remove_border_values() {
        let points = vec![Sample::new(500, 0.0), Sample::new(1500, 10.0), Sample::new(2500, 20.0)];
        let request = AggregationRequest {
            remove_border_values: true,
            ..window(AggregateMode::Average)
        };
        let out = beautify(points, &plan(request), "s");
        assert_eq!(shape(&out), vec![(1500, Value::Number(10.0))]);
    }

    #[test]
    fn test_step_wise_borders_for_onchange() {
        let points = vec![Sample::new(500, 1.0), Sample::new(1500, 2.0), Sample::new(2500, 3.0)];
        let out = beautify(points.clone(), &plan(window(AggregateMode::Onchange)), "s");
        assert_eq!(
            shape(&out),
            vec![
                (1000, Value::Number(1.0)),
                (1500, Value::Number(2.0)),
                (2000, Value::Number(2.0)),
            ]
        );

        let out = beautify(points, &plan(window(AggregateMode::None)), "s");
        assert_eq!(shape(&out), vec![(1500, Value::Number(2.0))]);
    }

    #[test]
    fn test_null_endpoint_gives_null_border() {
        let points = vec![Sample::null(500), Sample::new(1500, 10.0)];
        let out = beautify(points, &plan(window(AggregateMode::Average)), "s");
        assert_eq!(shape(&out)[0], (1000, Value::Null));
    }

    #[test]
    fn test_null_policies() {
        let points = || {
            vec![
                Sample::new(1100, 1.0),
                Sample::null(1200),
                Sample::new(1300, 3.0),
            ]
        };
        let run = |policy| {
            let request = AggregationRequest {
                ignore_null: policy,
                ..window(AggregateMode::None)
            };
            shape(&beautify(points(), &plan(request), "s"))
        };

        assert_eq!(run(NullPolicy::Keep)[1], (1200, Value::Null));
        assert_eq!(run(NullPolicy::Zero)[1], (1200, Value::Number(0.0)));
        assert_eq!(run(NullPolicy::Previous)[1], (1200, Value::Number(1.0)));
        assert_eq!(run(NullPolicy::Drop).len(), 2);
    }

    #[test]
    fn test_previous_is_seeded_from_before_window() {
        let points = vec![Sample::new(900, 7.0), Sample::null(1100)];
        let request = AggregationRequest {
            ignore_null: NullPolicy::Previous,
            ..window(AggregateMode::None)
        };
        let out = beautify(points, &plan(request), "s");
        assert_eq!(shape(&out), vec![(1100, Value::Number(7.0))]);
    }

    #[test]
    fn test_raw_count_truncation() {
        let points: Vec<Sample> = (0..5).map(|i| Sample::new(1100 + i * 100, i as f64)).collect();
        let request = AggregationRequest {
            count: Some(2),
            ..window(AggregateMode::None)
        };
        let oldest = beautify(points.clone(), &plan(request.clone()), "s");
        assert_eq!(oldest.iter().map(|p| p.sample.ts).collect::<Vec<_>>(), vec![1100, 1200]);

        let request = AggregationRequest {
            return_newest_entries: true,
            ..request
        };
        let newest = beautify(points, &plan(request), "s");
        assert_eq!(newest.iter().map(|p| p.sample.ts).collect::<Vec<_>>(), vec![1400, 1500]);
    }

    #[test]
    fn test_round_and_id() {
        let request = AggregationRequest {
            round: Some(2),
            add_id: true,
            ..window(AggregateMode::None)
        };
        let out = beautify(vec![Sample::new(1500, 1.23456)], &plan(request), "boiler.temp");
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!([{"ts": 1500, "val": 1.23, "id": "boiler.temp"}])
        );
    }
}
