//! Numeric transforms applied to aggregate rows after a query ran.
//!
//! Order is fixed: aggregate, then normalize, then cumulative sum.

use std::collections::BTreeMap;

use regstat_core::{
    CategoryId, CoverageMode, MetricKind, MetricSpec, PointValue, TimeSeriesPoint,
};
use regstat_store::AggregateRow;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SeriesFlags {
    /// Normalization was requested but the first measured value was zero,
    /// negative or missing, so values were passed through unchanged.
    pub normalization_skipped: bool,
}

/// Turns aggregate rows into one point per year. `years` lists the years the
/// series must cover; years present only in `rows` are included as well.
///
/// `wear_factor` maps a row's vehicle category to its weight profile factor
/// and is only consulted for the physical index.
pub fn aggregate(
    kind: &MetricKind,
    rows: &[AggregateRow],
    baseline: Option<&[AggregateRow]>,
    years: &[i32],
    wear_factor: &dyn Fn(Option<CategoryId>) -> f64,
) -> Vec<TimeSeriesPoint> {
    match kind {
        MetricKind::Count => per_year(rows, years, |group| {
            PointValue::Measured(row_count(group) as f64)
        }),
        MetricKind::Sum { .. } => per_year(rows, years, |group| {
            PointValue::Measured(group.iter().filter_map(|row| row.value).sum())
        }),
        MetricKind::Average { .. } => per_year(rows, years, |group| {
            match group.iter().find_map(|row| row.value) {
                Some(value) => PointValue::Measured(value),
                None => PointValue::Undefined,
            }
        }),
        MetricKind::Percentage { .. } => {
            let numerator = aggregate(&MetricKind::Count, rows, None, years, wear_factor);
            let denominator =
                aggregate(&MetricKind::Count, baseline.unwrap_or(&[]), None, years, wear_factor);
            percentage_of_baseline(&numerator, &denominator)
        }
        MetricKind::Coverage { mode, .. } => coverage(rows, years, *mode),
        MetricKind::PhysicalIndex { .. } => physical_index(rows, years, wear_factor),
    }
}

/// `100 * numerator / baseline` per year. A zero or undefined baseline gives
/// an undefined point.
pub fn percentage_of_baseline(
    numerator: &[TimeSeriesPoint],
    baseline: &[TimeSeriesPoint],
) -> Vec<TimeSeriesPoint> {
    let baseline = baseline
        .iter()
        .map(|point| (point.year, point.value))
        .collect::<BTreeMap<_, _>>();

    numerator
        .iter()
        .map(|point| {
            let denominator = baseline.get(&point.year).and_then(|value| value.measured());
            match (point.value.measured(), denominator) {
                (Some(value), Some(total)) if total != 0.0 => {
                    TimeSeriesPoint::measured(point.year, 100.0 * value / total)
                }
                _ => TimeSeriesPoint::undefined(point.year),
            }
        })
        .collect()
}

/// Rows carry the non-null count in `value` and the group size in
/// `row_count`.
pub fn coverage(rows: &[AggregateRow], years: &[i32], mode: CoverageMode) -> Vec<TimeSeriesPoint> {
    per_year(rows, years, |group| {
        let total = row_count(group);
        let present = group.iter().filter_map(|row| row.value).sum::<f64>();
        match mode {
            CoverageMode::NonNull if total == 0 => PointValue::Undefined,
            CoverageMode::NonNull => PointValue::Measured(100.0 * present / total as f64),
            CoverageMode::NullCount => PointValue::Measured(total as f64 - present),
        }
    })
}

/// Σ over categories of `wear_factor(category) * Σ (load / reference)^4`.
pub fn physical_index(
    rows: &[AggregateRow],
    years: &[i32],
    wear_factor: &dyn Fn(Option<CategoryId>) -> f64,
) -> Vec<TimeSeriesPoint> {
    per_year(rows, years, |group| {
        PointValue::Measured(
            group
                .iter()
                .map(|row| row.value.unwrap_or(0.0) * wear_factor(row.category))
                .sum(),
        )
    })
}

/// Divides every value by the first chronological one. Returns the series
/// unchanged and flagged when that value is undefined or not positive, so the
/// first point of a normalized series is always 1.0.
pub fn normalize_to_first(points: &[TimeSeriesPoint]) -> (Vec<TimeSeriesPoint>, bool) {
    let first = points.first().and_then(|point| point.value.measured());
    match first {
        Some(first) if first > 0.0 => (
            points
                .iter()
                .map(|point| TimeSeriesPoint {
                    year: point.year,
                    value: point.value.map(|value| value / first),
                })
                .collect(),
            false,
        ),
        _ => (points.to_vec(), true),
    }
}

/// Running total in year order. Undefined points stay undefined and do not
/// reset the total.
pub fn cumulative_sum(points: &[TimeSeriesPoint]) -> Vec<TimeSeriesPoint> {
    let mut total = 0.0;
    points
        .iter()
        .map(|point| match point.value {
            PointValue::Measured(value) => {
                total += value;
                TimeSeriesPoint::measured(point.year, total)
            }
            PointValue::Undefined => TimeSeriesPoint::undefined(point.year),
        })
        .collect()
}

/// Applies the post-aggregation transforms the metric asks for.
pub fn apply(metric: &MetricSpec, raw: Vec<TimeSeriesPoint>) -> (Vec<TimeSeriesPoint>, SeriesFlags) {
    let mut flags = SeriesFlags::default();
    let mut points = raw;

    if metric.normalize_to_first {
        let (normalized, skipped) = normalize_to_first(&points);
        if skipped {
            tracing::warn!("first value is undefined or not positive, series left unnormalized");
        }
        flags.normalization_skipped = skipped;
        points = normalized;
    }
    if metric.cumulative {
        points = cumulative_sum(&points);
    }

    (points, flags)
}

fn row_count(group: &[&AggregateRow]) -> i64 {
    group.iter().map(|row| row.row_count).sum()
}

fn per_year(
    rows: &[AggregateRow],
    years: &[i32],
    value_of: impl Fn(&[&AggregateRow]) -> PointValue,
) -> Vec<TimeSeriesPoint> {
    let mut groups = years
        .iter()
        .map(|year| (*year, Vec::new()))
        .collect::<BTreeMap<i32, Vec<&AggregateRow>>>();
    for row in rows {
        groups.entry(row.year).or_default().push(row);
    }

    groups
        .into_iter()
        .map(|(year, group)| TimeSeriesPoint {
            year,
            value: value_of(&group),
        })
        .collect()
}
