//! Per-step latency statistics over the query-tagged gap table.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::table::{cmp_f64_desc, Columns};
use crate::transform::gaps::Gap;

/// Percentile with linear interpolation between closest ranks.
///
/// NaN values are ignored; an empty input yields NaN.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut xs: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.sort_by(|a, b| a.total_cmp(b));

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (xs.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return xs[lo];
    }
    let frac = rank - lo as f64;
    xs[lo] + (xs[hi] - xs[lo]) * frac
}

/// Arithmetic mean of non-NaN values, NaN if there are none.
pub fn mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Count, median, p95, mean, max and sum of one group of gaps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub n: usize,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub sum_ms: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        let max_ms = finite.iter().copied().reduce(f64::max).unwrap_or(f64::NAN);
        Self {
            n: finite.len(),
            median_ms: percentile(&finite, 50.0),
            p95_ms: percentile(&finite, 95.0),
            mean_ms: mean(&finite),
            max_ms,
            sum_ms: finite.iter().sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepStatistic {
    pub query_name: String,
    pub step_key: String,
    pub iteration: Option<u32>,
    pub n: usize,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub sum_ms: f64,
}

impl Columns for StepStatistic {
    const COLUMNS: &'static [&'static str] = &[
        "query_name",
        "step_key",
        "iteration",
        "n",
        "median_ms",
        "p95_ms",
        "mean_ms",
        "max_ms",
        "sum_ms",
    ];
}

/// Grouping key for an optional iteration with missing values ordered last.
pub(crate) fn iteration_key(iteration: Option<u32>) -> (bool, u32) {
    (iteration.is_none(), iteration.unwrap_or(0))
}

/// Group `gaps` by `(query_name, step_key, iteration)` and summarise `gap_ms`.
///
/// Gaps without a query name are left out. Output is ordered by
/// `query_name` ascending, then `sum_ms` descending.
pub fn make_step_stats(gaps: &[Gap]) -> Vec<StepStatistic> {
    let mut groups: BTreeMap<(&str, &str, (bool, u32)), (Option<u32>, Vec<f64>)> =
        BTreeMap::new();
    for g in gaps {
        let Some(query) = g.query_name.as_deref() else {
            continue;
        };
        groups
            .entry((query, g.step_key.as_str(), iteration_key(g.iteration)))
            .or_insert_with(|| (g.iteration, Vec::new()))
            .1
            .push(g.gap_ms);
    }

    let mut stats: Vec<StepStatistic> = groups
        .into_iter()
        .map(|((query, step_key, _), (iteration, values))| {
            let s = Summary::of(&values);
            StepStatistic {
                query_name: query.to_string(),
                step_key: step_key.to_string(),
                iteration,
                n: s.n,
                median_ms: s.median_ms,
                p95_ms: s.p95_ms,
                mean_ms: s.mean_ms,
                max_ms: s.max_ms,
                sum_ms: s.sum_ms,
            }
        })
        .collect();

    stats.sort_by(|a, b| cmp_f64_desc(a.sum_ms, b.sum_ms));
    stats.sort_by(|a, b| a.query_name.cmp(&b.query_name));
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::serialized_header;
    use crate::transform::gaps::tests::gap;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_percentile_linear_interpolation() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&xs, 50.0), 2.5);
        assert_eq!(percentile(&xs, 0.0), 1.0);
        assert_eq!(percentile(&xs, 100.0), 4.0);
        assert!((percentile(&xs, 95.0) - 3.85).abs() < 1e-9);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
    }

    #[test]
    fn test_percentile_ignores_nan_and_empty_is_nan() {
        assert_eq!(percentile(&[f64::NAN, 4.0, 2.0], 50.0), 3.0);
        assert!(percentile(&[], 50.0).is_nan());
        assert!(percentile(&[f64::NAN], 50.0).is_nan());
        assert!(mean(&[]).is_nan());
    }

    #[test]
    fn test_percentile_unsorted_input() {
        assert_eq!(percentile(&[30.0, 10.0, 20.0], 50.0), 20.0);
    }

    #[test]
    fn test_make_step_stats_groups_and_orders() {
        let mut it0 = gap(Some("q_opt"), "r1", "Step 1", 4.0, 10);
        it0.iteration = Some(0);
        let gaps = vec![
            gap(Some("q_base"), "r1", "Step 1", 10.0, 10),
            gap(Some("q_base"), "r2", "Step 1", 20.0, 20),
            gap(Some("q_base"), "r1", "Step 2", 100.0, 30),
            gap(None, "r9", "Step 2", 1000.0, 40),
            it0,
            gap(Some("q_opt"), "r1", "Step 1", 1.0, 50),
        ];
        let stats = make_step_stats(&gaps);
        let keys: Vec<(&str, &str, Option<u32>)> = stats
            .iter()
            .map(|s| (s.query_name.as_str(), s.step_key.as_str(), s.iteration))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("q_base", "Step 2", None),
                ("q_base", "Step 1", None),
                ("q_opt", "Step 1", Some(0)),
                ("q_opt", "Step 1", None),
            ]
        );

        let s1 = &stats[1];
        assert_eq!(s1.n, 2);
        assert_eq!(s1.median_ms, 15.0);
        assert_eq!(s1.mean_ms, 15.0);
        assert_eq!(s1.max_ms, 20.0);
        assert_eq!(s1.sum_ms, 30.0);
        assert!((s1.p95_ms - 19.5).abs() < 1e-9);
    }

    #[test]
    fn test_make_step_stats_order_independent_of_input() {
        let a = gap(Some("q"), "r1", "Step A", 5.0, 1);
        let b = gap(Some("q"), "r1", "Step B", 50.0, 2);
        let forward = make_step_stats(&[a.clone(), b.clone()]);
        let backward = make_step_stats(&[b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].step_key, "Step B");
    }

    #[test]
    fn test_make_step_stats_empty_and_unmatched() {
        assert!(make_step_stats(&[]).is_empty());
        assert!(make_step_stats(&[gap(None, "r", "Step 1", 1.0, 1)]).is_empty());
    }

    #[test]
    fn test_step_stats_schema() {
        assert_eq!(
            StepStatistic::COLUMNS,
            ["query_name", "step_key", "iteration", "n", "median_ms", "p95_ms", "mean_ms", "max_ms", "sum_ms"]
        );
        let stats = make_step_stats(&[gap(Some("q"), "r", "Step 1", 1.0, 1)]);
        assert_eq!(serialized_header(&stats[0]), StepStatistic::COLUMNS);
    }
}
