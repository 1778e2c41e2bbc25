//! Base-vs-optimized step comparison tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::stats::{iteration_key, percentile, StepStatistic, Summary};
use crate::pipeline::compute::EventKind;
use crate::table::{cmp_f64_asc, cmp_f64_desc, or_nan, safe_ratio, Columns};
use crate::transform::gaps::Gap;

/// Default label prefix for the ordered side-by-side table.
pub const DEFAULT_STEP_PREFIX: &str = "Step ";

/// Which side of an outer join a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentIn {
    BaseOnly,
    Both,
    OptOnly,
}

impl PresentIn {
    fn from_sides(base: bool, opt: bool) -> Option<Self> {
        match (base, opt) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::BaseOnly),
            (false, true) => Some(Self::OptOnly),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub step_key: String,
    pub iteration: Option<u32>,
    pub base_n: Option<usize>,
    pub base_median_ms: Option<f64>,
    pub base_p95_ms: Option<f64>,
    pub base_mean_ms: Option<f64>,
    pub base_max_ms: Option<f64>,
    pub base_sum_ms: Option<f64>,
    pub opt_n: Option<usize>,
    pub opt_median_ms: Option<f64>,
    pub opt_p95_ms: Option<f64>,
    pub opt_mean_ms: Option<f64>,
    pub opt_max_ms: Option<f64>,
    pub opt_sum_ms: Option<f64>,
    pub present_in: PresentIn,
    pub opt_over_base_mean: f64,
    pub diff_mean_ms: f64,
    pub opt_over_base_median: f64,
    pub diff_median_ms: f64,
}

impl Columns for ComparisonRow {
    const COLUMNS: &'static [&'static str] = &[
        "step_key",
        "iteration",
        "base_n",
        "base_median_ms",
        "base_p95_ms",
        "base_mean_ms",
        "base_max_ms",
        "base_sum_ms",
        "opt_n",
        "opt_median_ms",
        "opt_p95_ms",
        "opt_mean_ms",
        "opt_max_ms",
        "opt_sum_ms",
        "present_in",
        "opt_over_base_mean",
        "diff_mean_ms",
        "opt_over_base_median",
        "diff_median_ms",
    ];
}

/// Outer-join the two variants' step statistics on `(step_key, iteration)`.
///
/// Rows are ordered by `present_in`, then by `opt_over_base_median`
/// descending with NaN last.
pub fn compare_two_queries(stats: &[StepStatistic], base_name: &str, opt_name: &str) -> Vec<ComparisonRow> {
    type Key<'a> = (&'a str, (bool, u32));
    let mut joined: BTreeMap<Key<'_>, (Option<u32>, Option<&StepStatistic>, Option<&StepStatistic>)> =
        BTreeMap::new();

    for s in stats {
        let is_base = s.query_name == base_name;
        let is_opt = s.query_name == opt_name;
        if !is_base && !is_opt {
            continue;
        }
        let slot = joined
            .entry((s.step_key.as_str(), iteration_key(s.iteration)))
            .or_insert((s.iteration, None, None));
        if is_base && slot.1.is_none() {
            slot.1 = Some(s);
        }
        if is_opt && slot.2.is_none() {
            slot.2 = Some(s);
        }
    }

    let mut rows: Vec<ComparisonRow> = joined
        .into_iter()
        .filter_map(|((step_key, _), (iteration, base, opt))| {
            let present_in = PresentIn::from_sides(base.is_some(), opt.is_some())?;
            let base_mean = or_nan(base.map(|b| b.mean_ms));
            let opt_mean = or_nan(opt.map(|o| o.mean_ms));
            let base_median = or_nan(base.map(|b| b.median_ms));
            let opt_median = or_nan(opt.map(|o| o.median_ms));
            Some(ComparisonRow {
                step_key: step_key.to_string(),
                iteration,
                base_n: base.map(|b| b.n),
                base_median_ms: base.map(|b| b.median_ms),
                base_p95_ms: base.map(|b| b.p95_ms),
                base_mean_ms: base.map(|b| b.mean_ms),
                base_max_ms: base.map(|b| b.max_ms),
                base_sum_ms: base.map(|b| b.sum_ms),
                opt_n: opt.map(|o| o.n),
                opt_median_ms: opt.map(|o| o.median_ms),
                opt_p95_ms: opt.map(|o| o.p95_ms),
                opt_mean_ms: opt.map(|o| o.mean_ms),
                opt_max_ms: opt.map(|o| o.max_ms),
                opt_sum_ms: opt.map(|o| o.sum_ms),
                present_in,
                opt_over_base_mean: safe_ratio(opt_mean, base_mean),
                diff_mean_ms: opt_mean - base_mean,
                opt_over_base_median: safe_ratio(opt_median, base_median),
                diff_median_ms: opt_median - base_median,
            })
        })
        .collect();

    rows.sort_by(|a, b| cmp_f64_desc(a.opt_over_base_median, b.opt_over_base_median));
    rows.sort_by(|a, b| a.present_in.cmp(&b.present_in));
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideBySideRow {
    pub step_key: String,
    pub base_n: Option<usize>,
    pub base_mean_ms: Option<f64>,
    pub base_median_ms: Option<f64>,
    pub base_p95_ms: Option<f64>,
    pub base_max_ms: Option<f64>,
    pub base_sum_ms: Option<f64>,
    pub base_pos: Option<f64>,
    pub opt_n: Option<usize>,
    pub opt_mean_ms: Option<f64>,
    pub opt_median_ms: Option<f64>,
    pub opt_p95_ms: Option<f64>,
    pub opt_max_ms: Option<f64>,
    pub opt_sum_ms: Option<f64>,
    pub opt_pos: Option<f64>,
    pub present_in: PresentIn,
    pub pos: f64,
    pub select_like_idx: usize,
    pub diff_mean_ms: f64,
    pub opt_over_base_mean: f64,
}

impl Columns for SideBySideRow {
    const COLUMNS: &'static [&'static str] = &[
        "step_key",
        "base_n",
        "base_mean_ms",
        "base_median_ms",
        "base_p95_ms",
        "base_max_ms",
        "base_sum_ms",
        "base_pos",
        "opt_n",
        "opt_mean_ms",
        "opt_median_ms",
        "opt_p95_ms",
        "opt_max_ms",
        "opt_sum_ms",
        "opt_pos",
        "present_in",
        "pos",
        "select_like_idx",
        "diff_mean_ms",
        "opt_over_base_mean",
    ];
}

/// Statistics of one variant's step plus its median position in a request.
#[derive(Debug, Clone, Copy)]
struct PositionedStep {
    summary: Summary,
    median_pos: f64,
}

fn positioned_steps<'a>(
    groups: &HashMap<(&'a str, &'a str), (Vec<f64>, Vec<f64>)>,
    query: &str,
) -> HashMap<&'a str, PositionedStep> {
    groups
        .iter()
        .filter(|((q, _), _)| *q == query)
        .map(|((_, step), (values, positions))| {
            (
                *step,
                PositionedStep {
                    summary: Summary::of(values),
                    median_pos: percentile(positions, 50.0),
                },
            )
        })
        .collect()
}

/// Per-variant statistics of `STEP` gaps whose key starts with `step_prefix`,
/// joined on `step_key` and ordered by typical execution position.
///
/// A step's position is the median of its 1-based ordinal within each
/// request; the row position is the median of the available sides.
pub fn build_ordered_step_side_table(
    gaps: &[Gap],
    base_query: &str,
    opt_query: &str,
    step_prefix: &str,
) -> Vec<SideBySideRow> {
    let mut steps: Vec<&Gap> = gaps
        .iter()
        .filter(|g| g.event == EventKind::Step)
        .filter(|g| matches!(g.query_name.as_deref(), Some(q) if q == base_query || q == opt_query))
        .filter(|g| g.step_key.starts_with(step_prefix))
        .collect();
    if steps.is_empty() {
        return Vec::new();
    }

    steps.sort_by(|a, b| {
        a.query_name
            .cmp(&b.query_name)
            .then_with(|| a.run.cmp(&b.run))
            .then_with(|| a.request_id.cmp(&b.request_id))
            .then(a.ts.cmp(&b.ts))
            .then_with(|| a.node.cmp(&b.node))
            .then(a.tid.cmp(&b.tid))
            .then(a.lineno.cmp(&b.lineno))
    });

    // (query, step_key) -> (gap values, positions)
    let mut groups: HashMap<(&str, &str), (Vec<f64>, Vec<f64>)> = HashMap::new();
    let mut current: Option<(&str, &str, &str)> = None;
    let mut pos_in_request = 0usize;
    for g in &steps {
        let query = g.query_name.as_deref().unwrap_or_default();
        let request = (query, g.run.as_str(), g.request_id.as_str());
        if current != Some(request) {
            current = Some(request);
            pos_in_request = 0;
        }
        pos_in_request += 1;

        let entry = groups.entry((query, g.step_key.as_str())).or_default();
        entry.0.push(g.gap_ms);
        entry.1.push(pos_in_request as f64);
    }

    let base = positioned_steps(&groups, base_query);
    let opt = positioned_steps(&groups, opt_query);

    let keys: BTreeSet<&str> = base.keys().chain(opt.keys()).copied().collect();
    let mut rows: Vec<SideBySideRow> = keys
        .into_iter()
        .filter_map(|step_key| {
            let b = base.get(step_key);
            let o = opt.get(step_key);
            let present_in = PresentIn::from_sides(b.is_some(), o.is_some())?;
            let sides: Vec<f64> = [b, o].iter().flatten().map(|s| s.median_pos).collect();
            let base_mean = or_nan(b.map(|s| s.summary.mean_ms));
            let opt_mean = or_nan(o.map(|s| s.summary.mean_ms));
            Some(SideBySideRow {
                step_key: step_key.to_string(),
                base_n: b.map(|s| s.summary.n),
                base_mean_ms: b.map(|s| s.summary.mean_ms),
                base_median_ms: b.map(|s| s.summary.median_ms),
                base_p95_ms: b.map(|s| s.summary.p95_ms),
                base_max_ms: b.map(|s| s.summary.max_ms),
                base_sum_ms: b.map(|s| s.summary.sum_ms),
                base_pos: b.map(|s| s.median_pos),
                opt_n: o.map(|s| s.summary.n),
                opt_mean_ms: o.map(|s| s.summary.mean_ms),
                opt_median_ms: o.map(|s| s.summary.median_ms),
                opt_p95_ms: o.map(|s| s.summary.p95_ms),
                opt_max_ms: o.map(|s| s.summary.max_ms),
                opt_sum_ms: o.map(|s| s.summary.sum_ms),
                opt_pos: o.map(|s| s.median_pos),
                present_in,
                pos: percentile(&sides, 50.0),
                select_like_idx: 0,
                diff_mean_ms: opt_mean - base_mean,
                opt_over_base_mean: safe_ratio(opt_mean, base_mean),
            })
        })
        .collect();

    rows.sort_by(|a, b| cmp_f64_asc(a.pos, b.pos).then(a.present_in.cmp(&b.present_in)));
    for (idx, row) in rows.iter_mut().enumerate() {
        row.select_like_idx = idx + 1;
    }
    rows
}
