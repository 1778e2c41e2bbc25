//! Execution signatures of single requests and a similarity score between
//! them, used to pair a base request with its closest optimized run.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::table::{cmp_f64_asc, cmp_f64_desc};
use crate::transform::gaps::Gap;

const ITERATION_WEIGHT: f64 = 5.0;
const COUNT_WEIGHT: f64 = 1.0;
const TIME_WEIGHT: f64 = 0.01;

/// One step of a request's signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureStep {
    pub step_key: String,
    pub count: usize,
    pub iteration_count: u32,
    pub sum_ms: f64,
}

/// Per-step difference between a target and a candidate signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureDiff {
    pub step_key: String,
    pub t_count: usize,
    pub t_iteration_count: u32,
    pub t_sum_ms: f64,
    pub c_count: usize,
    pub c_iteration_count: u32,
    pub c_sum_ms: f64,
    pub diff_iter: u32,
    pub diff_count: usize,
    pub diff_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureMatch {
    pub target_run: String,
    pub target_request_id: String,
    pub candidate_run: String,
    pub candidate_request_id: String,
    pub score: f64,
    #[serde(skip)]
    pub diff: Vec<SignatureDiff>,
}

#[derive(Debug, Default, Clone)]
pub struct Fingerprinter {
    step_allowlist: Option<HashSet<String>>,
}

impl Fingerprinter {
    /// Restrict signatures to the given step keys. An empty list means
    /// every step.
    pub fn with_allowlist<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = steps.into_iter().map(Into::into).collect();
        Self {
            step_allowlist: (!set.is_empty()).then_some(set),
        }
    }

    /// Step counts, iteration counts and summed gap time of one request,
    /// ordered by step key.
    pub fn signature(&self, gaps: &[Gap], run: &str, request_id: &str) -> Vec<SignatureStep> {
        let mut steps: BTreeMap<&str, (usize, Option<u32>, f64)> = BTreeMap::new();
        for g in gaps {
            if g.run != run || g.request_id != request_id {
                continue;
            }
            if let Some(allow) = &self.step_allowlist {
                if !allow.contains(&g.step_key) {
                    continue;
                }
            }
            let s = steps.entry(g.step_key.as_str()).or_insert((0, None, 0.0));
            s.0 += 1;
            if let Some(it) = g.iteration {
                s.1 = Some(s.1.map_or(it, |m| m.max(it)));
            }
            s.2 += g.gap_ms;
        }

        steps
            .into_iter()
            .map(|(step_key, (count, max_iter, sum_ms))| SignatureStep {
                step_key: step_key.to_string(),
                count,
                iteration_count: max_iter.map_or(0, |m| m + 1),
                sum_ms,
            })
            .collect()
    }

    /// Distance between two signatures; lower is more similar. The per-step
    /// diff is ordered by `diff_ms` descending.
    pub fn score(&self, target: &[SignatureStep], candidate: &[SignatureStep]) -> (f64, Vec<SignatureDiff>) {
        let keys: BTreeSet<&str> = target
            .iter()
            .chain(candidate)
            .map(|s| s.step_key.as_str())
            .collect();
        let find = |sig: &[SignatureStep], key: &str| -> (usize, u32, f64) {
            sig.iter()
                .find(|s| s.step_key == key)
                .map_or((0, 0, 0.0), |s| (s.count, s.iteration_count, s.sum_ms))
        };

        let mut diff: Vec<SignatureDiff> = keys
            .into_iter()
            .map(|key| {
                let (tc, ti, tm) = find(target, key);
                let (cc, ci, cm) = find(candidate, key);
                SignatureDiff {
                    step_key: key.to_string(),
                    t_count: tc,
                    t_iteration_count: ti,
                    t_sum_ms: tm,
                    c_count: cc,
                    c_iteration_count: ci,
                    c_sum_ms: cm,
                    diff_iter: ti.abs_diff(ci),
                    diff_count: tc.abs_diff(cc),
                    diff_ms: (tm - cm).abs(),
                }
            })
            .collect();

        let score = diff.iter().fold(0.0, |acc, d| {
            acc + ITERATION_WEIGHT * f64::from(d.diff_iter)
                + COUNT_WEIGHT * d.diff_count as f64
                + TIME_WEIGHT * d.diff_ms
        });
        diff.sort_by(|a, b| cmp_f64_desc(a.diff_ms, b.diff_ms));
        (score, diff)
    }

    /// Score every candidate `(run, request_id)` against the target, best
    /// match first.
    pub fn rank_candidates(
        &self,
        gaps: &[Gap],
        target: (&str, &str),
        candidates: &[(&str, &str)],
    ) -> Vec<SignatureMatch> {
        let target_sig = self.signature(gaps, target.0, target.1);
        let mut matches: Vec<SignatureMatch> = candidates
            .iter()
            .map(|&(run, rid)| {
                let (score, diff) = self.score(&target_sig, &self.signature(gaps, run, rid));
                SignatureMatch {
                    target_run: target.0.to_string(),
                    target_request_id: target.1.to_string(),
                    candidate_run: run.to_string(),
                    candidate_request_id: rid.to_string(),
                    score,
                    diff,
                }
            })
            .collect();
        matches.sort_by(|a, b| cmp_f64_asc(a.score, b.score));
        matches
    }
}
