//! Inter-event gaps per `(run, node, request_id, tid)` timeline, and the
//! join that tags each gap with its query variant.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::pipeline::compute::{Event, EventKind};
use crate::pipeline::routing::RoutingRequest;
use crate::table::{millis_between, Columns};

/// One adjacent event pair. The query columns are filled by
/// [`add_query_name`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gap {
    pub run: String,
    pub node: String,
    pub tid: u64,
    pub request_id: String,
    pub ts: NaiveDateTime,
    pub event: EventKind,
    pub label: String,
    pub iteration: Option<u32>,
    pub udf: Option<String>,
    pub detail: String,
    pub gap_ms: f64,
    pub prev_ts: NaiveDateTime,
    pub prev_event: EventKind,
    pub prev_label: String,
    pub log_path: String,
    pub lineno: usize,
    pub step_key: String,
    pub query_name: Option<String>,
    pub endpoint: Option<String>,
    pub restpp_return_ms: Option<f64>,
}

impl Columns for Gap {
    const COLUMNS: &'static [&'static str] = &[
        "run",
        "node",
        "tid",
        "request_id",
        "ts",
        "event",
        "label",
        "iteration",
        "udf",
        "detail",
        "gap_ms",
        "prev_ts",
        "prev_event",
        "prev_label",
        "log_path",
        "lineno",
        "step_key",
        "query_name",
        "endpoint",
        "restpp_return_ms",
    ];
}

/// Collapse whitespace runs to one space and trim.
pub fn normalize_step_key(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute gaps between consecutive events of each
/// `(run, node, request_id, tid)` sequence, ordered by `(ts, lineno)`.
///
/// Events without a request id have no sequence and are skipped. The first
/// event of a sequence yields no row.
pub fn build_gaps(events: &[Event]) -> Vec<Gap> {
    let mut core: Vec<(&Event, &str)> = events
        .iter()
        .filter(|e| matches!(e.event, EventKind::UdfStart | EventKind::Step | EventKind::UdfStop))
        .filter_map(|e| e.request_id.as_deref().map(|rid| (e, rid)))
        .collect();

    core.sort_by(|(a, ra), (b, rb)| {
        a.run
            .cmp(&b.run)
            .then_with(|| a.node.cmp(&b.node))
            .then_with(|| ra.cmp(rb))
            .then(a.tid.cmp(&b.tid))
            .then(a.ts.cmp(&b.ts))
            .then(a.lineno.cmp(&b.lineno))
    });

    let mut gaps = Vec::new();
    for pair in core.windows(2) {
        let (prev, prev_rid) = pair[0];
        let (cur, rid) = pair[1];
        let same_sequence =
            prev.run == cur.run && prev.node == cur.node && prev_rid == rid && prev.tid == cur.tid;
        if !same_sequence {
            continue;
        }

        gaps.push(Gap {
            run: cur.run.clone(),
            node: cur.node.clone(),
            tid: cur.tid,
            request_id: rid.to_string(),
            ts: cur.ts,
            event: cur.event,
            label: cur.label.clone(),
            iteration: cur.iteration,
            udf: cur.udf.clone(),
            detail: cur.detail.clone(),
            gap_ms: millis_between(cur.ts, prev.ts),
            prev_ts: prev.ts,
            prev_event: prev.event,
            prev_label: prev.label.clone(),
            log_path: cur.log_path.clone(),
            lineno: cur.lineno,
            step_key: normalize_step_key(&cur.label),
            query_name: None,
            endpoint: None,
            restpp_return_ms: None,
        });
    }

    gaps
}

/// Left-join gaps onto RESTPP requests by `(run, request_id)`.
///
/// Unmatched gaps are kept with empty query columns.
pub fn add_query_name(gaps: &[Gap], requests: &[RoutingRequest]) -> Vec<Gap> {
    let by_key: HashMap<(&str, &str), &RoutingRequest> = requests
        .iter()
        .rev()
        .map(|r| ((r.run.as_str(), r.request_id.as_str()), r))
        .collect();

    gaps.iter()
        .map(|g| {
            let mut out = g.clone();
            if let Some(req) = by_key.get(&(g.run.as_str(), g.request_id.as_str())) {
                out.query_name = req.query_name.clone();
                out.endpoint = req.endpoint.clone();
                out.restpp_return_ms = req.restpp_return_ms;
            }
            out
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::compute::tests::{ev, ts_ms};
    use crate::transform::attach::attach_steps_to_requests;
    use pretty_assertions::assert_eq;

    const A: &str = "7.RESTPP_1_1.1735729200000.N";

    /// Gap builder for aggregator tests.
    pub(crate) fn gap(query: Option<&str>, rid: &str, step_key: &str, gap_ms: f64, at_ms: i64) -> Gap {
        Gap {
            run: "r1".to_string(),
            node: "m1".to_string(),
            tid: 1,
            request_id: rid.to_string(),
            ts: ts_ms(at_ms),
            event: EventKind::Step,
            label: step_key.to_string(),
            iteration: None,
            udf: Some("q".to_string()),
            detail: String::new(),
            gap_ms,
            prev_ts: ts_ms(at_ms - gap_ms as i64),
            prev_event: EventKind::Step,
            prev_label: "prev".to_string(),
            log_path: "m1/gpe_1.INFO".to_string(),
            lineno: at_ms as usize,
            step_key: step_key.to_string(),
            query_name: query.map(|q| q.to_string()),
            endpoint: None,
            restpp_return_ms: None,
        }
    }

    #[test]
    fn test_normalize_step_key() {
        assert_eq!(normalize_step_key("  Step  1 \t- init  "), "Step 1 - init");
        assert_eq!(normalize_step_key("UDF_STOP"), "UDF_STOP");
        assert_eq!(normalize_step_key("   "), "");
    }

    #[test]
    fn test_start_stop_pair_yields_one_gap() {
        let events = vec![
            ev(123, 0, EventKind::UdfStart, Some(A), "UDF_START", 1),
            ev(123, 250, EventKind::UdfStop, None, "UDF_STOP", 2),
        ];
        let attached = attach_steps_to_requests(&events);
        let gaps = build_gaps(&attached);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_ms, 250.0);
        assert_eq!(gaps[0].step_key, "UDF_STOP");
        assert_eq!(gaps[0].prev_label, "UDF_START");
        assert_eq!(gaps[0].prev_event, EventKind::UdfStart);
        assert_eq!(gaps[0].request_id, A);
    }

    #[test]
    fn test_orphan_step_absent_from_gaps() {
        let events = vec![
            ev(1, 0, EventKind::Step, None, "Orphan", 1),
            ev(1, 10, EventKind::UdfStart, Some(A), "UDF_START", 2),
            ev(1, 20, EventKind::Step, None, "Step 1", 3),
        ];
        let gaps = build_gaps(&attach_steps_to_requests(&events));
        assert_eq!(gaps.len(), 1);
        assert!(gaps.iter().all(|g| g.label != "Orphan" && g.prev_label != "Orphan"));
    }

    #[test]
    fn test_gaps_non_negative_and_per_thread() {
        // two threads working the same request, interleaved in time
        let events = vec![
            ev(1, 0, EventKind::UdfStart, Some(A), "UDF_START", 1),
            ev(2, 3, EventKind::UdfStart, Some(A), "UDF_START", 2),
            ev(1, 5, EventKind::Step, None, "Step 1", 3),
            ev(2, 4, EventKind::Step, None, "Step 1", 4),
            ev(1, 9, EventKind::UdfStop, None, "UDF_STOP", 5),
            ev(2, 100, EventKind::UdfStop, None, "UDF_STOP", 6),
        ];
        let gaps = build_gaps(&attach_steps_to_requests(&events));
        assert_eq!(gaps.len(), 4);
        assert!(gaps.iter().all(|g| g.gap_ms >= 0.0));
        let t1: Vec<f64> = gaps.iter().filter(|g| g.tid == 1).map(|g| g.gap_ms).collect();
        let t2: Vec<f64> = gaps.iter().filter(|g| g.tid == 2).map(|g| g.gap_ms).collect();
        assert_eq!(t1, vec![5.0, 4.0]);
        assert_eq!(t2, vec![1.0, 96.0]);
    }

    #[test]
    fn test_step_key_normalized_from_label() {
        let events = vec![
            ev(1, 0, EventKind::UdfStart, Some(A), "UDF_START", 1),
            ev(1, 2, EventKind::Step, None, "Step  2   - join ", 2),
        ];
        let gaps = build_gaps(&events);
        assert_eq!(gaps[0].step_key, "Step 2 - join");
        assert_eq!(gaps[0].label, "Step  2   - join ");
    }

    #[test]
    fn test_empty_inputs() {
        assert!(build_gaps(&[]).is_empty());
        assert!(add_query_name(&[], &[]).is_empty());
        let only_orphans = vec![ev(1, 0, EventKind::Step, None, "x", 1)];
        assert!(build_gaps(&only_orphans).is_empty());
    }

    #[test]
    fn test_add_query_name_left_join() {
        let gaps = vec![gap(None, A, "Step 1", 5.0, 10), gap(None, "other", "Step 1", 5.0, 20)];
        let req = RoutingRequest {
            run: "r1".to_string(),
            request_id: A.to_string(),
            restpp_ts: ts_ms(0),
            restpp_node: "m1".to_string(),
            endpoint: Some("/query/g/q_base".to_string()),
            query_name: Some("q_base".to_string()),
            graph_name: None,
            restpp_return_ms: Some(12.0),
            restpp_engine: None,
            restpp_return_ts: None,
        };
        let mut other_run = req.clone();
        other_run.run = "r2".to_string();
        other_run.request_id = "other".to_string();

        let out = add_query_name(&gaps, &[req, other_run]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].query_name.as_deref(), Some("q_base"));
        assert_eq!(out[0].endpoint.as_deref(), Some("/query/g/q_base"));
        assert_eq!(out[0].restpp_return_ms, Some(12.0));
        assert_eq!(out[1].query_name, None);
    }

    #[test]
    fn test_columns_match_serialized_header() {
        let g = gap(Some("q"), A, "Step 1", 1.0, 5);
        assert_eq!(crate::table::serialized_header(&g), Gap::COLUMNS);
    }
}
