//! Per-request views joining the compute-tier timeline with RESTPP rows.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::pipeline::compute::{Event, EventKind};
use crate::pipeline::patterns;
use crate::pipeline::routing::RoutingRequest;
use crate::table::{millis_between, Columns};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSummary {
    pub run: String,
    pub request_id: String,
    pub gpe_node: String,
    pub first_seen_gpe_ts: NaiveDateTime,
    pub last_seen_gpe_ts: NaiveDateTime,
    pub start_udf_ts: Option<NaiveDateTime>,
    pub stop_udf_ts: Option<NaiveDateTime>,
    pub reported_stop_udf_ms: Option<f64>,
    pub actual_stop_udf_ms: Option<f64>,
    pub actual_diff_first_last_seen_ms: f64,
    pub diff_gpe_duration_udf_ms: Option<f64>,
    pub restpp_node: Option<String>,
    pub first_seen_ts_restpp: Option<NaiveDateTime>,
    pub sync_return_result_ts_restpp: Option<NaiveDateTime>,
    pub sync_return_time_ms: Option<f64>,
    pub graph_name: Option<String>,
    pub query_name: Option<String>,
    pub full_endpoint: Option<String>,
    pub endpoint_name: Option<String>,
}

impl Columns for RequestSummary {
    const COLUMNS: &'static [&'static str] = &[
        "run",
        "request_id",
        "gpe_node",
        "first_seen_gpe_ts",
        "last_seen_gpe_ts",
        "start_udf_ts",
        "stop_udf_ts",
        "reported_stop_udf_ms",
        "actual_stop_udf_ms",
        "actual_diff_first_last_seen_ms",
        "diff_gpe_duration_udf_ms",
        "restpp_node",
        "first_seen_ts_restpp",
        "sync_return_result_ts_restpp",
        "sync_return_time_ms",
        "graph_name",
        "query_name",
        "full_endpoint",
        "endpoint_name",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecRequest {
    pub run: String,
    pub request_id: String,
    pub start_udf_ts: NaiveDateTime,
    pub stop_udf_ts: NaiveDateTime,
    pub actual_stop_udf_ms: f64,
    pub reported_stop_udf_ms: Option<f64>,
    pub query_name: Option<String>,
    pub graph_name: Option<String>,
    pub endpoint: Option<String>,
}

impl Columns for ExecRequest {
    const COLUMNS: &'static [&'static str] = &[
        "run",
        "request_id",
        "start_udf_ts",
        "stop_udf_ts",
        "actual_stop_udf_ms",
        "reported_stop_udf_ms",
        "query_name",
        "graph_name",
        "endpoint",
    ];
}

/// Compute-tier aggregates of one request.
#[derive(Debug, Clone)]
struct GpeRollup {
    node: String,
    first_seen: NaiveDateTime,
    last_seen: NaiveDateTime,
    start: Option<NaiveDateTime>,
    stop: Option<NaiveDateTime>,
    reported_ms: Option<f64>,
}

fn max_opt<T: PartialOrd + Copy>(acc: Option<T>, v: T) -> Option<T> {
    Some(match acc {
        Some(a) if a >= v => a,
        _ => v,
    })
}

fn min_opt<T: PartialOrd + Copy>(acc: Option<T>, v: T) -> Option<T> {
    Some(match acc {
        Some(a) if a <= v => a,
        _ => v,
    })
}

fn rollup_gpe(events: &[Event]) -> BTreeMap<(&str, &str), GpeRollup> {
    let mut out: BTreeMap<(&str, &str), GpeRollup> = BTreeMap::new();
    for e in events {
        let Some(rid) = e.request_id.as_deref() else {
            continue;
        };
        let r = out.entry((e.run.as_str(), rid)).or_insert_with(|| GpeRollup {
            node: e.node.clone(),
            first_seen: e.ts,
            last_seen: e.ts,
            start: None,
            stop: None,
            reported_ms: None,
        });
        r.first_seen = r.first_seen.min(e.ts);
        r.last_seen = r.last_seen.max(e.ts);
        match e.event {
            EventKind::UdfStart => r.start = min_opt(r.start, e.ts),
            EventKind::UdfStop => {
                r.stop = max_opt(r.stop, e.ts);
                if let Some(ms) = e.udf_ms {
                    r.reported_ms = max_opt(r.reported_ms, ms);
                }
            }
            EventKind::Step => {}
        }
    }
    out
}

fn routing_index(requests: &[RoutingRequest]) -> HashMap<(&str, &str), &RoutingRequest> {
    let mut idx = HashMap::with_capacity(requests.len());
    for r in requests {
        idx.entry((r.run.as_str(), r.request_id.as_str())).or_insert(r);
    }
    idx
}

/// Short query name from a full `/query/<graph>/<name>` endpoint.
pub fn endpoint_name(endpoint: &str) -> Option<String> {
    patterns::endpoint_name()
        .captures(endpoint)
        .map(|c| c["q"].to_string())
}

/// One row per `(run, request_id)` seen in the attached compute events,
/// joined with its RESTPP row. Ordered by `(run, first_seen_gpe_ts)`.
pub fn summarize_requests(requests: &[RoutingRequest], attached: &[Event]) -> Vec<RequestSummary> {
    let routing = routing_index(requests);

    let mut rows: Vec<RequestSummary> = rollup_gpe(attached)
        .into_iter()
        .map(|((run, rid), g)| {
            let actual_stop = match (g.start, g.stop) {
                (Some(start), Some(stop)) => Some(millis_between(stop, start)),
                _ => None,
            };
            let seen_ms = millis_between(g.last_seen, g.first_seen);
            let r = routing.get(&(run, rid)).copied();
            let full_endpoint = r.and_then(|r| r.endpoint.clone());
            RequestSummary {
                run: run.to_string(),
                request_id: rid.to_string(),
                gpe_node: g.node,
                first_seen_gpe_ts: g.first_seen,
                last_seen_gpe_ts: g.last_seen,
                start_udf_ts: g.start,
                stop_udf_ts: g.stop,
                reported_stop_udf_ms: g.reported_ms,
                actual_stop_udf_ms: actual_stop,
                actual_diff_first_last_seen_ms: seen_ms,
                diff_gpe_duration_udf_ms: actual_stop.map(|a| seen_ms - a),
                restpp_node: r.map(|r| r.restpp_node.clone()),
                first_seen_ts_restpp: r.map(|r| r.restpp_ts),
                sync_return_result_ts_restpp: r.and_then(|r| r.restpp_return_ts),
                sync_return_time_ms: r.and_then(|r| r.restpp_return_ms),
                graph_name: r.and_then(|r| r.graph_name.clone()),
                query_name: r.and_then(|r| r.query_name.clone()),
                endpoint_name: full_endpoint.as_deref().and_then(endpoint_name),
                full_endpoint,
            }
        })
        .collect();

    rows.sort_by(|a, b| a.run.cmp(&b.run).then(a.first_seen_gpe_ts.cmp(&b.first_seen_gpe_ts)));
    rows
}

/// Requests with both a `UDF_START` and a `UDF_STOP`, with the wall-clock
/// span between them. Ordered by `(run, start_udf_ts)`.
pub fn build_exec_request_table(requests: &[RoutingRequest], attached: &[Event]) -> Vec<ExecRequest> {
    let routing = routing_index(requests);

    let mut rows: Vec<ExecRequest> = rollup_gpe(attached)
        .into_iter()
        .filter_map(|((run, rid), g)| {
            let (start, stop) = (g.start?, g.stop?);
            let r = routing.get(&(run, rid)).copied();
            Some(ExecRequest {
                run: run.to_string(),
                request_id: rid.to_string(),
                start_udf_ts: start,
                stop_udf_ts: stop,
                actual_stop_udf_ms: millis_between(stop, start),
                reported_stop_udf_ms: g.reported_ms,
                query_name: r.and_then(|r| r.query_name.clone()),
                graph_name: r.and_then(|r| r.graph_name.clone()),
                endpoint: r.and_then(|r| r.endpoint.clone()),
            })
        })
        .collect();

    rows.sort_by(|a, b| a.run.cmp(&b.run).then(a.start_udf_ts.cmp(&b.start_udf_ts)));
    rows
}

/// Distinct request ids of each variant, in table order.
pub fn extract_ids(exec: &[ExecRequest], base_query: &str, opt_query: &str) -> (Vec<String>, Vec<String>) {
    let pick = |query: &str| {
        let mut seen = HashSet::new();
        exec.iter()
            .filter(|r| r.query_name.as_deref() == Some(query))
            .filter(|r| seen.insert(r.request_id.as_str()))
            .map(|r| r.request_id.clone())
            .collect::<Vec<_>>()
    };
    (pick(base_query), pick(opt_query))
}
