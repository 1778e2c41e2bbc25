//! RESTPP (routing tier) log classification and per-request rollup.
//!
//! Routing-tier lines are not kept as a timeline. Arrival (`RawRequest`) and
//! completion (`ReturnResult`) records are folded into one
//! [`RoutingRequest`] per `(run, request_id)`; `RequestInfo` metadata is
//! merged in by request id.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::patterns::{self, REQINFO_ALLOWED_KEYS, RESTPP_GLOB, RESTPP_RAW_TOKEN, RESTPP_REQINFO_TOKEN};
use super::walker::{walk_logs, ParsedLine, WalkSpec, WalkStats};
use super::year::YearResolver;
use crate::table::Columns;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingRecord {
    RawRequest {
        request_id: String,
        method: Option<String>,
        endpoint: Option<String>,
        query_name: Option<String>,
    },
    ReturnResult {
        request_id: String,
        ms: f64,
        engine: String,
    },
    RequestInfo {
        request_id: String,
        kv: Vec<(String, String)>,
    },
}

/// Classify a RESTPP message body. First matching grammar wins.
pub fn classify(msg: &str) -> Option<RoutingRecord> {
    parse_raw_request(msg)
        .or_else(|| parse_return_result(msg))
        .or_else(|| parse_request_info(msg))
}

/// `RawRequest|,<rid>,<...>|<method>|<endpoint>|...`
///
/// Pipe positions are taken literally; an endpoint containing `|` misparses
/// instead of failing.
fn parse_raw_request(msg: &str) -> Option<RoutingRecord> {
    let (_, after) = msg.split_once(RESTPP_RAW_TOKEN)?;
    let (request_id, rest) = after.split_once(',')?;

    let parts: Vec<&str> = rest.split('|').collect();
    let method = parts.get(1).map(|s| s.to_string());
    let endpoint = parts.get(2).map(|s| s.to_string());

    let query_name = endpoint
        .as_deref()
        .filter(|e| !e.is_empty())
        .and_then(|e| patterns::query_endpoint().captures(e))
        .map(|c| c["qname"].to_string());

    Some(RoutingRecord::RawRequest {
        request_id: request_id.trim().to_string(),
        method,
        endpoint,
        query_name,
    })
}

fn parse_return_result(msg: &str) -> Option<RoutingRecord> {
    let caps = patterns::return_result().captures(msg)?;
    Some(RoutingRecord::ReturnResult {
        request_id: caps["rid"].trim().to_string(),
        ms: caps["ms"].parse().ok()?,
        engine: caps["engine"].to_string(),
    })
}

fn parse_request_info(msg: &str) -> Option<RoutingRecord> {
    let (_, after) = msg.split_once(RESTPP_REQINFO_TOKEN)?;
    let (request_id, rest) = after.split_once(',')?;

    let kv = rest
        .split('|')
        .filter_map(|p| p.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| REQINFO_ALLOWED_KEYS.contains(k))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Some(RoutingRecord::RequestInfo {
        request_id: request_id.trim().to_string(),
        kv,
    })
}

// ---------------------------------------------------------------------------
// Per-request rollup
// ---------------------------------------------------------------------------

/// One row per `(run, request_id)` seen in RESTPP logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingRequest {
    pub run: String,
    pub request_id: String,
    pub restpp_ts: NaiveDateTime,
    pub restpp_node: String,
    pub endpoint: Option<String>,
    pub query_name: Option<String>,
    pub graph_name: Option<String>,
    pub restpp_return_ms: Option<f64>,
    pub restpp_engine: Option<String>,
    pub restpp_return_ts: Option<NaiveDateTime>,
}

impl Columns for RoutingRequest {
    const COLUMNS: &'static [&'static str] = &[
        "run",
        "request_id",
        "restpp_ts",
        "restpp_node",
        "endpoint",
        "query_name",
        "graph_name",
        "restpp_return_ms",
        "restpp_engine",
        "restpp_return_ts",
    ];
}

/// Folds classified lines of one run into per-request rows.
#[derive(Default)]
pub struct RoutingCollector {
    order: Vec<(String, String)>,
    requests: HashMap<(String, String), RoutingRequest>,
    info: HashMap<(String, String), HashMap<String, String>>,
}

impl RoutingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pl: &ParsedLine) {
        let Some(record) = classify(&pl.msg) else {
            return;
        };

        match record {
            RoutingRecord::RawRequest {
                request_id,
                endpoint,
                query_name,
                ..
            } => {
                let row = self.entry(pl, request_id);
                if row.endpoint.is_none() {
                    row.endpoint = endpoint;
                }
                if row.query_name.is_none() {
                    row.query_name = query_name;
                }
            }
            RoutingRecord::ReturnResult {
                request_id,
                ms,
                engine,
            } => {
                let row = self.entry(pl, request_id);
                row.restpp_return_ms = Some(row.restpp_return_ms.map_or(ms, |m| m.max(ms)));
                if row.restpp_engine.is_none() {
                    row.restpp_engine = Some(engine);
                }
                row.restpp_return_ts = Some(row.restpp_return_ts.map_or(pl.ts, |t| t.max(pl.ts)));
            }
            RoutingRecord::RequestInfo { request_id, kv } => {
                if !kv.is_empty() {
                    self.info
                        .entry((pl.run.clone(), request_id))
                        .or_default()
                        .extend(kv);
                }
            }
        }
    }

    fn entry(&mut self, pl: &ParsedLine, request_id: String) -> &mut RoutingRequest {
        let key = (pl.run.clone(), request_id);
        if !self.requests.contains_key(&key) {
            self.order.push(key.clone());
        }
        let row = self.requests.entry(key.clone()).or_insert_with(|| RoutingRequest {
            run: key.0,
            request_id: key.1,
            restpp_ts: pl.ts,
            restpp_node: pl.node.clone(),
            endpoint: None,
            query_name: None,
            graph_name: None,
            restpp_return_ms: None,
            restpp_engine: None,
            restpp_return_ts: None,
        });
        if pl.ts < row.restpp_ts {
            row.restpp_ts = pl.ts;
        }
        row
    }

    /// Rows ordered by `(run, restpp_ts)`, ties in first-seen order.
    pub fn finish(mut self) -> Vec<RoutingRequest> {
        let mut rows: Vec<RoutingRequest> = Vec::with_capacity(self.order.len());
        for key in &self.order {
            if let Some(mut row) = self.requests.remove(key) {
                if let Some(graph) = self.info.get(key).and_then(|kv| kv.get("graph_name")) {
                    row.graph_name = Some(graph.clone());
                }
                rows.push(row);
            }
        }
        rows.sort_by(|a, b| a.run.cmp(&b.run).then(a.restpp_ts.cmp(&b.restpp_ts)));
        rows
    }
}

/// Parse all RESTPP files of one run.
pub fn parse_routing(
    run_id: &str,
    run_dir: &Path,
    nodes: &[String],
    default_year: i32,
    years: &mut dyn YearResolver,
) -> (Vec<RoutingRequest>, WalkStats) {
    let spec = WalkSpec {
        run_id,
        run_dir,
        nodes,
        file_glob: RESTPP_GLOB,
        default_year,
    };
    let mut collector = RoutingCollector::new();
    let stats = walk_logs(&spec, years, |pl| collector.push(&pl));
    (collector.finish(), stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn ts(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    fn line(run: &str, node: &str, t: NaiveDateTime, msg: &str) -> ParsedLine {
        ParsedLine {
            run: run.to_string(),
            node: node.to_string(),
            log_path: "restpp_1.INFO".into(),
            lineno: 1,
            ts: t,
            tid: 1,
            msg: msg.to_string(),
        }
    }

    #[test]
    fn test_classify_raw_request() {
        let rec = classify("RawRequest|,7.RESTPP_1_1.1735729200000.N,NNN,0,0,S|GET|/query/social/q_base?limit=3|user").unwrap();
        assert_eq!(
            rec,
            RoutingRecord::RawRequest {
                request_id: "7.RESTPP_1_1.1735729200000.N".to_string(),
                method: Some("GET".to_string()),
                endpoint: Some("/query/social/q_base?limit=3".to_string()),
                query_name: Some("q_base".to_string()),
            }
        );
    }

    #[test]
    fn test_classify_raw_request_short() {
        let rec = classify("RawRequest|,9.RESTPP_1_1.1735729200000.N,x").unwrap();
        match rec {
            RoutingRecord::RawRequest {
                method,
                endpoint,
                query_name,
                ..
            } => {
                assert_eq!(method, None);
                assert_eq!(endpoint, None);
                assert_eq!(query_name, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        // no comma after the id
        assert_eq!(classify("RawRequest|,9.RESTPP_1_1"), None);
    }

    #[test]
    fn test_classify_return_result() {
        let rec = classify("ReturnResult|0|125ms|gpe|7.RESTPP_1_1.1735729200000.N|size:10").unwrap();
        assert_eq!(
            rec,
            RoutingRecord::ReturnResult {
                request_id: "7.RESTPP_1_1.1735729200000.N".to_string(),
                ms: 125.0,
                engine: "gpe".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_request_info_keeps_allowed_keys() {
        let rec = classify("RequestInfo|,7.RESTPP_1_1.1.N,user:tg|other:1").unwrap();
        assert_eq!(
            rec,
            RoutingRecord::RequestInfo {
                request_id: "7.RESTPP_1_1.1.N".to_string(),
                kv: vec![],
            }
        );

        let rec = classify("RequestInfo|,7.RESTPP_1_1.1.N,x|graph_name: social|user:tg").unwrap();
        assert_eq!(
            rec,
            RoutingRecord::RequestInfo {
                request_id: "7.RESTPP_1_1.1.N".to_string(),
                kv: vec![("graph_name".to_string(), "social".to_string())],
            }
        );
    }

    #[test]
    fn test_classify_unrelated() {
        assert_eq!(classify("Engine started"), None);
    }

    #[test]
    fn test_collector_rolls_up_per_request() {
        let mut c = RoutingCollector::new();
        let rid = "7.RESTPP_1_1.1735729200000.N";
        c.push(&line("r1", "m2", ts(10, 0, 1, 0), &format!("RequestInfo|,{},x|graph_name:social", rid)));
        c.push(&line("r1", "m1", ts(10, 0, 0, 500), &format!("RawRequest|,{},a|GET|/query/social/q_opt|", rid)));
        c.push(&line("r1", "m1", ts(10, 0, 2, 0), &format!("ReturnResult|0|40ms|gpe|{}|", rid)));
        c.push(&line("r1", "m1", ts(10, 0, 3, 0), &format!("ReturnResult|0|90ms|gpe2|{}|", rid)));
        c.push(&line("r1", "m1", ts(9, 0, 0, 0), "ReturnResult|0|5ms|gpe|1.RESTPP_0|"));
        c.push(&line("r1", "m1", ts(9, 0, 0, 0), "not a record"));

        let rows = c.finish();
        assert_eq!(rows.len(), 2);
        // ordered by restpp_ts
        assert_eq!(rows[0].request_id, "1.RESTPP_0");
        let r = &rows[1];
        assert_eq!(r.restpp_ts, ts(10, 0, 0, 500));
        assert_eq!(r.restpp_node, "m1");
        assert_eq!(r.query_name.as_deref(), Some("q_opt"));
        assert_eq!(r.graph_name.as_deref(), Some("social"));
        assert_eq!(r.restpp_return_ms, Some(90.0));
        assert_eq!(r.restpp_engine.as_deref(), Some("gpe"));
        assert_eq!(r.restpp_return_ts, Some(ts(10, 0, 3, 0)));
    }

    #[test]
    fn test_request_info_alone_creates_no_row() {
        let mut c = RoutingCollector::new();
        c.push(&line("r1", "m1", ts(10, 0, 0, 0), "RequestInfo|,1.RESTPP_x,a|graph_name:g"));
        assert!(c.finish().is_empty());
    }

    #[test]
    fn test_same_request_id_in_two_runs_kept_apart() {
        let mut c = RoutingCollector::new();
        c.push(&line("r2", "m1", ts(10, 0, 0, 0), "RawRequest|,1.RESTPP_x,a|GET|/query/g/q2|"));
        c.push(&line("r1", "m1", ts(11, 0, 0, 0), "RawRequest|,1.RESTPP_x,a|GET|/query/g/q1|"));
        let rows = c.finish();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].run, "r1");
        assert_eq!(rows[0].query_name.as_deref(), Some("q1"));
        assert_eq!(rows[1].run, "r2");
    }

    #[test]
    fn test_columns_match_serialized_header() {
        let row = RoutingRequest {
            run: "r".into(),
            request_id: "x".into(),
            restpp_ts: ts(0, 0, 0, 0),
            restpp_node: "m1".into(),
            endpoint: None,
            query_name: None,
            graph_name: None,
            restpp_return_ms: None,
            restpp_engine: None,
            restpp_return_ts: None,
        };
        assert_eq!(crate::table::serialized_header(&row), RoutingRequest::COLUMNS);
    }
}
