//! GPE (compute tier) log classification into the raw event table.
//!
//! Three message grammars are recognised: UDF step markers, `Start_RunUDF`
//! and `Stop_RunUDF|<ms>ms`. A request id is attached only when the message
//! itself carries one; interior steps usually do not (see
//! `transform::attach`).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::patterns::{self, GPE_GLOB};
use super::walker::{walk_logs, ParsedLine, WalkSpec, WalkStats};
use super::year::YearResolver;
use crate::table::Columns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventKind {
    #[serde(rename = "UDF_START")]
    UdfStart,
    #[serde(rename = "STEP")]
    Step,
    #[serde(rename = "UDF_STOP")]
    UdfStop,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UdfStart => "UDF_START",
            EventKind::Step => "STEP",
            EventKind::UdfStop => "UDF_STOP",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified GPE message.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeRecord {
    Step {
        udf: String,
        label: String,
        detail: String,
        iteration: Option<u32>,
    },
    UdfStart {
        detail: String,
    },
    UdfStop {
        detail: String,
        ms: f64,
    },
}

/// Classify a GPE message body. Step markers take precedence over
/// boundaries.
pub fn classify(msg: &str) -> Option<ComputeRecord> {
    if let Some(caps) = patterns::udf_step().captures(msg) {
        let detail = caps["detail"].to_string();
        let iteration = patterns::iteration_in_detail()
            .captures(&detail)
            .and_then(|c| c["iter"].parse().ok());
        return Some(ComputeRecord::Step {
            udf: caps["udf"].to_string(),
            label: caps["label"].to_string(),
            detail,
            iteration,
        });
    }

    if patterns::start_run_udf().is_match(msg) {
        return Some(ComputeRecord::UdfStart {
            detail: msg.to_string(),
        });
    }

    if let Some(caps) = patterns::stop_run_udf().captures(msg) {
        if let Ok(ms) = caps["ms"].parse() {
            return Some(ComputeRecord::UdfStop {
                detail: msg.to_string(),
                ms,
            });
        }
    }

    None
}

/// One row of the working event table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub run: String,
    pub node: String,
    pub ts: NaiveDateTime,
    pub tid: u64,
    pub request_id: Option<String>,
    pub event: EventKind,
    pub udf: Option<String>,
    pub label: String,
    pub iteration: Option<u32>,
    pub detail: String,
    pub udf_ms: Option<f64>,
    pub log_path: String,
    pub lineno: usize,
    pub raw_msg: String,
}

impl Columns for Event {
    const COLUMNS: &'static [&'static str] = &[
        "run",
        "node",
        "ts",
        "tid",
        "request_id",
        "event",
        "udf",
        "label",
        "iteration",
        "detail",
        "udf_ms",
        "log_path",
        "lineno",
        "raw_msg",
    ];
}

impl Event {
    pub fn from_line(pl: &ParsedLine, record: ComputeRecord) -> Self {
        let request_id = patterns::extract_request_id(&pl.msg).map(|s| s.to_string());
        let (event, udf, label, iteration, detail, udf_ms) = match record {
            ComputeRecord::Step {
                udf,
                label,
                detail,
                iteration,
            } => (EventKind::Step, Some(udf), label, iteration, detail, None),
            ComputeRecord::UdfStart { detail } => {
                (EventKind::UdfStart, None, EventKind::UdfStart.to_string(), None, detail, None)
            }
            ComputeRecord::UdfStop { detail, ms } => {
                (EventKind::UdfStop, None, EventKind::UdfStop.to_string(), None, detail, Some(ms))
            }
        };

        Self {
            run: pl.run.clone(),
            node: pl.node.clone(),
            ts: pl.ts,
            tid: pl.tid,
            request_id,
            event,
            udf,
            label,
            iteration,
            detail,
            udf_ms,
            log_path: pl.log_path.display().to_string(),
            lineno: pl.lineno,
            raw_msg: pl.msg.clone(),
        }
    }
}

/// Drop events repeated across rotated/bundled files.
///
/// Provenance (`log_path`, `lineno`) is not part of the identity; the first
/// occurrence in `(run, node, tid, ts, log_path, lineno)` order is kept.
/// Returns the survivors in that order and the number dropped.
pub fn dedupe_events(mut events: Vec<Event>) -> (Vec<Event>, usize) {
    events.sort_by(|a, b| {
        a.run
            .cmp(&b.run)
            .then_with(|| a.node.cmp(&b.node))
            .then(a.tid.cmp(&b.tid))
            .then(a.ts.cmp(&b.ts))
            .then_with(|| a.log_path.cmp(&b.log_path))
            .then(a.lineno.cmp(&b.lineno))
    });

    let before = events.len();
    let mut seen: HashSet<(String, String, u64, NaiveDateTime, String)> = HashSet::with_capacity(before);
    events.retain(|e| seen.insert((e.run.clone(), e.node.clone(), e.tid, e.ts, e.raw_msg.clone())));
    let dropped = before - events.len();
    (events, dropped)
}

/// Parse all GPE files of one run into a deduplicated event table ordered by
/// `(run, node, tid, ts)`.
pub fn parse_compute(
    run_id: &str,
    run_dir: &Path,
    nodes: &[String],
    default_year: i32,
    years: &mut dyn YearResolver,
) -> (Vec<Event>, WalkStats, usize) {
    let spec = WalkSpec {
        run_id,
        run_dir,
        nodes,
        file_glob: GPE_GLOB,
        default_year,
    };

    let mut events = Vec::new();
    let stats = walk_logs(&spec, years, |pl| {
        if let Some(record) = classify(&pl.msg) {
            events.push(Event::from_line(&pl, record));
        }
    });

    let (events, dropped) = dedupe_events(events);
    if dropped > 0 {
        tracing::info!(
            run = run_id,
            "GPE dedupe: dropped {} duplicate events ({} -> {})",
            dropped,
            events.len() + dropped,
            events.len()
        );
    }
    (events, stats, dropped)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    pub(crate) fn ts_ms(ms: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            + chrono::Duration::milliseconds(ms)
    }

    /// Event builder for tests across the crate.
    pub(crate) fn ev(tid: u64, at_ms: i64, kind: EventKind, rid: Option<&str>, label: &str, lineno: usize) -> Event {
        Event {
            run: "r1".to_string(),
            node: "m1".to_string(),
            ts: ts_ms(at_ms),
            tid,
            request_id: rid.map(|r| r.to_string()),
            event: kind,
            udf: None,
            label: label.to_string(),
            iteration: None,
            detail: String::new(),
            udf_ms: None,
            log_path: "m1/gpe_1.INFO".to_string(),
            lineno,
            raw_msg: format!("{}@{}", label, lineno),
        }
    }

    #[test]
    fn test_classify_step_with_iteration() {
        let rec = classify(r#"[UDF_q_opt log] "Step 2 - expand": iteration: 4 size=10"#).unwrap();
        assert_eq!(
            rec,
            ComputeRecord::Step {
                udf: "q_opt".to_string(),
                label: "Step 2 - expand".to_string(),
                detail: "iteration: 4 size=10".to_string(),
                iteration: Some(4),
            }
        );
    }

    #[test]
    fn test_classify_step_without_iteration() {
        match classify(r#"[UDF_q log] "Init": start"#).unwrap() {
            ComputeRecord::Step { iteration, .. } => assert_eq!(iteration, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(
            classify("Start_RunUDF req=42"),
            Some(ComputeRecord::UdfStart {
                detail: "Start_RunUDF req=42".to_string()
            })
        );
        assert_eq!(
            classify("Stop_RunUDF|250ms"),
            Some(ComputeRecord::UdfStop {
                detail: "Stop_RunUDF|250ms".to_string(),
                ms: 250.0
            })
        );
        assert_eq!(classify("Stop_RunUDF|250 ms").map(|r| matches!(r, ComputeRecord::UdfStop { .. })), Some(true));
        assert_eq!(classify("Start_RunUDFX"), None);
        assert_eq!(classify("heartbeat"), None);
    }

    #[test]
    fn test_event_from_line_picks_up_request_id() {
        let pl = ParsedLine {
            run: "r1".to_string(),
            node: "m1".to_string(),
            log_path: "m1/gpe_1.INFO".into(),
            lineno: 7,
            ts: ts_ms(0),
            tid: 123,
            msg: "Start_RunUDF 7.RESTPP_1_1.1735729200000.N req=42".to_string(),
        };
        let rec = classify(&pl.msg).unwrap();
        let e = Event::from_line(&pl, rec);
        assert_eq!(e.event, EventKind::UdfStart);
        assert_eq!(e.label, "UDF_START");
        assert_eq!(e.request_id.as_deref(), Some("7.RESTPP_1_1.1735729200000.N"));
        assert_eq!(e.lineno, 7);
        assert_eq!(e.udf_ms, None);
    }

    #[test]
    fn test_dedupe_keeps_first_by_provenance() {
        let mut a = ev(1, 0, EventKind::Step, None, "Step 1", 20);
        a.log_path = "m1/gpe_b.INFO".to_string();
        let mut b = ev(1, 0, EventKind::Step, None, "Step 1", 10);
        b.log_path = "m1/gpe_a.INFO".to_string();
        b.raw_msg = a.raw_msg.clone();
        let c = ev(1, 5, EventKind::Step, None, "Step 2", 11);

        let (out, dropped) = dedupe_events(vec![c.clone(), a, b.clone()]);
        assert_eq!(dropped, 1);
        assert_eq!(out, vec![b, c]);
    }

    #[test]
    fn test_event_kind_serializes_as_tag() {
        assert_eq!(serde_json::to_string(&EventKind::UdfStop).unwrap(), "\"UDF_STOP\"");
        assert_eq!(EventKind::Step.to_string(), "STEP");
    }

    #[test]
    fn test_columns_match_serialized_header() {
        let e = ev(1, 0, EventKind::Step, None, "x", 1);
        assert_eq!(crate::table::serialized_header(&e), Event::COLUMNS);
    }

    #[test]
    fn test_parse_compute_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("m1");
        std::fs::create_dir_all(&node).unwrap();
        let body = "\
I0101 10:00:00.000 123 ]  Start_RunUDF 7.RESTPP_1_1.1735729200000.N req=42
I0101 10:00:00.100 123 a.cc:9] [UDF_q log] \"Step 1\": iteration: 0
I0101 10:00:00.250 123 ]  Stop_RunUDF|250ms
I0101 10:00:00.300 123 a.cc:9] unrelated
";
        std::fs::write(node.join("gpe_1_1.INFO"), body).unwrap();
        // rotated copy repeating the last two events
        std::fs::write(
            node.join("gpe_1_2.INFO"),
            "bundle of 7.RESTPP_1_1.1735729200000.N\nI0101 10:00:00.100 123 a.cc:9] [UDF_q log] \"Step 1\": iteration: 0\nI0101 10:00:00.250 123 ]  Stop_RunUDF|250ms\n",
        )
        .unwrap();

        let mut years = crate::pipeline::year::YearCache::new();
        let (events, stats, dropped) = parse_compute("r1", dir.path(), &["m1".to_string()], 1999, &mut years);
        assert_eq!(dropped, 2);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.decoded, 6);
        let kinds: Vec<EventKind> = events.iter().map(|e| e.event).collect();
        assert_eq!(kinds, vec![EventKind::UdfStart, EventKind::Step, EventKind::UdfStop]);
        // year comes from the request id epoch in the first file
        assert_eq!(events[0].ts.format("%Y").to_string(), "2025");
        assert_eq!(events[1].iteration, Some(0));
        assert_eq!(events[2].udf_ms, Some(250.0));
    }
}
