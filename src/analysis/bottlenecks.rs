//! Slowest individual gaps per variant, and a viewer for the log lines
//! around one of them.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::pipeline::compute::EventKind;
use crate::table::{cmp_f64_desc, Columns};
use crate::transform::gaps::Gap;

pub const DEFAULT_TOP_N: usize = 50;
pub const DEFAULT_CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    pub query_name: String,
    pub gap_ms: f64,
    pub step_key: String,
    pub iteration: Option<u32>,
    pub run: String,
    pub node: String,
    pub tid: u64,
    pub request_id: String,
    pub ts: NaiveDateTime,
    pub prev_label: String,
    pub event: EventKind,
    pub label: String,
    pub log_path: String,
    pub lineno: usize,
    pub detail: String,
}

impl Columns for Bottleneck {
    const COLUMNS: &'static [&'static str] = &[
        "query_name",
        "gap_ms",
        "step_key",
        "iteration",
        "run",
        "node",
        "tid",
        "request_id",
        "ts",
        "prev_label",
        "event",
        "label",
        "log_path",
        "lineno",
        "detail",
    ];
}

/// The `n` largest gaps of `query_name`, largest first. Ties keep input
/// order.
pub fn top_bottlenecks(gaps: &[Gap], query_name: &str, n: usize) -> Vec<Bottleneck> {
    let mut hits: Vec<&Gap> = gaps
        .iter()
        .filter(|g| g.query_name.as_deref() == Some(query_name))
        .collect();
    hits.sort_by(|a, b| cmp_f64_desc(a.gap_ms, b.gap_ms));

    hits.into_iter()
        .take(n)
        .map(|g| Bottleneck {
            query_name: query_name.to_string(),
            gap_ms: g.gap_ms,
            step_key: g.step_key.clone(),
            iteration: g.iteration,
            run: g.run.clone(),
            node: g.node.clone(),
            tid: g.tid,
            request_id: g.request_id.clone(),
            ts: g.ts,
            prev_label: g.prev_label.clone(),
            event: g.event,
            label: g.label.clone(),
            log_path: g.log_path.clone(),
            lineno: g.lineno,
            detail: g.detail.clone(),
        })
        .collect()
}

/// Write `context` lines either side of `lineno` (1-based), marking the
/// target line with `>>`. A missing file is reported in the output.
pub fn write_log_context<W: Write>(out: &mut W, log_path: &Path, lineno: usize, context: usize) -> Result<()> {
    if !log_path.exists() {
        writeln!(out, "Missing file: {}", log_path.display())?;
        return Ok(());
    }

    let start = lineno.saturating_sub(context).max(1);
    let end = lineno.saturating_add(context);

    let file = File::open(log_path).with_context(|| format!("Failed to open {}", log_path.display()))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut i = 0usize;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("Failed to read {}", log_path.display()))?;
        if n == 0 {
            break;
        }
        i += 1;
        if i < start {
            continue;
        }
        if i > end {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let prefix = if i == lineno { ">>" } else { "  " };
        writeln!(out, "{} {:6}: {}", prefix, i, line.trim_end())?;
    }
    Ok(())
}

/// Print log context to stdout.
pub fn show_log_context(log_path: &Path, lineno: usize, context: usize) -> Result<()> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    write_log_context(&mut lock, log_path, lineno, context)
}
