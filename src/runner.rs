//! Pipeline orchestration: ingest → process → compare.
//!
//! Runs are ingested in parallel, one task per run, each with its own year
//! cache. Everything after ingest works on the merged, deterministically
//! sorted tables.

use anyhow::{bail, Context, Result};
use chrono::Datelike;
use rayon::prelude::*;
use serde::Serialize;

use crate::analysis::bottlenecks::{top_bottlenecks, Bottleneck, DEFAULT_TOP_N};
use crate::analysis::compare::{
    build_ordered_step_side_table, compare_two_queries, ComparisonRow, SideBySideRow, DEFAULT_STEP_PREFIX,
};
use crate::analysis::requests::{build_exec_request_table, extract_ids, summarize_requests, ExecRequest, RequestSummary};
use crate::analysis::stats::{make_step_stats, StepStatistic};
use crate::config::{CompareConfig, RunInput};
use crate::pipeline::compute::{parse_compute, Event};
use crate::pipeline::routing::{parse_routing, RoutingRequest};
use crate::pipeline::walker::WalkStats;
use crate::pipeline::year::YearCache;
use crate::transform::attach::attach_steps_to_requests;
use crate::transform::gaps::{add_query_name, build_gaps, Gap};

/// Raw tables of one run.
#[derive(Debug)]
pub struct RunIngest {
    pub run: String,
    pub requests: Vec<RoutingRequest>,
    pub events: Vec<Event>,
    pub routing_stats: WalkStats,
    pub compute_stats: WalkStats,
    pub duplicates_dropped: usize,
}

/// Raw tables of all runs.
#[derive(Debug, Default)]
pub struct LogExtracts {
    pub requests: Vec<RoutingRequest>,
    pub events: Vec<Event>,
    pub routing_stats: WalkStats,
    pub compute_stats: WalkStats,
    pub duplicates_dropped: usize,
}

/// Events linked to requests and the query-tagged gaps between them.
#[derive(Debug, Default)]
pub struct QueryEvents {
    pub attached: Vec<Event>,
    pub gaps: Vec<Gap>,
}

#[derive(Debug, Default)]
pub struct Comparison {
    pub request_summary: Vec<RequestSummary>,
    pub exec_table: Vec<ExecRequest>,
    pub step_stats: Vec<StepStatistic>,
    pub compare: Vec<ComparisonRow>,
    pub side_by_side: Vec<SideBySideRow>,
    pub bottlenecks_base: Vec<Bottleneck>,
    pub bottlenecks_opt: Vec<Bottleneck>,
    pub base_request_ids: Vec<String>,
    pub opt_request_ids: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub extracts: LogExtracts,
    pub events: QueryEvents,
    pub comparison: Comparison,
}

/// Row counts of a finished pipeline, for the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineCounts {
    pub restpp_requests: usize,
    pub gpe_events: usize,
    pub gpe_duplicates_dropped: usize,
    pub attached_with_request_id: usize,
    pub gaps: usize,
    pub gaps_with_query: usize,
    pub requests: usize,
    pub executions: usize,
    pub step_stats: usize,
    pub compared_steps: usize,
    pub side_by_side_steps: usize,
    pub base_requests: usize,
    pub opt_requests: usize,
    pub restpp_walk: WalkStats,
    pub gpe_walk: WalkStats,
}

impl PipelineOutput {
    pub fn counts(&self) -> PipelineCounts {
        let c = &self.comparison;
        PipelineCounts {
            restpp_requests: self.extracts.requests.len(),
            gpe_events: self.extracts.events.len(),
            gpe_duplicates_dropped: self.extracts.duplicates_dropped,
            attached_with_request_id: self.events.attached.iter().filter(|e| e.request_id.is_some()).count(),
            gaps: self.events.gaps.len(),
            gaps_with_query: self.events.gaps.iter().filter(|g| g.query_name.is_some()).count(),
            requests: c.request_summary.len(),
            executions: c.exec_table.len(),
            step_stats: c.step_stats.len(),
            compared_steps: c.compare.len(),
            side_by_side_steps: c.side_by_side.len(),
            base_requests: c.base_request_ids.len(),
            opt_requests: c.opt_request_ids.len(),
            restpp_walk: self.extracts.routing_stats,
            gpe_walk: self.extracts.compute_stats,
        }
    }
}

/// Year assumed for files with no year hint.
pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

/// Parse both tiers of one run with a run-private year cache.
pub fn ingest_run(run: &RunInput, nodes: &[String], default_year: i32) -> Result<RunIngest> {
    if !run.path.is_dir() {
        bail!("Run directory not found: {}", run.path.display());
    }

    let mut years = YearCache::new();
    let (requests, routing_stats) = parse_routing(&run.key, &run.path, nodes, default_year, &mut years);
    let (events, compute_stats, duplicates_dropped) =
        parse_compute(&run.key, &run.path, nodes, default_year, &mut years);

    tracing::info!(
        run = %run.key,
        files = routing_stats.files,
        lines = routing_stats.lines,
        decoded = routing_stats.decoded,
        rotation_markers = routing_stats.rotation_markers,
        header_mismatches = routing_stats.header_mismatches,
        unreadable = routing_stats.files_unreadable,
        requests = requests.len(),
        "RESTPP parsed"
    );
    tracing::info!(
        run = %run.key,
        files = compute_stats.files,
        lines = compute_stats.lines,
        decoded = compute_stats.decoded,
        rotation_markers = compute_stats.rotation_markers,
        header_mismatches = compute_stats.header_mismatches,
        unreadable = compute_stats.files_unreadable,
        events = events.len(),
        duplicates_dropped,
        year_scans = years.scans(),
        year_files = years.len(),
        "GPE parsed"
    );

    Ok(RunIngest {
        run: run.key.clone(),
        requests,
        events,
        routing_stats,
        compute_stats,
        duplicates_dropped,
    })
}

/// Ingest every run on a local pool of `workers` threads and merge the
/// results in run order.
pub fn ingest_logs(runs: &[RunInput], nodes: &[String], workers: usize, default_year: i32) -> Result<LogExtracts> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("Failed to build ingest thread pool")?;

    let per_run: Vec<RunIngest> = pool.install(|| {
        runs.par_iter()
            .map(|run| ingest_run(run, nodes, default_year))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut out = LogExtracts::default();
    for r in per_run {
        tracing::debug!(
            run = %r.run,
            requests = r.requests.len(),
            events = r.events.len(),
            "Merging run"
        );
        out.requests.extend(r.requests);
        out.events.extend(r.events);
        out.routing_stats += r.routing_stats;
        out.compute_stats += r.compute_stats;
        out.duplicates_dropped += r.duplicates_dropped;
    }

    out.requests
        .sort_by(|a, b| a.run.cmp(&b.run).then(a.restpp_ts.cmp(&b.restpp_ts)));
    out.events.sort_by(|a, b| {
        a.run
            .cmp(&b.run)
            .then_with(|| a.node.cmp(&b.node))
            .then(a.tid.cmp(&b.tid))
            .then(a.ts.cmp(&b.ts))
    });
    Ok(out)
}

/// Attach request ids, build gaps and tag them with their query variant.
pub fn process_events(extracts: &LogExtracts) -> QueryEvents {
    let attached = attach_steps_to_requests(&extracts.events);
    let raw_gaps = build_gaps(&attached);
    let gaps = add_query_name(&raw_gaps, &extracts.requests);
    QueryEvents { attached, gaps }
}

/// Request tables, step statistics, comparisons and bottlenecks.
pub fn compare_performance(
    extracts: &LogExtracts,
    events: &QueryEvents,
    base_query: &str,
    opt_query: &str,
) -> Comparison {
    let request_summary = summarize_requests(&extracts.requests, &events.attached);
    let exec_table = build_exec_request_table(&extracts.requests, &events.attached);
    let (base_request_ids, opt_request_ids) = extract_ids(&exec_table, base_query, opt_query);

    let step_stats = make_step_stats(&events.gaps);
    let compare = compare_two_queries(&step_stats, base_query, opt_query);
    let side_by_side = build_ordered_step_side_table(&events.gaps, base_query, opt_query, DEFAULT_STEP_PREFIX);

    Comparison {
        request_summary,
        exec_table,
        step_stats,
        compare,
        side_by_side,
        bottlenecks_base: top_bottlenecks(&events.gaps, base_query, DEFAULT_TOP_N),
        bottlenecks_opt: top_bottlenecks(&events.gaps, opt_query, DEFAULT_TOP_N),
        base_request_ids,
        opt_request_ids,
    }
}

/// Run the whole pipeline for a validated config.
pub fn execute_pipeline(config: &CompareConfig) -> Result<PipelineOutput> {
    execute_pipeline_with_year(config, current_year())
}

pub fn execute_pipeline_with_year(config: &CompareConfig, default_year: i32) -> Result<PipelineOutput> {
    eprintln!("1. Ingesting logs...");
    let extracts = ingest_logs(&config.runs, &config.nodes, config.effective_workers(), default_year)?;

    eprintln!("2. Processing query events...");
    let events = process_events(&extracts);

    eprintln!("3. Comparing performance...");
    let comparison = compare_performance(&extracts, &events, &config.base_query, &config.opt_query);

    Ok(PipelineOutput {
        extracts,
        events,
        comparison,
    })
}
