//! Artifact layout under the output directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::plot::{plot_step_means, DEFAULT_TITLE};
use super::writers::{write_csv, write_lines};
use crate::runner::PipelineOutput;

pub struct OutputPaths {
    pub out_dir: PathBuf,
    pub restpp_requests_csv: PathBuf,
    pub gpe_events_attached_csv: PathBuf,
    pub gaps_with_query_csv: PathBuf,
    pub request_summary_csv: PathBuf,
    pub exec_request_table_csv: PathBuf,
    pub step_stats_csv: PathBuf,
    pub compare_two_queries_csv: PathBuf,
    pub side_ordered_steps_csv: PathBuf,
    pub bottlenecks_base_csv: PathBuf,
    pub bottlenecks_opt_csv: PathBuf,
    pub base_request_ids_txt: PathBuf,
    pub opt_request_ids_txt: PathBuf,
    pub step_means_svg: PathBuf,
}

impl OutputPaths {
    pub fn new(out_dir: &Path) -> Self {
        let od = out_dir.to_path_buf();
        Self {
            restpp_requests_csv: od.join("restpp_requests.csv"),
            gpe_events_attached_csv: od.join("gpe_events_attached.csv"),
            gaps_with_query_csv: od.join("gaps_with_query.csv"),
            request_summary_csv: od.join("request_summary.csv"),
            exec_request_table_csv: od.join("exec_request_table.csv"),
            step_stats_csv: od.join("step_stats.csv"),
            compare_two_queries_csv: od.join("compare_two_queries.csv"),
            side_ordered_steps_csv: od.join("side_ordered_steps.csv"),
            bottlenecks_base_csv: od.join("bottlenecks_base.csv"),
            bottlenecks_opt_csv: od.join("bottlenecks_opt.csv"),
            base_request_ids_txt: od.join("base_request_ids.txt"),
            opt_request_ids_txt: od.join("opt_request_ids.txt"),
            step_means_svg: od.join("step_means_base_vs_opt.svg"),
            out_dir: od,
        }
    }
}

/// Write every table, the id lists and the chart. Returns the chart path
/// when the side-by-side table had rows to plot.
pub fn save_artifacts(results: &PipelineOutput, out_dir: &Path) -> Result<Option<PathBuf>> {
    let paths = OutputPaths::new(out_dir);
    std::fs::create_dir_all(&paths.out_dir)
        .with_context(|| format!("Failed to create {}", paths.out_dir.display()))?;
    eprintln!("Writing outputs to: {}", paths.out_dir.display());

    let ex = &results.extracts;
    let ev = &results.events;
    let cmp = &results.comparison;

    write_csv(&ex.requests, &paths.restpp_requests_csv)?;
    write_csv(&ev.attached, &paths.gpe_events_attached_csv)?;
    write_csv(&ev.gaps, &paths.gaps_with_query_csv)?;

    write_csv(&cmp.request_summary, &paths.request_summary_csv)?;
    write_csv(&cmp.exec_table, &paths.exec_request_table_csv)?;
    write_csv(&cmp.step_stats, &paths.step_stats_csv)?;
    write_csv(&cmp.compare, &paths.compare_two_queries_csv)?;
    write_csv(&cmp.side_by_side, &paths.side_ordered_steps_csv)?;

    write_csv(&cmp.bottlenecks_base, &paths.bottlenecks_base_csv)?;
    write_csv(&cmp.bottlenecks_opt, &paths.bottlenecks_opt_csv)?;
    write_lines(&cmp.base_request_ids, &paths.base_request_ids_txt)?;
    write_lines(&cmp.opt_request_ids, &paths.opt_request_ids_txt)?;

    if cmp.side_by_side.is_empty() {
        tracing::info!("No ordered steps for both variants; skipping chart");
        return Ok(None);
    }
    plot_step_means(&cmp.side_by_side, &paths.step_means_svg, DEFAULT_TITLE)?;
    Ok(Some(paths.step_means_svg))
}
