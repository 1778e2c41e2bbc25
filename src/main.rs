mod analysis;
mod config;
mod discovery;
mod export;
mod pipeline;
mod runner;
mod table;
mod transform;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use analysis::bottlenecks::{show_log_context, DEFAULT_CONTEXT_LINES};
use analysis::fingerprint::Fingerprinter;
use config::ConfigArgs;
use export::artifacts::save_artifacts;
use export::open_file::open_file;
use pipeline::compute::Event;
use pipeline::routing::RoutingCollector;
use pipeline::walker::walk_file;
use pipeline::year::{FixedYear, YearCache, YearResolver};

#[derive(Parser)]
#[command(
    name = "tg-step-compare",
    version,
    about = "Compare base vs optimized query runs from RESTPP/GPE logs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Tier {
    /// RESTPP request lines
    Routing,
    /// GPE step and UDF boundary lines
    Compute,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write every artifact
    Compare {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Decode and classify a single log file (dev/validation tool)
    Parse {
        /// Path to a RESTPP or GPE log file
        path: PathBuf,

        /// Which grammar to classify with
        #[arg(long, value_enum, default_value = "compute")]
        tier: Tier,

        /// Year to assume instead of inferring it from the file
        #[arg(long)]
        year: Option<i32>,

        /// Print classified records as JSON lines
        #[arg(long)]
        dump_events: bool,
    },

    /// Print the lines around a log location
    Context {
        path: PathBuf,

        /// 1-based line number
        lineno: usize,

        #[arg(long, default_value_t = DEFAULT_CONTEXT_LINES)]
        context: usize,
    },

    /// Rank optimized requests by execution similarity to one base request
    Match {
        #[command(flatten)]
        config: ConfigArgs,

        /// Base request id to match
        #[arg(long)]
        request_id: String,

        /// Number of candidates to report
        #[arg(long, default_value = "5")]
        top: usize,

        /// Only compare these step keys (repeatable)
        #[arg(long = "step")]
        steps: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("tg_step_compare=info".parse()?),
        )
        .init();

    match cli.command {
        Commands::Compare { config } => cmd_compare(&config)?,
        Commands::Parse {
            path,
            tier,
            year,
            dump_events,
        } => cmd_parse(&path, tier, year, dump_events)?,
        Commands::Context { path, lineno, context } => show_log_context(&path, lineno, context)?,
        Commands::Match {
            config,
            request_id,
            top,
            steps,
        } => cmd_match(&config, &request_id, top, steps)?,
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// compare subcommand
// ---------------------------------------------------------------------------

fn cmd_compare(args: &ConfigArgs) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = args.resolve().context("Invalid configuration")?;

    eprintln!(
        "Comparing '{}' vs '{}' over {} run(s), nodes: {}",
        config.base_query,
        config.opt_query,
        config.runs.len(),
        config.nodes.join(" ")
    );

    let out = runner::execute_pipeline(&config)?;
    let plot = save_artifacts(&out, &config.out_dir)?;

    if config.open_plot {
        match &plot {
            Some(path) => open_file(path),
            None => tracing::warn!("No chart was written; nothing to open"),
        }
    }

    let elapsed = start.elapsed();
    let summary = serde_json::json!({
        "status": "ok",
        "out_dir": config.out_dir.display().to_string(),
        "plot": plot.map(|p| p.display().to_string()),
        "runs": config.runs.iter().map(|r| r.key.as_str()).collect::<Vec<_>>(),
        "base_query": config.base_query,
        "opt_query": config.opt_query,
        "counts": out.counts(),
        "total_seconds": elapsed.as_secs_f64(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    eprintln!("Done in {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

// ---------------------------------------------------------------------------
// parse subcommand
// ---------------------------------------------------------------------------

fn node_of(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "-".to_string())
}

fn cmd_parse(path: &Path, tier: Tier, year: Option<i32>, dump_events: bool) -> anyhow::Result<()> {
    let start = Instant::now();

    let file_size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    let mut resolver: Box<dyn YearResolver> = match year {
        Some(y) => Box::new(FixedYear(y)),
        None => Box::new(YearCache::new()),
    };
    let year = resolver.resolve(path, runner::current_year());
    let node = node_of(path);

    eprintln!(
        "Parsing {} ({:.2} MB) as {:?}, year {}",
        path.display(),
        file_size as f64 / 1_048_576.0,
        tier,
        year
    );

    let records = match tier {
        Tier::Routing => {
            let mut collector = RoutingCollector::new();
            let stats = walk_file("cli", &node, path, year, &mut |pl| collector.push(&pl))?;
            let requests = collector.finish();
            eprintln!(
                "Decoded {}/{} lines ({} rotation markers), {} requests",
                stats.decoded,
                stats.lines,
                stats.rotation_markers,
                requests.len()
            );
            requests.iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>()?
        }
        Tier::Compute => {
            let mut events: Vec<Event> = Vec::new();
            let stats = walk_file("cli", &node, path, year, &mut |pl| {
                if let Some(record) = pipeline::compute::classify(&pl.msg) {
                    events.push(Event::from_line(&pl, record));
                }
            })?;
            eprintln!(
                "Decoded {}/{} lines ({} rotation markers), {} events",
                stats.decoded,
                stats.lines,
                stats.rotation_markers,
                events.len()
            );
            events.iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>()?
        }
    };

    if dump_events {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
    }

    eprintln!("Parsed in {:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}

// ---------------------------------------------------------------------------
// match subcommand
// ---------------------------------------------------------------------------

fn cmd_match(args: &ConfigArgs, request_id: &str, top: usize, steps: Vec<String>) -> anyhow::Result<()> {
    let config = args.resolve().context("Invalid configuration")?;
    let out = runner::execute_pipeline(&config)?;
    let exec = &out.comparison.exec_table;

    let Some(target) = exec.iter().find(|r| r.request_id == request_id) else {
        bail!("Request {} has no complete execution in the given runs", request_id);
    };
    if target.query_name.as_deref() != Some(config.base_query.as_str()) {
        tracing::warn!(
            "Request {} belongs to {:?}, not the base query '{}'",
            request_id,
            target.query_name,
            config.base_query
        );
    }

    let candidates: Vec<(&str, &str)> = exec
        .iter()
        .filter(|r| r.query_name.as_deref() == Some(config.opt_query.as_str()))
        .map(|r| (r.run.as_str(), r.request_id.as_str()))
        .collect();
    eprintln!("Scoring {} candidate(s) of '{}'", candidates.len(), config.opt_query);

    let fingerprinter = Fingerprinter::with_allowlist(steps);
    let matches = fingerprinter.rank_candidates(
        &out.events.gaps,
        (target.run.as_str(), target.request_id.as_str()),
        &candidates,
    );

    let best_diff = matches.first().map(|m| m.diff.clone()).unwrap_or_default();
    let summary = serde_json::json!({
        "target_run": target.run,
        "target_request_id": target.request_id,
        "candidates": candidates.len(),
        "matches": matches.iter().take(top).collect::<Vec<_>>(),
        "best_diff": best_diff,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
