//! Comparison configuration.
//!
//! Built from CLI flags, optionally layered over an env file
//! (`KEY=VALUE` lines). Process environment variables of the same name
//! override file values; CLI flags override both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_NODES: &[&str] = &["m1", "m2", "m3", "m4"];
pub const DEFAULT_OUT_DIR: &str = "out";

const FIXED_KEYS: &[&str] = &["OUT_DIR", "NODES", "BASE_QUERY", "OPT_QUERY", "OPEN_PLOT", "WORKERS"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing {0}")]
    Missing(String),

    #[error("{var} must be an absolute path. Got: {value}")]
    NotAbsolute { var: String, value: String },

    #[error("Run directory not found: {}", .0.display())]
    RunDirNotFound(PathBuf),

    #[error("run must be KEY=PATH (e.g. 2025-12-11=/path/to/dir). Got: {0}")]
    BadRunSpec(String),

    #[error("Missing or empty env file: {}", .0.display())]
    EmptyEnvFile(PathBuf),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("At least one run is required")]
    NoRuns,
}

/// One comparison run: an identifier and its log root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInput {
    pub key: String,
    pub path: PathBuf,
}

/// Parse a `KEY=PATH` run spec. Relative paths resolve against the
/// current directory.
pub fn parse_run_spec(s: &str) -> Result<RunInput, ConfigError> {
    let (key, path) = s.split_once('=').ok_or_else(|| ConfigError::BadRunSpec(s.to_string()))?;
    let key = key.trim();
    let path = path.trim();
    if key.is_empty() || path.is_empty() {
        return Err(ConfigError::BadRunSpec(s.to_string()));
    }
    let path = PathBuf::from(path);
    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    };
    Ok(RunInput {
        key: key.to_string(),
        path,
    })
}

/// Accepts `1/true/yes/y/on` and `0/false/no/n/off` (case-insensitive).
pub fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn require_abs_path(var: &str, raw: Option<&String>) -> Result<PathBuf, ConfigError> {
    let raw = raw
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::Missing(var.to_string()))?;
    let p = PathBuf::from(raw);
    if !p.is_absolute() {
        return Err(ConfigError::NotAbsolute {
            var: var.to_string(),
            value: raw.to_string(),
        });
    }
    Ok(p)
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped, an
/// optional `export ` prefix is accepted, and matching single or double
/// quotes around a value are stripped.
pub fn parse_env_text(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim();
        let quoted = value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')));
        if quoted {
            value = &value[1..value.len() - 1];
        } else if let Some(idx) = value.find(" #") {
            value = value[..idx].trim_end();
        }
        out.insert(key.to_string(), value.to_string());
    }
    out
}

/// Overlay variables from `lookup` onto file values for every key the
/// config reads, including `RUN_<n>_*` for as long as either source has a
/// `RUN_<n>_DIR`.
pub fn overlay_env<F>(mut values: HashMap<String, String>, lookup: F) -> HashMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in FIXED_KEYS {
        if let Some(v) = lookup(key) {
            values.insert(key.to_string(), v);
        }
    }
    let mut n = 1;
    loop {
        let dir_key = format!("RUN_{}_DIR", n);
        let key_key = format!("RUN_{}_KEY", n);
        let env_dir = lookup(&dir_key);
        if env_dir.is_none() && !values.contains_key(&dir_key) {
            break;
        }
        if let Some(v) = env_dir {
            values.insert(dir_key, v);
        }
        if let Some(v) = lookup(&key_key) {
            values.insert(key_key, v);
        }
        n += 1;
    }
    values
}

/// Full configuration of one comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareConfig {
    pub runs: Vec<RunInput>,
    pub nodes: Vec<String>,
    pub base_query: String,
    pub opt_query: String,
    pub out_dir: PathBuf,
    pub open_plot: bool,
    /// Ingest threads; 0 means one per CPU.
    pub workers: usize,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            runs: Vec::new(),
            nodes: DEFAULT_NODES.iter().map(|s| s.to_string()).collect(),
            base_query: String::new(),
            opt_query: String::new(),
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            open_plot: false,
            workers: 0,
        }
    }
}

impl CompareConfig {
    /// Build from env-style values. Requires `RUN_1_DIR`; every configured
    /// directory must be absolute.
    pub fn from_env_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if values.get("OUT_DIR").is_some_and(|v| !v.trim().is_empty()) {
            config.out_dir = require_abs_path("OUT_DIR", values.get("OUT_DIR"))?;
        }

        let mut n = 1;
        loop {
            let dir_var = format!("RUN_{}_DIR", n);
            if n > 1 && !values.contains_key(&dir_var) {
                break;
            }
            let path = require_abs_path(&dir_var, values.get(&dir_var))?;
            let key = values
                .get(&format!("RUN_{}_KEY", n))
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| format!("run{}", n));
            config.runs.push(RunInput { key, path });
            n += 1;
        }

        if let Some(nodes) = values.get("NODES") {
            let parsed: Vec<String> = nodes.split_whitespace().map(|s| s.to_string()).collect();
            if !parsed.is_empty() {
                config.nodes = parsed;
            }
        }

        config.base_query = values.get("BASE_QUERY").map(|s| s.trim().to_string()).unwrap_or_default();
        config.opt_query = values.get("OPT_QUERY").map(|s| s.trim().to_string()).unwrap_or_default();

        if let Some(raw) = values.get("OPEN_PLOT") {
            config.open_plot = parse_bool("OPEN_PLOT", raw)?;
        }
        if let Some(raw) = values.get("WORKERS").filter(|v| !v.trim().is_empty()) {
            config.workers = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: "WORKERS".to_string(),
                value: raw.clone(),
            })?;
        }

        Ok(config)
    }

    /// Load an env file, letting process environment variables win.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).unwrap_or_default();
        let values = parse_env_text(&text);
        if values.is_empty() {
            return Err(ConfigError::EmptyEnvFile(path.to_path_buf()));
        }
        let values = overlay_env(values, |k| std::env::var(k).ok());
        Self::from_env_values(&values)
    }

    /// Apply CLI flags over the current values. Runs given on the command
    /// line replace configured runs.
    pub fn with_overrides(mut self, args: &ConfigArgs) -> Self {
        if !args.runs.is_empty() {
            self.runs = args.runs.clone();
        }
        if let Some(nodes) = args.nodes.as_ref().filter(|n| !n.is_empty()) {
            self.nodes = nodes.clone();
        }
        if let Some(q) = &args.base_query {
            self.base_query = q.clone();
        }
        if let Some(q) = &args.opt_query {
            self.opt_query = q.clone();
        }
        if let Some(dir) = &args.out_dir {
            self.out_dir = dir.clone();
        }
        if args.open_plot {
            self.open_plot = true;
        }
        if let Some(w) = args.workers {
            self.workers = w;
        }
        self
    }

    /// Check required fields and that every run directory exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runs.is_empty() {
            return Err(ConfigError::NoRuns);
        }
        if self.base_query.trim().is_empty() {
            return Err(ConfigError::Missing("BASE_QUERY".to_string()));
        }
        if self.opt_query.trim().is_empty() {
            return Err(ConfigError::Missing("OPT_QUERY".to_string()));
        }
        for run in &self.runs {
            if !run.path.is_dir() {
                return Err(ConfigError::RunDirNotFound(run.path.clone()));
            }
        }
        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            num_cpus::get()
        }
    }
}

/// Configuration flags shared by the `compare` and `match` commands.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// KEY=PATH (repeatable)
    #[arg(long = "run", value_name = "KEY=PATH", value_parser = parse_run_spec)]
    pub runs: Vec<RunInput>,

    /// Node directory names under each run (default: m1 m2 m3 m4)
    #[arg(long, num_args = 1..)]
    pub nodes: Option<Vec<String>>,

    /// Base query variant name
    #[arg(long)]
    pub base_query: Option<String>,

    /// Optimized query variant name
    #[arg(long)]
    pub opt_query: Option<String>,

    /// Output directory (default: out)
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Open the chart when done
    #[arg(long)]
    pub open_plot: bool,

    /// Number of ingest workers (default: num_cpus)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Env file with OUT_DIR, RUN_<n>_KEY/RUN_<n>_DIR, NODES, BASE_QUERY, OPT_QUERY, OPEN_PLOT
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

impl ConfigArgs {
    /// Resolve flags (and the env file, if given) into a validated config.
    pub fn resolve(&self) -> Result<CompareConfig, ConfigError> {
        let base = match &self.env_file {
            Some(path) => CompareConfig::from_env_file(path)?,
            None => CompareConfig::default(),
        };
        let config = base.with_overrides(self);
        config.validate()?;
        Ok(config)
    }
}
