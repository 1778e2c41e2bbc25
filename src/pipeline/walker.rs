//! Log walker: discovery + decoding, one handler call per decoded line.
//!
//! Traversal and decoding only; classification is the caller's job. Files
//! larger than [`MMAP_THRESHOLD`] are memory-mapped, smaller ones go through
//! a buffered reader. Invalid UTF-8 is replaced, never fatal. Files that
//! cannot be opened or fail mid-read are skipped whole with a warning.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use memmap2::Mmap;
use serde::Serialize;

use super::decoder::decode_line;
use super::patterns::ROTATION_MARKER;
use super::year::YearResolver;
use crate::discovery::discover_log_files;

/// Threshold for switching from buffered read to mmap (1 MB).
const MMAP_THRESHOLD: u64 = 1_048_576;

/// A decoded line with provenance. The unit handed to classifiers.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub run: String,
    pub node: String,
    pub log_path: PathBuf,
    /// 1-based.
    pub lineno: usize,
    pub ts: NaiveDateTime,
    pub tid: u64,
    pub msg: String,
}

/// Aggregate counters for one walk. Per-line failures are only counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub files: usize,
    pub files_unreadable: usize,
    pub lines: usize,
    pub decoded: usize,
    pub rotation_markers: usize,
    pub header_mismatches: usize,
}

impl AddAssign for WalkStats {
    fn add_assign(&mut self, rhs: Self) {
        self.files += rhs.files;
        self.files_unreadable += rhs.files_unreadable;
        self.lines += rhs.lines;
        self.decoded += rhs.decoded;
        self.rotation_markers += rhs.rotation_markers;
        self.header_mismatches += rhs.header_mismatches;
    }
}

/// Where to walk and how files are selected.
pub struct WalkSpec<'a> {
    pub run_id: &'a str,
    pub run_dir: &'a Path,
    pub nodes: &'a [String],
    pub file_glob: &'a str,
    pub default_year: i32,
}

/// Walk every matching file of a run in node order and emit decoded lines.
pub fn walk_logs<F>(spec: &WalkSpec<'_>, years: &mut dyn YearResolver, mut on_line: F) -> WalkStats
where
    F: FnMut(ParsedLine),
{
    let mut stats = WalkStats::default();

    for file in discover_log_files(spec.run_dir, spec.nodes, spec.file_glob) {
        let year = years.resolve(&file.path, spec.default_year);
        match walk_file(spec.run_id, &file.node, &file.path, year, &mut on_line) {
            Ok(file_stats) => stats += file_stats,
            Err(e) => {
                tracing::warn!("Skip {}: {:#}", file.path.display(), e);
                stats.files_unreadable += 1;
            }
        }
    }

    stats
}

/// Decode one file with a known year.
///
/// Lines reach `on_line` only after the whole file was read, so a file that
/// fails mid-read contributes neither lines nor counts.
pub fn walk_file<F>(run_id: &str, node: &str, path: &Path, year: i32, on_line: &mut F) -> Result<WalkStats>
where
    F: FnMut(ParsedLine),
{
    let file_size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();

    let decoded = if file_size > MMAP_THRESHOLD {
        decode_mmap(FileDecoder::new(run_id, node, path, year))?
    } else {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        decode_reader(
            FileDecoder::new(run_id, node, path, year),
            BufReader::with_capacity(64 * 1024, file),
        )?
    };

    for pl in decoded.lines {
        on_line(pl);
    }
    Ok(decoded.stats)
}

/// Decoded lines and counters of one file.
struct FileDecoder<'a> {
    run_id: &'a str,
    node: &'a str,
    path: &'a Path,
    year: i32,
    stats: WalkStats,
    lines: Vec<ParsedLine>,
}

impl<'a> FileDecoder<'a> {
    fn new(run_id: &'a str, node: &'a str, path: &'a Path, year: i32) -> Self {
        Self {
            run_id,
            node,
            path,
            year,
            stats: WalkStats {
                files: 1,
                ..Default::default()
            },
            lines: Vec::new(),
        }
    }

    fn push(&mut self, lineno: usize, line: &str) {
        self.stats.lines += 1;
        if line.starts_with(ROTATION_MARKER) {
            self.stats.rotation_markers += 1;
            return;
        }
        let Some(decoded) = decode_line(line, self.year) else {
            self.stats.header_mismatches += 1;
            return;
        };
        self.stats.decoded += 1;
        self.lines.push(ParsedLine {
            run: self.run_id.to_string(),
            node: self.node.to_string(),
            log_path: self.path.to_path_buf(),
            lineno,
            ts: decoded.ts,
            tid: decoded.tid,
            msg: decoded.msg,
        });
    }
}

fn decode_mmap(mut dec: FileDecoder<'_>) -> Result<FileDecoder<'_>> {
    let path = dec.path;
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("Failed to mmap {}", path.display()))?;

    let data: &[u8] = &mmap;
    let mut lineno = 0usize;
    let mut pos = 0usize;
    while pos < data.len() {
        let end = data[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(data.len(), |nl| pos + nl);
        lineno += 1;
        dec.push(lineno, &String::from_utf8_lossy(&data[pos..end]));
        pos = end + 1;
    }
    Ok(dec)
}

fn decode_reader<R: BufRead>(mut dec: FileDecoder<'_>, mut reader: R) -> Result<FileDecoder<'_>> {
    let mut buf = Vec::new();
    let mut lineno = 0usize;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("Failed to read {} after line {}", dec.path.display(), lineno))?;
        if n == 0 {
            break;
        }
        lineno += 1;
        dec.push(lineno, &String::from_utf8_lossy(&buf));
    }
    Ok(dec)
}
