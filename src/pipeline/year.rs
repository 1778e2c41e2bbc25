//! Year inference for glog files.
//!
//! glog headers omit the year. Strategies, in order:
//! 1. an epoch-ms field inside a RESTPP request id in the first lines
//!    (real wall-clock data),
//! 2. a `INFO.<YYYY><MMDD>` token in the file header,
//! 3. the caller's default year.
//!
//! Results are cached per file fingerprint `(resolved path, mtime, size)` so a
//! file is scanned at most once per [`YearCache`]. I/O errors never escape;
//! they fall through to the next strategy.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike};

use super::patterns;

/// Lines scanned for an embedded request id.
pub const DEFAULT_EPOCH_SCAN_LINES: usize = 2000;

/// Lines scanned for a header date (lines 0..=10).
const HEADER_SCAN_LINES: usize = 11;

/// Resolves the year for a log file.
pub trait YearResolver {
    fn resolve(&mut self, log_path: &Path, default_year: i32) -> i32;
}

/// Always returns the same year; no I/O.
pub struct FixedYear(pub i32);

impl YearResolver for FixedYear {
    fn resolve(&mut self, _log_path: &Path, _default_year: i32) -> i32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileSig {
    pub path: PathBuf,
    pub mtime: Option<SystemTime>,
    pub size: u64,
}

impl FileSig {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            path: resolved,
            mtime: meta.modified().ok(),
            size: meta.len(),
        })
    }
}

/// Fingerprint-keyed year cache, owned by one pipeline run.
pub struct YearCache {
    entries: HashMap<(FileSig, i32), i32>,
    max_lines: usize,
    scans: usize,
}

impl YearCache {
    pub fn new() -> Self {
        Self::with_max_lines(DEFAULT_EPOCH_SCAN_LINES)
    }

    pub fn with_max_lines(max_lines: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_lines,
            scans: 0,
        }
    }

    #[cfg(test)]
    pub fn insert(&mut self, sig: FileSig, default_year: i32, year: i32) {
        self.entries.insert((sig, default_year), year);
    }

    /// Number of files actually scanned (cache misses).
    pub fn scans(&self) -> usize {
        self.scans
    }

    /// Number of cached (file, default year) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for YearCache {
    fn default() -> Self {
        Self::new()
    }
}

impl YearResolver for YearCache {
    fn resolve(&mut self, log_path: &Path, default_year: i32) -> i32 {
        let sig = match FileSig::of(log_path) {
            Ok(s) => s,
            // stat failed: uncached fallback
            Err(_) => return detect_year_from_header(log_path, default_year),
        };

        let key = (sig, default_year);
        if let Some(year) = self.entries.get(&key) {
            return *year;
        }

        self.scans += 1;
        let year = infer_year(log_path, default_year, self.max_lines);
        tracing::debug!(path = %log_path.display(), year, "Inferred log year");
        self.entries.insert(key, year);
        year
    }
}

/// Uncached inference: request-id epoch, then header, then default.
pub fn infer_year(log_path: &Path, default_year: i32, max_lines: usize) -> i32 {
    if let Some(year) = year_from_request_id_epoch(log_path, max_lines) {
        return year;
    }
    detect_year_from_header(log_path, default_year)
}

fn year_from_request_id_epoch(log_path: &Path, max_lines: usize) -> Option<i32> {
    let file = File::open(log_path).ok()?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    for _ in 0..max_lines {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        let Some(rid) = patterns::extract_request_id(&line) else {
            continue;
        };
        let Some(epoch_ms) = patterns::extract_epoch_ms(rid) else {
            continue;
        };
        if let Some(dt) = DateTime::from_timestamp_millis(epoch_ms) {
            return Some(dt.year());
        }
    }
    None
}

/// Year from a header token like `INFO.20251219-...`, else `default_year`.
pub fn detect_year_from_header(log_path: &Path, default_year: i32) -> i32 {
    let Ok(file) = File::open(log_path) else {
        return default_year;
    };
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    for _ in 0..HEADER_SCAN_LINES {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(caps) = patterns::log_header_date().captures(&line) {
            if let Ok(year) = caps["year"].parse() {
                return year;
            }
        }
    }
    default_year
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_year_from_request_id_epoch() {
        let dir = tempfile::tempdir().unwrap();
        // 1735729200000 = 2025-01-01T11:00:00Z
        let path = write_file(
            dir.path(),
            "gpe_1.INFO",
            &[
                "Log file created at: 2023/12/31",
                "I0101 10:00:00.000 123 ]  Start_RunUDF 7.RESTPP_1_1.1735729200000.N",
            ],
        );
        assert_eq!(infer_year(&path, 1999, 100), 2025);
    }

    #[test]
    fn test_epoch_preferred_over_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "restpp_1.INFO",
            &[
                "Running on machine: m1 INFO.20231219-101010",
                "I0101 10:00:00.000 1 a.cc:1] RawRequest|,7.RESTPP_1_1.1735729200000.N,x|GET|/query/g/q",
            ],
        );
        assert_eq!(infer_year(&path, 1999, 100), 2025);
    }

    #[test]
    fn test_year_from_header_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "gpe_1.INFO",
            &["Log file: gpe_1_1.m1.tigergraph.log.INFO.20231219-101010.1234", "I1219 10:00:00.000 1 a.cc:1] hello"],
        );
        assert_eq!(infer_year(&path, 1999, 100), 2023);
    }

    #[test]
    fn test_header_only_scans_first_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = vec!["filler"; 12];
        lines.push("INFO.20201219");
        let path = write_file(dir.path(), "gpe_1.INFO", &lines);
        assert_eq!(detect_year_from_header(&path, 1999), 1999);
    }

    #[test]
    fn test_default_year_when_no_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "gpe_1.INFO", &["I0101 10:00:00.000 1 a.cc:1] hello"]);
        assert_eq!(infer_year(&path, 2024, 100), 2024);
    }

    #[test]
    fn test_missing_file_never_errors() {
        let mut cache = YearCache::new();
        assert_eq!(cache.resolve(Path::new("/definitely/not/here.log"), 2022), 2022);
    }

    #[test]
    fn test_cache_scans_each_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "gpe_1.INFO", &["INFO.20211219"]);
        let mut cache = YearCache::new();
        assert_eq!(cache.resolve(&path, 1999), 2021);
        assert_eq!(cache.resolve(&path, 1999), 2021);
        assert_eq!(cache.scans(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_seeded_cache_skips_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "gpe_1.INFO", &["INFO.20211219"]);
        let mut cache = YearCache::new();
        cache.insert(FileSig::of(&path).unwrap(), 1999, 1988);
        assert_eq!(cache.resolve(&path, 1999), 1988);
        assert_eq!(cache.scans(), 0);
    }

    #[test]
    fn test_rewritten_file_is_rescanned() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "gpe_1.INFO", &["INFO.20211219"]);
        let mut cache = YearCache::new();
        assert_eq!(cache.resolve(&path, 1999), 2021);

        write_file(dir.path(), "gpe_1.INFO", &["Log file: gpe_1_1.m1.log.INFO.20241219-101010.77"]);
        assert_eq!(cache.resolve(&path, 1999), 2024);
        assert_eq!(cache.scans(), 2);
        assert_eq!(cache.len(), 2);
    }
}
