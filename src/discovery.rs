//! Log file discovery under a run directory.
//!
//! Layout: `<run_root>/<node>/<glob>`, e.g. `run1/m2/gpe_1_1.INFO`.
//! Only direct children of each node directory are considered.

use std::path::{Path, PathBuf};

use glob::Pattern;
use walkdir::WalkDir;

/// A discovered log file and the node it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub node: String,
    pub path: PathBuf,
}

/// Discover files matching `file_glob` for each configured node.
///
/// Missing node directories are skipped. Files are returned grouped by node
/// in the configured node order, sorted by file name within a node.
pub fn discover_log_files(run_dir: &Path, nodes: &[String], file_glob: &str) -> Vec<LogFile> {
    let pattern = match Pattern::new(file_glob) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Invalid file glob {:?}: {}", file_glob, e);
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for node in nodes {
        let node_dir = run_dir.join(node);
        if !node_dir.is_dir() {
            tracing::debug!(node = %node, dir = %node_dir.display(), "Node directory missing, skipping");
            continue;
        }

        let mut node_files: Vec<PathBuf> = WalkDir::new(&node_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map_or(false, |name| pattern.matches(name))
            })
            .map(|e| e.into_path())
            .collect();

        node_files.sort();
        files.extend(node_files.into_iter().map(|path| LogFile {
            node: node.clone(),
            path,
        }));
    }

    files
}
