//! CSV and plain-text artifact writers.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::table::Columns;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Write rows with a header taken from the row type's column list, so an
/// empty table still produces a header line.
pub fn write_csv<T: Serialize + Columns>(rows: &[T], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    wtr.write_record(T::COLUMNS)
        .with_context(|| format!("Failed to write header to {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }
    wtr.flush().with_context(|| format!("Failed to flush {}", path.display()))?;

    tracing::debug!(path = %path.display(), rows = rows.len(), "Wrote CSV");
    Ok(())
}

/// One item per line, newline-terminated unless empty.
pub fn write_lines<S: AsRef<str>>(lines: &[S], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut text = lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}
