//! Open a generated file in the desktop's default viewer.

use std::path::Path;
use std::process::Command;

/// Platform opener command and leading arguments.
fn opener() -> (&'static str, &'static [&'static str]) {
    if cfg!(target_os = "macos") {
        ("open", &[])
    } else if cfg!(windows) {
        ("cmd", &["/C", "start", ""])
    } else {
        ("xdg-open", &[])
    }
}

/// Spawn the platform opener without waiting. Failure is logged, never
/// returned.
pub fn open_file(path: &Path) {
    let (program, args) = opener();
    match Command::new(program).args(args).arg(path).spawn() {
        Ok(_) => tracing::debug!(path = %path.display(), program, "Opened file"),
        Err(e) => tracing::warn!("Failed to open file: {} ({})", path.display(), e),
    }
}
