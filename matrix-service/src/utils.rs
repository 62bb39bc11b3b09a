// Utility Functions
// Working directory resolution and small formatting helpers

use serde::Serializer;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Walk up from `start` looking for a `.git` directory.
///
/// Returns `None` if the path does not exist or is not inside a repository.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().ok()?;
    start
        .ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Directory steps run in when none is given: the enclosing repository root,
/// or the current directory outside a repository.
pub fn resolve_working_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_repo_root(&cwd).unwrap_or(cwd)
}

/// Resolve a user-supplied directory against `base` and check that it exists
pub fn resolve_dir(base: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let path = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base.join(dir)
    };
    if path.is_dir() {
        Ok(path)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Directory not found: {}", path.display()),
        ))
    }
}

/// Serialize durations as fractional seconds
pub(crate) fn serialize_duration_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}
