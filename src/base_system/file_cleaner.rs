//! Age-based cleanup of transient files and cache directories.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::debug;

/// Remove plain files in `dir` whose mtime is older than `age`.
/// Subdirectories are left alone unless their name appears in nothing —
/// see [`remove_stale_dirs`] for directory cleanup.
pub fn remove_stale_files(dir: &Path, age: Duration) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        if is_older_than(&meta, now, age) && fs::remove_file(&path).is_ok() {
            debug!(target: "cleanup", path = %path.display(), "removed stale file");
        }
    }
}

/// Remove subdirectories of `dir` that are older than `age` and whose name is
/// not in `keep`. Used for orphaned book cache directories; live books are
/// passed in `keep` so a quiet-but-active book is never deleted under a
/// worker.
pub fn remove_stale_dirs(dir: &Path, age: Duration, keep: &HashSet<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if keep.contains(&name) {
            continue;
        }
        if is_older_than(&meta, now, age) && fs::remove_dir_all(&path).is_ok() {
            debug!(target: "cleanup", path = %path.display(), "removed stale directory");
        }
    }
}

pub fn remove_dir_quiet(path: &Path) {
    let _ = fs::remove_dir_all(path);
}

fn is_older_than(meta: &fs::Metadata, now: SystemTime, age: Duration) -> bool {
    meta.modified()
        .ok()
        .and_then(|mtime| now.duration_since(mtime).ok())
        .map(|elapsed| elapsed > age)
        .unwrap_or(false)
}
