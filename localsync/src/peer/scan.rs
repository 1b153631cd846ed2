//! Recursive directory scan helper. Threads its accumulator explicitly
//! through `walkdir`'s iterator rather than relying on any global/thread-
//! local state — the Rust answer to spec §9's "global-mutable monitor
//! state" design note, which calls out the original's process-global
//! scan callback as something a clean reimplementation should avoid.

use std::path::Path;
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use crate::fileinfo::{is_hidden_path, FileInfo};

/// Walks `root` recursively and returns every entry (files and
/// directories, `root` itself excluded) as a `FileInfo` relative to
/// `root`. Hidden paths (spec §3's "filepaths never begin with '.'")
/// and unreadable entries are skipped and logged, not fatal — spec §7's
/// "filesystem error: log and continue."
pub fn scan_directory(root: &Path) -> Vec<FileInfo> {
    let mut out = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };

        let rel = match entry.path().strip_prefix(root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if rel.is_empty() || is_hidden_path(&rel) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %rel, error = %e, "skipping entry with unreadable metadata");
                continue;
            }
        };

        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        out.push(FileInfo::new(rel, metadata.len(), last_modified, metadata.is_dir()));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_reports_files_and_directories_relative_to_root_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();

        let files = scan_directory(dir.path());
        let paths: std::collections::HashSet<_> = files.iter().map(|f| f.filepath().to_string()).collect();

        assert!(paths.contains("sub"));
        assert!(paths.contains("sub/a.txt"));
        assert!(!paths.contains(".hidden"));
    }
}
