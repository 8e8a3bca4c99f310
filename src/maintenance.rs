// src/maintenance.rs

use crate::config::PathsConfig;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CleanupReport {
    pub temp_entries_removed: usize,
    pub exports_removed: usize,
    pub log_truncated: bool,
}

/// Empty the download root and export dir, and truncate the run log.
///
/// The directories themselves are kept. Entries that cannot be removed are
/// logged and skipped.
pub fn cleanup(paths: &PathsConfig) -> io::Result<CleanupReport> {
    let temp_entries_removed = empty_dir(&paths.temp_root)?;
    let exports_removed = empty_dir(&paths.export_dir)?;

    let log_truncated = if paths.log_file.is_file() {
        File::create(&paths.log_file)?;
        true
    } else {
        false
    };

    let report = CleanupReport {
        temp_entries_removed,
        exports_removed,
        log_truncated,
    };
    info!(?report, "Cleanup finished");
    Ok(report)
}

fn empty_dir(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove"),
        }
    }
    Ok(removed)
}
