//! Filesystem sweeps: orphaned uploads and aged audio cache files
//!
//! Both sweeps only look at the immediate children of their directories and
//! ignore anything that is not a regular file. Entries that cannot be read
//! (dangling links, races with other writers) are logged and skipped.

use crate::ids::upload_file_id;
use crate::report::ItemFailure;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const SECS_PER_DAY: u64 = 86_400;

/// Outcome of a filesystem sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub deleted: usize,
    pub bytes_freed: u64,
    pub failures: Vec<ItemFailure>,
}

fn files_in(dir: &Path) -> Vec<(PathBuf, std::fs::Metadata)> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return files;
    }
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => files.push((entry.into_path(), metadata)),
            Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
        }
    }
    files
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Uploads whose filename resolves to an identifier outside the active set
pub fn orphaned_uploads(upload_dir: &Path, active_file_ids: &HashSet<String>) -> Vec<PathBuf> {
    files_in(upload_dir)
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| match upload_file_id(&file_name(path), active_file_ids) {
            Some(id) => !active_file_ids.contains(&id),
            None => false,
        })
        .collect()
}

pub fn count_orphaned_uploads(upload_dir: &Path, active_file_ids: &HashSet<String>) -> usize {
    orphaned_uploads(upload_dir, active_file_ids).len()
}

pub fn cleanup_orphaned_uploads(upload_dir: &Path, active_file_ids: &HashSet<String>) -> SweepReport {
    let mut report = SweepReport::default();

    for path in orphaned_uploads(upload_dir, active_file_ids) {
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                report.deleted += 1;
                report.bytes_freed += size;
                debug!("Deleted orphaned upload: {}", path.display());
            }
            Err(e) => {
                error!("Failed to delete upload file {}: {}", path.display(), e);
                report.failures.push(ItemFailure::new("upload", file_name(&path), e));
            }
        }
    }

    if report.deleted > 0 {
        info!("Deleted {} orphaned upload files", report.deleted);
    }
    report
}

/// Modification-time cutoff for a day threshold
pub fn age_cutoff(now: SystemTime, max_age_days: u64) -> SystemTime {
    now.checked_sub(Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY)))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn aged_files(dirs: &[PathBuf], cutoff: SystemTime) -> Vec<(PathBuf, u64)> {
    let mut aged = Vec::new();
    for dir in dirs {
        for (path, metadata) in files_in(dir) {
            match metadata.modified() {
                Ok(mtime) if mtime < cutoff => aged.push((path, metadata.len())),
                Ok(_) => {}
                Err(e) => debug!("No modification time for {}: {}", path.display(), e),
            }
        }
    }
    aged
}

pub fn count_audio_cache_files(dirs: &[PathBuf], cutoff: SystemTime) -> usize {
    aged_files(dirs, cutoff).len()
}

pub fn cleanup_audio_cache(dirs: &[PathBuf], cutoff: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();

    for (path, size) in aged_files(dirs, cutoff) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                report.deleted += 1;
                report.bytes_freed += size;
                debug!("Deleted audio cache file: {} ({} bytes)", path.display(), size);
            }
            Err(e) => {
                error!("Failed to delete audio file {}: {}", path.display(), e);
                report.failures.push(ItemFailure::new("audio_cache", file_name(&path), e));
            }
        }
    }

    info!(
        "Audio cache cleanup: deleted {} files, freed {} bytes",
        report.deleted, report.bytes_freed
    );
    report
}
