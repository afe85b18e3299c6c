//! Maintenance lock
//!
//! A small JSON file under the cache directory marks a prune run in progress.
//! It is cooperative and single-host: ownership is decided by the file's
//! presence and age, nothing else. A lock older than [`STALE_AFTER_SECS`] is
//! treated as left behind by a crashed run and reclaimed.

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Age after which an existing lock is considered abandoned (2 hours)
pub const STALE_AFTER_SECS: i64 = 2 * 60 * 60;

/// Contents of the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub pid: u32,
}

/// File-based mutual exclusion for prune runs
#[derive(Debug, Clone)]
pub struct MaintenanceLock {
    path: PathBuf,
    stale_after: Duration,
}

impl MaintenanceLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: Duration::seconds(STALE_AFTER_SECS),
        }
    }

    /// Override the staleness window
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current holder, if the lock file exists and parses
    pub fn holder(&self) -> Option<LockRecord> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Try to take the lock.
    ///
    /// Returns `Ok(false)` while another live run holds it. A stale or
    /// unreadable lock file is discarded first. IO failures creating the lock
    /// are returned as errors.
    pub fn acquire(&self) -> Result<bool> {
        if self.path.exists() {
            let observed = self.holder();
            match &observed {
                Some(record) if Utc::now() - record.timestamp <= self.stale_after => {
                    warn!(
                        "Prune operation already in progress (started {}, run {})",
                        record.timestamp, record.run_id
                    );
                    return Ok(false);
                }
                Some(record) => warn!(
                    "Found stale lock from {} (run {}), removing",
                    record.timestamp, record.run_id
                ),
                None => warn!("Found corrupt lock file, removing"),
            }
            if !self.reclaim(observed.as_ref())? {
                warn!("Prune lock was taken by a concurrent run");
                return Ok(false);
            }
        }

        let record = LockRecord {
            timestamp: Utc::now(),
            run_id: new_run_id(),
            pid: std::process::id(),
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let mut staged = tempfile::NamedTempFile::new_in(&parent)?;
        staged.write_all(serde_json::to_string(&record)?.as_bytes())?;
        staged.flush()?;

        // Linking the fully written file into place fails if another run got there first.
        match staged.persist_noclobber(&self.path) {
            Ok(_) => {
                info!("Acquired prune lock (run {})", record.run_id);
                Ok(true)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                warn!("Prune lock was taken by a concurrent run");
                Ok(false)
            }
            Err(e) => Err(e.error.into()),
        }
    }

    /// Move the lock file aside and discard it if it is still the one judged
    /// stale. A concurrent run may have replaced it in between; that lock is
    /// linked back into place and `false` is returned.
    fn reclaim(&self, observed: Option<&LockRecord>) -> Result<bool> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let aside = self
            .path
            .with_file_name(format!("{}.stale-{}", file_name, new_run_id()));

        match std::fs::rename(&self.path, &aside) {
            Ok(()) => {}
            // Another run reclaimed it first; the no-clobber create decides who wins
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        let moved = std::fs::read_to_string(&aside)
            .ok()
            .and_then(|content| serde_json::from_str::<LockRecord>(&content).ok());
        let unchanged = match (observed, &moved) {
            (Some(a), Some(b)) => a.run_id == b.run_id && a.timestamp == b.timestamp,
            (None, None) => true,
            _ => false,
        };

        if !unchanged {
            if let Err(e) = std::fs::hard_link(&aside, &self.path) {
                error!("Could not restore prune lock of a concurrent run: {}", e);
            }
        }
        remove_if_present(&aside)?;
        Ok(unchanged)
    }

    /// Remove the lock file. Failures are logged, never returned.
    pub fn release(&self) {
        match remove_if_present(&self.path) {
            Ok(true) => info!("Released prune lock"),
            Ok(false) => {}
            Err(e) => error!("Error releasing prune lock: {}", e),
        }
    }

    /// Acquire and return a guard that releases on drop, or `None` if held elsewhere
    pub fn guard(&self) -> Result<Option<LockGuard<'_>>> {
        if self.acquire()? {
            Ok(Some(LockGuard { lock: self }))
        } else {
            Ok(None)
        }
    }
}

/// Releases the maintenance lock when dropped
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a MaintenanceLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
