//! Vector-store cleaners
//!
//! Each supported vector backend gets a [`VectorCleaner`]. The orchestrator
//! only ever talks to the trait; which implementation it receives is decided
//! once, by [`open_cleaner`], from the configured backend name.

mod catalog;
mod chunk_table;
mod noop;

pub use catalog::{CatalogCleaner, ReconcileStats, FTS_SKIPPED};
pub use chunk_table::ChunkTableCleaner;
pub use noop::NoopCleaner;

use crate::error::Result;
use crate::store::StorageLayout;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Outcome of a bulk orphan sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Collections actually removed
    pub deleted: usize,
    /// Summary of the failures encountered along the way, if any
    pub error: Option<String>,
}

impl CleanupReport {
    pub(crate) fn from_parts(deleted: usize, errors: Vec<String>) -> Self {
        Self {
            deleted,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }
}

/// Discovery and removal of vector collections that no longer back an
/// active file or knowledge base.
///
/// Implementations never return errors from these methods: per-collection
/// failures are logged and folded into the returned report.
pub trait VectorCleaner: Send {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// How many collections a sweep with these active sets would remove
    fn count_orphaned_collections(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> usize;

    /// Remove every collection not expected for these active sets
    fn cleanup_orphaned_collections(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> CleanupReport;

    /// Remove one collection by logical name. A missing collection counts as removed.
    fn delete_collection(&self, name: &str) -> bool;

    /// Reclaim storage after a sweep
    fn compact(&self) -> Result<()> {
        Ok(())
    }
}

/// Configured vector backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorBackend {
    /// Embedded engine with an on-disk SQLite catalog and per-segment directories
    Catalog,
    /// Embeddings stored in a `document_chunk` table of the relational store
    ChunkTable,
    /// No cleaner registered for this name
    Unsupported(String),
}

impl VectorBackend {
    pub fn from_name(name: &str) -> Self {
        let lowered = name.trim().to_lowercase();
        if lowered.contains("chroma") {
            Self::Catalog
        } else if lowered.contains("pgvector")
            || lowered.contains("sqlite-vec")
            || lowered.contains("sqlite_vec")
        {
            Self::ChunkTable
        } else {
            Self::Unsupported(lowered)
        }
    }
}

impl fmt::Display for VectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog => f.write_str("chroma"),
            Self::ChunkTable => f.write_str("sqlite-vec"),
            Self::Unsupported(name) => write!(f, "unsupported ({})", name),
        }
    }
}

/// Construct the cleaner for a backend over the given storage layout
pub fn open_cleaner(
    backend: &VectorBackend,
    layout: &StorageLayout,
) -> Result<Box<dyn VectorCleaner>> {
    let cleaner: Box<dyn VectorCleaner> = match backend {
        VectorBackend::Catalog => {
            debug!("Using catalog cleaner");
            Box::new(CatalogCleaner::new(layout.vector_dir()))
        }
        VectorBackend::ChunkTable => {
            debug!("Using chunk table cleaner");
            Box::new(ChunkTableCleaner::open(layout.database_path())?)
        }
        VectorBackend::Unsupported(name) => {
            debug!(
                "No specific cleaner for vector database type: {}, using no-op cleaner",
                name
            );
            Box::new(NoopCleaner)
        }
    };
    Ok(cleaner)
}
