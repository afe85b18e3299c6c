//! Cleaner for embeddings stored as rows of the relational store
//!
//! Every embedding lives in `document_chunk`, tagged with its collection
//! name. Discovery is a single DISTINCT query and deleting a collection is a
//! single DELETE, so no catalog bookkeeping is needed.

use super::{CleanupReport, VectorCleaner};
use crate::error::Result;
use crate::ids::expected_collection_names;
use crate::store::connect_existing;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, error, info, warn};

pub struct ChunkTableCleaner {
    conn: Connection,
}

impl ChunkTableCleaner {
    /// Open the database holding `document_chunk`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = connect_existing(path.as_ref())?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn existing_collections(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT collection_name FROM document_chunk")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(names)
    }

    fn orphaned_collections(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let expected = expected_collection_names(active_file_ids, active_kb_ids);
        let existing = self.existing_collections()?;

        let mut orphaned: Vec<String> = existing.difference(&expected).cloned().collect();
        orphaned.sort();

        debug!(
            "Found {} existing collections, {} expected, {} orphaned",
            existing.len(),
            expected.len(),
            orphaned.len()
        );
        Ok(orphaned)
    }

    fn remove_collection(&self, name: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM document_chunk WHERE collection_name = ?1",
            params![name],
        )?;
        Ok(rows)
    }
}

impl VectorCleaner for ChunkTableCleaner {
    fn name(&self) -> &'static str {
        "sqlite-vec"
    }

    fn count_orphaned_collections(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> usize {
        match self.orphaned_collections(active_file_ids, active_kb_ids) {
            Ok(orphaned) => orphaned.len(),
            Err(e) => {
                error!("Error counting orphaned chunk collections: {}", e);
                0
            }
        }
    }

    fn cleanup_orphaned_collections(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> CleanupReport {
        let orphaned = match self.orphaned_collections(active_file_ids, active_kb_ids) {
            Ok(orphaned) => orphaned,
            Err(e) => {
                let msg = format!("Chunk table cleanup failed: {}", e);
                error!("{}", msg);
                return CleanupReport::from_parts(0, vec![msg]);
            }
        };

        if orphaned.is_empty() {
            debug!("No orphaned chunk collections found");
            return CleanupReport::default();
        }

        info!("Deleting {} orphaned chunk collections", orphaned.len());
        let mut deleted = 0;
        let mut errors = Vec::new();

        for name in &orphaned {
            match self.remove_collection(name) {
                Ok(_) => {
                    deleted += 1;
                    debug!("Deleted chunk collection: {}", name);
                }
                Err(e) => {
                    let msg = format!("Failed to delete collection '{}': {}", name, e);
                    error!("{}", msg);
                    errors.push(msg);
                }
            }
        }

        if let Err(e) = self.conn.execute_batch("ANALYZE document_chunk;") {
            warn!("Failed to analyze document_chunk: {}", e);
        }

        if deleted > 0 {
            info!("Deleted {} orphaned chunk collections", deleted);
        }
        CleanupReport::from_parts(deleted, errors)
    }

    fn delete_collection(&self, name: &str) -> bool {
        match self.remove_collection(name) {
            Ok(rows) => {
                debug!("Deleted chunk collection {} ({} rows)", name, rows);
                true
            }
            Err(e) => {
                error!("Error deleting chunk collection '{}': {}", name, e);
                false
            }
        }
    }

    fn compact(&self) -> Result<()> {
        self.conn.execute("VACUUM", [])?;
        Ok(())
    }
}
