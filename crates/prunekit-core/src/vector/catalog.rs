//! Cleaner for the embedded vector engine
//!
//! The engine keeps a SQLite catalog (`chroma.sqlite3`) next to one directory
//! per vector segment. Directory names are segment UUIDs; the catalog maps
//! them back to logical collection names through `segments` and
//! `collections`. Deleting a collection through the engine leaves child rows
//! behind (embeddings, their metadata, full-text entries, sequence counters)
//! because none of those deletes cascade, so a sweep reconciles the catalog
//! before it touches any directory.

use super::{CleanupReport, VectorCleaner};
use crate::error::Result;
use crate::ids::expected_collection_names;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use walkdir::WalkDir;
use tracing::{debug, error, info, warn};

/// Catalog database file inside the vector directory
pub const CATALOG_FILE: &str = "chroma.sqlite3";

/// Returned as [`ReconcileStats::fts_preserved`] when the full-text index was left untouched
pub const FTS_SKIPPED: i64 = -1;

/// Rows removed by a catalog reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub embeddings: usize,
    pub embedding_metadata: usize,
    pub collection_metadata: usize,
    pub segment_metadata: usize,
    pub max_seq_ids: usize,
    /// Full-text entries kept by the selective rebuild, 0 when no rebuild was
    /// needed, [`FTS_SKIPPED`] when the rebuild was abandoned
    pub fts_preserved: i64,
}

impl ReconcileStats {
    /// Rows deleted across all tables (full-text entries excluded)
    pub fn total(&self) -> usize {
        self.embeddings
            + self.embedding_metadata
            + self.collection_metadata
            + self.segment_metadata
            + self.max_seq_ids
    }
}

/// A segment directory slated for removal
#[derive(Debug, Clone)]
struct OrphanDir {
    path: PathBuf,
    segment_id: String,
    /// Catalog collection id, `None` when the directory is unknown to the catalog
    collection_id: Option<String>,
}

/// Segment UUID -> (collection id, collection name)
type SegmentMap = HashMap<String, (String, String)>;

pub struct CatalogCleaner {
    vector_dir: PathBuf,
    catalog_path: PathBuf,
}

impl CatalogCleaner {
    pub fn new(vector_dir: impl Into<PathBuf>) -> Self {
        let vector_dir = vector_dir.into();
        let catalog_path = vector_dir.join(CATALOG_FILE);
        Self {
            vector_dir,
            catalog_path,
        }
    }

    fn has_catalog(&self) -> bool {
        self.catalog_path.exists()
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.catalog_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn segment_map(conn: &Connection) -> Result<SegmentMap> {
        let mut names = HashMap::new();
        let mut stmt = conn.prepare("SELECT id, name FROM collections")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, name) = row?;
            names.insert(id, name);
        }

        let mut map = HashMap::new();
        let mut stmt = conn.prepare("SELECT id, collection FROM segments WHERE scope = 'VECTOR'")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (segment_id, collection_id) = row?;
            if let Some(name) = names.get(&collection_id) {
                map.insert(segment_id, (collection_id, name.clone()));
            }
        }

        debug!("Found {} vector segments in catalog", map.len());
        Ok(map)
    }

    /// Segment directories that are unmapped or map to an unexpected collection
    fn orphan_dirs(&self, map: &SegmentMap, expected: &HashSet<String>) -> Result<Vec<OrphanDir>> {
        let mut orphans = Vec::new();

        for entry in WalkDir::new(&self.vector_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable vector directory entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let segment_id = entry.file_name().to_string_lossy().to_string();
            if segment_id.starts_with('.') {
                continue;
            }

            match map.get(&segment_id) {
                None => orphans.push(OrphanDir {
                    path: entry.path().to_path_buf(),
                    segment_id,
                    collection_id: None,
                }),
                Some((collection_id, name)) if !expected.contains(name) => {
                    orphans.push(OrphanDir {
                        path: entry.path().to_path_buf(),
                        segment_id,
                        collection_id: Some(collection_id.clone()),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(orphans)
    }

    fn count_orphans(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> Result<usize> {
        let conn = self.connect()?;
        let map = Self::segment_map(&conn)?;
        let expected = expected_collection_names(active_file_ids, active_kb_ids);
        Ok(self.orphan_dirs(&map, &expected)?.len())
    }

    /// Remove catalog rows that no longer hang off a live segment or collection.
    ///
    /// Runs in its own transaction and rolls back on any failure.
    pub fn reconcile(&self) -> Result<ReconcileStats> {
        if !self.has_catalog() {
            return Ok(ReconcileStats::default());
        }
        let conn = self.connect()?;
        in_transaction(&conn, || reconcile_records(&conn))
    }

    fn sweep(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> Result<(usize, Vec<String>)> {
        let conn = self.connect()?;
        let map = Self::segment_map(&conn)?;
        let expected = expected_collection_names(active_file_ids, active_kb_ids);
        let orphans = self.orphan_dirs(&map, &expected)?;

        let mut errors = Vec::new();

        let doomed: HashSet<String> = orphans
            .iter()
            .filter_map(|o| o.collection_id.clone())
            .collect();

        let catalog_ok = match in_transaction(&conn, || {
            let mut removed = 0;
            for collection_id in &doomed {
                removed += drop_collection_rows(&conn, collection_id)?;
            }
            let stats = reconcile_records(&conn)?;
            Ok((removed, stats))
        }) {
            Ok((removed, stats)) => {
                if removed > 0 {
                    debug!("Removed {} catalog rows for orphaned collections", removed);
                }
                log_reconcile(&stats);
                true
            }
            Err(e) => {
                let msg = format!("Vector catalog cleanup failed: {}", e);
                error!("{}", msg);
                errors.push(msg);
                false
            }
        };

        let mut deleted = 0;
        for orphan in &orphans {
            // Catalog rows for this collection are still present; its directory must stay.
            if orphan.collection_id.is_some() && !catalog_ok {
                continue;
            }
            match std::fs::remove_dir_all(&orphan.path) {
                Ok(()) => {
                    deleted += 1;
                    debug!("Deleted orphaned vector segment directory: {}", orphan.segment_id);
                }
                Err(e) => {
                    let msg = format!(
                        "Failed to delete segment directory {}: {}",
                        orphan.segment_id, e
                    );
                    error!("{}", msg);
                    errors.push(msg);
                }
            }
        }

        Ok((deleted, errors))
    }

    fn delete_by_name(&self, name: &str) -> Result<()> {
        if !self.has_catalog() {
            return Ok(());
        }
        let conn = self.connect()?;

        let collection_id: Option<String> = match conn.query_row(
            "SELECT id FROM collections WHERE name = ?1",
            params![name],
            |row| row.get(0),
        ) {
            Ok(id) => Some(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        let Some(collection_id) = collection_id else {
            debug!("Collection {} not present in vector catalog", name);
            return Ok(());
        };

        let segment_ids = {
            let mut stmt = conn.prepare(
                "SELECT id FROM segments WHERE collection = ?1 AND scope = 'VECTOR'",
            )?;
            let ids = stmt
                .query_map(params![collection_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        in_transaction(&conn, || drop_collection_rows(&conn, &collection_id))?;

        for segment_id in segment_ids {
            let dir = self.vector_dir.join(&segment_id);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl VectorCleaner for CatalogCleaner {
    fn name(&self) -> &'static str {
        "chroma"
    }

    fn count_orphaned_collections(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> usize {
        if !self.has_catalog() {
            return 0;
        }
        match self.count_orphans(active_file_ids, active_kb_ids) {
            Ok(count) => count,
            Err(e) => {
                error!("Error counting orphaned vector collections: {}", e);
                0
            }
        }
    }

    fn cleanup_orphaned_collections(
        &self,
        active_file_ids: &HashSet<String>,
        active_kb_ids: &HashSet<String>,
    ) -> CleanupReport {
        if !self.has_catalog() {
            return CleanupReport::default();
        }

        let (deleted, errors) = match self.sweep(active_file_ids, active_kb_ids) {
            Ok(outcome) => outcome,
            Err(e) => {
                let msg = format!("Vector directory cleanup failed: {}", e);
                error!("{}", msg);
                (0, vec![msg])
            }
        };

        if deleted > 0 {
            info!("Deleted {} orphaned vector collections", deleted);
        }
        CleanupReport::from_parts(deleted, errors)
    }

    fn delete_collection(&self, name: &str) -> bool {
        match self.delete_by_name(name) {
            Ok(()) => {
                debug!("Deleted vector collection: {}", name);
                true
            }
            Err(e) => {
                error!("Error deleting vector collection {}: {}", name, e);
                false
            }
        }
    }

    fn compact(&self) -> Result<()> {
        if !self.has_catalog() {
            return Ok(());
        }
        let conn = self.connect()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

fn in_transaction<T>(conn: &Connection, f: impl FnOnce() -> Result<T>) -> Result<T> {
    conn.execute("BEGIN IMMEDIATE", [])?;
    let result = f();
    if result.is_ok() {
        conn.execute("COMMIT", [])?;
    } else {
        let _ = conn.execute("ROLLBACK", []);
    }
    result
}

fn drop_collection_rows(conn: &Connection, collection_id: &str) -> Result<usize> {
    let segments = conn.execute(
        "DELETE FROM segments WHERE collection = ?1",
        params![collection_id],
    )?;
    let collections = conn.execute("DELETE FROM collections WHERE id = ?1", params![collection_id])?;
    Ok(segments + collections)
}

/// Child rows first: metadata of dead embeddings, the embeddings, then
/// collection and segment metadata and sequence counters.
fn reconcile_records(conn: &Connection) -> Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();

    let orphaned: i64 = conn.query_row(
        "SELECT COUNT(*) FROM embeddings WHERE segment_id NOT IN (SELECT id FROM segments)",
        [],
        |row| row.get(0),
    )?;

    if orphaned > 0 {
        info!("Cleaning up {} orphaned embeddings and related data", orphaned);

        stats.embedding_metadata = conn.execute(
            "DELETE FROM embedding_metadata WHERE id IN (
                SELECT id FROM embeddings WHERE segment_id NOT IN (SELECT id FROM segments)
             )",
            [],
        )?;
        stats.embeddings = conn.execute(
            "DELETE FROM embeddings WHERE segment_id NOT IN (SELECT id FROM segments)",
            [],
        )?;
        stats.fts_preserved = rebuild_fts_selectively(conn);
    } else {
        debug!("No orphaned embeddings found");
    }

    stats.collection_metadata = conn.execute(
        "DELETE FROM collection_metadata WHERE collection_id NOT IN (SELECT id FROM collections)",
        [],
    )?;
    stats.segment_metadata = conn.execute(
        "DELETE FROM segment_metadata WHERE segment_id NOT IN (SELECT id FROM segments)",
        [],
    )?;
    stats.max_seq_ids = conn.execute(
        "DELETE FROM max_seq_id WHERE segment_id NOT IN (SELECT id FROM segments)",
        [],
    )?;

    Ok(stats)
}

/// Rebuild the full-text index from text still reachable through a live
/// embedding. Any failure before the index is touched skips the rebuild; a
/// failure while rewriting it rolls the index back to its prior content.
fn rebuild_fts_selectively(conn: &Connection) -> i64 {
    let snapshot = conn
        .execute_batch(
            "CREATE TEMP TABLE temp_valid_fts AS
             SELECT DISTINCT em.string_value
             FROM embedding_metadata em
             JOIN embeddings e ON em.id = e.id
             JOIN segments s ON e.segment_id = s.id
             WHERE em.string_value IS NOT NULL AND em.string_value != ''",
        )
        .and_then(|_| {
            conn.query_row("SELECT COUNT(*) FROM temp_valid_fts", [], |row| {
                row.get::<_, i64>(0)
            })
        });

    let valid = match snapshot {
        Ok(valid) => valid,
        Err(e) => {
            warn!("Full-text snapshot failed, leaving index untouched: {}", e);
            drop_snapshot(conn);
            return FTS_SKIPPED;
        }
    };

    if let Err(e) = conn.execute_batch("SAVEPOINT fts_rebuild") {
        warn!("Full-text rebuild could not start, leaving index untouched: {}", e);
        drop_snapshot(conn);
        return FTS_SKIPPED;
    }

    let rewrite = (|| -> rusqlite::Result<()> {
        conn.execute("DELETE FROM embedding_fulltext_search", [])?;
        if valid > 0 {
            conn.execute(
                "INSERT INTO embedding_fulltext_search(string_value)
                 SELECT string_value FROM temp_valid_fts",
                [],
            )?;
        }
        conn.execute(
            "INSERT INTO embedding_fulltext_search(embedding_fulltext_search) VALUES('rebuild')",
            [],
        )?;
        Ok(())
    })();

    let preserved = match rewrite {
        Ok(()) => {
            let _ = conn.execute_batch("RELEASE fts_rebuild");
            debug!("Preserved {} full-text entries", valid);
            valid
        }
        Err(e) => {
            error!("Full-text rebuild failed, restoring index: {}", e);
            let _ = conn.execute_batch("ROLLBACK TO fts_rebuild; RELEASE fts_rebuild");
            FTS_SKIPPED
        }
    };

    drop_snapshot(conn);
    preserved
}

fn drop_snapshot(conn: &Connection) {
    if let Err(e) = conn.execute_batch("DROP TABLE IF EXISTS temp_valid_fts") {
        warn!("Failed to drop full-text snapshot table: {}", e);
    }
}

fn log_reconcile(stats: &ReconcileStats) {
    if stats.total() == 0 {
        return;
    }
    info!(
        "Vector catalog cleanup: {} embeddings, {} metadata, {} collection metadata, {} segment metadata, {} sequence ids",
        stats.embeddings,
        stats.embedding_metadata,
        stats.collection_metadata,
        stats.segment_metadata,
        stats.max_seq_ids
    );
    if stats.fts_preserved == FTS_SKIPPED {
        warn!("Full-text index rebuild was skipped");
    } else if stats.embeddings > 0 {
        info!("Full-text cleanup preserved {} entries", stats.fts_preserved);
    }
}
