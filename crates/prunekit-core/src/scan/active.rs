//! Active-ID set construction
//!
//! The "still referenced" sets are computed once per stage of a run and never
//! cached across runs. File references come from four places: knowledge-base
//! file lists, conversation bodies, folders, and channel messages.

use super::collect_referenced_ids;
use crate::error::Result;
use crate::store::{retry_on_busy, JsonRow, JsonSource, KnowledgeBase, MetadataStore};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

/// Rows fetched per batch when streaming conversations and messages
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Folders carry larger payloads, so they stream in smaller batches
const FOLDER_BATCH_SIZE: usize = 100;

/// Rows to treat as already deleted.
///
/// A real run leaves this empty because its earlier stages have actually
/// removed the rows. A preview fills it with what those stages would remove so
/// downstream sets match what the real run would compute.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    pub users: HashSet<String>,
    pub chats: HashSet<String>,
    pub files: HashSet<String>,
    pub knowledge_bases: HashSet<String>,
    pub folders: HashSet<String>,
}

/// Ids of every user still present
pub fn active_user_ids(
    store: &dyn MetadataStore,
    exclusions: &Exclusions,
) -> Result<HashSet<String>> {
    let ids = store
        .list_users()?
        .into_iter()
        .map(|user| user.id)
        .filter(|id| !exclusions.users.contains(id))
        .collect();
    Ok(ids)
}

/// Ids of knowledge bases owned by an active user
pub fn active_kb_ids(
    knowledge_bases: &[KnowledgeBase],
    active_user_ids: &HashSet<String>,
) -> HashSet<String> {
    knowledge_bases
        .iter()
        .filter(|kb| active_user_ids.contains(&kb.user_id))
        .map(|kb| kb.id.clone())
        .collect()
}

/// Build the set of file ids still referenced by live data.
///
/// The file universe is preloaded once so every candidate is validated with a
/// set lookup. A record that fails to parse is logged and skipped; a store
/// failure for a whole stage is returned to the caller.
pub fn build_active_file_ids(
    store: &dyn MetadataStore,
    knowledge_bases: &[KnowledgeBase],
    exclusions: &Exclusions,
) -> Result<HashSet<String>> {
    let mut universe = retry_on_busy(|| store.list_file_ids())?;
    universe.retain(|id| !exclusions.files.contains(id));
    debug!("Preloaded {} file IDs for validation", universe.len());

    let mut active = HashSet::new();

    for kb in knowledge_bases {
        if exclusions.knowledge_bases.contains(&kb.id) {
            continue;
        }
        if let Some(data) = &kb.data {
            collect_declared_files(data, &mut active, &universe);
        }
    }
    debug!("Found {} knowledge bases", knowledge_bases.len());

    let chats = scan_source(
        store,
        JsonSource::Chats,
        DEFAULT_BATCH_SIZE,
        &exclusions.chats,
        &universe,
        &mut active,
    )?;
    debug!("Scanned {} chats for file references", chats);

    let folders = scan_source(
        store,
        JsonSource::Folders,
        FOLDER_BATCH_SIZE,
        &exclusions.folders,
        &universe,
        &mut active,
    )?;
    debug!("Scanned {} folders for file references", folders);

    let messages = scan_source(
        store,
        JsonSource::Messages,
        DEFAULT_BATCH_SIZE,
        &HashSet::new(),
        &universe,
        &mut active,
    )?;
    debug!("Scanned {} messages for file references", messages);

    info!("Found {} active file IDs", active.len());
    Ok(active)
}

/// Knowledge bases declare files either as `file_ids: [id, ...]` or as
/// `files: [id | {"id": id}, ...]`.
fn collect_declared_files(data: &Value, out: &mut HashSet<String>, universe: &HashSet<String>) {
    let mut declared: Vec<&str> = Vec::new();

    if let Some(Value::Array(ids)) = data.get("file_ids") {
        declared.extend(ids.iter().filter_map(Value::as_str));
    }

    if let Some(Value::Array(files)) = data.get("files") {
        for entry in files {
            match entry {
                Value::String(id) => declared.push(id),
                Value::Object(obj) => {
                    if let Some(id) = obj.get("id").and_then(Value::as_str) {
                        declared.push(id);
                    }
                }
                _ => {}
            }
        }
    }

    for id in declared {
        let id = id.trim();
        if !id.is_empty() && universe.contains(id) {
            out.insert(id.to_string());
        }
    }
}

fn scan_source(
    store: &dyn MetadataStore,
    source: JsonSource,
    batch_size: usize,
    skip: &HashSet<String>,
    universe: &HashSet<String>,
    active: &mut HashSet<String>,
) -> Result<usize> {
    let mut unreadable = 0usize;
    let visited = retry_on_busy(|| {
        let mut visit = |row: JsonRow| {
            if skip.contains(&row.id) {
                return;
            }
            for field in row.fields.iter().flatten() {
                if field.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(field) {
                    Ok(value) => collect_referenced_ids(&value, active, universe),
                    Err(e) => {
                        unreadable += 1;
                        debug!("Error processing {:?} row {} for file references: {}", source, row.id, e);
                    }
                }
            }
        };
        store.stream_json(source, batch_size, &mut visit)
    })?;

    if unreadable > 0 {
        info!("Skipped {} unreadable {:?} payloads", unreadable, source);
    }
    Ok(visited)
}
