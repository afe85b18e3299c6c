//! End-to-end pipeline tests against an on-disk store, uploads and caches

use chrono::Utc;
use prunekit_core::{
    CatalogCleaner, Chat, ChunkTableCleaner, CleanupReport, EntityKind, KnowledgeBase, MaintenanceLock,
    MetadataStore, PruneConfig, PruneCounts, PruneError, PruneOutcome, Pruner, Role, SqliteStore,
    StorageLayout, User, VectorCleaner,
};
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const F1: &str = "11111111-1111-4111-8111-111111111111";
const F2: &str = "22222222-2222-4222-8222-222222222222";
const F3: &str = "33333333-3333-4333-8333-333333333333";
const F4: &str = "44444444-4444-4444-8444-444444444444";
const F5: &str = "55555555-5555-4555-8555-555555555555";
const F6: &str = "66666666-6666-4666-8666-666666666666";
const F9: &str = "99999999-9999-4999-8999-999999999999";

const DAY: i64 = 86_400;

fn now() -> i64 {
    Utc::now().timestamp()
}

fn user(id: &str, role: Role, days_idle: i64) -> User {
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        role,
        last_active_at: now() - days_idle * DAY,
    }
}

fn chat(id: &str, owner: &str, days_old: i64) -> Chat {
    Chat {
        id: id.to_string(),
        user_id: owner.to_string(),
        updated_at: now() - days_old * DAY,
        archived: false,
        pinned: false,
        folder_id: None,
    }
}

fn touch(dir: &Path, name: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), b"payload").unwrap();
}

/// A deployment with one live user, one inactive user, an exempt admin and
/// rows left behind by a user ("ghost") who no longer exists.
fn seed(layout: &StorageLayout) -> SqliteStore {
    let store = SqliteStore::open(layout.database_path()).unwrap();
    store.initialize().unwrap();

    store.insert_user(&user("u1", Role::User, 1)).unwrap();
    store.insert_user(&user("u2", Role::User, 200)).unwrap();
    store.insert_user(&user("admin", Role::Admin, 500)).unwrap();

    store.insert_file(F1, "ghost", "a.pdf").unwrap();
    store.insert_file(F2, "u1", "b.pdf").unwrap();
    store.insert_file(F3, "u1", "c.pdf").unwrap();
    store.insert_file(F4, "u1", "d.pdf").unwrap();
    store.insert_file(F5, "u1", "e.pdf").unwrap();
    store.insert_file(F6, "u2", "f.pdf").unwrap();

    store
        .insert_chat(
            &chat("c1", "u1", 1),
            &json!({ "messages": [ { "files": [ { "id": F1 }, { "file_id": F3 } ] } ] }),
        )
        .unwrap();
    store.insert_chat(&chat("c2", "u1", 400), &json!({})).unwrap();
    store.insert_chat(&chat("c3", "ghost", 1), &json!({})).unwrap();
    store.insert_chat(&chat("c4", "u2", 1), &json!({ "id": F6 })).unwrap();

    store
        .insert_knowledge_base(&KnowledgeBase {
            id: "kb1".to_string(),
            user_id: "u1".to_string(),
            data: Some(json!({ "file_ids": [F4] })),
        })
        .unwrap();
    store
        .insert_knowledge_base(&KnowledgeBase {
            id: "kb2".to_string(),
            user_id: "ghost".to_string(),
            data: Some(json!({ "file_ids": [F5] })),
        })
        .unwrap();

    store.insert_owned(EntityKind::Tool, "t1", "ghost", "tool").unwrap();
    store.insert_owned(EntityKind::Prompt, "p1", "ghost", "prompt").unwrap();
    store.insert_owned(EntityKind::Note, "n1", "u1", "note").unwrap();
    store.insert_folder("d1", "ghost", None, None).unwrap();

    for (i, collection) in [
        format!("file-{}", F1),
        format!("file-{}", F2),
        format!("file-{}", F3),
        "kb1".to_string(),
        "kb2".to_string(),
        format!("file-{}", F9),
        "stray-collection".to_string(),
    ]
    .iter()
    .enumerate()
    {
        store
            .insert_document_chunk(&format!("chunk-{}", i), collection, "text")
            .unwrap();
    }

    let uploads = layout.upload_dir();
    touch(&uploads, &format!("{}_c.pdf", F3));
    touch(&uploads, &format!("{}_b.pdf", F2));
    touch(&uploads, &format!("{}_lost.pdf", F9));
    touch(&uploads, "notes.txt");

    let [speech, _] = layout.audio_cache_dirs();
    touch(&speech, "old.mp3");
    let old = SystemTime::now() - Duration::from_secs(60 * DAY as u64);
    std::fs::File::options()
        .write(true)
        .open(speech.join("old.mp3"))
        .unwrap()
        .set_modified(old)
        .unwrap();
    touch(&speech, "fresh.mp3");

    store
}

fn full_config(dry_run: bool) -> PruneConfig {
    PruneConfig {
        days: Some(365),
        delete_inactive_users_days: Some(90),
        audio_cache_max_age_days: Some(30),
        run_vacuum: true,
        dry_run,
        ..Default::default()
    }
}

fn expected_counts() -> PruneCounts {
    PruneCounts {
        inactive_users: 1,
        old_chats: 1,
        orphaned_chats: 1,
        orphaned_files: 4,
        orphaned_prompts: 1,
        orphaned_knowledge_bases: 1,
        orphaned_folders: 1,
        orphaned_uploads: 2,
        orphaned_vector_collections: 2,
        audio_cache_files: 1,
        ..Default::default()
    }
}

fn collections(layout: &StorageLayout) -> HashSet<String> {
    let conn = Connection::open(layout.database_path()).unwrap();
    let mut stmt = conn
        .prepare("SELECT DISTINCT collection_name FROM document_chunk")
        .unwrap();
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<HashSet<_>, _>>()
        .unwrap();
    names
}

#[test]
fn test_full_run_deletes_expected_items() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = seed(&layout);
    let cleaner = ChunkTableCleaner::open(layout.database_path()).unwrap();
    let pruner = Pruner::new(&store, &cleaner, layout.clone());

    let outcome = pruner.run(&full_config(false)).unwrap();
    let PruneOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.counts, expected_counts());
    assert!(report.is_clean(), "{:?}", report);

    let files = store.list_file_ids().unwrap();
    let expected: HashSet<String> = [F3, F4].iter().map(|s| s.to_string()).collect();
    assert_eq!(files, expected);

    let users: Vec<String> = store.list_users().unwrap().into_iter().map(|u| u.id).collect();
    assert_eq!(users.len(), 2);
    assert!(!users.contains(&"u2".to_string()));

    assert!(store.get_owned(EntityKind::Tool, "t1").unwrap().is_some());
    assert!(store.get_owned(EntityKind::Prompt, "p1").unwrap().is_none());
    assert!(store.get_owned(EntityKind::Note, "n1").unwrap().is_some());
    assert!(store.get_owned(EntityKind::Folder, "d1").unwrap().is_none());

    let remaining = collections(&layout);
    let expected: HashSet<String> = [format!("file-{}", F3), "kb1".to_string()]
        .into_iter()
        .collect();
    assert_eq!(remaining, expected);

    let uploads = layout.upload_dir();
    assert!(uploads.join(format!("{}_c.pdf", F3)).exists());
    assert!(!uploads.join(format!("{}_b.pdf", F2)).exists());
    assert!(!uploads.join(format!("{}_lost.pdf", F9)).exists());
    assert!(uploads.join("notes.txt").exists());

    assert!(!layout.lock_path().exists());
}

#[test]
fn test_preview_matches_real_run_and_mutates_nothing() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = seed(&layout);
    let cleaner = ChunkTableCleaner::open(layout.database_path()).unwrap();
    let pruner = Pruner::new(&store, &cleaner, layout.clone());

    let preview = pruner.run(&full_config(true)).unwrap();
    let PruneOutcome::Preview(predicted) = preview else {
        panic!("expected a preview");
    };

    assert_eq!(store.list_file_ids().unwrap().len(), 6);
    assert_eq!(store.list_users().unwrap().len(), 3);
    assert_eq!(collections(&layout).len(), 7);
    assert!(layout.upload_dir().join(format!("{}_b.pdf", F2)).exists());
    assert!(!layout.lock_path().exists());

    let outcome = pruner.run(&full_config(false)).unwrap();
    assert_eq!(*outcome.counts(), predicted);
    assert_eq!(predicted, expected_counts());
}

#[test]
fn test_second_run_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = seed(&layout);
    let cleaner = ChunkTableCleaner::open(layout.database_path()).unwrap();
    let pruner = Pruner::new(&store, &cleaner, layout.clone());

    pruner.run(&full_config(false)).unwrap();

    let second = pruner.run(&full_config(false)).unwrap();
    assert_eq!(second.counts().total(), 0, "{:?}", second);

    let preview = pruner.run(&full_config(true)).unwrap();
    assert_eq!(preview.counts().total(), 0);
}

#[test]
fn test_file_owned_by_missing_user_is_deleted_even_when_referenced() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = SqliteStore::open(layout.database_path()).unwrap();
    store.initialize().unwrap();
    store.insert_user(&user("u1", Role::User, 1)).unwrap();
    store.insert_file(F1, "gone", "x").unwrap();
    store
        .insert_chat(&chat("c1", "u1", 1), &json!({ "files": [ { "id": F1 } ] }))
        .unwrap();

    let cleaner = ChunkTableCleaner::open(layout.database_path()).unwrap();
    let pruner = Pruner::new(&store, &cleaner, layout.clone());
    let config = PruneConfig {
        dry_run: false,
        ..Default::default()
    };

    let outcome = pruner.run(&config).unwrap();
    assert_eq!(outcome.counts().orphaned_files, 1);
    assert!(store.list_file_ids().unwrap().is_empty());
}

#[test]
fn test_run_refuses_while_lock_is_held() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = seed(&layout);
    let cleaner = ChunkTableCleaner::open(layout.database_path()).unwrap();
    let pruner = Pruner::new(&store, &cleaner, layout.clone());

    let other = MaintenanceLock::new(layout.lock_path());
    assert!(other.acquire().unwrap());

    let err = pruner.run(&full_config(false)).unwrap_err();
    assert!(matches!(err, PruneError::LockHeld { .. }));
    assert_eq!(err.exit_code(), prunekit_core::error::exit_codes::CONFLICT);

    assert_eq!(store.list_file_ids().unwrap().len(), 6);
    assert!(layout.lock_path().exists());

    other.release();
    assert!(pruner.run(&full_config(true)).is_ok());
}

const CATALOG_SCHEMA: &str = "
    CREATE TABLE collections (id TEXT PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE segments (id TEXT PRIMARY KEY, type TEXT, scope TEXT, collection TEXT);
    CREATE TABLE embeddings (id INTEGER PRIMARY KEY, segment_id TEXT, embedding_id TEXT);
    CREATE TABLE embedding_metadata (id INTEGER, key TEXT, string_value TEXT);
    CREATE TABLE collection_metadata (collection_id TEXT, key TEXT, str_value TEXT);
    CREATE TABLE segment_metadata (segment_id TEXT, key TEXT, str_value TEXT);
    CREATE TABLE max_seq_id (segment_id TEXT PRIMARY KEY, seq_id INTEGER);
    CREATE VIRTUAL TABLE embedding_fulltext_search USING fts5(string_value);
";

/// The same collections as the chunk table, held in an on-disk catalog with
/// one segment directory each, plus a directory the catalog does not know.
fn seed_catalog(layout: &StorageLayout) {
    let vector_dir = layout.vector_dir();
    std::fs::create_dir_all(&vector_dir).unwrap();
    let conn = Connection::open(vector_dir.join("chroma.sqlite3")).unwrap();
    conn.execute_batch(CATALOG_SCHEMA).unwrap();

    for (i, name) in [
        format!("file-{}", F1),
        format!("file-{}", F2),
        format!("file-{}", F3),
        "kb1".to_string(),
        "kb2".to_string(),
        format!("file-{}", F9),
        "stray-collection".to_string(),
    ]
    .iter()
    .enumerate()
    {
        let collection = format!("col-{}", i);
        let segment = format!("vec-{}", i);
        conn.execute("INSERT INTO collections VALUES (?1, ?2)", params![collection, name])
            .unwrap();
        conn.execute(
            "INSERT INTO segments VALUES (?1, 'hnsw', 'VECTOR', ?2)",
            params![segment, collection],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO collection_metadata VALUES (?1, 'hnsw:space', 'cosine')",
            params![collection],
        )
        .unwrap();
        touch(&vector_dir.join(&segment), "data_level0.bin");
    }
    touch(&vector_dir.join("unmapped-segment"), "data_level0.bin");
}

fn segment_dirs(layout: &StorageLayout) -> HashSet<String> {
    std::fs::read_dir(layout.vector_dir())
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect()
}

#[test]
fn test_catalog_backend_preview_run_and_rerun_agree() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = seed(&layout);
    seed_catalog(&layout);
    let cleaner = CatalogCleaner::new(layout.vector_dir());
    let pruner = Pruner::new(&store, &cleaner, layout.clone());

    let expected = PruneCounts {
        orphaned_vector_collections: 3,
        ..expected_counts()
    };

    let PruneOutcome::Preview(predicted) = pruner.run(&full_config(true)).unwrap() else {
        panic!("expected a preview");
    };
    assert_eq!(predicted, expected);
    assert_eq!(segment_dirs(&layout).len(), 8);

    let PruneOutcome::Completed(report) = pruner.run(&full_config(false)).unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(report.counts, predicted);
    assert!(report.is_clean(), "{:?}", report);

    // F3 is still referenced by a live chat and kb1 still has a live owner
    let kept: HashSet<String> = ["vec-2", "vec-3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(segment_dirs(&layout), kept);

    let catalog = Connection::open(layout.vector_dir().join("chroma.sqlite3")).unwrap();
    let collections: i64 = catalog
        .query_row("SELECT COUNT(*) FROM collections", [], |row| row.get(0))
        .unwrap();
    assert_eq!(collections, 2);

    let second = pruner.run(&full_config(false)).unwrap();
    assert_eq!(second.counts().total(), 0, "{:?}", second);
    let preview = pruner.run(&full_config(true)).unwrap();
    assert_eq!(preview.counts().total(), 0, "{:?}", preview);
}

/// Records, for every collection deletion, whether the file row still existed at that moment
struct ObservingCleaner {
    conn: Mutex<Connection>,
    fail: bool,
    seen: Mutex<Vec<(String, bool)>>,
}

impl ObservingCleaner {
    fn new(db: &Path, fail: bool) -> Self {
        Self {
            conn: Mutex::new(Connection::open(db).unwrap()),
            fail,
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl VectorCleaner for ObservingCleaner {
    fn name(&self) -> &'static str {
        "observing"
    }

    fn count_orphaned_collections(&self, _: &HashSet<String>, _: &HashSet<String>) -> usize {
        0
    }

    fn cleanup_orphaned_collections(&self, _: &HashSet<String>, _: &HashSet<String>) -> CleanupReport {
        CleanupReport::default()
    }

    fn delete_collection(&self, name: &str) -> bool {
        let id = name.trim_start_matches("file-");
        let exists: i64 = self
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM file WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .unwrap();
        self.seen.lock().unwrap().push((name.to_string(), exists == 1));
        !self.fail
    }
}

#[test]
fn test_vector_collection_removed_before_file_row() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = SqliteStore::open(layout.database_path()).unwrap();
    store.initialize().unwrap();
    store.insert_user(&user("u1", Role::User, 1)).unwrap();
    store.insert_file(F2, "u1", "x").unwrap();

    let cleaner = ObservingCleaner::new(&layout.database_path(), false);
    let pruner = Pruner::new(&store, &cleaner, layout.clone());
    let config = PruneConfig {
        dry_run: false,
        ..Default::default()
    };
    pruner.run(&config).unwrap();

    let seen = cleaner.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(format!("file-{}", F2), true)]);
    assert!(store.list_file_ids().unwrap().is_empty());
}

#[test]
fn test_file_row_kept_when_collection_deletion_fails() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    let store = SqliteStore::open(layout.database_path()).unwrap();
    store.initialize().unwrap();
    store.insert_user(&user("u1", Role::User, 1)).unwrap();
    store.insert_file(F2, "u1", "x").unwrap();

    let cleaner = ObservingCleaner::new(&layout.database_path(), true);
    let pruner = Pruner::new(&store, &cleaner, layout.clone());
    let config = PruneConfig {
        dry_run: false,
        ..Default::default()
    };

    let PruneOutcome::Completed(report) = pruner.run(&config).unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(report.counts.orphaned_files, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, F2);
    assert_eq!(store.list_file_ids().unwrap().len(), 1);
}
