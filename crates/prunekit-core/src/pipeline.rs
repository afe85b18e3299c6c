//! Prune pipeline
//!
//! A run walks a fixed sequence of stages under the maintenance lock:
//!
//! 1. inactive users (optional)
//! 2. aged conversations (optional)
//! 3. fresh active-user set
//! 4. orphaned rows: owner-gated kinds per toggle, then files against
//!    freshly built active file ids
//! 5. orphaned uploads
//! 6. orphaned vector collections
//! 7. aged audio cache files (optional)
//! 8. compaction (optional)
//!
//! Every stage that depends on "what is still live" recomputes it after the
//! previous stage's deletions. A preview applies the same predicates but
//! records each stage's victims in [`Exclusions`] instead of deleting them, so
//! later stages count against the state a real run would see.

use crate::config::PruneConfig;
use crate::error::{PruneError, Result};
use crate::ids::file_collection_name;
use crate::lock::MaintenanceLock;
use crate::report::{ItemFailure, PruneCounts, PruneOutcome, PruneReport};
use crate::scan::{active_kb_ids, active_user_ids, build_active_file_ids, Exclusions};
use crate::store::{Chat, EntityKind, KnowledgeBase, MetadataStore, OwnedRow, Role, StorageLayout, User};
use crate::sweep;
use crate::vector::VectorCleaner;
use chrono::Utc;
use std::collections::HashSet;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

const SECS_PER_DAY: i64 = 86_400;

/// Kinds deleted by owner absence alone, in deletion order
const OWNER_GATED_KINDS: [EntityKind; 8] = [
    EntityKind::Chat,
    EntityKind::Tool,
    EntityKind::Function,
    EntityKind::Prompt,
    EntityKind::KnowledgeBase,
    EntityKind::Model,
    EntityKind::Note,
    EntityKind::Folder,
];

/// Runs the prune pipeline against one metadata store and one vector cleaner
pub struct Pruner<'a> {
    store: &'a dyn MetadataStore,
    cleaner: &'a dyn VectorCleaner,
    layout: StorageLayout,
    lock: MaintenanceLock,
}

impl<'a> Pruner<'a> {
    pub fn new(
        store: &'a dyn MetadataStore,
        cleaner: &'a dyn VectorCleaner,
        layout: StorageLayout,
    ) -> Self {
        let lock = MaintenanceLock::new(layout.lock_path());
        Self {
            store,
            cleaner,
            layout,
            lock,
        }
    }

    /// Use a different lock (path or staleness window)
    pub fn with_lock(mut self, lock: MaintenanceLock) -> Self {
        self.lock = lock;
        self
    }


    /// Run the pipeline, or preview it when `config.dry_run` is set.
    ///
    /// Returns [`PruneError::LockHeld`] without doing anything when another
    /// run holds the lock. The lock is released on every exit path.
    pub fn run(&self, config: &PruneConfig) -> Result<PruneOutcome> {
        let Some(_guard) = self.lock.guard()? else {
            let since = self
                .lock
                .holder()
                .map(|h| h.timestamp.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(PruneError::LockHeld { since });
        };

        info!(
            "Starting prune {} (vector backend: {})",
            if config.dry_run { "preview" } else { "run" },
            self.cleaner.name()
        );

        if config.dry_run {
            let counts = self.preview(config)?;
            info!("Prune preview: {} items would be deleted", counts.total());
            Ok(PruneOutcome::Preview(counts))
        } else {
            let report = self.execute(config)?;
            info!(
                "Prune completed: {} items deleted, {} failures, {} warnings",
                report.counts.total(),
                report.failures.len(),
                report.warnings.len()
            );
            Ok(PruneOutcome::Completed(report))
        }
    }

    /// Count what a real run with this configuration would delete
    fn preview(&self, config: &PruneConfig) -> Result<PruneCounts> {
        let now = Utc::now().timestamp();
        let mut counts = PruneCounts::default();
        let mut excluded = Exclusions::default();

        let chats = best_effort("chats", self.store.list_chats());

        if let Some(days) = config.delete_inactive_users_days {
            let cutoff = cutoff_secs(now, days);
            let users = best_effort("users", self.store.list_users());
            excluded.users = users
                .iter()
                .filter(|user| is_inactive(user, cutoff, config))
                .map(|user| user.id.clone())
                .collect();
            counts.inactive_users = excluded.users.len();
            // A user's conversations go with the user
            excluded.chats.extend(
                chats
                    .iter()
                    .filter(|chat| excluded.users.contains(&chat.user_id))
                    .map(|chat| chat.id.clone()),
            );
        }

        if let Some(days) = config.days {
            let cutoff = cutoff_secs(now, days);
            let aged: Vec<String> = chats
                .iter()
                .filter(|chat| !excluded.chats.contains(&chat.id))
                .filter(|chat| is_aged(chat, cutoff, config))
                .map(|chat| chat.id.clone())
                .collect();
            counts.old_chats = aged.len();
            excluded.chats.extend(aged);
        }

        let active_users = active_user_ids(self.store, &excluded)?;
        let knowledge_bases = self.store.list_knowledge_bases()?;

        let mut doomed_kbs = HashSet::new();
        for kind in owner_gated_kinds(config) {
            let doomed: Vec<String> = best_effort(kind.table(), self.store.list_owned(kind))
                .into_iter()
                .filter(|row| !(kind == EntityKind::Chat && excluded.chats.contains(&row.id)))
                .filter(|row| owner_is_missing(row, &active_users))
                .map(|row| row.id)
                .collect();
            *count_for(&mut counts, kind) = doomed.len();
            match kind {
                EntityKind::Chat => excluded.chats.extend(doomed),
                EntityKind::KnowledgeBase => {
                    doomed_kbs.extend(doomed.iter().cloned());
                    excluded.knowledge_bases.extend(doomed);
                }
                EntityKind::Folder => excluded.folders.extend(doomed),
                _ => {}
            }
        }

        let active_files = build_active_file_ids(self.store, &knowledge_bases, &excluded)?;
        let doomed_files: Vec<String> = best_effort("files", self.store.list_owned(EntityKind::File))
            .into_iter()
            .filter(|row| file_is_orphaned(row, &active_files, &active_users))
            .map(|row| row.id)
            .collect();
        counts.orphaned_files = doomed_files.len();
        excluded.files.extend(doomed_files.iter().cloned());

        let remaining_files = build_active_file_ids(self.store, &knowledge_bases, &excluded)?;
        counts.orphaned_uploads =
            sweep::count_orphaned_uploads(&self.layout.upload_dir(), &remaining_files);

        // Collections of rows deleted above are removed one by one, not by the sweep
        let remaining_kbs: Vec<KnowledgeBase> = knowledge_bases
            .into_iter()
            .filter(|kb| !excluded.knowledge_bases.contains(&kb.id))
            .collect();
        let mut kept_kbs = active_kb_ids(&remaining_kbs, &active_users);
        kept_kbs.extend(doomed_kbs);
        let mut kept_files = remaining_files;
        kept_files.extend(doomed_files);
        counts.orphaned_vector_collections =
            self.cleaner.count_orphaned_collections(&kept_files, &kept_kbs);

        if let Some(days) = config.audio_cache_max_age_days {
            counts.audio_cache_files = sweep::count_audio_cache_files(
                &self.layout.audio_cache_dirs(),
                audio_cutoff(days),
            );
        }

        Ok(counts)
    }

    fn execute(&self, config: &PruneConfig) -> Result<PruneReport> {
        let now = Utc::now().timestamp();
        let mut report = PruneReport::default();

        if let Some(days) = config.delete_inactive_users_days {
            self.delete_inactive_users(cutoff_secs(now, days), config, &mut report);
        }

        if let Some(days) = config.days {
            self.delete_old_chats(cutoff_secs(now, days), config, &mut report);
        }

        let none = Exclusions::default();
        let active_users = active_user_ids(self.store, &none)?;
        info!("Preserving data of {} active users", active_users.len());

        for kind in owner_gated_kinds(config) {
            self.delete_orphaned_rows(kind, &active_users, &mut report);
        }

        // Built after the rows above are gone so nothing they referenced is kept alive
        let knowledge_bases = self.store.list_knowledge_bases()?;
        let active_files = build_active_file_ids(self.store, &knowledge_bases, &none)?;
        self.delete_orphaned_files(&active_files, &active_users, &mut report);

        let knowledge_bases = self.store.list_knowledge_bases()?;
        let active_files = build_active_file_ids(self.store, &knowledge_bases, &none)?;
        let uploads = sweep::cleanup_orphaned_uploads(&self.layout.upload_dir(), &active_files);
        report.counts.orphaned_uploads = uploads.deleted;
        report.failures.extend(uploads.failures);

        let active_users = active_user_ids(self.store, &none)?;
        let knowledge_bases = self.store.list_knowledge_bases()?;
        let active_kbs = active_kb_ids(&knowledge_bases, &active_users);
        let active_files = build_active_file_ids(self.store, &knowledge_bases, &none)?;
        let vectors = self
            .cleaner
            .cleanup_orphaned_collections(&active_files, &active_kbs);
        report.counts.orphaned_vector_collections = vectors.deleted;
        if let Some(e) = vectors.error {
            warn!("Vector cleanup reported errors: {}", e);
            report.warnings.push(format!("Vector cleanup: {}", e));
        }

        if let Some(days) = config.audio_cache_max_age_days {
            let audio =
                sweep::cleanup_audio_cache(&self.layout.audio_cache_dirs(), audio_cutoff(days));
            report.counts.audio_cache_files = audio.deleted;
            report.failures.extend(audio.failures);
        }

        if config.run_vacuum {
            self.compact(&mut report);
        }

        Ok(report)
    }

    fn delete_inactive_users(&self, cutoff: i64, config: &PruneConfig, report: &mut PruneReport) {
        let users = match self.store.list_users() {
            Ok(users) => users,
            Err(e) => {
                stage_warning(report, "inactive user deletion", e);
                return;
            }
        };

        for user in users.iter().filter(|user| is_inactive(user, cutoff, config)) {
            match self.store.delete_user(&user.id) {
                Ok(true) => {
                    report.counts.inactive_users += 1;
                    info!(
                        "Deleted inactive user: {} (last active: {})",
                        user.email, user.last_active_at
                    );
                }
                Ok(false) => debug!("User {} already gone", user.id),
                Err(e) => {
                    error!("Failed to delete user {}: {}", user.id, e);
                    report.failures.push(ItemFailure::new("user", &user.id, e));
                }
            }
        }
    }

    fn delete_old_chats(&self, cutoff: i64, config: &PruneConfig, report: &mut PruneReport) {
        let chats = match self.store.list_chats() {
            Ok(chats) => chats,
            Err(e) => {
                stage_warning(report, "old chat deletion", e);
                return;
            }
        };

        for chat in chats.iter().filter(|chat| is_aged(chat, cutoff, config)) {
            match self.store.delete(EntityKind::Chat, &chat.id) {
                Ok(true) => report.counts.old_chats += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to delete chat {}: {}", chat.id, e);
                    report.failures.push(ItemFailure::new("chat", &chat.id, e));
                }
            }
        }
        info!("Deleted {} old chats", report.counts.old_chats);
    }

    fn delete_orphaned_files(
        &self,
        active_files: &HashSet<String>,
        active_users: &HashSet<String>,
        report: &mut PruneReport,
    ) {
        let files = match self.store.list_owned(EntityKind::File) {
            Ok(files) => files,
            Err(e) => {
                stage_warning(report, "orphaned file deletion", e);
                return;
            }
        };

        for row in files
            .iter()
            .filter(|row| file_is_orphaned(row, active_files, active_users))
        {
            match self.delete_file(&row.id) {
                Ok(true) => report.counts.orphaned_files += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Error deleting file {}: {}", row.id, e);
                    report.failures.push(ItemFailure::new(EntityKind::File, &row.id, e));
                }
            }
        }
        info!("Deleted {} orphaned files", report.counts.orphaned_files);
    }

    /// The vector collection goes first so it never outlives the file row
    fn delete_file(&self, id: &str) -> Result<bool> {
        if self.store.get_owned(EntityKind::File, id)?.is_none() {
            return Ok(false);
        }
        let collection = file_collection_name(id);
        if !self.cleaner.delete_collection(&collection) {
            return Err(PruneError::VectorStore(format!(
                "could not delete collection {}",
                collection
            )));
        }
        self.store.delete(EntityKind::File, id)
    }

    fn delete_orphaned_rows(
        &self,
        kind: EntityKind,
        active_users: &HashSet<String>,
        report: &mut PruneReport,
    ) {
        let rows = match self.store.list_owned(kind) {
            Ok(rows) => rows,
            Err(e) => {
                stage_warning(report, &format!("orphaned {} deletion", kind), e);
                return;
            }
        };

        let mut deleted = 0;
        for row in rows.iter().filter(|row| owner_is_missing(row, active_users)) {
            if kind == EntityKind::KnowledgeBase && !self.cleaner.delete_collection(&row.id) {
                error!("Could not delete vector collection of knowledge base {}", row.id);
                report.failures.push(ItemFailure::new(
                    kind,
                    &row.id,
                    "vector collection deletion failed",
                ));
                continue;
            }
            match self.store.delete(kind, &row.id) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to delete {} {}: {}", kind, row.id, e);
                    report.failures.push(ItemFailure::new(kind, &row.id, e));
                }
            }
        }

        if deleted > 0 {
            info!("Deleted {} orphaned {} rows", deleted, kind);
        }
        *count_for(&mut report.counts, kind) = deleted;
    }

    fn compact(&self, report: &mut PruneReport) {
        info!("Vacuuming database");
        if let Err(e) = self.store.vacuum() {
            warn!("Database vacuum failed: {}", e);
            report.warnings.push(format!("Database vacuum failed: {}", e));
        }
        if let Err(e) = self.cleaner.compact() {
            warn!("Vector store compaction failed: {}", e);
            report
                .warnings
                .push(format!("Vector store compaction failed: {}", e));
        }
    }
}

fn cutoff_secs(now: i64, days: u32) -> i64 {
    now - i64::from(days) * SECS_PER_DAY
}

fn audio_cutoff(days: u32) -> SystemTime {
    sweep::age_cutoff(SystemTime::now(), u64::from(days))
}

fn is_inactive(user: &User, cutoff: i64, config: &PruneConfig) -> bool {
    if config.exempt_admin_users && user.role == Role::Admin {
        return false;
    }
    if config.exempt_pending_users && user.role == Role::Pending {
        return false;
    }
    user.last_active_at < cutoff
}

fn is_aged(chat: &Chat, cutoff: i64, config: &PruneConfig) -> bool {
    if chat.updated_at >= cutoff {
        return false;
    }
    if config.exempt_archived_chats && chat.archived {
        return false;
    }
    !(config.exempt_chats_in_folders && (chat.folder_id.is_some() || chat.pinned))
}

/// Either condition alone orphans a file
fn file_is_orphaned(
    row: &OwnedRow,
    active_files: &HashSet<String>,
    active_users: &HashSet<String>,
) -> bool {
    !active_files.contains(&row.id) || !active_users.contains(&row.user_id)
}

fn owner_is_missing(row: &OwnedRow, active_users: &HashSet<String>) -> bool {
    !active_users.contains(&row.user_id)
}

fn owner_gated_kinds(config: &PruneConfig) -> impl Iterator<Item = EntityKind> + '_ {
    OWNER_GATED_KINDS.into_iter().filter(move |kind| match kind {
        EntityKind::Chat => config.delete_orphaned_chats,
        EntityKind::Tool => config.delete_orphaned_tools,
        EntityKind::Function => config.delete_orphaned_functions,
        EntityKind::Prompt => config.delete_orphaned_prompts,
        EntityKind::KnowledgeBase => config.delete_orphaned_knowledge_bases,
        EntityKind::Model => config.delete_orphaned_models,
        EntityKind::Note => config.delete_orphaned_notes,
        EntityKind::Folder => config.delete_orphaned_folders,
        EntityKind::File => false,
    })
}

fn count_for(counts: &mut PruneCounts, kind: EntityKind) -> &mut usize {
    match kind {
        EntityKind::File => &mut counts.orphaned_files,
        EntityKind::Chat => &mut counts.orphaned_chats,
        EntityKind::Tool => &mut counts.orphaned_tools,
        EntityKind::Function => &mut counts.orphaned_functions,
        EntityKind::Prompt => &mut counts.orphaned_prompts,
        EntityKind::KnowledgeBase => &mut counts.orphaned_knowledge_bases,
        EntityKind::Model => &mut counts.orphaned_models,
        EntityKind::Note => &mut counts.orphaned_notes,
        EntityKind::Folder => &mut counts.orphaned_folders,
    }
}

/// Preview counting never fails on a single listing
fn best_effort<T>(what: &str, listed: Result<Vec<T>>) -> Vec<T> {
    listed.unwrap_or_else(|e| {
        warn!("Error listing {} for preview: {}", what, e);
        Vec::new()
    })
}

fn stage_warning(report: &mut PruneReport, stage: &str, e: PruneError) {
    error!("Error during {}: {}", stage, e);
    report.warnings.push(format!("{} skipped: {}", stage, e));
}
