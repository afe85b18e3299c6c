//! Prunekit Core Library
//!
//! Finds and removes data that nothing live refers to any more, across the
//! relational metadata store, the vector store, and the upload directory.
//!
//! # Features
//! - Reference scanning of arbitrary JSON with a bounded recursion depth
//! - Streaming active-ID set construction in fixed-size batches
//! - Pluggable vector-store cleaners with catalog reconciliation
//! - File-based maintenance lock with stale-lock recovery
//! - Preview mode whose counts match what a real run deletes

pub mod config;
pub mod error;
pub mod ids;
pub mod lock;
pub mod pipeline;
pub mod report;
pub mod scan;
pub mod store;
pub mod sweep;
pub mod vector;

pub use config::PruneConfig;
pub use error::{Error, PruneError, Result};
pub use lock::{LockGuard, LockRecord, MaintenanceLock};
pub use pipeline::Pruner;
pub use report::{ItemFailure, PruneCounts, PruneOutcome, PruneReport};
pub use scan::{build_active_file_ids, collect_referenced_ids, Exclusions};
pub use store::{
    Chat, EntityKind, JsonRow, JsonSource, KnowledgeBase, MetadataStore, OwnedRow, Role,
    SqliteStore, StorageLayout, User,
};
pub use vector::{
    open_cleaner, CatalogCleaner, ChunkTableCleaner, CleanupReport, NoopCleaner, VectorBackend,
    VectorCleaner,
};
