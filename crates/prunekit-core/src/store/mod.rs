//! Relational metadata store
//!
//! The pruning core only needs "list all", "get by id" and "delete by id" for
//! each entity kind, plus bounded-batch streaming over the JSON-bearing tables.
//! [`MetadataStore`] captures that surface; [`SqliteStore`] is the bundled
//! implementation.

mod schema;
mod sqlite;

pub(crate) use schema::connect_existing;
pub use schema::SqliteStore;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Attempts after the first when SQLite reports the database as busy
pub const BUSY_RETRIES: u32 = 3;

/// First backoff delay; doubles on every retry
pub const BUSY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Account role as stored in the user table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Pending,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            "pending" => Self::Pending,
            _ => Self::User,
        }
    }
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: Role,
    /// Unix seconds
    pub last_active_at: i64,
}

/// Conversation header (the JSON body is only read through streaming)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    /// Unix seconds
    pub updated_at: i64,
    pub archived: bool,
    pub pinned: bool,
    pub folder_id: Option<String>,
}

/// Knowledge base with its declared file list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub user_id: String,
    pub data: Option<serde_json::Value>,
}

/// Any row that belongs to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedRow {
    pub id: String,
    pub user_id: String,
}

/// Entity kinds subject to owner-based orphan deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    KnowledgeBase,
    Chat,
    Tool,
    Function,
    Prompt,
    Model,
    Note,
    Folder,
}

impl EntityKind {
    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::KnowledgeBase => "knowledge",
            Self::Chat => "chat",
            Self::Tool => "tool",
            Self::Function => "function",
            Self::Prompt => "prompt",
            Self::Model => "model",
            Self::Note => "note",
            Self::Folder => "folder",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::File => "file",
            Self::KnowledgeBase => "knowledge base",
            Self::Chat => "chat",
            Self::Tool => "tool",
            Self::Function => "function",
            Self::Prompt => "prompt",
            Self::Model => "model",
            Self::Note => "note",
            Self::Folder => "folder",
        };
        f.write_str(label)
    }
}

/// Tables whose JSON columns are streamed for file references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonSource {
    /// `chat.chat`
    Chats,
    /// `folder.items` and `folder.data`
    Folders,
    /// `message.data`, rows with an empty payload are skipped by the store
    Messages,
}

/// One streamed row: its id and the raw JSON text of each scanned column
#[derive(Debug, Clone)]
pub struct JsonRow {
    pub id: String,
    pub fields: Vec<Option<String>>,
}

/// Capabilities the pruning pipeline consumes from the relational store
pub trait MetadataStore: Send {
    /// All user accounts
    fn list_users(&self) -> Result<Vec<User>>;

    /// Delete a user; the store removes the user's chats along with it
    fn delete_user(&self, id: &str) -> Result<bool>;

    /// All conversation headers
    fn list_chats(&self) -> Result<Vec<Chat>>;

    /// All knowledge bases including their data blob
    fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>>;

    /// Ids of every file row (the valid universe for reference scanning)
    fn list_file_ids(&self) -> Result<HashSet<String>>;

    /// `(id, user_id)` for every row of a kind
    fn list_owned(&self, kind: EntityKind) -> Result<Vec<OwnedRow>>;

    /// Look up one row of a kind
    fn get_owned(&self, kind: EntityKind, id: &str) -> Result<Option<OwnedRow>>;

    /// Delete one row of a kind; false when nothing was deleted
    fn delete(&self, kind: EntityKind, id: &str) -> Result<bool>;

    /// Stream JSON columns in fixed-size batches, returning the number of rows visited
    fn stream_json(
        &self,
        source: JsonSource,
        batch_size: usize,
        visit: &mut dyn FnMut(JsonRow),
    ) -> Result<usize>;

    /// Reclaim free pages
    fn vacuum(&self) -> Result<()>;
}

/// Run `op`, retrying with exponential backoff (0.5s, 1s, 2s) while the database is busy
pub fn retry_on_busy<T>(op: impl FnMut() -> Result<T>) -> Result<T> {
    retry_on_busy_with(BUSY_RETRIES, BUSY_BASE_DELAY, op)
}

/// [`retry_on_busy`] with an explicit retry budget and base delay
pub fn retry_on_busy_with<T>(
    retries: u32,
    base_delay: Duration,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_busy() && attempt < retries => {
                let delay = base_delay * 2u32.pow(attempt);
                attempt += 1;
                warn!(
                    "Database locked, retrying in {:?} (attempt {}/{})",
                    delay, attempt, retries
                );
                std::thread::sleep(delay);
            }
            other => return other,
        }
    }
}

/// On-disk locations used by a maintenance run
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub data_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Relational database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("webui.db")
    }

    /// Uploaded blobs
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Maintenance cache (lock file, audio caches)
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Lock file serializing prune runs
    pub fn lock_path(&self) -> PathBuf {
        self.cache_dir().join(".prune.lock")
    }

    /// Text-to-speech and transcription caches
    pub fn audio_cache_dirs(&self) -> [PathBuf; 2] {
        let audio = self.cache_dir().join("audio");
        [audio.join("speech"), audio.join("transcriptions")]
    }

    /// Embedded vector engine directory
    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vector_db")
    }
}
