//! Run configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Toggles and thresholds for one prune run.
///
/// Every field has a default, so a YAML file only needs to name what it
/// changes. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PruneConfig {
    /// Delete conversations not updated for this many days
    pub days: Option<u32>,

    /// Keep archived conversations when aging out chats
    pub exempt_archived_chats: bool,

    /// Keep conversations that sit in a folder or are pinned
    pub exempt_chats_in_folders: bool,

    pub delete_orphaned_chats: bool,
    pub delete_orphaned_tools: bool,
    pub delete_orphaned_functions: bool,
    pub delete_orphaned_prompts: bool,
    pub delete_orphaned_knowledge_bases: bool,
    pub delete_orphaned_models: bool,
    pub delete_orphaned_notes: bool,
    pub delete_orphaned_folders: bool,

    /// Delete audio cache files older than this many days
    pub audio_cache_max_age_days: Option<u32>,

    /// Delete users inactive for this many days
    pub delete_inactive_users_days: Option<u32>,

    pub exempt_admin_users: bool,
    pub exempt_pending_users: bool,

    /// Reclaim storage once deletions are done
    pub run_vacuum: bool,

    /// Only count what would be deleted
    pub dry_run: bool,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            days: None,
            exempt_archived_chats: false,
            exempt_chats_in_folders: false,
            delete_orphaned_chats: true,
            delete_orphaned_tools: false,
            delete_orphaned_functions: false,
            delete_orphaned_prompts: true,
            delete_orphaned_knowledge_bases: true,
            delete_orphaned_models: true,
            delete_orphaned_notes: true,
            delete_orphaned_folders: true,
            audio_cache_max_age_days: None,
            delete_inactive_users_days: None,
            exempt_admin_users: true,
            exempt_pending_users: true,
            run_vacuum: false,
            dry_run: true,
        }
    }
}

impl PruneConfig {
    /// Load from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: PruneConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Save as YAML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
