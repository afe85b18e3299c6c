//! Run results

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-category totals, either predicted (preview) or actually deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneCounts {
    pub inactive_users: usize,
    pub old_chats: usize,
    pub orphaned_chats: usize,
    pub orphaned_files: usize,
    pub orphaned_tools: usize,
    pub orphaned_functions: usize,
    pub orphaned_prompts: usize,
    pub orphaned_knowledge_bases: usize,
    pub orphaned_models: usize,
    pub orphaned_notes: usize,
    pub orphaned_folders: usize,
    pub orphaned_uploads: usize,
    pub orphaned_vector_collections: usize,
    pub audio_cache_files: usize,
}

impl PruneCounts {
    pub fn total(&self) -> usize {
        self.inactive_users
            + self.old_chats
            + self.orphaned_chats
            + self.orphaned_files
            + self.orphaned_tools
            + self.orphaned_functions
            + self.orphaned_prompts
            + self.orphaned_knowledge_bases
            + self.orphaned_models
            + self.orphaned_notes
            + self.orphaned_folders
            + self.orphaned_uploads
            + self.orphaned_vector_collections
            + self.audio_cache_files
    }

    /// `(label, count)` pairs in pipeline order
    pub fn rows(&self) -> [(&'static str, usize); 14] {
        [
            ("Inactive users", self.inactive_users),
            ("Old chats", self.old_chats),
            ("Orphaned chats", self.orphaned_chats),
            ("Orphaned files", self.orphaned_files),
            ("Orphaned tools", self.orphaned_tools),
            ("Orphaned functions", self.orphaned_functions),
            ("Orphaned prompts", self.orphaned_prompts),
            ("Orphaned knowledge bases", self.orphaned_knowledge_bases),
            ("Orphaned models", self.orphaned_models),
            ("Orphaned notes", self.orphaned_notes),
            ("Orphaned folders", self.orphaned_folders),
            ("Orphaned upload files", self.orphaned_uploads),
            ("Orphaned vector collections", self.orphaned_vector_collections),
            ("Audio cache files", self.audio_cache_files),
        ]
    }
}

/// One item that could not be removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub category: String,
    pub id: String,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(category: impl fmt::Display, id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            category: category.to_string(),
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.category, self.id, self.reason)
    }
}

/// Result of a real run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    #[serde(flatten)]
    pub counts: PruneCounts,
    /// Non-fatal problems (backend cleanup errors, compaction failures)
    pub warnings: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl PruneReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.failures.is_empty()
    }
}

/// What a pipeline invocation produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PruneOutcome {
    Preview(PruneCounts),
    Completed(PruneReport),
}

impl PruneOutcome {
    pub fn counts(&self) -> &PruneCounts {
        match self {
            Self::Preview(counts) => counts,
            Self::Completed(report) => &report.counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_sums_every_category() {
        let counts = PruneCounts {
            inactive_users: 1,
            old_chats: 2,
            orphaned_files: 3,
            orphaned_vector_collections: 4,
            audio_cache_files: 5,
            ..Default::default()
        };
        assert_eq!(counts.total(), 15);
        assert_eq!(
            counts.rows().iter().map(|(_, n)| n).sum::<usize>(),
            counts.total()
        );
    }

    #[test]
    fn test_outcome_serializes_with_mode_tag() {
        let outcome = PruneOutcome::Preview(PruneCounts::default());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["mode"], "preview");
        assert_eq!(json["orphaned_files"], 0);

        let report = PruneReport {
            failures: vec![ItemFailure::new("file", "f1", "gone")],
            ..Default::default()
        };
        assert!(!report.is_clean());
        assert_eq!(report.failures[0].to_string(), "file f1: gone");
        let json = serde_json::to_value(PruneOutcome::Completed(report)).unwrap();
        assert_eq!(json["mode"], "completed");
        assert_eq!(json["failures"][0]["id"], "f1");
        assert_eq!(json["orphaned_files"], 0);
    }
}
