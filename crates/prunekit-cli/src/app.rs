//! CLI argument definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use prunekit_core::PruneConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "prunekit")]
#[command(
    author,
    version,
    about = "Find and remove orphaned data across metadata, vector and file storage"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory holding the database, uploads, cache and vector store
    #[arg(long, global = true, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Vector backend name (chroma, sqlite-vec, pgvector, ...)
    #[arg(long, global = true, env = "VECTOR_DB", default_value = "chroma")]
    pub vector_db: String,

    /// YAML file with prune settings; flags override its values
    #[arg(long, global = true, env = "PRUNEKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "cli")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only report errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Preview or run a prune
    Prune(PruneArgs),

    /// Show storage paths and the maintenance lock
    Status,

    /// Print the effective prune settings as YAML
    Config(PruneArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct PruneArgs {
    /// Count what would be deleted without deleting (default)
    #[arg(long, conflicts_with = "execute")]
    pub dry_run: bool,

    /// Actually delete
    #[arg(long)]
    pub execute: bool,

    /// Delete chats not updated for this many days
    #[arg(long)]
    pub days: Option<u32>,

    /// Keep archived chats when aging out chats
    #[arg(long, conflicts_with = "no_exempt_archived_chats")]
    pub exempt_archived_chats: bool,
    #[arg(long, hide = true)]
    pub no_exempt_archived_chats: bool,

    /// Keep chats that are in a folder or pinned
    #[arg(long, conflicts_with = "no_exempt_chats_in_folders")]
    pub exempt_chats_in_folders: bool,
    #[arg(long, hide = true)]
    pub no_exempt_chats_in_folders: bool,

    /// Delete users inactive for this many days
    #[arg(long)]
    pub delete_inactive_users_days: Option<u32>,

    /// Include admins in inactive user deletion
    #[arg(long)]
    pub no_exempt_admin_users: bool,

    /// Include pending users in inactive user deletion
    #[arg(long)]
    pub no_exempt_pending_users: bool,

    /// Keep chats whose owner is gone
    #[arg(long)]
    pub no_delete_orphaned_chats: bool,

    /// Delete tools whose owner is gone
    #[arg(long)]
    pub delete_orphaned_tools: bool,

    /// Delete functions whose owner is gone
    #[arg(long)]
    pub delete_orphaned_functions: bool,

    /// Keep prompts whose owner is gone
    #[arg(long)]
    pub no_delete_orphaned_prompts: bool,

    /// Keep knowledge bases whose owner is gone
    #[arg(long)]
    pub no_delete_orphaned_knowledge_bases: bool,

    /// Keep models whose owner is gone
    #[arg(long)]
    pub no_delete_orphaned_models: bool,

    /// Keep notes whose owner is gone
    #[arg(long)]
    pub no_delete_orphaned_notes: bool,

    /// Keep folders whose owner is gone
    #[arg(long)]
    pub no_delete_orphaned_folders: bool,

    /// Delete audio cache files older than this many days
    #[arg(long)]
    pub audio_cache_max_age_days: Option<u32>,

    /// Reclaim storage after deleting
    #[arg(long)]
    pub run_vacuum: bool,
}

impl PruneArgs {
    /// Layer the flags that were given over `base`
    pub fn apply(&self, mut config: PruneConfig) -> PruneConfig {
        if self.execute {
            config.dry_run = false;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if self.days.is_some() {
            config.days = self.days;
        }
        if self.exempt_archived_chats {
            config.exempt_archived_chats = true;
        }
        if self.no_exempt_archived_chats {
            config.exempt_archived_chats = false;
        }
        if self.exempt_chats_in_folders {
            config.exempt_chats_in_folders = true;
        }
        if self.no_exempt_chats_in_folders {
            config.exempt_chats_in_folders = false;
        }
        if self.delete_inactive_users_days.is_some() {
            config.delete_inactive_users_days = self.delete_inactive_users_days;
        }
        if self.no_exempt_admin_users {
            config.exempt_admin_users = false;
        }
        if self.no_exempt_pending_users {
            config.exempt_pending_users = false;
        }
        if self.no_delete_orphaned_chats {
            config.delete_orphaned_chats = false;
        }
        if self.delete_orphaned_tools {
            config.delete_orphaned_tools = true;
        }
        if self.delete_orphaned_functions {
            config.delete_orphaned_functions = true;
        }
        if self.no_delete_orphaned_prompts {
            config.delete_orphaned_prompts = false;
        }
        if self.no_delete_orphaned_knowledge_bases {
            config.delete_orphaned_knowledge_bases = false;
        }
        if self.no_delete_orphaned_models {
            config.delete_orphaned_models = false;
        }
        if self.no_delete_orphaned_notes {
            config.delete_orphaned_notes = false;
        }
        if self.no_delete_orphaned_folders {
            config.delete_orphaned_folders = false;
        }
        if self.audio_cache_max_age_days.is_some() {
            config.audio_cache_max_age_days = self.audio_cache_max_age_days;
        }
        if self.run_vacuum {
            config.run_vacuum = true;
        }
        config
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Cli,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_base() {
        let args = PruneArgs {
            execute: true,
            days: Some(30),
            delete_orphaned_tools: true,
            no_delete_orphaned_notes: true,
            ..Default::default()
        };
        let config = args.apply(PruneConfig::default());
        assert!(!config.dry_run);
        assert_eq!(config.days, Some(30));
        assert!(config.delete_orphaned_tools);
        assert!(!config.delete_orphaned_notes);
        assert!(config.delete_orphaned_prompts);
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let base = PruneConfig {
            days: Some(90),
            dry_run: false,
            run_vacuum: true,
            ..Default::default()
        };
        assert_eq!(PruneArgs::default().apply(base.clone()), base);
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
