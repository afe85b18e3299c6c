//! CLI command handlers

pub mod config;
pub mod prune;
pub mod status;

use crate::app::PruneArgs;
use prunekit_core::{PruneConfig, Result, StorageLayout, VectorBackend};
use std::path::PathBuf;

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub data_dir: PathBuf,
    pub vector_db: String,
    pub config: Option<PathBuf>,
}

impl Context {
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.data_dir)
    }

    pub fn backend(&self) -> VectorBackend {
        VectorBackend::from_name(&self.vector_db)
    }

    /// Settings file (if any) with the given flags layered on top
    pub fn prune_config(&self, args: &PruneArgs) -> Result<PruneConfig> {
        let base = match &self.config {
            Some(path) => PruneConfig::load(path)?,
            None => PruneConfig::default(),
        };
        Ok(args.apply(base))
    }
}
