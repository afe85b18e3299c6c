//! Prune command

use super::Context;
use crate::app::{OutputFormat, PruneArgs};
use crate::output;
use anyhow::Result;
use prunekit_core::{open_cleaner, PruneConfig, PruneError, PruneOutcome, Pruner, SqliteStore};

pub async fn run(args: PruneArgs, ctx: Context, format: OutputFormat) -> Result<()> {
    let config = ctx.prune_config(&args)?;

    // Every store and filesystem call below blocks
    let outcome = tokio::task::spawn_blocking(move || execute(&ctx, &config)).await??;

    print!("{}", output::format_outcome(&outcome, format));
    Ok(())
}

fn execute(ctx: &Context, config: &PruneConfig) -> prunekit_core::Result<PruneOutcome> {
    let layout = ctx.layout();
    let db_path = layout.database_path();
    if !db_path.exists() {
        return Err(PruneError::Config(format!(
            "Database not found at {}",
            db_path.display()
        )));
    }

    let store = SqliteStore::open_existing(&db_path)?;

    let backend = ctx.backend();
    let cleaner = open_cleaner(&backend, &layout)?;

    let pruner = Pruner::new(&store, cleaner.as_ref(), layout);
    pruner.run(config)
}
