//! Config command

use super::Context;
use crate::app::PruneArgs;
use anyhow::Result;

pub async fn run(args: PruneArgs, ctx: &Context) -> Result<()> {
    let config = ctx.prune_config(&args)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
