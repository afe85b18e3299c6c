//! Prunekit CLI
//!
//! Preview and run orphan cleanup over a data directory.

use anyhow::Result;
use clap::Parser;
use prunekit_core::error::exit_codes;
use prunekit_core::PruneError;

mod app;
mod commands;
mod output;

use app::{Cli, Commands};
use commands::Context;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::ERROR
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(&e));
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let ctx = Context {
        data_dir: cli.data_dir,
        vector_db: cli.vector_db,
        config: cli.config,
    };

    match cli.command {
        Commands::Prune(args) => commands::prune::run(args, ctx, cli.format).await,
        Commands::Status => commands::status::run(&ctx, cli.format).await,
        Commands::Config(args) => commands::config::run(args, &ctx).await,
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<PruneError>()
        .map(PruneError::exit_code)
        .unwrap_or(exit_codes::GENERAL_ERROR)
}
