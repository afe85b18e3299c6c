//! Status command

use super::Context;
use crate::app::OutputFormat;
use anyhow::Result;
use prunekit_core::MaintenanceLock;
use std::path::Path;

fn presence(path: &Path) -> &'static str {
    if path.exists() {
        "present"
    } else {
        "missing"
    }
}

pub async fn run(ctx: &Context, format: OutputFormat) -> Result<()> {
    let layout = ctx.layout();
    let lock = MaintenanceLock::new(layout.lock_path());
    let holder = lock.holder();

    match format {
        OutputFormat::Json => {
            let status = serde_json::json!({
                "data_dir": layout.data_dir,
                "database": layout.database_path(),
                "uploads": layout.upload_dir(),
                "vector_dir": layout.vector_dir(),
                "vector_backend": ctx.backend().to_string(),
                "lock": holder,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Cli => {
            let database = layout.database_path();
            let uploads = layout.upload_dir();
            let vectors = layout.vector_dir();
            println!("Data directory:  {}", layout.data_dir.display());
            println!("Database:        {} ({})", database.display(), presence(&database));
            println!("Uploads:         {} ({})", uploads.display(), presence(&uploads));
            println!("Vector store:    {} ({})", vectors.display(), presence(&vectors));
            println!("Vector backend:  {}", ctx.backend());
            println!();
            match holder {
                Some(record) => println!(
                    "Lock:            held by run {} (pid {}) since {}",
                    record.run_id, record.pid, record.timestamp
                ),
                None => println!("Lock:            free"),
            }
        }
    }
    Ok(())
}
