//! Output formatters

pub mod json;
pub mod terminal;

use crate::app::OutputFormat;
use prunekit_core::PruneOutcome;

/// Render a run result
pub fn format_outcome(outcome: &PruneOutcome, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json::format_outcome(outcome),
        OutputFormat::Cli => terminal::format_outcome(outcome),
    }
}
