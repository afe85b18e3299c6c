//! Terminal output formatter

use prunekit_core::{PruneCounts, PruneOutcome};
use std::fmt::Write;

fn counts_table(out: &mut String, counts: &PruneCounts) {
    for (label, count) in counts.rows() {
        if count > 0 {
            let _ = writeln!(out, "  {:<30} {:>8}", label, count);
        }
    }
    let _ = writeln!(out, "  {:<30} {:>8}", "Total", counts.total());
}

pub fn format_outcome(outcome: &PruneOutcome) -> String {
    let mut out = String::new();
    match outcome {
        PruneOutcome::Preview(counts) => {
            if counts.total() == 0 {
                out.push_str("Nothing to prune.\n");
                return out;
            }
            out.push_str("Dry run: the following would be deleted\n\n");
            counts_table(&mut out, counts);
            out.push_str("\nRun again with --execute to delete.\n");
        }
        PruneOutcome::Completed(report) => {
            out.push_str("Prune completed\n\n");
            counts_table(&mut out, &report.counts);
            if !report.warnings.is_empty() {
                out.push_str("\nWarnings:\n");
                for warning in &report.warnings {
                    let _ = writeln!(out, "  {}", warning);
                }
            }
            if !report.failures.is_empty() {
                let _ = writeln!(out, "\nFailed to delete {} items:", report.failures.len());
                for failure in &report.failures {
                    let _ = writeln!(out, "  {}", failure);
                }
            }
        }
    }
    out
}
