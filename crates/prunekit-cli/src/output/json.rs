//! JSON output formatter

use prunekit_core::PruneOutcome;

pub fn format_outcome(outcome: &PruneOutcome) -> String {
    let mut value = serde_json::to_value(outcome).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "total".to_string(),
            serde_json::Value::from(outcome.counts().total()),
        );
    }
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string()) + "\n"
}
