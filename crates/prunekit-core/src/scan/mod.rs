//! Reference scanning over JSON-shaped records
//!
//! Conversations, folders and channel messages embed file references at
//! arbitrary depth. The scanner walks those structures directly instead of
//! serializing them and running regexes over the text.

pub mod active;

pub use active::{
    active_kb_ids, active_user_ids, build_active_file_ids, Exclusions, DEFAULT_BATCH_SIZE,
};

use crate::ids::is_identifier;
use serde_json::Value;
use std::collections::HashSet;

/// Nesting level past which a branch is abandoned
pub const MAX_SCAN_DEPTH: usize = 100;

/// Object keys holding a single identifier
const SINGLE_ID_FIELDS: &[&str] = &["id", "file_id", "fileId"];

/// Object keys holding an array of identifiers
const ID_ARRAY_FIELDS: &[&str] = &["file_ids", "fileIds"];

/// Collect identifiers referenced anywhere inside `node`.
///
/// Only values that have the identifier shape and are members of `known_valid`
/// are added to `out`. Branches nested deeper than [`MAX_SCAN_DEPTH`] are
/// silently skipped.
pub fn collect_referenced_ids(
    node: &Value,
    out: &mut HashSet<String>,
    known_valid: &HashSet<String>,
) {
    collect_at_depth(node, out, known_valid, 0);
}

fn collect_at_depth(
    node: &Value,
    out: &mut HashSet<String>,
    known_valid: &HashSet<String>,
    depth: usize,
) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }

    match node {
        Value::Object(map) => {
            for field in SINGLE_ID_FIELDS {
                if let Some(Value::String(candidate)) = map.get(*field) {
                    admit(candidate, out, known_valid);
                }
            }

            for field in ID_ARRAY_FIELDS {
                if let Some(Value::Array(items)) = map.get(*field) {
                    for item in items {
                        if let Value::String(candidate) = item {
                            admit(candidate, out, known_valid);
                        }
                    }
                }
            }

            for value in map.values() {
                collect_at_depth(value, out, known_valid, depth + 1);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_at_depth(item, out, known_valid, depth + 1);
            }
        }
        _ => {}
    }
}

fn admit(candidate: &str, out: &mut HashSet<String>, known_valid: &HashSet<String>) {
    if is_identifier(candidate) && known_valid.contains(candidate) {
        out.insert(candidate.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const F1: &str = "11111111-1111-4111-8111-111111111111";
    const F2: &str = "22222222-2222-4222-8222-222222222222";
    const F3: &str = "33333333-3333-4333-8333-333333333333";

    fn universe(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn scan(node: &Value, valid: &HashSet<String>) -> HashSet<String> {
        let mut out = HashSet::new();
        collect_referenced_ids(node, &mut out, valid);
        out
    }

    #[test]
    fn test_collect_from_simple_object() {
        let valid = universe(&[F1]);
        let found = scan(&json!({ "id": F1 }), &valid);
        assert_eq!(found, valid);
    }

    #[test]
    fn test_collect_from_nested_chat() {
        let valid = universe(&[F1, F2, F3]);
        let chat = json!({
            "title": "hello",
            "history": {
                "messages": {
                    "m1": { "files": [ { "type": "file", "file": { "id": F1 } } ] },
                    "m2": { "sources": [ { "file_id": F2 } ] }
                }
            },
            "attachments": { "fileIds": [F3] }
        });
        assert_eq!(scan(&chat, &valid), valid);
    }

    #[test]
    fn test_all_field_names_recognized() {
        let valid = universe(&[F1, F2, F3]);
        let node = json!([
            { "fileId": F1 },
            { "file_ids": [F2, "not-an-id", 7] },
            { "fileIds": [F3] }
        ]);
        assert_eq!(scan(&node, &valid), valid);
    }

    #[test]
    fn test_ids_outside_universe_are_ignored() {
        let valid = universe(&[F1]);
        let node = json!({ "id": F1, "children": [ { "file_id": F2 } ] });
        assert_eq!(scan(&node, &valid), universe(&[F1]));
    }

    #[test]
    fn test_malformed_ids_are_ignored() {
        let short = &F1[..35];
        let no_dashes = F1.replace('-', "");
        let shifted = "1111111-11111-4111-8111-111111111111";
        let mut valid = universe(&[short, shifted]);
        valid.insert(no_dashes.clone());

        let node = json!({
            "id": short,
            "file_id": no_dashes,
            "fileIds": [shifted],
        });
        assert!(scan(&node, &valid).is_empty());
    }

    #[test]
    fn test_unrecognized_fields_and_scalars() {
        let valid = universe(&[F1]);
        assert!(scan(&json!({ "uuid": F1, "ref": F1 }), &valid).is_empty());
        assert!(scan(&json!(F1), &valid).is_empty());
        assert!(scan(&json!(null), &valid).is_empty());
        assert!(scan(&json!({ "id": null, "file_ids": null }), &valid).is_empty());
        assert!(scan(&json!({}), &valid).is_empty());
        assert!(scan(&json!([]), &valid).is_empty());
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let valid = universe(&[F1, F2]);

        let mut node = json!({ "id": F2 });
        for _ in 0..200 {
            node = json!({ "child": node });
        }
        node = json!({ "id": F1, "child": node });

        // F2 sits 201 levels down, past the ceiling; F1 is at the root.
        assert_eq!(scan(&node, &valid), universe(&[F1]));
    }

    #[test]
    fn test_within_ceiling_is_found() {
        let valid = universe(&[F1]);
        let mut node = json!({ "file_id": F1 });
        for _ in 0..50 {
            node = json!([node]);
        }
        assert_eq!(scan(&node, &valid), valid);
    }

    #[test]
    fn test_scanning_is_idempotent() {
        let valid = universe(&[F1, F2]);
        let node = json!({ "id": F1, "x": [ { "file_id": F2 } ] });
        let mut out = HashSet::new();
        collect_referenced_ids(&node, &mut out, &valid);
        collect_referenced_ids(&node, &mut out, &valid);
        assert_eq!(out, valid);
    }

    proptest! {
        #[test]
        fn prop_collects_exactly_valid_members(
            ids in proptest::collection::vec(any::<u128>(), 1..12),
            keep_mask in proptest::collection::vec(any::<bool>(), 12),
        ) {
            let rendered: Vec<String> = ids
                .iter()
                .map(|n| uuid::Uuid::from_u128(*n).to_string())
                .collect();
            let valid: HashSet<String> = rendered
                .iter()
                .zip(keep_mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(id, _)| id.clone())
                .collect();

            let node = json!({
                "messages": rendered
                    .iter()
                    .enumerate()
                    .map(|(i, id)| match i % 3 {
                        0 => json!({ "id": id }),
                        1 => json!({ "meta": { "file_id": id } }),
                        _ => json!({ "file_ids": [id] }),
                    })
                    .collect::<Vec<_>>()
            });

            prop_assert_eq!(scan(&node, &valid), valid);
        }
    }
}
