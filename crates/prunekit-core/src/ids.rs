//! Identifier shape and derived vector collection names

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

/// Length of a hyphenated identifier (8-4-4-4-12)
pub const ID_LEN: usize = 36;

/// Prefix of per-file vector collections
pub const FILE_COLLECTION_PREFIX: &str = "file-";

lazy_static! {
    static ref ID_PATTERN: Regex = Regex::new(
        r"^[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12}$"
    )
    .unwrap();
}

/// Check whether a string has the canonical hyphenated identifier shape
pub fn is_identifier(s: &str) -> bool {
    s.len() == ID_LEN && ID_PATTERN.is_match(s)
}

/// Collection name holding a single file's embeddings
pub fn file_collection_name(file_id: &str) -> String {
    format!("{}{}", FILE_COLLECTION_PREFIX, file_id)
}

/// Collection names that must survive a sweep.
///
/// Files contribute `file-{id}`, knowledge bases contribute their raw id.
pub fn expected_collection_names(
    active_file_ids: &HashSet<String>,
    active_kb_ids: &HashSet<String>,
) -> HashSet<String> {
    let mut expected = HashSet::with_capacity(active_file_ids.len() + active_kb_ids.len());
    expected.extend(active_file_ids.iter().map(|id| file_collection_name(id)));
    expected.extend(active_kb_ids.iter().cloned());
    expected
}

/// Derive the file identifier an upload's filename refers to.
///
/// Tried in order: the first 36 characters, the whole filename, and finally any
/// active identifier contained in the name. A match from the last rule is by
/// construction active, so such files are never treated as orphans.
pub fn upload_file_id(filename: &str, active_file_ids: &HashSet<String>) -> Option<String> {
    if filename.len() > ID_LEN {
        if let Some(prefix) = filename.get(..ID_LEN) {
            if is_identifier(prefix) {
                return Some(prefix.to_string());
            }
        }
    }

    if is_identifier(filename) {
        return Some(filename.to_string());
    }

    active_file_ids
        .iter()
        .find(|id| filename.contains(id.as_str()))
        .cloned()
}
