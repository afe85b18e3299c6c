//! Cleaner for backends without cleanup support

use super::{CleanupReport, VectorCleaner};
use std::collections::HashSet;

/// Reports nothing to clean and accepts every deletion
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCleaner;

impl VectorCleaner for NoopCleaner {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn count_orphaned_collections(&self, _: &HashSet<String>, _: &HashSet<String>) -> usize {
        0
    }

    fn cleanup_orphaned_collections(
        &self,
        _: &HashSet<String>,
        _: &HashSet<String>,
    ) -> CleanupReport {
        CleanupReport::default()
    }

    fn delete_collection(&self, _: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_cleaner() {
        let cleaner = NoopCleaner;
        let empty = HashSet::new();
        assert_eq!(cleaner.count_orphaned_collections(&empty, &empty), 0);
        assert_eq!(
            cleaner.cleanup_orphaned_collections(&empty, &empty),
            CleanupReport::default()
        );
        assert!(cleaner.delete_collection("file-anything"));
        assert!(cleaner.compact().is_ok());
    }
}
