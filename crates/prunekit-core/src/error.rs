//! Error types for prunekit

use thiserror::Error;

/// Result type alias using PruneError
pub type Result<T> = std::result::Result<T, PruneError>;

/// Error type alias for convenience
pub type Error = PruneError;

/// Exit codes for CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_INPUT: i32 = 3;
    pub const CONFLICT: i32 = 4;
}

/// Main error type for prunekit
#[derive(Debug, Error)]
pub enum PruneError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Another prune run is in progress (lock held since {since})")]
    LockHeld { since: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PruneError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LockHeld { .. } => exit_codes::CONFLICT,
            Self::Config(_) | Self::Yaml(_) => exit_codes::INVALID_INPUT,
            _ => exit_codes::GENERAL_ERROR,
        }
    }

    /// True when SQLite reported the database as busy or locked by another connection
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let held = PruneError::LockHeld {
            since: "2026-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(held.exit_code(), exit_codes::CONFLICT);
        assert_eq!(
            PruneError::Config("bad".to_string()).exit_code(),
            exit_codes::INVALID_INPUT
        );
        assert_eq!(
            PruneError::VectorStore("x".to_string()).exit_code(),
            exit_codes::GENERAL_ERROR
        );
    }

    #[test]
    fn test_is_busy() {
        let busy = PruneError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_busy());
        assert!(!PruneError::Config("x".to_string()).is_busy());
    }
}
