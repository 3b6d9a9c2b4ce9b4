//! Error types for the indexing core.
//!
//! Structured errors built on thiserror. The error classes mirror the
//! propagation policy of the pipeline: per-item extractor failures are logged
//! and skipped at the call site, transaction-level failures surface as one of
//! the variants below.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing and storage operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Parsing errors that survived recovery and the regex fallback
    #[error("Failed to parse '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    /// Database errors without a more specific classification
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Uniqueness, foreign-key, or CHECK failures. Aborts the enclosing
    /// transaction and names the offending table/constraint when SQLite
    /// reports them.
    #[error("Constraint violation on {table}: {detail}")]
    Constraint { table: String, detail: String },

    /// No explicit database path, no environment override, and no project
    /// root to anchor the default path.
    #[error(
        "Cannot resolve a database path: no project root found.\n\
         Suggestion: run from a directory inside a VCS checkout, set \
         KOTADB_DB_PATH, or configure database.path explicitly"
    )]
    ProjectRootNotFound,

    /// A migration file failed to apply. The runner rolls back and stops.
    #[error("Migration '{name}' failed: {reason}")]
    MigrationFailed { name: String, reason: String },

    /// Snapshot export/import errors
    #[error("Snapshot error for '{path}': {reason}")]
    Snapshot { path: PathBuf, reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(#[from] figment::Error),

    /// Metadata (de)serialization at the storage edge
    #[error("Metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cooperative cancellation observed before or during ingestion
    #[error("Ingestion cancelled before commit")]
    Cancelled,

    /// General errors where a dedicated variant would not earn its keep
    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Classify a rusqlite error, pulling out the table name for constraint
    /// failures so callers see which table rejected the write.
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        if let rusqlite::Error::SqliteFailure(e, ref msg) = err {
            if e.code == ErrorCode::ConstraintViolation {
                let detail = msg.clone().unwrap_or_else(|| e.to_string());
                let table = detail
                    .split([' ', ',', ':'])
                    .find(|part| part.contains('.'))
                    .and_then(|qualified| qualified.split('.').next())
                    .unwrap_or("unknown")
                    .to_string();
                return Self::Constraint { table, detail };
            }
        }
        Self::Sqlite(err)
    }

    /// Actionable recovery suggestions, surfaced by callers on fatal errors.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Constraint { .. } => vec![
                "The transaction was rolled back, the index is in a consistent state",
                "Re-run the indexing operation after fixing the conflicting input",
            ],
            Self::MigrationFailed { .. } => vec![
                "The failing migration was rolled back; later migrations were not attempted",
                "Fix the migration SQL and run the migration runner again",
            ],
            Self::ProjectRootNotFound => vec![
                "Set KOTADB_DB_PATH to an explicit database file path",
                "Or run from inside a git/hg/svn checkout so .kotadb/ can be derived",
            ],
            Self::FileRead { .. } => {
                vec!["Check that the file exists and you have read permissions"]
            }
            _ => vec![],
        }
    }
}

/// Result type alias for indexing and storage operations.
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_errors_name_the_table() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                extended_code: 2067,
            },
            Some("UNIQUE constraint failed: indexed_files.repository_id, indexed_files.path".into()),
        );
        match IndexError::from_sqlite(err) {
            IndexError::Constraint { table, detail } => {
                assert_eq!(table, "indexed_files");
                assert!(detail.contains("UNIQUE"));
            }
            other => panic!("expected Constraint, got {other:?}"),
        }
    }

    #[test]
    fn non_constraint_errors_stay_generic() {
        let err = rusqlite::Error::InvalidQuery;
        assert!(matches!(
            IndexError::from_sqlite(err),
            IndexError::Sqlite(_)
        ));
    }

    #[test]
    fn project_root_error_suggests_env_var() {
        let suggestions = IndexError::ProjectRootNotFound.recovery_suggestions();
        assert!(suggestions.iter().any(|s| s.contains("KOTADB_DB_PATH")));
    }
}
