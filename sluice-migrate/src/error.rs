//! Error types for the migration engine.
//!
//! Every error carries a stable, machine-readable [`ErrorCode`] plus the
//! structured metadata (offending names, expected/actual checksums) needed to
//! handle it programmatically.
//!
//! ```rust
//! use sluice_migrate::{ErrorCode, MigrationError};
//!
//! let err = MigrationError::ChecksumMismatch {
//!     name: "20240101120000000_init".to_string(),
//!     expected: "abc".to_string(),
//!     actual: "def".to_string(),
//! };
//! assert_eq!(err.code(), ErrorCode::ChecksumMismatch);
//! assert_eq!(err.code().as_str(), "MIGRATION_CHECKSUM_MISMATCH");
//! ```

use std::fmt;

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Journal or snapshot belongs to a different dialect than the driver.
    DialectMismatch,
    /// Dialect string is not recognized.
    UnsupportedDialect,
    /// A destructive change had no resolution, or data would be lost.
    DestructiveRejected,
    /// An ambiguous rename/replace change had no resolution.
    AmbiguousUnresolved,
    /// A resolver explicitly rejected a change.
    ChangeRejected,
    /// A migration file or applied record disagrees with the journal.
    ChecksumMismatch,
    /// A migration or file does not exist.
    NotFound,
    /// The advisory lock could not be acquired.
    LockFailed,
    /// A file-based workflow was invoked without a storage backend.
    StorageRequired,
    /// The tracking table name is not a plain identifier.
    InvalidTableName,
    /// The migrations directory is empty or escapes its root.
    InvalidMigrationsDir,
    /// A journal, migration file or argument is malformed.
    InvalidMigration,
    /// Applying one migration failed; earlier ones stay applied.
    ApplyFailed,
    /// The database reported an error.
    Database,
    /// File system error.
    Io,
    /// Journal/snapshot (de)serialization failed.
    Serialization,
    /// Configuration could not be loaded.
    Config,
}

impl ErrorCode {
    /// The stable string form of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DialectMismatch => "MIGRATION_DIALECT_MISMATCH",
            Self::UnsupportedDialect => "MIGRATION_UNSUPPORTED_DIALECT",
            Self::DestructiveRejected => "MIGRATION_DESTRUCTIVE_REJECTED",
            Self::AmbiguousUnresolved => "MIGRATION_AMBIGUOUS_UNRESOLVED",
            Self::ChangeRejected => "MIGRATION_CHANGE_REJECTED",
            Self::ChecksumMismatch => "MIGRATION_CHECKSUM_MISMATCH",
            Self::NotFound => "MIGRATION_NOT_FOUND",
            Self::LockFailed => "MIGRATION_LOCK_FAILED",
            Self::StorageRequired => "MIGRATION_STORAGE_REQUIRED",
            Self::InvalidTableName => "MIGRATION_INVALID_TABLE_NAME",
            Self::InvalidMigrationsDir => "MIGRATION_INVALID_MIGRATIONS_DIR",
            Self::InvalidMigration => "MIGRATION_INVALID",
            Self::ApplyFailed => "MIGRATION_APPLY_FAILED",
            Self::Database => "MIGRATION_DATABASE_ERROR",
            Self::Io => "MIGRATION_IO_ERROR",
            Self::Serialization => "MIGRATION_SERIALIZATION_ERROR",
            Self::Config => "MIGRATION_CONFIG_ERROR",
        }
    }

    /// Short human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::DialectMismatch => "Dialect mismatch",
            Self::UnsupportedDialect => "Unsupported dialect",
            Self::DestructiveRejected => "Destructive change rejected",
            Self::AmbiguousUnresolved => "Ambiguous change unresolved",
            Self::ChangeRejected => "Change rejected by resolver",
            Self::ChecksumMismatch => "Checksum mismatch",
            Self::NotFound => "Migration not found",
            Self::LockFailed => "Lock acquisition failed",
            Self::StorageRequired => "Storage driver required",
            Self::InvalidTableName => "Invalid table name",
            Self::InvalidMigrationsDir => "Invalid migrations directory",
            Self::InvalidMigration => "Invalid migration",
            Self::ApplyFailed => "Migration apply failed",
            Self::Database => "Database error",
            Self::Io => "I/O error",
            Self::Serialization => "Serialization error",
            Self::Config => "Configuration error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The journal was written for another dialect.
    #[error("Dialect mismatch: expected {expected}, got {actual}")]
    DialectMismatch {
        /// Dialect recorded in the journal.
        expected: String,
        /// Dialect of the active driver.
        actual: String,
    },

    /// Unknown dialect name.
    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),

    /// A destructive change was not allowed to proceed.
    #[error("Destructive change rejected: {change}")]
    DestructiveRejected {
        /// Description of the offending change.
        change: String,
        /// Table involved.
        table: String,
        /// Column involved, if any.
        column: Option<String>,
    },

    /// An ambiguous change had no resolution.
    #[error("Unresolved ambiguous change: {change}")]
    AmbiguousUnresolved {
        /// Description of the offending change.
        change: String,
    },

    /// A resolver explicitly rejected a change.
    #[error("Change rejected by resolver: {change}")]
    ChangeRejected {
        /// Description of the offending change.
        change: String,
    },

    /// Migration checksum mismatch.
    #[error("Checksum mismatch for migration '{name}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Migration name.
        name: String,
        /// Expected checksum.
        expected: String,
        /// Actual checksum.
        actual: String,
    },

    /// Migration not found.
    #[error("Migration '{0}' not found")]
    NotFound(String),

    /// Lock acquisition failed.
    #[error("Failed to acquire migration lock: {0}")]
    LockFailed(String),

    /// Storage backend missing for a file-based workflow.
    #[error("A migration storage backend is required for '{0}'")]
    StorageRequired(&'static str),

    /// Invalid tracking table name.
    #[error("Invalid table name: '{0}'")]
    InvalidTableName(String),

    /// Invalid migrations directory.
    #[error("Invalid migrations directory: '{0}'")]
    InvalidMigrationsDir(String),

    /// Invalid migration file, journal, or argument.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// Applying a migration failed.
    #[error("Migration '{name}' failed: {source}")]
    ApplyFailed {
        /// The migration that failed.
        name: String,
        /// Migrations applied before the failure.
        applied: Vec<String>,
        /// Migrations still pending (including the failed one).
        pending: Vec<String>,
        /// The underlying failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// (De)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Self::LockFailed(msg.into())
    }

    /// Create an invalid migration error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a destructive-change error for a table or column.
    pub fn destructive(
        change: impl Into<String>,
        table: impl Into<String>,
        column: Option<String>,
    ) -> Self {
        Self::DestructiveRejected {
            change: change.into(),
            table: table.into(),
            column,
        }
    }

    /// The machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DialectMismatch { .. } => ErrorCode::DialectMismatch,
            Self::UnsupportedDialect(_) => ErrorCode::UnsupportedDialect,
            Self::DestructiveRejected { .. } => ErrorCode::DestructiveRejected,
            Self::AmbiguousUnresolved { .. } => ErrorCode::AmbiguousUnresolved,
            Self::ChangeRejected { .. } => ErrorCode::ChangeRejected,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::LockFailed(_) => ErrorCode::LockFailed,
            Self::StorageRequired(_) => ErrorCode::StorageRequired,
            Self::InvalidTableName(_) => ErrorCode::InvalidTableName,
            Self::InvalidMigrationsDir(_) => ErrorCode::InvalidMigrationsDir,
            Self::InvalidMigration(_) => ErrorCode::InvalidMigration,
            Self::ApplyFailed { .. } => ErrorCode::ApplyFailed,
            Self::Database(_) => ErrorCode::Database,
            Self::Io(_) => ErrorCode::Io,
            Self::Serialization(_) => ErrorCode::Serialization,
            Self::Config(_) => ErrorCode::Config,
        }
    }

    /// Structured metadata describing the error subject.
    pub fn metadata(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::DialectMismatch { expected, actual } => vec![
                ("expected", expected.clone()),
                ("actual", actual.clone()),
            ],
            Self::UnsupportedDialect(name) => vec![("dialect", name.clone())],
            Self::DestructiveRejected {
                change,
                table,
                column,
            } => {
                let mut meta = vec![("change", change.clone()), ("table", table.clone())];
                if let Some(column) = column {
                    meta.push(("column", column.clone()));
                }
                meta
            }
            Self::AmbiguousUnresolved { change } | Self::ChangeRejected { change } => {
                vec![("change", change.clone())]
            }
            Self::ChecksumMismatch {
                name,
                expected,
                actual,
            } => vec![
                ("name", name.clone()),
                ("expected", expected.clone()),
                ("actual", actual.clone()),
            ],
            Self::NotFound(name) => vec![("name", name.clone())],
            Self::StorageRequired(workflow) => vec![("workflow", (*workflow).to_string())],
            Self::InvalidTableName(name) => vec![("table", name.clone())],
            Self::InvalidMigrationsDir(dir) => vec![("dir", dir.clone())],
            Self::ApplyFailed {
                name,
                applied,
                pending,
                ..
            } => vec![
                ("name", name.clone()),
                ("applied", applied.join(",")),
                ("pending", pending.join(",")),
            ],
            _ => Vec::new(),
        }
    }

    /// Check if retrying the same call could succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockFailed(_))
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for MigrationError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::NotFound("0003_add-posts".to_string());
        assert!(err.to_string().contains("0003_add-posts"));
        assert_eq!(err.code().as_str(), "MIGRATION_NOT_FOUND");
    }

    #[test]
    fn test_checksum_mismatch_metadata() {
        let err = MigrationError::ChecksumMismatch {
            name: "init".to_string(),
            expected: "abc".to_string(),
            actual: "xyz".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("xyz"));

        let meta = err.metadata();
        assert!(meta.contains(&("expected", "abc".to_string())));
        assert!(meta.contains(&("actual", "xyz".to_string())));
    }

    #[test]
    fn test_destructive_names_column() {
        let err = MigrationError::destructive(
            "remove enum values from users.status",
            "users",
            Some("status".to_string()),
        );
        assert_eq!(err.code(), ErrorCode::DestructiveRejected);
        assert!(err.metadata().contains(&("column", "status".to_string())));
    }

    #[test]
    fn test_apply_failed_keeps_source() {
        let err = MigrationError::ApplyFailed {
            name: "b".to_string(),
            applied: vec!["a".to_string()],
            pending: vec!["b".to_string(), "c".to_string()],
            source: Box::new(MigrationError::database("syntax error")),
        };
        assert_eq!(err.code(), ErrorCode::ApplyFailed);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.metadata().contains(&("pending", "b,c".to_string())));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::lock_failed("busy").is_recoverable());
        assert!(!MigrationError::database("connection").is_recoverable());
    }
}
