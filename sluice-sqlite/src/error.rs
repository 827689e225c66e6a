//! Error types for SQLite operations.

use std::fmt;

use sluice_migrate::MigrationError;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Debug)]
pub enum SqliteError {
    /// SQLite driver error.
    Sqlite(tokio_rusqlite::Error),
    /// Opening the database failed.
    Open(String),
    /// Schema text that could not be understood.
    Introspection(String),
}

impl SqliteError {
    /// Create an open error.
    pub fn open(msg: impl Into<String>) -> Self {
        Self::Open(msg.into())
    }

    /// Create an introspection error.
    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }

    /// Whether the database was locked by another connection.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
                matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            }
            _ => false,
        }
    }
}

impl fmt::Display for SqliteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Open(msg) => write!(f, "Open error: {}", msg),
            Self::Introspection(msg) => write!(f, "Introspection error: {}", msg),
        }
    }
}

impl std::error::Error for SqliteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tokio_rusqlite::Error> for SqliteError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<SqliteError> for MigrationError {
    fn from(err: SqliteError) -> Self {
        if err.is_busy() {
            return MigrationError::lock_failed(err.to_string());
        }
        MigrationError::database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_migrate::ErrorCode;

    #[test]
    fn test_error_display() {
        let err = SqliteError::open("invalid path");
        assert!(err.to_string().contains("Open error"));
        assert!(err.to_string().contains("invalid path"));
    }

    #[test]
    fn test_error_conversion() {
        let err: MigrationError = SqliteError::introspection("bad check").into();
        assert_eq!(err.code(), ErrorCode::Database);

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err: MigrationError = SqliteError::from(busy).into();
        assert_eq!(err.code(), ErrorCode::LockFailed);
    }
}
