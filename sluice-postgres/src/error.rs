//! Error types for PostgreSQL operations.

use sluice_migrate::MigrationError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur talking to PostgreSQL.
#[derive(Error, Debug)]
pub enum PgError {
    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Introspection returned something unexpected.
    #[error("introspection error: {0}")]
    Introspection(String),
}

impl PgError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create an introspection error.
    pub fn introspection(message: impl Into<String>) -> Self {
        Self::Introspection(message.into())
    }

    /// SQLSTATE code of the server error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|c| c.code()),
            _ => None,
        }
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Postgres(e) => e.is_closed(),
            Self::Introspection(_) => false,
        }
    }

    /// Check if another session holds a conflicting lock.
    pub fn is_lock_conflict(&self) -> bool {
        // lock_not_available, deadlock_detected
        matches!(self.sqlstate(), Some("55P03") | Some("40P01"))
    }
}

impl From<PgError> for MigrationError {
    fn from(err: PgError) -> Self {
        if err.is_lock_conflict() {
            return MigrationError::lock_failed(err.to_string());
        }
        match err {
            PgError::Postgres(e) => match e.as_db_error() {
                Some(db) => MigrationError::database(format!(
                    "{} [{}]: {}",
                    db.severity(),
                    db.code().code(),
                    db.message()
                )),
                None => MigrationError::database(e.to_string()),
            },
            PgError::Connection(msg) => MigrationError::database(msg),
            PgError::Introspection(msg) => MigrationError::database(msg),
        }
    }
}
