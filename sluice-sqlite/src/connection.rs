//! SQLite connection wrapper.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use sluice_migrate::{Connection, MigrateResult, Row};
use tracing::debug;

use crate::error::{SqliteError, SqliteResult};

/// A SQLite database driving migrations.
///
/// Work runs on the background thread owned by `tokio-rusqlite`. Databases
/// opened here run with foreign key enforcement off: a table rebuild drops
/// the original table, which would otherwise fire `ON DELETE` actions in
/// referencing tables.
pub struct SqliteConnection {
    conn: tokio_rusqlite::Connection,
}

impl SqliteConnection {
    /// Wrap an open connection.
    pub fn new(conn: tokio_rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(|e| SqliteError::open(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "opened sqlite database");
        Self::prepared(conn).await
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> SqliteResult<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| SqliteError::open(e.to_string()))?;
        Self::prepared(conn).await
    }

    async fn prepared(conn: tokio_rusqlite::Connection) -> SqliteResult<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = OFF")?;
            Ok(())
        })
        .await?;
        Ok(Self::new(conn))
    }

    /// The underlying connection.
    pub fn inner(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing statement");

        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing query");

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> = stmt
                    .column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();

                let rows = stmt.query_map([], |row| {
                    let mut out = Row::new();
                    for (i, column) in columns.iter().enumerate() {
                        out.push(column.as_str(), value_text(row.get_ref(i)?));
                    }
                    Ok(out)
                })?;

                let results: Result<Vec<_>, _> = rows.collect();
                Ok(results?)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(rows)
    }
}
