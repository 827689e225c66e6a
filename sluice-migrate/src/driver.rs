//! The per-dialect driver interface.
//!
//! A driver translates operations into DDL, writes the statements the
//! execution context needs for tracking and locking, and reads a live
//! database back into a [`Snapshot`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::MigrateResult;
use crate::history::format_timestamp;
use crate::operation::Operation;
use crate::snapshot::Snapshot;

/// What a driver may consult while generating DDL for one operation.
#[derive(Debug, Clone, Copy)]
pub struct DdlContext<'a> {
    /// Schema before the migration.
    pub current: &'a Snapshot,
    /// Schema after the migration.
    pub desired: &'a Snapshot,
    /// Every operation of the migration, in execution order.
    pub operations: &'a [Operation],
}

impl<'a> DdlContext<'a> {
    /// Create a context.
    pub fn new(current: &'a Snapshot, desired: &'a Snapshot, operations: &'a [Operation]) -> Self {
        Self {
            current,
            desired,
            operations,
        }
    }

    /// Whether the migration creates `table`.
    pub fn creates_table(&self, table: &str) -> bool {
        self.operations
            .iter()
            .any(|op| matches!(op, Operation::CreateTable { table: t } if t.name == table))
    }

    /// Whether the migration drops `table`.
    pub fn drops_table(&self, table: &str) -> bool {
        self.operations
            .iter()
            .any(|op| matches!(op, Operation::DropTable { name } if name == table))
    }
}

/// Dialect-specific SQL generation and introspection.
#[async_trait]
pub trait MigrationDriver: Send + Sync {
    /// Target dialect.
    fn dialect(&self) -> Dialect;

    /// Statements implementing one operation. May be empty.
    fn generate_ddl(&self, operation: &Operation, ctx: &DdlContext<'_>)
    -> MigrateResult<Vec<String>>;

    /// Create the tracking table if missing.
    fn create_tracking_table(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT NOT NULL PRIMARY KEY, checksum TEXT NOT NULL, applied_at TEXT NOT NULL)",
            quote_ident(table)
        )
    }

    /// Select `name`, `checksum` and `applied_at` (RFC 3339 text) from the
    /// tracking table.
    fn select_migrations(&self, table: &str) -> String {
        format!(
            "SELECT name, checksum, applied_at FROM {} ORDER BY applied_at, name",
            quote_ident(table)
        )
    }

    /// Record an applied migration.
    fn insert_migration(
        &self,
        table: &str,
        name: &str,
        checksum: &str,
        applied_at: &DateTime<Utc>,
    ) -> String {
        format!(
            "INSERT INTO {} (name, checksum, applied_at) VALUES ({}, {}, {})",
            quote_ident(table),
            quote_literal(name),
            quote_literal(checksum),
            quote_literal(&format_timestamp(applied_at))
        )
    }

    /// Forget one applied migration.
    fn delete_migration(&self, table: &str, name: &str) -> String {
        format!(
            "DELETE FROM {} WHERE name = {}",
            quote_ident(table),
            quote_literal(name)
        )
    }

    /// Forget every applied migration.
    fn clear_migrations(&self, table: &str) -> String {
        format!("DELETE FROM {}", quote_ident(table))
    }

    /// Statement acquiring the advisory lock, or `None` where the dialect
    /// relies on exclusive transactions instead.
    fn acquire_lock(&self, lock_id: i64) -> Option<String>;

    /// Statement releasing the advisory lock.
    fn release_lock(&self, lock_id: i64) -> Option<String>;

    /// Statement opening a transaction.
    fn begin_transaction(&self) -> &'static str {
        "BEGIN"
    }

    /// Statement committing a transaction.
    fn commit_transaction(&self) -> &'static str {
        "COMMIT"
    }

    /// Statement rolling back a transaction.
    fn rollback_transaction(&self) -> &'static str {
        "ROLLBACK"
    }

    /// Whether `ALTER TYPE ... ADD VALUE` may run inside a transaction.
    fn supports_add_enum_value_in_transaction(&self) -> bool {
        true
    }

    /// Read the live schema, skipping `exclude_tables`.
    async fn introspect(
        &self,
        conn: &mut dyn Connection,
        exclude_tables: &[&str],
    ) -> MigrateResult<Snapshot>;
}

/// Double-quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Comma-separated quoted identifiers.
pub fn quote_idents<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TableDef;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_idents(&["a", "b"]), "\"a\", \"b\"");
    }

    #[test]
    fn test_context_lookups() {
        let ops = vec![
            Operation::CreateTable {
                table: TableDef::new("post"),
            },
            Operation::DropTable {
                name: "legacy".to_string(),
            },
        ];
        let empty = Snapshot::empty();
        let ctx = DdlContext::new(&empty, &empty, &ops);
        assert!(ctx.creates_table("post"));
        assert!(!ctx.creates_table("legacy"));
        assert!(ctx.drops_table("legacy"));
    }
}
