//! The PostgreSQL migration driver.

use async_trait::async_trait;
use sluice_migrate::{
    Connection, DdlContext, Dialect, MigrateResult, MigrationDriver, Operation, Snapshot,
};
use tracing::debug;

use crate::ddl::operation_sql;
use crate::introspect::CatalogRows;

/// PostgreSQL dialect driver.
///
/// Enums are native types, auto-increment columns are identity columns and
/// the migration lock is a session-level advisory lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a driver.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MigrationDriver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn generate_ddl(
        &self,
        operation: &Operation,
        ctx: &DdlContext<'_>,
    ) -> MigrateResult<Vec<String>> {
        Ok(operation_sql(operation, ctx))
    }

    fn acquire_lock(&self, lock_id: i64) -> Option<String> {
        Some(format!("SELECT pg_advisory_lock({})", lock_id))
    }

    fn release_lock(&self, lock_id: i64) -> Option<String> {
        Some(format!("SELECT pg_advisory_unlock({})", lock_id))
    }

    // New enum values cannot be used in the transaction that added them.
    fn supports_add_enum_value_in_transaction(&self) -> bool {
        false
    }

    async fn introspect(
        &self,
        conn: &mut dyn Connection,
        exclude_tables: &[&str],
    ) -> MigrateResult<Snapshot> {
        let rows = CatalogRows::fetch(conn).await?;
        let snapshot = rows.into_snapshot(exclude_tables)?;
        debug!(
            tables = snapshot.tables.len(),
            enums = snapshot.enums.len(),
            "introspected postgres schema"
        );
        Ok(snapshot)
    }
}
