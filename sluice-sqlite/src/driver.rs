//! The SQLite migration driver.

use async_trait::async_trait;
use sluice_migrate::{
    Connection, DdlContext, Dialect, MigrateResult, MigrationDriver, Operation, Snapshot,
};
use tracing::debug;

use crate::ddl::operation_sql;
use crate::introspect;

/// SQLite dialect driver.
///
/// There is no advisory lock; `BEGIN EXCLUSIVE` serializes writers instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a driver.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MigrationDriver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn generate_ddl(
        &self,
        operation: &Operation,
        ctx: &DdlContext<'_>,
    ) -> MigrateResult<Vec<String>> {
        Ok(operation_sql(operation, ctx))
    }

    fn acquire_lock(&self, _lock_id: i64) -> Option<String> {
        None
    }

    fn release_lock(&self, _lock_id: i64) -> Option<String> {
        None
    }

    fn begin_transaction(&self) -> &'static str {
        "BEGIN EXCLUSIVE"
    }

    async fn introspect(
        &self,
        conn: &mut dyn Connection,
        exclude_tables: &[&str],
    ) -> MigrateResult<Snapshot> {
        let snapshot = introspect::introspect(conn, exclude_tables).await?;
        debug!(
            tables = snapshot.tables.len(),
            enums = snapshot.enums.len(),
            "introspected sqlite schema"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SqliteConnection;
    use pretty_assertions::assert_eq;
    use sluice_migrate::{
        ColumnDef, EnumDef, ForeignKeyDef, IndexDef, PrimaryKeyDef, ResolveOptions, TableDef,
        UniqueConstraintDef, plan::plan,
    };

    fn schema() -> Snapshot {
        Snapshot::empty()
            .with_enum(EnumDef::new("Role", ["USER", "ADMIN"]))
            .with_table(
                TableDef::new("user")
                    .column(ColumnDef::new("id", "integer").auto_increment())
                    .column(ColumnDef::new("email", "text"))
                    .column(ColumnDef::new("role", "Role").default_expr("'USER'"))
                    .primary_key(PrimaryKeyDef::new(["id"]))
                    .unique(UniqueConstraintDef::new("user_email_key", ["email"])),
            )
            .with_table(
                TableDef::new("post")
                    .column(ColumnDef::new("id", "integer").auto_increment())
                    .column(ColumnDef::new("author_id", "integer"))
                    .column(ColumnDef::new("title", "text").nullable())
                    .primary_key(PrimaryKeyDef::new(["id"]))
                    .index(IndexDef::new("post_author_idx", ["author_id"]))
                    .foreign_key(
                        ForeignKeyDef::new("post_author_fkey", ["author_id"], "user", ["id"])
                            .on_delete("CASCADE"),
                    ),
            )
    }

    async fn create(conn: &mut SqliteConnection, desired: &Snapshot) {
        let driver = SqliteDriver::new();
        let planned = plan(&driver, &Snapshot::empty(), desired, &ResolveOptions::default()).unwrap();
        for statement in planned.statements() {
            conn.execute(&statement).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_introspection_round_trips_generated_schema() {
        let mut conn = SqliteConnection::open_in_memory().await.unwrap();
        create(&mut conn, &schema()).await;

        let live = SqliteDriver::new().introspect(&mut conn, &[]).await.unwrap();
        assert_eq!(live, schema());
    }

    #[tokio::test]
    async fn test_rebuild_keeps_rows_and_applies_change() {
        let mut conn = SqliteConnection::open_in_memory().await.unwrap();
        create(&mut conn, &schema()).await;
        conn.execute("INSERT INTO \"user\" (email, role) VALUES ('a@x', 'USER')")
            .await
            .unwrap();

        let current = SqliteDriver::new().introspect(&mut conn, &[]).await.unwrap();
        let mut desired = schema();
        desired.tables[0].columns[1] = ColumnDef::new("email", "text").nullable();

        let planned = plan(
            &SqliteDriver::new(),
            &current,
            &desired,
            &ResolveOptions::default(),
        )
        .unwrap();
        for statement in planned.statements() {
            conn.execute(&statement).await.unwrap();
        }

        let rows = conn.query("SELECT email FROM \"user\"").await.unwrap();
        assert_eq!(rows[0].get("email"), Some("a@x"));
        // The rebuilt table now sits after `post` in the catalog.
        let live = SqliteDriver::new().introspect(&mut conn, &[]).await.unwrap();
        assert_eq!(live.table("user"), desired.table("user"));
        assert_eq!(live.table("post"), desired.table("post"));
    }

    #[tokio::test]
    async fn test_tracking_table_excluded() {
        let mut conn = SqliteConnection::open_in_memory().await.unwrap();
        let driver = SqliteDriver::new();
        conn.execute(&driver.create_tracking_table("__sluice_migrations"))
            .await
            .unwrap();
        let live = driver
            .introspect(&mut conn, &["__sluice_migrations"])
            .await
            .unwrap();
        assert!(live.is_empty());
    }
}
