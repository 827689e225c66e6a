//! Execution context: connection, locking, transactions and tracking.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{MigrateConfig, validate_table_name};
use crate::connection::{Connection, Row};
use crate::driver::MigrationDriver;
use crate::error::{MigrateResult, MigrationError};
use crate::history::AppliedMigration;
use crate::snapshot::Snapshot;

/// Proof that the migration lock is held.
///
/// Only [`ExecutionContext::acquire_lock`] creates one and only
/// [`ExecutionContext::release_lock`] consumes it.
#[must_use = "the lock stays held until released"]
#[derive(Debug)]
pub struct LockGuard {
    lock_id: i64,
}

impl LockGuard {
    /// Lock id held.
    pub fn id(&self) -> i64 {
        self.lock_id
    }
}

/// Owns the live connection and everything that runs against it.
pub struct ExecutionContext<C, D> {
    conn: C,
    driver: D,
    tracking_table: String,
    lock_id: i64,
    tracking_ready: bool,
}

impl<C: Connection, D: MigrationDriver> ExecutionContext<C, D> {
    /// Create a context using the config's tracking table and lock id.
    pub fn new(conn: C, driver: D, config: &MigrateConfig) -> MigrateResult<Self> {
        validate_table_name(&config.tracking_table)?;
        Ok(Self {
            conn,
            driver,
            tracking_table: config.tracking_table.clone(),
            lock_id: config.lock_id,
            tracking_ready: false,
        })
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The connection.
    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Tracking table name.
    pub fn tracking_table(&self) -> &str {
        &self.tracking_table
    }

    /// Give back the connection and driver.
    pub fn into_parts(self) -> (C, D) {
        (self.conn, self.driver)
    }

    /// Execute one statement.
    pub async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        debug!(sql, "executing statement");
        self.conn.execute(sql).await
    }

    /// Execute statements in order, stopping at the first failure.
    pub async fn execute_all(&mut self, statements: &[String]) -> MigrateResult<()> {
        for statement in statements {
            self.execute(statement).await?;
        }
        Ok(())
    }

    /// Run a query.
    pub async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
        debug!(sql, "running query");
        self.conn.query(sql).await
    }

    /// Introspect the live schema, leaving out the tracking table.
    pub async fn introspect(&mut self) -> MigrateResult<Snapshot> {
        let exclude = [self.tracking_table.as_str()];
        let snapshot = self.driver.introspect(&mut self.conn, &exclude).await?;
        debug!(
            tables = snapshot.tables.len(),
            enums = snapshot.enums.len(),
            "introspected database"
        );
        Ok(snapshot)
    }

    /// Take the migration lock.
    ///
    /// Failure is reported as `MIGRATION_LOCK_FAILED` and never retried.
    pub async fn acquire_lock(&mut self) -> MigrateResult<LockGuard> {
        if let Some(sql) = self.driver.acquire_lock(self.lock_id) {
            self.conn
                .execute(&sql)
                .await
                .map_err(|e| MigrationError::lock_failed(e.to_string()))?;
        }
        debug!(lock_id = self.lock_id, "migration lock acquired");
        Ok(LockGuard {
            lock_id: self.lock_id,
        })
    }

    /// Release the migration lock. Failures are logged, not returned: the
    /// lock also ends with the session.
    pub async fn release_lock(&mut self, guard: LockGuard) {
        if let Some(sql) = self.driver.release_lock(guard.lock_id) {
            if let Err(e) = self.conn.execute(&sql).await {
                warn!(lock_id = guard.lock_id, error = %e, "failed to release migration lock");
                return;
            }
        }
        debug!(lock_id = guard.lock_id, "migration lock released");
    }

    /// Run `f` holding the lock, releasing it on every path.
    pub async fn with_lock<T>(
        &mut self,
        f: impl AsyncFnOnce(&mut Self) -> MigrateResult<T>,
    ) -> MigrateResult<T> {
        let guard = self.acquire_lock().await?;
        let result = f(self).await;
        self.release_lock(guard).await;
        result
    }

    /// Open a transaction.
    pub async fn begin(&mut self) -> MigrateResult<()> {
        let sql = self.driver.begin_transaction();
        self.execute(sql).await
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> MigrateResult<()> {
        let sql = self.driver.commit_transaction();
        self.execute(sql).await
    }

    /// Roll back the open transaction. A failed rollback is logged; the
    /// original error is what callers report.
    pub async fn rollback(&mut self) {
        let sql = self.driver.rollback_transaction();
        if let Err(e) = self.execute(sql).await {
            warn!(error = %e, "rollback failed");
        }
    }

    /// Run `f` inside a transaction, rolling back when it fails.
    pub async fn transaction<T>(
        &mut self,
        f: impl AsyncFnOnce(&mut Self) -> MigrateResult<T>,
    ) -> MigrateResult<T> {
        self.begin().await?;
        match f(self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    /// Create the tracking table on first use.
    pub async fn ensure_tracking_table(&mut self) -> MigrateResult<()> {
        if !self.tracking_ready {
            let sql = self.driver.create_tracking_table(&self.tracking_table);
            self.execute(&sql).await?;
            self.tracking_ready = true;
            info!(table = %self.tracking_table, "tracking table ready");
        }
        Ok(())
    }

    /// Rows of the tracking table.
    pub async fn applied_migrations(&mut self) -> MigrateResult<Vec<AppliedMigration>> {
        self.ensure_tracking_table().await?;
        let sql = self.driver.select_migrations(&self.tracking_table);
        self.query(&sql)
            .await?
            .iter()
            .map(AppliedMigration::from_row)
            .collect()
    }

    /// Record a migration as applied now.
    pub async fn record_applied(&mut self, name: &str, checksum: &str) -> MigrateResult<()> {
        let sql = self
            .driver
            .insert_migration(&self.tracking_table, name, checksum, &Utc::now());
        self.execute(&sql).await
    }

    /// Forget one applied migration.
    pub async fn forget(&mut self, name: &str) -> MigrateResult<()> {
        let sql = self.driver.delete_migration(&self.tracking_table, name);
        self.execute(&sql).await
    }

    /// Forget every applied migration.
    pub async fn clear_tracking(&mut self) -> MigrateResult<()> {
        self.ensure_tracking_table().await?;
        let sql = self.driver.clear_migrations(&self.tracking_table);
        self.execute(&sql).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_tracking_roundtrip() {
        let (conn, mut ctx) = context();
        ctx.record_applied("100_init", "abc").await.unwrap();
        ctx.record_applied("200_next", "def").await.unwrap();

        let applied = ctx.applied_migrations().await.unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].name, "100_init");

        ctx.forget("100_init").await.unwrap();
        assert_eq!(conn.tracked(), vec!["200_next"]);

        ctx.clear_tracking().await.unwrap();
        assert!(conn.tracked().is_empty());
        let creates = conn
            .log()
            .iter()
            .filter(|s| s.starts_with("CREATE_TRACKING"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let (conn, mut ctx) = context();
        let result: MigrateResult<()> = ctx
            .with_lock(async |ctx| {
                ctx.execute("WORK").await?;
                Err(MigrationError::database("boom"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(conn.log(), vec!["LOCK 42424242", "WORK", "UNLOCK 42424242"]);
    }

    #[tokio::test]
    async fn test_lock_failure_is_surfaced() {
        let (conn, mut ctx) = context();
        conn.db.lock().fail_lock = true;
        let err = ctx.acquire_lock().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LockFailed);
    }

    #[tokio::test]
    async fn test_release_failure_is_swallowed() {
        let (conn, mut ctx) = context();
        conn.db.lock().fail_unlock = true;
        let value = ctx.with_lock(async |_| Ok(7)).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back() {
        let (conn, mut ctx) = context();
        ctx.ensure_tracking_table().await.unwrap();
        let result: MigrateResult<()> = ctx
            .transaction(async |ctx| {
                ctx.record_applied("1_a", "x").await?;
                Err(MigrationError::database("boom"))
            })
            .await;

        assert!(result.is_err());
        assert!(conn.tracked().is_empty());
        assert_eq!(conn.log().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn test_rejects_bad_tracking_table() {
        let err = ExecutionContext::new(
            FakeConnection::new(),
            FakeDriver::new(Default::default()),
            &MigrateConfig::new().tracking_table("x; DROP"),
        )
        .err()
        .unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidTableName);
    }
}
