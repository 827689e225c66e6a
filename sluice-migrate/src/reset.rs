//! Reset: drop everything and replay the journal from scratch.

use tracing::{info, warn};

use crate::apply::{load_verified, read_journal};
use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::driver::MigrationDriver;
use crate::error::MigrateResult;
use crate::journal::MigrationEntry;
use crate::plan::drop_all;
use crate::storage::MigrationStorage;

/// Outcome of [`reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetResult {
    /// Tables and enums dropped, in drop order.
    pub dropped: Vec<String>,
    /// Entries replayed.
    pub applied: Vec<MigrationEntry>,
}

/// Drop every live table and enum, clear tracking, and replay every journal
/// entry, all in one transaction.
///
/// Every file is verified before anything runs. Tables are dropped in
/// reverse declaration order, which does not untangle circular foreign
/// keys.
pub async fn reset<C: Connection, D: MigrationDriver>(
    ctx: &mut ExecutionContext<C, D>,
    storage: &dyn MigrationStorage,
) -> MigrateResult<ResetResult> {
    let entries = read_journal(storage, ctx.driver().dialect())
        .await?
        .map(|j| j.entries)
        .unwrap_or_default();
    let files = load_verified(storage, &entries).await?;

    ctx.with_lock(async |ctx| {
        let current = ctx.introspect().await?;
        let (dropped, drops) = drop_all(ctx.driver(), &current)?;
        warn!(count = dropped.len(), "reset: dropping all tables and enums");

        ctx.ensure_tracking_table().await?;
        ctx.transaction(async |ctx| {
            ctx.execute_all(&drops).await?;
            ctx.clear_tracking().await?;
            for (entry, file) in entries.iter().zip(&files) {
                ctx.execute_all(&file.statements).await?;
                ctx.record_applied(&entry.tracking_name(), &entry.checksum)
                    .await?;
            }
            Ok(())
        })
        .await?;

        info!(
            dropped = dropped.len(),
            replayed = entries.len(),
            "database reset"
        );
        Ok(ResetResult {
            dropped,
            applied: entries.clone(),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::fixtures::seed;
    use crate::context::testing::context;
    use crate::error::ErrorCode;
    use crate::snapshot::{Snapshot, TableDef};
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_reset_drops_and_replays() {
        let (conn, mut ctx) = context();
        conn.db.lock().schema = Snapshot::empty()
            .with_table(TableDef::new("user"))
            .with_table(TableDef::new("post"));
        let storage = MemoryStorage::new();
        seed(&storage, &[("a", &["UP A"], &[]), ("b", &["UP B"], &[])]).await;
        ctx.ensure_tracking_table().await.unwrap();
        ctx.record_applied("1_stale", "x").await.unwrap();

        let result = reset(&mut ctx, &storage).await.unwrap();
        assert_eq!(result.dropped, vec!["post", "user"]);
        assert_eq!(result.applied.len(), 2);
        assert_eq!(conn.tracked().len(), 2);

        let log = conn.log();
        let begin = log.iter().position(|s| s == "BEGIN").unwrap();
        assert_eq!(
            &log[begin..begin + 4],
            &["BEGIN", "drop table post", "drop table user", "UNTRACK_ALL"]
        );
        assert_eq!(log[log.len() - 2], "COMMIT");
    }

    #[tokio::test]
    async fn test_failure_leaves_database_untouched() {
        let (conn, mut ctx) = context();
        let storage = MemoryStorage::new();
        seed(&storage, &[("a", &["UP A"], &[]), ("b", &["BROKEN"], &[])]).await;
        ctx.ensure_tracking_table().await.unwrap();
        ctx.record_applied("1_old", "x").await.unwrap();
        conn.db.lock().fail_on = Some("BROKEN".to_string());

        let err = reset(&mut ctx, &storage).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Database);
        assert_eq!(conn.tracked(), vec!["1_old"]);
        assert!(conn.log().iter().any(|s| s == "ROLLBACK"));
    }

    #[tokio::test]
    async fn test_edited_file_is_refused_up_front() {
        let (conn, mut ctx) = context();
        let storage = MemoryStorage::new();
        seed(&storage, &[("a", &["UP A"], &[])]).await;
        let content = storage.read_migration("0000_a.sql").await.unwrap();
        storage
            .write_migration("0000_a.sql", &content.replace("UP A", "UP Z"))
            .await
            .unwrap();

        let err = reset(&mut ctx, &storage).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChecksumMismatch);
        assert!(conn.log().is_empty());
    }
}
