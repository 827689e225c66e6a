//! Down: roll back the most recently applied migrations.

use tracing::{info, warn};

use crate::apply::{load_verified, read_journal, verify_applied};
use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::driver::MigrationDriver;
use crate::error::{MigrateResult, MigrationError};
use crate::file::ParsedMigration;
use crate::journal::MigrationEntry;
use crate::storage::MigrationStorage;

/// Which applied migrations to roll back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownTarget {
    /// The last `n` applied.
    Count(usize),
    /// Everything applied after this entry (index, file name or name). The
    /// entry itself stays applied.
    To(String),
}

impl Default for DownTarget {
    fn default() -> Self {
        Self::Count(1)
    }
}

/// Outcome of [`down`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownResult {
    /// Entries rolled back, most recent first.
    pub rolled_back: Vec<MigrationEntry>,
}

/// Roll back applied migrations in reverse journal order, in one
/// transaction.
///
/// Every selected up file is checked against its journal checksum first.
/// Reversal SQL comes from the down file, else from the up file's inline
/// down section. An entry with neither is forgotten without running
/// anything.
pub async fn down<C: Connection, D: MigrationDriver>(
    ctx: &mut ExecutionContext<C, D>,
    storage: &dyn MigrationStorage,
    target: &DownTarget,
) -> MigrateResult<DownResult> {
    let Some(journal) = read_journal(storage, ctx.driver().dialect()).await? else {
        return Ok(DownResult::default());
    };

    ctx.with_lock(async |ctx| {
        let rows = ctx.applied_migrations().await?;
        verify_applied(&journal, &rows)?;

        let applied: Vec<&MigrationEntry> = journal
            .entries
            .iter()
            .filter(|e| {
                let name = e.tracking_name();
                rows.iter().any(|r| r.name == name)
            })
            .collect();

        let selected: Vec<MigrationEntry> = match target {
            DownTarget::Count(n) => applied.iter().rev().take(*n).map(|e| (*e).clone()).collect(),
            DownTarget::To(target) => {
                let keep = journal
                    .find(target)
                    .ok_or_else(|| MigrationError::NotFound(target.clone()))?;
                applied
                    .iter()
                    .rev()
                    .filter(|e| e.idx > keep.idx)
                    .map(|e| (*e).clone())
                    .collect()
            }
        };

        if selected.is_empty() {
            info!("nothing to roll back");
            return Ok(DownResult::default());
        }

        let files = load_verified(storage, &selected).await?;
        let mut reversals = Vec::with_capacity(selected.len());
        for (entry, file) in selected.iter().zip(files) {
            reversals.push(down_statements(storage, entry, file).await?);
        }

        ctx.transaction(async |ctx| {
            for (entry, statements) in selected.iter().zip(&reversals) {
                if statements.is_empty() {
                    warn!(migration = %entry.file_name(), "no down SQL, forgetting tracking row only");
                }
                ctx.execute_all(statements).await?;
                ctx.forget(&entry.tracking_name()).await?;
            }
            Ok(())
        })
        .await?;

        info!(count = selected.len(), "migrations rolled back");
        Ok(DownResult {
            rolled_back: selected,
        })
    })
    .await
}

/// Down file statements, else the verified up file's inline section.
async fn down_statements(
    storage: &dyn MigrationStorage,
    entry: &MigrationEntry,
    up: ParsedMigration,
) -> MigrateResult<Vec<String>> {
    match storage.read_down_migration(&entry.file_name()).await? {
        Some(content) => Ok(ParsedMigration::parse(&content)?.statements),
        None => Ok(up.down_statements),
    }
}
