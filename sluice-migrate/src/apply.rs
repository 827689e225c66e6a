//! Apply pending migration files, and report where each one stands.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::driver::MigrationDriver;
use crate::error::{MigrateResult, MigrationError};
use crate::file::ParsedMigration;
use crate::history::AppliedMigration;
use crate::journal::{Journal, MigrationEntry};
use crate::storage::MigrationStorage;

/// Options for [`apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Stop after the entry with this index.
    pub to: Option<u32>,
}

impl ApplyOptions {
    /// Apply up to and including `idx`.
    pub fn to(idx: u32) -> Self {
        Self { to: Some(idx) }
    }
}

/// Outcome of [`apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    /// Entries applied by this call.
    pub applied: Vec<MigrationEntry>,
    /// Entries still pending afterwards.
    pub pending: Vec<MigrationEntry>,
}

/// Where one journal entry stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    /// Recorded in the tracking table with a matching checksum.
    Applied,
    /// Not yet recorded.
    Pending,
    /// File or tracking checksum disagrees with the journal, or the file is
    /// gone.
    Modified,
}

/// One row of a [`StatusReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// The journal entry.
    pub entry: MigrationEntry,
    /// Its state.
    pub state: MigrationState,
    /// When it was applied, if it was.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Result of [`status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Journal entries in order.
    pub migrations: Vec<MigrationStatus>,
    /// Tracking rows with no journal entry.
    pub orphaned: Vec<AppliedMigration>,
}

impl StatusReport {
    /// Entries in `state`.
    pub fn in_state(&self, state: MigrationState) -> impl Iterator<Item = &MigrationEntry> {
        self.migrations
            .iter()
            .filter(move |m| m.state == state)
            .map(|m| &m.entry)
    }
}

/// Apply every pending entry, one transaction each.
///
/// Checksums of applied entries and of every file about to run are verified
/// before anything executes. A failing entry is rolled back and stops the
/// run with `MIGRATION_APPLY_FAILED`.
pub async fn apply<C: Connection, D: MigrationDriver>(
    ctx: &mut ExecutionContext<C, D>,
    storage: &dyn MigrationStorage,
    options: &ApplyOptions,
) -> MigrateResult<ApplyResult> {
    let Some(journal) = read_journal(storage, ctx.driver().dialect()).await? else {
        info!("no journal, nothing to apply");
        return Ok(ApplyResult::default());
    };

    ctx.with_lock(async |ctx| {
        let rows = ctx.applied_migrations().await?;
        verify_applied(&journal, &rows)?;

        let applied_names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let (due, later): (Vec<_>, Vec<_>) = journal
            .entries
            .iter()
            .filter(|e| !applied_names.contains(&e.tracking_name().as_str()))
            .cloned()
            .partition(|e| options.to.is_none_or(|to| e.idx <= to));

        let files = load_verified(storage, &due).await?;

        let mut applied = Vec::with_capacity(due.len());
        for (position, (entry, file)) in due.iter().zip(&files).enumerate() {
            let result = ctx
                .transaction(async |ctx| {
                    ctx.execute_all(&file.statements).await?;
                    ctx.record_applied(&entry.tracking_name(), &entry.checksum)
                        .await
                })
                .await;

            if let Err(source) = result {
                warn!(migration = %entry.file_name(), error = %source, "migration failed");
                return Err(MigrationError::ApplyFailed {
                    name: entry.file_name(),
                    applied: applied.iter().map(MigrationEntry::file_name).collect(),
                    pending: due[position..]
                        .iter()
                        .chain(&later)
                        .map(MigrationEntry::file_name)
                        .collect(),
                    source: Box::new(source),
                });
            }
            info!(migration = %entry.file_name(), "migration applied");
            applied.push(entry.clone());
        }

        Ok(ApplyResult {
            applied,
            pending: later,
        })
    })
    .await
}

/// Every journal entry with its state, plus orphaned tracking rows.
///
/// Read-only and unlocked; the result may be stale by the time it returns.
pub async fn status<C: Connection, D: MigrationDriver>(
    ctx: &mut ExecutionContext<C, D>,
    storage: &dyn MigrationStorage,
) -> MigrateResult<StatusReport> {
    let journal = read_journal(storage, ctx.driver().dialect())
        .await?
        .unwrap_or_else(|| Journal::new(ctx.driver().dialect()));
    let rows = ctx.applied_migrations().await?;
    let by_name: HashMap<&str, &AppliedMigration> =
        rows.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut migrations = Vec::with_capacity(journal.entries.len());
    for entry in &journal.entries {
        let row = by_name.get(entry.tracking_name().as_str()).copied();
        let file_matches = match storage.read_migration(&entry.file_name()).await {
            Ok(content) => ParsedMigration::parse(&content)?.computed_checksum() == entry.checksum,
            Err(MigrationError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };

        let state = match row {
            _ if !file_matches => MigrationState::Modified,
            Some(row) if row.checksum != entry.checksum => MigrationState::Modified,
            Some(_) => MigrationState::Applied,
            None => MigrationState::Pending,
        };
        migrations.push(MigrationStatus {
            entry: entry.clone(),
            state,
            applied_at: row.map(|r| r.applied_at),
        });
    }

    let orphaned = rows
        .iter()
        .filter(|r| journal.by_tracking_name(&r.name).is_none())
        .cloned()
        .collect();

    Ok(StatusReport {
        migrations,
        orphaned,
    })
}

/// Journal entries with no tracking row.
pub async fn pending<C: Connection, D: MigrationDriver>(
    ctx: &mut ExecutionContext<C, D>,
    storage: &dyn MigrationStorage,
) -> MigrateResult<Vec<MigrationEntry>> {
    let Some(journal) = read_journal(storage, ctx.driver().dialect()).await? else {
        return Ok(Vec::new());
    };
    let rows = ctx.applied_migrations().await?;
    Ok(journal
        .entries
        .into_iter()
        .filter(|e| {
            let name = e.tracking_name();
            !rows.iter().any(|r| r.name == name)
        })
        .collect())
}

/// Read the journal and check it belongs to `dialect`.
pub(crate) async fn read_journal(
    storage: &dyn MigrationStorage,
    dialect: crate::dialect::Dialect,
) -> MigrateResult<Option<Journal>> {
    let Some(journal) = storage.read_journal().await? else {
        return Ok(None);
    };
    journal.check_dialect(dialect)?;
    journal.validate()?;
    Ok(Some(journal))
}

/// Fail when a tracking row's checksum disagrees with its journal entry.
pub(crate) fn verify_applied(journal: &Journal, rows: &[AppliedMigration]) -> MigrateResult<()> {
    for row in rows {
        let Some(entry) = journal.by_tracking_name(&row.name) else {
            debug!(name = %row.name, "tracking row has no journal entry");
            continue;
        };
        if row.checksum != entry.checksum {
            return Err(MigrationError::ChecksumMismatch {
                name: entry.file_name(),
                expected: entry.checksum.clone(),
                actual: row.checksum.clone(),
            });
        }
    }
    Ok(())
}

/// Read and parse the files of `entries`, failing on any that was edited.
pub(crate) async fn load_verified(
    storage: &dyn MigrationStorage,
    entries: &[MigrationEntry],
) -> MigrateResult<Vec<ParsedMigration>> {
    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        let content = storage.read_migration(&entry.file_name()).await?;
        let parsed = ParsedMigration::parse(&content)?;
        let actual = parsed.computed_checksum();
        if actual != entry.checksum {
            return Err(MigrationError::ChecksumMismatch {
                name: entry.file_name(),
                expected: entry.checksum.clone(),
                actual,
            });
        }
        files.push(parsed);
    }
    Ok(files)
}
