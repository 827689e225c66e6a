//! Squash: merge a contiguous range of journal entries into one.

use std::collections::HashSet;

use chrono::Utc;
use tracing::info;

use crate::apply::{load_verified, read_journal, verify_applied};
use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::driver::MigrationDriver;
use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationFile, ParsedMigration};
use crate::journal::{MigrationEntry, down_file_name, kebab_case};
use crate::storage::MigrationStorage;

/// Options for [`squash`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SquashOptions {
    /// First index of the range.
    pub from: u32,
    /// Last index of the range, inclusive.
    pub to: u32,
    /// Name of the merged migration; defaults to `squash-<from>-<to>`.
    pub name: Option<String>,
    /// Move the old files to the archive directory instead of leaving them.
    pub archive: bool,
}

impl SquashOptions {
    /// Squash `from..=to`.
    pub fn new(from: u32, to: u32) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    /// Name the merged migration.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Archive the old files.
    pub fn archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }
}

/// Outcome of [`squash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquashResult {
    /// The merged entry.
    pub entry: MigrationEntry,
    /// Number of entries merged.
    pub squashed_count: usize,
    /// Statements of the merged migration.
    pub sql: Vec<String>,
}

/// Merge entries `from..=to` into one entry at index `from`.
///
/// Tracking rows of an applied range are swapped for one row in a single
/// transaction; a partly applied range is refused. Later entries are
/// re-indexed and their files renamed. Old files are archived on request and
/// never deleted.
pub async fn squash<C: Connection, D: MigrationDriver>(
    ctx: &mut ExecutionContext<C, D>,
    storage: &dyn MigrationStorage,
    options: &SquashOptions,
) -> MigrateResult<SquashResult> {
    let mut journal = read_journal(storage, ctx.driver().dialect())
        .await?
        .ok_or_else(|| MigrationError::NotFound("migration journal".to_string()))?;

    if options.from >= options.to {
        return Err(MigrationError::invalid(format!(
            "squash range {}..{} must span at least two entries",
            options.from, options.to
        )));
    }
    if options.to as usize >= journal.entries.len() {
        return Err(MigrationError::NotFound(format!(
            "migration index {}",
            options.to
        )));
    }

    let from = options.from as usize;
    let to = options.to as usize;
    let range: Vec<MigrationEntry> = journal.entries[from..=to].to_vec();
    let files = load_verified(storage, &range).await?;

    let mut statements = Vec::new();
    for file in &files {
        statements.extend(file.statements.iter().cloned());
    }
    let down = merged_down(storage, &range, &files).await?;

    let now = Utc::now();
    let name = kebab_case(
        options
            .name
            .as_deref()
            .unwrap_or(&format!("squash-{}-{}", options.from, options.to)),
    );
    let mut file = MigrationFile::new(name.clone(), statements).with_down(down);
    file.generated_at = now;

    let entry = MigrationEntry {
        idx: options.from,
        version: range[range.len() - 1].version.clone(),
        name,
        created_at: now,
        checksum: file.checksum(),
        tag: None,
    };

    let shift = options.to - options.from;
    let later: Vec<(String, MigrationEntry)> = journal.entries[to + 1..]
        .iter()
        .map(|e| {
            let mut moved = e.clone();
            moved.idx -= shift;
            (e.file_name(), moved)
        })
        .collect();

    if options.archive {
        for old in &range {
            storage.check_archivable(&old.file_name()).await?;
        }
    } else {
        check_collisions(&range, &entry, &later)?;
    }

    ctx.with_lock(async |ctx| {
        let rows = ctx.applied_migrations().await?;
        verify_applied(&journal, &rows)?;

        let applied = range
            .iter()
            .filter(|e| {
                let name = e.tracking_name();
                rows.iter().any(|r| r.name == name)
            })
            .count();

        if applied == 0 {
            return Ok(());
        }
        if applied != range.len() {
            return Err(MigrationError::invalid(format!(
                "cannot squash a partly applied range ({} of {} applied)",
                applied,
                range.len()
            )));
        }

        ctx.transaction(async |ctx| {
            for old in &range {
                ctx.forget(&old.tracking_name()).await?;
            }
            ctx.record_applied(&entry.tracking_name(), &entry.checksum)
                .await
        })
        .await
    })
    .await?;

    if options.archive {
        for old in &range {
            storage.archive_migration(&old.file_name()).await?;
        }
    }
    storage
        .write_migration(&entry.file_name(), &file.render())
        .await?;
    for (old_file, moved) in &later {
        storage
            .rename_migration(old_file, &moved.file_name())
            .await?;
    }

    journal.entries.truncate(from);
    journal.entries.push(entry.clone());
    journal.entries.extend(later.into_iter().map(|(_, moved)| moved));
    storage.write_journal(&journal).await?;

    info!(
        file = %entry.file_name(),
        squashed = range.len(),
        archived = options.archive,
        "migrations squashed"
    );
    Ok(SquashResult {
        entry,
        squashed_count: range.len(),
        sql: file.statements,
    })
}

/// Combined down statements, newest entry first. Empty unless every entry in
/// the range can be reversed.
async fn merged_down(
    storage: &dyn MigrationStorage,
    range: &[MigrationEntry],
    files: &[ParsedMigration],
) -> MigrateResult<Vec<String>> {
    let mut merged = Vec::new();
    for (entry, file) in range.iter().zip(files).rev() {
        let down = match storage.read_down_migration(&entry.file_name()).await? {
            Some(content) => ParsedMigration::parse(&content)?.statements,
            None => file.down_statements.clone(),
        };
        if down.is_empty() {
            return Ok(Vec::new());
        }
        merged.extend(down);
    }
    Ok(merged)
}

/// Refuse when a file left in place would be overwritten by the merged file
/// or a renamed later file.
fn check_collisions(
    range: &[MigrationEntry],
    entry: &MigrationEntry,
    later: &[(String, MigrationEntry)],
) -> MigrateResult<()> {
    let left_in_place: HashSet<String> = range
        .iter()
        .flat_map(|e| [e.file_name(), e.down_file_name()])
        .collect();

    let targets = std::iter::once(entry.file_name())
        .chain(later.iter().map(|(_, e)| e.file_name()))
        .flat_map(|f| {
            let down = down_file_name(&f);
            [f, down]
        });
    for target in targets {
        if left_in_place.contains(&target) {
            return Err(MigrationError::invalid(format!(
                "squash would overwrite '{}'; archive the squashed files instead",
                target
            )));
        }
    }
    Ok(())
}
