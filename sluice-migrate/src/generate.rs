//! Generate: write the next migration file from the difference between the
//! stored snapshot and the desired one.

use chrono::Utc;
use tracing::info;

use crate::driver::MigrationDriver;
use crate::error::MigrateResult;
use crate::file::MigrationFile;
use crate::journal::{Journal, MigrationEntry, kebab_case};
use crate::operation::Operation;
use crate::plan::plan;
use crate::resolve::{Decision, ResolveOptions};
use crate::snapshot::Snapshot;
use crate::storage::MigrationStorage;

/// Options for [`generate`].
#[derive(Clone, Default)]
pub struct GenerateOptions<'a> {
    /// Free-form migration name, kebab-cased for the file.
    pub name: String,
    /// How changes needing a decision are settled.
    pub resolve: ResolveOptions<'a>,
    /// Preview: compute everything, write nothing.
    pub dry_run: bool,
    /// Optional tag stored in the journal.
    pub tag: Option<String>,
}

impl<'a> GenerateOptions<'a> {
    /// Options for a migration called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Resolve with `resolve`.
    pub fn resolve(mut self, resolve: ResolveOptions<'a>) -> Self {
        self.resolve = resolve;
        self
    }

    /// Preview only.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Tag the journal entry.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Outcome of [`generate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateResult {
    /// The new entry; `None` when the schema is unchanged.
    pub entry: Option<MigrationEntry>,
    /// Statements of the migration.
    pub sql: Vec<String>,
    /// Operations in execution order.
    pub operations: Vec<Operation>,
    /// Whether the file, journal and snapshot were written.
    pub written: bool,
    /// Decisions taken while resolving.
    pub decisions: Vec<Decision>,
}

/// Generate the next migration.
///
/// The stored snapshot, not the live database, is the baseline. Writes go
/// file first, then journal, then snapshot.
pub async fn generate<D: MigrationDriver + ?Sized>(
    driver: &D,
    storage: &dyn MigrationStorage,
    desired: &Snapshot,
    options: &GenerateOptions<'_>,
) -> MigrateResult<GenerateResult> {
    let mut journal = storage
        .read_journal()
        .await?
        .unwrap_or_else(|| Journal::new(driver.dialect()));
    journal.check_dialect(driver.dialect())?;
    journal.validate()?;

    let baseline = storage.read_snapshot().await?.unwrap_or_default();
    let resolve = options.resolve.dry_run(options.dry_run);
    let plan = plan(driver, &baseline, desired, &resolve)?;

    if plan.is_empty() {
        info!("no schema changes, nothing to generate");
        return Ok(GenerateResult {
            decisions: plan.decisions,
            ..GenerateResult::default()
        });
    }

    let now = Utc::now();
    let name = kebab_case(&options.name);
    let mut file = MigrationFile::new(name.clone(), plan.statements());
    file.generated_at = now;

    let entry = MigrationEntry {
        idx: journal.next_index(),
        version: journal.next_version(now),
        name,
        created_at: now,
        checksum: file.checksum(),
        tag: options.tag.clone(),
    };

    let written = !options.dry_run;
    if written {
        storage
            .write_migration(&entry.file_name(), &file.render())
            .await?;
        journal.entries.push(entry.clone());
        storage.write_journal(&journal).await?;
        storage.write_snapshot(desired).await?;
        info!(file = %entry.file_name(), statements = file.statements.len(), "migration generated");
    } else {
        info!(file = %entry.file_name(), statements = file.statements.len(), "migration preview");
    }

    Ok(GenerateResult {
        entry: Some(entry),
        sql: file.statements,
        operations: plan.operations(),
        written,
        decisions: plan.decisions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::FakeDriver;
    use crate::dialect::Dialect;
    use crate::error::ErrorCode;
    use crate::file::ParsedMigration;
    use crate::snapshot::{ColumnDef, TableDef};
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn driver() -> FakeDriver {
        FakeDriver::new(Default::default())
    }

    fn posts() -> Snapshot {
        Snapshot::empty().with_table(TableDef::new("post").column(ColumnDef::new("id", "integer")))
    }

    #[tokio::test]
    async fn test_generate_writes_file_journal_snapshot() {
        let storage = MemoryStorage::new();
        let result = generate(&driver(), &storage, &posts(), &GenerateOptions::new("Add posts"))
            .await
            .unwrap();

        let entry = result.entry.unwrap();
        assert!(result.written);
        assert_eq!(entry.file_name(), "0000_add-posts.sql");
        assert_eq!(storage.file_names(), vec!["0000_add-posts.sql"]);

        let content = storage.read_migration("0000_add-posts.sql").await.unwrap();
        let parsed = ParsedMigration::parse(&content).unwrap();
        assert_eq!(parsed.computed_checksum(), entry.checksum);
        assert_eq!(parsed.statements, vec!["create table post"]);

        let journal = storage.read_journal().await.unwrap().unwrap();
        assert_eq!(journal.entries, vec![entry]);
        assert_eq!(storage.read_snapshot().await.unwrap(), Some(posts()));
    }

    #[tokio::test]
    async fn test_snapshot_is_the_baseline() {
        let storage = MemoryStorage::new();
        generate(&driver(), &storage, &posts(), &GenerateOptions::new("init"))
            .await
            .unwrap();

        let again = generate(&driver(), &storage, &posts(), &GenerateOptions::new("noop"))
            .await
            .unwrap();
        assert!(again.entry.is_none());
        assert!(!again.written);

        let desired = Snapshot::empty().with_table(
            TableDef::new("post")
                .column(ColumnDef::new("id", "integer"))
                .column(ColumnDef::new("title", "text").nullable()),
        );
        let next = generate(&driver(), &storage, &desired, &GenerateOptions::new("title"))
            .await
            .unwrap();
        let entry = next.entry.unwrap();
        assert_eq!(entry.idx, 1);
        assert_eq!(next.sql, vec!["add column post.title"]);
    }

    #[tokio::test]
    async fn test_preview_writes_nothing() {
        let storage = MemoryStorage::new();
        let result = generate(
            &driver(),
            &storage,
            &posts(),
            &GenerateOptions::new("init").dry_run(true).tag("v1"),
        )
        .await
        .unwrap();

        assert!(!result.written);
        assert_eq!(result.entry.unwrap().tag.as_deref(), Some("v1"));
        assert!(storage.file_names().is_empty());
        assert!(storage.read_journal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dialect_mismatch() {
        let storage = MemoryStorage::new();
        storage.write_journal(&Journal::new(Dialect::Sqlite)).await.unwrap();
        let err = generate(&driver(), &storage, &posts(), &GenerateOptions::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DialectMismatch);
    }
}
