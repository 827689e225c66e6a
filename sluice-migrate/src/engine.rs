//! The migration engine: one connection, one driver, optional file storage.

use std::time::Instant;

use tracing::info;

use crate::apply::{self, ApplyOptions, ApplyResult, StatusReport};
use crate::config::MigrateConfig;
use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::down::{self, DownResult, DownTarget};
use crate::driver::MigrationDriver;
use crate::error::{MigrateResult, MigrationError};
use crate::generate::{self, GenerateOptions, GenerateResult};
use crate::journal::{Journal, MigrationEntry};
use crate::push::{self, PushOptions, PushResult};
use crate::reset::{self, ResetResult};
use crate::resolve::{ResolutionPolicy, ResolveOptions};
use crate::snapshot::Snapshot;
use crate::squash::{self, SquashOptions, SquashResult};
use crate::storage::{FsStorage, MigrationStorage};

/// Entry point for every workflow.
///
/// Push works against the live database alone. Generate, apply, status,
/// down, reset and squash need storage, configured through
/// `migrations_dir` or [`MigrationEngine::with_storage`].
pub struct MigrationEngine<C, D> {
    ctx: ExecutionContext<C, D>,
    storage: Option<Box<dyn MigrationStorage>>,
    config: MigrateConfig,
}

impl<C: Connection, D: MigrationDriver> MigrationEngine<C, D> {
    /// Create an engine.
    ///
    /// Fails when the config is invalid or names a dialect other than the
    /// driver's.
    pub fn new(conn: C, driver: D, config: MigrateConfig) -> MigrateResult<Self> {
        config.validate()?;
        if let Some(dialect) = config.dialect {
            if dialect != driver.dialect() {
                return Err(MigrationError::DialectMismatch {
                    expected: dialect.to_string(),
                    actual: driver.dialect().to_string(),
                });
            }
        }

        let storage = match &config.migrations_dir {
            Some(dir) => {
                let mut fs = FsStorage::new(dir)?;
                if let Some(archive) = &config.archive_dir {
                    fs = fs.with_archive_dir(archive)?;
                }
                Some(Box::new(fs) as Box<dyn MigrationStorage>)
            }
            None => None,
        };

        let ctx = ExecutionContext::new(conn, driver, &config)?;
        Ok(Self {
            ctx,
            storage,
            config,
        })
    }

    /// Use `storage` for the file-based workflow.
    pub fn with_storage(mut self, storage: impl MigrationStorage + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    /// The configuration.
    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// The execution context.
    pub fn context(&mut self) -> &mut ExecutionContext<C, D> {
        &mut self.ctx
    }

    /// The configured storage, if any.
    pub fn storage(&self) -> Option<&dyn MigrationStorage> {
        self.storage.as_deref()
    }

    /// Resolution options using the configured policy.
    pub fn resolve_options(&self) -> ResolveOptions<'static> {
        ResolveOptions::new(self.policy())
    }

    /// Policy used when callers do not pick one.
    pub fn policy(&self) -> ResolutionPolicy {
        self.config.default_policy()
    }

    /// Give back the connection and driver.
    pub fn into_parts(self) -> (C, D) {
        self.ctx.into_parts()
    }

    /// Introspect the live schema.
    pub async fn introspect(&mut self) -> MigrateResult<Snapshot> {
        self.ctx.introspect().await
    }

    /// Bring the database to `desired` directly.
    pub async fn push(
        &mut self,
        desired: &Snapshot,
        options: &PushOptions<'_>,
    ) -> MigrateResult<PushResult> {
        let start = Instant::now();
        let mut options = *options;
        options.resolve = options.resolve.or_policy(self.policy());
        let result = push::push(&mut self.ctx, self.storage.as_deref(), desired, &options).await?;
        info!(
            applied = result.applied,
            operations = result.operations.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "push finished"
        );
        Ok(result)
    }

    /// Write the next migration file.
    pub async fn generate(
        &mut self,
        desired: &Snapshot,
        options: &GenerateOptions<'_>,
    ) -> MigrateResult<GenerateResult> {
        let storage = required(&self.storage, "generate")?;
        let mut options = options.clone();
        options.resolve = options.resolve.or_policy(self.policy());
        generate::generate(self.ctx.driver(), storage, desired, &options).await
    }

    /// Generate without writing anything.
    pub async fn preview(
        &mut self,
        desired: &Snapshot,
        options: &GenerateOptions<'_>,
    ) -> MigrateResult<GenerateResult> {
        let options = options.clone().dry_run(true);
        self.generate(desired, &options).await
    }

    /// Apply pending migrations.
    pub async fn apply(&mut self, options: &ApplyOptions) -> MigrateResult<ApplyResult> {
        let storage = required(&self.storage, "apply")?;
        let start = Instant::now();
        let result = apply::apply(&mut self.ctx, storage, options).await?;
        info!(
            applied = result.applied.len(),
            pending = result.pending.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "apply finished"
        );
        Ok(result)
    }

    /// State of every migration.
    pub async fn status(&mut self) -> MigrateResult<StatusReport> {
        let storage = required(&self.storage, "status")?;
        apply::status(&mut self.ctx, storage).await
    }

    /// Migrations not applied yet.
    pub async fn pending(&mut self) -> MigrateResult<Vec<MigrationEntry>> {
        let storage = required(&self.storage, "pending")?;
        apply::pending(&mut self.ctx, storage).await
    }

    /// Roll back applied migrations.
    pub async fn down(&mut self, target: &DownTarget) -> MigrateResult<DownResult> {
        let storage = required(&self.storage, "down")?;
        down::down(&mut self.ctx, storage, target).await
    }

    /// Drop everything and replay the journal.
    pub async fn reset(&mut self) -> MigrateResult<ResetResult> {
        let storage = required(&self.storage, "reset")?;
        let start = Instant::now();
        let result = reset::reset(&mut self.ctx, storage).await?;
        info!(
            dropped = result.dropped.len(),
            applied = result.applied.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "reset finished"
        );
        Ok(result)
    }

    /// Merge a range of migrations.
    pub async fn squash(&mut self, options: &SquashOptions) -> MigrateResult<SquashResult> {
        let storage = required(&self.storage, "squash")?;
        squash::squash(&mut self.ctx, storage, options).await
    }

    /// The stored journal.
    pub async fn journal(&self) -> MigrateResult<Option<Journal>> {
        required(&self.storage, "journal")?.read_journal().await
    }

    /// The stored snapshot.
    pub async fn snapshot(&self) -> MigrateResult<Option<Snapshot>> {
        required(&self.storage, "snapshot")?.read_snapshot().await
    }
}

fn required<'a>(
    storage: &'a Option<Box<dyn MigrationStorage>>,
    operation: &'static str,
) -> MigrateResult<&'a dyn MigrationStorage> {
    storage
        .as_deref()
        .ok_or(MigrationError::StorageRequired(operation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{FakeConnection, FakeDriver};
    use crate::dialect::Dialect;
    use crate::error::ErrorCode;
    use crate::snapshot::{ColumnDef, EnumDef, TableDef};
    use crate::storage::MemoryStorage;

    fn engine(config: MigrateConfig) -> MigrateResult<MigrationEngine<FakeConnection, FakeDriver>> {
        let conn = FakeConnection::new();
        let driver = FakeDriver::new(conn.db.clone());
        MigrationEngine::new(conn, driver, config)
    }

    fn posts() -> Snapshot {
        Snapshot::empty().with_table(TableDef::new("post").column(ColumnDef::new("id", "integer")))
    }

    #[tokio::test]
    async fn test_file_workflow_requires_storage() {
        let mut engine = engine(MigrateConfig::new()).unwrap();
        let err = engine.apply(&ApplyOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageRequired);
        assert!(engine.journal().await.is_err());

        let pushed = engine.push(&posts(), &PushOptions::default()).await.unwrap();
        assert!(pushed.applied);
    }

    #[test]
    fn test_dialect_must_match_driver() {
        let err = engine(MigrateConfig::new().dialect(Dialect::Sqlite))
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::DialectMismatch);
        assert!(engine(MigrateConfig::new().dialect(Dialect::Postgres)).is_ok());
    }

    #[test]
    fn test_invalid_dir_rejected() {
        let err = engine(MigrateConfig::new().migrations_dir("../outside"))
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidMigrationsDir);
    }

    #[test]
    fn test_strict_config_policy() {
        let engine = engine(MigrateConfig::new().strict(true)).unwrap();
        assert_eq!(engine.resolve_options().policy(), ResolutionPolicy::Strict);
    }

    fn tasks(values: &[&str]) -> Snapshot {
        Snapshot::empty()
            .with_enum(EnumDef::new("Status", values.iter().copied()))
            .with_table(
                TableDef::new("task")
                    .column(ColumnDef::new("id", "integer"))
                    .column(ColumnDef::new("status", "Status").nullable()),
            )
    }

    #[tokio::test]
    async fn test_strict_config_applies_to_push() {
        let mut engine = engine(MigrateConfig::new().strict(true)).unwrap();
        engine.context().connection().db.lock().schema = tasks(&["PENDING", "DONE"]);

        let err = engine
            .push(&tasks(&["DONE"]), &PushOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DestructiveRejected);
        assert!(!engine.context().connection().log().iter().any(|s| s.contains("Status")));

        let standard = PushOptions::new(ResolveOptions::new(ResolutionPolicy::Standard));
        assert!(engine.push(&tasks(&["DONE"]), &standard).await.unwrap().applied);
    }

    #[tokio::test]
    async fn test_strict_config_applies_to_generate() {
        let mut strict = engine(MigrateConfig::new().strict(true))
            .unwrap()
            .with_storage(MemoryStorage::new());
        strict
            .generate(&tasks(&["PENDING", "DONE"]), &GenerateOptions::new("init"))
            .await
            .unwrap();

        let err = strict
            .generate(&tasks(&["DONE"]), &GenerateOptions::new("drop-pending"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DestructiveRejected);
        assert_eq!(strict.journal().await.unwrap().unwrap().entries.len(), 1);

        let mut lenient = engine(MigrateConfig::new())
            .unwrap()
            .with_storage(MemoryStorage::new());
        lenient
            .generate(&tasks(&["PENDING", "DONE"]), &GenerateOptions::new("init"))
            .await
            .unwrap();
        let generated = lenient
            .generate(&tasks(&["DONE"]), &GenerateOptions::new("drop-pending"))
            .await
            .unwrap();
        assert!(generated.written);
    }

    #[tokio::test]
    async fn test_generate_preview_apply() {
        let mut engine = engine(MigrateConfig::new())
            .unwrap()
            .with_storage(MemoryStorage::new());

        let preview = engine
            .preview(&posts(), &GenerateOptions::new("init"))
            .await
            .unwrap();
        assert!(!preview.written);
        assert!(engine.journal().await.unwrap().is_none());

        let generated = engine
            .generate(&posts(), &GenerateOptions::new("init"))
            .await
            .unwrap();
        assert!(generated.written);
        assert_eq!(engine.pending().await.unwrap().len(), 1);

        let applied = engine.apply(&ApplyOptions::default()).await.unwrap();
        assert_eq!(applied.applied.len(), 1);
        assert!(engine.pending().await.unwrap().is_empty());
        assert_eq!(engine.snapshot().await.unwrap(), Some(posts()));
    }
}
