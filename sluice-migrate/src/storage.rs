//! Storage for migration files, the journal and the last snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::validate_dir;
use crate::error::{MigrateResult, MigrationError};
use crate::journal::{JOURNAL_FILE, Journal, SNAPSHOT_FILE, down_file_name};
use crate::snapshot::Snapshot;

/// Key/value storage behind the file-based workflow.
#[async_trait]
pub trait MigrationStorage: Send + Sync {
    /// Read the journal, `None` when none was written yet.
    async fn read_journal(&self) -> MigrateResult<Option<Journal>>;

    /// Replace the journal.
    async fn write_journal(&self, journal: &Journal) -> MigrateResult<()>;

    /// Read the snapshot of the last generated migration.
    async fn read_snapshot(&self) -> MigrateResult<Option<Snapshot>>;

    /// Replace the snapshot.
    async fn write_snapshot(&self, snapshot: &Snapshot) -> MigrateResult<()>;

    /// Read a migration file. Missing files are `MIGRATION_NOT_FOUND`.
    async fn read_migration(&self, file_name: &str) -> MigrateResult<String>;

    /// Write a migration file.
    async fn write_migration(&self, file_name: &str, content: &str) -> MigrateResult<()>;

    /// Read the down file belonging to an up file, if any.
    async fn read_down_migration(&self, file_name: &str) -> MigrateResult<Option<String>>;

    /// Fail when archiving `file_name` would replace an archived file.
    async fn check_archivable(&self, file_name: &str) -> MigrateResult<()>;

    /// Move a migration file (and its down file) out of the active set.
    /// An archived file of the same name is never replaced.
    async fn archive_migration(&self, file_name: &str) -> MigrateResult<()>;

    /// Rename a migration file (and its down file).
    async fn rename_migration(&self, from: &str, to: &str) -> MigrateResult<()>;

    /// Forget the journal and snapshot. Migration files are kept.
    async fn clear_state(&self) -> MigrateResult<()>;
}

/// Filesystem storage rooted at a migrations directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    migrations_dir: PathBuf,
    archive_dir: PathBuf,
}

impl FsStorage {
    /// Storage in `migrations_dir`, archiving into `migrations_dir/archive`.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> MigrateResult<Self> {
        let migrations_dir = migrations_dir.into();
        validate_dir(&migrations_dir)?;
        let archive_dir = migrations_dir.join("archive");
        Ok(Self {
            migrations_dir,
            archive_dir,
        })
    }

    /// Archive into another directory.
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> MigrateResult<Self> {
        let dir = dir.into();
        validate_dir(&dir)?;
        self.archive_dir = dir;
        Ok(self)
    }

    /// The migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// The archive directory.
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Ensure the migrations directory exists.
    pub async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.migrations_dir).await?;
        Ok(())
    }

    fn path(&self, file_name: &str) -> MigrateResult<PathBuf> {
        let plain = Path::new(file_name)
            .file_name()
            .is_some_and(|n| n == file_name);
        if !plain {
            return Err(MigrationError::invalid(format!(
                "'{}' is not a plain file name",
                file_name
            )));
        }
        Ok(self.migrations_dir.join(file_name))
    }

    async fn read_optional(&self, path: &Path) -> MigrateResult<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_optional(&self, path: &Path) -> MigrateResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn move_if_exists(&self, from: &Path, to: &Path) -> MigrateResult<bool> {
        if tokio::fs::try_exists(from).await? {
            tokio::fs::rename(from, to).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl MigrationStorage for FsStorage {
    async fn read_journal(&self) -> MigrateResult<Option<Journal>> {
        let path = self.migrations_dir.join(JOURNAL_FILE);
        match self.read_optional(&path).await? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    async fn write_journal(&self, journal: &Journal) -> MigrateResult<()> {
        self.ensure_dir().await?;
        let content = serde_json::to_string_pretty(journal)?;
        tokio::fs::write(self.migrations_dir.join(JOURNAL_FILE), content).await?;
        Ok(())
    }

    async fn read_snapshot(&self) -> MigrateResult<Option<Snapshot>> {
        let path = self.migrations_dir.join(SNAPSHOT_FILE);
        match self.read_optional(&path).await? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> MigrateResult<()> {
        self.ensure_dir().await?;
        let content = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(self.migrations_dir.join(SNAPSHOT_FILE), content).await?;
        Ok(())
    }

    async fn read_migration(&self, file_name: &str) -> MigrateResult<String> {
        let path = self.path(file_name)?;
        self.read_optional(&path)
            .await?
            .ok_or_else(|| MigrationError::NotFound(file_name.to_string()))
    }

    async fn write_migration(&self, file_name: &str, content: &str) -> MigrateResult<()> {
        let path = self.path(file_name)?;
        self.ensure_dir().await?;
        tokio::fs::write(&path, content).await?;
        debug!(path = %path.display(), "wrote migration file");
        Ok(())
    }

    async fn read_down_migration(&self, file_name: &str) -> MigrateResult<Option<String>> {
        let path = self.path(&down_file_name(file_name))?;
        self.read_optional(&path).await
    }

    async fn check_archivable(&self, file_name: &str) -> MigrateResult<()> {
        for name in [file_name.to_string(), down_file_name(file_name)] {
            self.path(&name)?;
            if tokio::fs::try_exists(self.archive_dir.join(&name)).await? {
                return Err(archived_already(&name));
            }
        }
        Ok(())
    }

    async fn archive_migration(&self, file_name: &str) -> MigrateResult<()> {
        self.check_archivable(file_name).await?;
        tokio::fs::create_dir_all(&self.archive_dir).await?;
        let down = down_file_name(file_name);
        let moved = self
            .move_if_exists(&self.path(file_name)?, &self.archive_dir.join(file_name))
            .await?;
        if !moved {
            return Err(MigrationError::NotFound(file_name.to_string()));
        }
        self.move_if_exists(&self.path(&down)?, &self.archive_dir.join(&down))
            .await?;
        debug!(file = file_name, archive = %self.archive_dir.display(), "archived migration");
        Ok(())
    }

    async fn rename_migration(&self, from: &str, to: &str) -> MigrateResult<()> {
        let moved = self.move_if_exists(&self.path(from)?, &self.path(to)?).await?;
        if !moved {
            return Err(MigrationError::NotFound(from.to_string()));
        }
        self.move_if_exists(
            &self.path(&down_file_name(from))?,
            &self.path(&down_file_name(to))?,
        )
        .await?;
        Ok(())
    }

    async fn clear_state(&self) -> MigrateResult<()> {
        self.remove_optional(&self.migrations_dir.join(JOURNAL_FILE))
            .await?;
        self.remove_optional(&self.migrations_dir.join(SNAPSHOT_FILE))
            .await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    journal: Option<Journal>,
    snapshot: Option<Snapshot>,
    files: BTreeMap<String, String>,
    archived: BTreeMap<String, String>,
}

/// In-memory storage, for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of active migration files.
    pub fn file_names(&self) -> Vec<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    /// Names of archived migration files.
    pub fn archived_names(&self) -> Vec<String> {
        self.state.lock().archived.keys().cloned().collect()
    }
}

#[async_trait]
impl MigrationStorage for MemoryStorage {
    async fn read_journal(&self) -> MigrateResult<Option<Journal>> {
        Ok(self.state.lock().journal.clone())
    }

    async fn write_journal(&self, journal: &Journal) -> MigrateResult<()> {
        self.state.lock().journal = Some(journal.clone());
        Ok(())
    }

    async fn read_snapshot(&self) -> MigrateResult<Option<Snapshot>> {
        Ok(self.state.lock().snapshot.clone())
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> MigrateResult<()> {
        self.state.lock().snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn read_migration(&self, file_name: &str) -> MigrateResult<String> {
        self.state
            .lock()
            .files
            .get(file_name)
            .cloned()
            .ok_or_else(|| MigrationError::NotFound(file_name.to_string()))
    }

    async fn write_migration(&self, file_name: &str, content: &str) -> MigrateResult<()> {
        self.state
            .lock()
            .files
            .insert(file_name.to_string(), content.to_string());
        Ok(())
    }

    async fn read_down_migration(&self, file_name: &str) -> MigrateResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .files
            .get(&down_file_name(file_name))
            .cloned())
    }

    async fn check_archivable(&self, file_name: &str) -> MigrateResult<()> {
        let state = self.state.lock();
        for name in [file_name.to_string(), down_file_name(file_name)] {
            if state.archived.contains_key(&name) {
                return Err(archived_already(&name));
            }
        }
        Ok(())
    }

    async fn archive_migration(&self, file_name: &str) -> MigrateResult<()> {
        self.check_archivable(file_name).await?;
        let mut state = self.state.lock();
        let content = state
            .files
            .remove(file_name)
            .ok_or_else(|| MigrationError::NotFound(file_name.to_string()))?;
        state.archived.insert(file_name.to_string(), content);

        let down = down_file_name(file_name);
        if let Some(content) = state.files.remove(&down) {
            state.archived.insert(down, content);
        }
        Ok(())
    }

    async fn rename_migration(&self, from: &str, to: &str) -> MigrateResult<()> {
        let mut state = self.state.lock();
        let content = state
            .files
            .remove(from)
            .ok_or_else(|| MigrationError::NotFound(from.to_string()))?;
        state.files.insert(to.to_string(), content);

        if let Some(content) = state.files.remove(&down_file_name(from)) {
            state.files.insert(down_file_name(to), content);
        }
        Ok(())
    }

    async fn clear_state(&self) -> MigrateResult<()> {
        let mut state = self.state.lock();
        state.journal = None;
        state.snapshot = None;
        Ok(())
    }
}

fn archived_already(file_name: &str) -> MigrationError {
    MigrationError::invalid(format!("'{}' is already archived", file_name))
}
