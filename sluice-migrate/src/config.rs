//! Migration configuration.
//!
//! Configuration is either built in code or read from the `[migrations]`
//! table of a `sluice.toml` file:
//!
//! ```toml
//! [migrations]
//! dialect = "postgres"
//! migrations_dir = "./migrations"
//! tracking_table = "__sluice_migrations"
//! strict = true
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{MigrateResult, MigrationError};
use crate::history::{DEFAULT_LOCK_ID, DEFAULT_TRACKING_TABLE};
use crate::resolve::ResolutionPolicy;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "sluice.toml";

/// Configuration for the migration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Expected dialect. When set, the engine refuses a driver of another
    /// dialect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<Dialect>,
    /// Directory holding migration files, journal and snapshot. Enables the
    /// file-based workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrations_dir: Option<PathBuf>,
    /// Tracking table name.
    pub tracking_table: String,
    /// Advisory lock id.
    pub lock_id: i64,
    /// Where squashed files are archived. Defaults to `archive/` inside the
    /// migrations directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<PathBuf>,
    /// Fail on every undecided change instead of using the standard policy.
    pub strict: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            dialect: None,
            migrations_dir: None,
            tracking_table: DEFAULT_TRACKING_TABLE.to_string(),
            lock_id: DEFAULT_LOCK_ID,
            archive_dir: None,
            strict: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    migrations: MigrateConfig,
}

impl MigrateConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expected dialect.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = Some(dir.into());
        self
    }

    /// Set the tracking table name.
    pub fn tracking_table(mut self, table: impl Into<String>) -> Self {
        self.tracking_table = table.into();
        self
    }

    /// Set the advisory lock id.
    pub fn lock_id(mut self, id: i64) -> Self {
        self.lock_id = id;
        self
    }

    /// Set the archive directory.
    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Enable strict resolution.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Policy implied by `strict`.
    pub fn default_policy(&self) -> ResolutionPolicy {
        if self.strict {
            ResolutionPolicy::Strict
        } else {
            ResolutionPolicy::Standard
        }
    }

    /// Parse the `[migrations]` table of a TOML document.
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        file.migrations.validate()?;
        Ok(file.migrations)
    }

    /// Load from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            MigrationError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Check names and paths before they reach SQL or the filesystem.
    pub fn validate(&self) -> MigrateResult<()> {
        validate_table_name(&self.tracking_table)?;
        if let Some(dir) = &self.migrations_dir {
            validate_dir(dir)?;
        }
        if let Some(dir) = &self.archive_dir {
            validate_dir(dir)?;
        }
        Ok(())
    }
}

fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap())
}

/// Reject tracking table names that could inject SQL.
pub fn validate_table_name(name: &str) -> MigrateResult<()> {
    if table_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(MigrationError::InvalidTableName(name.to_string()))
    }
}

/// Reject empty directories and paths escaping through `..`.
pub fn validate_dir(dir: &Path) -> MigrateResult<()> {
    let escapes = dir.components().any(|c| matches!(c, Component::ParentDir));
    if dir.as_os_str().is_empty() || escapes {
        return Err(MigrationError::InvalidMigrationsDir(dir.display().to_string()));
    }
    Ok(())
}
