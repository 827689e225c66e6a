//! The migration journal: the ordered list of migrations that exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{MigrateResult, MigrationError};

/// Journal file name.
pub const JOURNAL_FILE: &str = "_journal.json";

/// Snapshot file name.
pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// Current journal format version.
pub const JOURNAL_VERSION: &str = "1";

/// Ordered migration metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    /// Format version.
    pub version: String,
    /// Dialect the migrations were generated for.
    pub dialect: Dialect,
    /// Entries by ascending index.
    #[serde(default)]
    pub entries: Vec<MigrationEntry>,
}

impl Journal {
    /// An empty journal.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            dialect,
            entries: Vec::new(),
        }
    }

    /// Fail unless the journal was written for `dialect`.
    pub fn check_dialect(&self, dialect: Dialect) -> MigrateResult<()> {
        if self.dialect == dialect {
            Ok(())
        } else {
            Err(MigrationError::DialectMismatch {
                expected: self.dialect.to_string(),
                actual: dialect.to_string(),
            })
        }
    }

    /// Index the next entry receives.
    pub fn next_index(&self) -> u32 {
        self.entries.last().map(|e| e.idx + 1).unwrap_or(0)
    }

    /// A version for an entry created at `now`, strictly greater than every
    /// existing version.
    pub fn next_version(&self, now: DateTime<Utc>) -> String {
        let candidate = now.timestamp_millis();
        let latest = self
            .entries
            .iter()
            .filter_map(|e| e.version.parse::<i64>().ok())
            .max();
        match latest {
            Some(latest) if latest >= candidate => (latest + 1).to_string(),
            _ => candidate.to_string(),
        }
    }

    /// Entry at `idx`.
    pub fn entry(&self, idx: u32) -> Option<&MigrationEntry> {
        self.entries.iter().find(|e| e.idx == idx)
    }

    /// Entry whose tracking name is `name`.
    pub fn by_tracking_name(&self, name: &str) -> Option<&MigrationEntry> {
        self.entries.iter().find(|e| e.tracking_name() == name)
    }

    /// Entry matching `target`: an index, a tracking name, a file name or a
    /// bare migration name.
    pub fn find(&self, target: &str) -> Option<&MigrationEntry> {
        if let Ok(idx) = target.parse::<u32>() {
            if let Some(entry) = self.entry(idx) {
                return Some(entry);
            }
        }
        self.entries.iter().find(|e| {
            e.tracking_name() == target || e.file_name() == target || e.name == target
        })
    }

    /// Check that indices are contiguous from zero.
    pub fn validate(&self) -> MigrateResult<()> {
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.idx as usize != position {
                return Err(MigrationError::invalid(format!(
                    "journal entry '{}' has index {} at position {}",
                    entry.name, entry.idx, position
                )));
            }
        }
        Ok(())
    }
}

/// Journal-side record of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationEntry {
    /// Position in the journal.
    pub idx: u32,
    /// Millisecond timestamp, unique and increasing.
    pub version: String,
    /// Kebab-case name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the file body.
    pub checksum: String,
    /// Free-form tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl MigrationEntry {
    /// `<4-digit index>_<name>.sql`
    pub fn file_name(&self) -> String {
        format!("{:04}_{}.sql", self.idx, self.name)
    }

    /// `<4-digit index>_<name>.down.sql`
    pub fn down_file_name(&self) -> String {
        down_file_name(&self.file_name())
    }

    /// Name recorded in the tracking table. Independent of the index, so
    /// re-indexing never orphans tracking rows.
    pub fn tracking_name(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }
}

/// Down file name for an up file name.
pub fn down_file_name(file_name: &str) -> String {
    match file_name.strip_suffix(".sql") {
        Some(stem) => format!("{}.down.sql", stem),
        None => format!("{}.down.sql", file_name),
    }
}

/// Lowercase, dash-separated form of a free-form name.
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous_lower = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && previous_lower && !out.ends_with('-') {
                out.push('-');
            }
            previous_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c.to_ascii_lowercase());
        } else {
            previous_lower = false;
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
        }
    }

    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "migration".to_string()
    } else {
        trimmed.to_string()
    }
}
