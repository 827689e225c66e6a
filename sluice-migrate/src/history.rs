//! Migration history tracking.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::Row;
use crate::error::{MigrateResult, MigrationError};

/// Default tracking table name.
pub const DEFAULT_TRACKING_TABLE: &str = "__sluice_migrations";

/// Default advisory lock id.
pub const DEFAULT_LOCK_ID: i64 = 42424242;

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Tracking name (`<version>_<name>`).
    pub name: String,
    /// Checksum recorded when applied.
    pub checksum: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

impl AppliedMigration {
    /// Parse a row with `name`, `checksum` and `applied_at` columns.
    pub fn from_row(row: &Row) -> MigrateResult<Self> {
        let applied_at = row.require("applied_at")?;
        Ok(Self {
            name: row.require("name")?.to_string(),
            checksum: row.require("checksum")?.to_string(),
            applied_at: parse_timestamp(applied_at)?,
        })
    }
}

/// Timestamp text as written to the tracking table.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> MigrateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MigrationError::database(format!("invalid applied_at '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_row() {
        let row = Row::new()
            .with("name", Some("1760000000000_init"))
            .with("checksum", Some("abc123"))
            .with("applied_at", Some("2026-10-19T08:30:00.250Z"));

        let applied = AppliedMigration::from_row(&row).unwrap();
        assert_eq!(applied.name, "1760000000000_init");
        assert_eq!(format_timestamp(&applied.applied_at), "2026-10-19T08:30:00.250Z");
    }

    #[test]
    fn test_from_row_rejects_bad_timestamp() {
        let row = Row::new()
            .with("name", Some("x"))
            .with("checksum", Some("y"))
            .with("applied_at", Some("yesterday"));
        assert!(AppliedMigration::from_row(&row).is_err());
    }
}
