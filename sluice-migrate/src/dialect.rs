//! Supported SQL dialects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// A target SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL: advisory locks, native enum types.
    Postgres,
    /// SQLite: exclusive transactions, enums emulated with CHECK constraints.
    Sqlite,
}

impl Dialect {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Whether the dialect has native enum types.
    pub fn has_native_enums(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(MigrationError::UnsupportedDialect(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("SQLite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "oracle".parse::<Dialect>().unwrap_err();
        assert_eq!(err.code().as_str(), "MIGRATION_UNSUPPORTED_DIALECT");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Dialect::Postgres).unwrap();
        assert_eq!(json, "\"postgres\"");
    }
}
