//! Migration file format.
//!
//! ```text
//! -- name: add-posts
//! -- generated: 2026-10-19T08:30:00.000Z
//! -- checksum: 5f0c...
//!
//! CREATE TABLE "post" (...)
//! --> statement-breakpoint
//! CREATE INDEX "post_title_idx" ON "post" ("title")
//! -- down
//! DROP TABLE "post"
//! ```
//!
//! The checksum covers the body, everything after the header block, so the
//! header can carry it. An optional `-- down` line starts the reversal
//! section; a dedicated `<index>_<name>.down.sql` file takes precedence.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::{MigrateResult, MigrationError};

/// Separator between statements.
pub const STATEMENT_BREAKPOINT: &str = "--> statement-breakpoint";

/// Line introducing the inline down section.
pub const DOWN_MARKER: &str = "-- down";

const NAME_HEADER: &str = "-- name:";
const GENERATED_HEADER: &str = "-- generated:";
const CHECKSUM_HEADER: &str = "-- checksum:";

/// SHA-256 of `content`, hex encoded.
pub fn checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// A migration about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Kebab-case migration name.
    pub name: String,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// Up statements.
    pub statements: Vec<String>,
    /// Inline down statements.
    pub down_statements: Vec<String>,
}

impl MigrationFile {
    /// Create a migration file.
    pub fn new(name: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            name: name.into(),
            generated_at: Utc::now(),
            statements,
            down_statements: Vec::new(),
        }
    }

    /// Add an inline down section.
    pub fn with_down(mut self, statements: Vec<String>) -> Self {
        self.down_statements = statements;
        self
    }

    /// Body text: statements joined by breakpoints plus the down section.
    pub fn body(&self) -> String {
        let mut body = join_statements(&self.statements);
        if !self.down_statements.is_empty() {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(DOWN_MARKER);
            body.push('\n');
            body.push_str(&join_statements(&self.down_statements));
        }
        body
    }

    /// Checksum of the body.
    pub fn checksum(&self) -> String {
        checksum(&self.body())
    }

    /// Full file content.
    pub fn render(&self) -> String {
        let body = self.body();
        format!(
            "{} {}\n{} {}\n{} {}\n\n{}\n",
            NAME_HEADER,
            self.name,
            GENERATED_HEADER,
            self.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            CHECKSUM_HEADER,
            checksum(&body),
            body
        )
    }
}

/// A migration file read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMigration {
    /// Name from the header, if present.
    pub name: Option<String>,
    /// Checksum from the header, if present.
    pub header_checksum: Option<String>,
    /// Body text the checksum covers.
    pub body: String,
    /// Up statements.
    pub statements: Vec<String>,
    /// Inline down statements.
    pub down_statements: Vec<String>,
}

impl ParsedMigration {
    /// Parse file content.
    pub fn parse(content: &str) -> MigrateResult<Self> {
        let mut name = None;
        let mut header_checksum = None;
        let mut lines = content.lines().peekable();

        while let Some(line) = lines.peek() {
            let line = line.trim_end();
            if let Some(value) = line.strip_prefix(NAME_HEADER) {
                name = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix(CHECKSUM_HEADER) {
                header_checksum = Some(value.trim().to_string());
            } else if !line.starts_with(GENERATED_HEADER) {
                break;
            }
            lines.next();
        }

        let body = lines
            .collect::<Vec<_>>()
            .join("\n")
            .trim_matches('\n')
            .trim_end()
            .to_string();

        let (up, down) = split_down_section(&body);
        let statements = split_statements(up);
        let down_statements = down.map(split_statements).unwrap_or_default();

        if statements.is_empty() && down_statements.is_empty() && !body.is_empty() {
            return Err(MigrationError::invalid("migration body has no statements"));
        }

        Ok(Self {
            name,
            header_checksum,
            body,
            statements,
            down_statements,
        })
    }

    /// Checksum recomputed from the body.
    pub fn computed_checksum(&self) -> String {
        checksum(&self.body)
    }
}

/// Split text on breakpoint lines, dropping empty chunks.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = Vec::new();

    for line in text.lines() {
        if line.trim() == STATEMENT_BREAKPOINT {
            push_statement(&mut statements, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, lines: &[&str]) {
    let statement = lines.join("\n").trim().to_string();
    if !statement.is_empty() {
        statements.push(statement);
    }
}

fn split_down_section(body: &str) -> (&str, Option<&str>) {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim() == DOWN_MARKER {
            let rest = &body[offset + line.len()..];
            return (&body[..offset], Some(rest));
        }
        offset += line.len();
    }
    (body, None)
}

fn join_statements(statements: &[String]) -> String {
    statements
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(&format!("\n{}\n", STATEMENT_BREAKPOINT))
}
