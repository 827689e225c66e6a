//! Reading the live SQLite schema.
//!
//! Column, index and foreign key structure comes from the `pragma_*` table
//! functions. Names SQLite does not keep (unique and foreign key
//! constraints) and enum membership are recovered from the `CREATE TABLE`
//! text in `sqlite_master`.

use sluice_migrate::{
    ColumnDef, Connection, EnumDef, ForeignKeyDef, IndexDef, MigrateResult, PrimaryKeyDef, Row,
    Snapshot, TableDef, UniqueConstraintDef, quote_literal,
};

use tracing::warn;

use crate::ddl::REBUILD_PREFIX;
use crate::error::SqliteError;

const TABLES_SQL: &str = "SELECT name, sql FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid";

/// Read every user table and the enums their check constraints describe.
pub async fn introspect(
    conn: &mut dyn Connection,
    exclude_tables: &[&str],
) -> MigrateResult<Snapshot> {
    let mut snapshot = Snapshot::empty();

    for row in conn.query(TABLES_SQL).await? {
        let name = field(&row, "name")?.to_string();
        if exclude_tables.contains(&name.as_str()) || name.starts_with(REBUILD_PREFIX) {
            continue;
        }
        let sql = row.get("sql").unwrap_or_default().to_string();

        let columns = conn
            .query(&format!(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info({})",
                quote_literal(&name)
            ))
            .await?;
        let index_list = conn
            .query(&format!(
                "SELECT name, \"unique\", origin FROM pragma_index_list({})",
                quote_literal(&name)
            ))
            .await?;
        let mut indexes = Vec::new();
        for index in &index_list {
            if index.get("origin") != Some("c") {
                continue;
            }
            let index_name = field(index, "name")?;
            let columns = conn
                .query(&format!(
                    "SELECT name FROM pragma_index_info({}) ORDER BY seqno",
                    quote_literal(index_name)
                ))
                .await?;
            indexes.push((index.clone(), columns));
        }
        let foreign_keys = conn
            .query(&format!(
                "SELECT id, seq, \"table\", \"from\", \"to\", on_update, on_delete \
                 FROM pragma_foreign_key_list({}) ORDER BY id, seq",
                quote_literal(&name)
            ))
            .await?;

        let table = TableRows {
            name,
            sql,
            columns,
            indexes,
            foreign_keys,
        };
        table.assemble(&mut snapshot)?;
    }

    Ok(snapshot)
}

/// Everything read about one table.
struct TableRows {
    name: String,
    sql: String,
    columns: Vec<Row>,
    indexes: Vec<(Row, Vec<Row>)>,
    foreign_keys: Vec<Row>,
}

impl TableRows {
    fn assemble(self, snapshot: &mut Snapshot) -> MigrateResult<()> {
        let mut table = TableDef::new(&self.name);
        let checks = enum_checks(&self.sql);
        let autoincrement = self.sql.to_ascii_uppercase().contains("AUTOINCREMENT");

        let mut pk_columns: Vec<(u32, String)> = Vec::new();
        for row in &self.columns {
            let name = field(row, "name")?;
            let pk_position: u32 = row.get("pk").and_then(|p| p.parse().ok()).unwrap_or(0);

            let sql_type = match checks.iter().find(|c| c.column == name) {
                Some(check) => {
                    merge_enum(snapshot, check);
                    check.enum_name.clone()
                }
                None => row.get("type").unwrap_or_default().to_string(),
            };
            let mut column = ColumnDef::new(name, sql_type);
            if row.get("notnull") != Some("1") {
                column = column.nullable();
            }
            if let Some(default) = row.get("dflt_value") {
                column = column.default_expr(default);
            }
            if pk_position > 0 {
                pk_columns.push((pk_position, name.to_string()));
            }
            table.columns.push(column);
        }

        if !pk_columns.is_empty() {
            pk_columns.sort();
            let columns: Vec<String> = pk_columns.into_iter().map(|(_, c)| c).collect();
            if autoincrement && columns.len() == 1 {
                if let Some(column) = table.columns.iter_mut().find(|c| c.name == columns[0]) {
                    column.auto_increment = true;
                }
            }
            table.primary_key = Some(PrimaryKeyDef::new(columns));
        }

        for (index, columns) in &self.indexes {
            let columns: Vec<String> = columns
                .iter()
                .filter_map(|r| r.get("name").map(str::to_string))
                .collect();
            let mut def = IndexDef::new(field(index, "name")?, columns);
            if index.get("unique") == Some("1") {
                def = def.unique();
            }
            table.indexes.push(def);
        }

        let named_uniques = named_constraints(&self.sql, "UNIQUE");
        for (name, columns) in named_uniques {
            table.unique_constraints.push(UniqueConstraintDef::new(name, columns));
        }

        let named_fks = named_constraints(&self.sql, "FOREIGN KEY");
        let mut current_id: Option<&str> = None;
        for row in &self.foreign_keys {
            let id = field(row, "id")?;
            if current_id != Some(id) {
                current_id = Some(id);
                let mut fk = ForeignKeyDef::new(
                    "",
                    Vec::<String>::new(),
                    field(row, "table")?,
                    Vec::<String>::new(),
                );
                fk.on_delete = referential_action(row.get("on_delete"));
                fk.on_update = referential_action(row.get("on_update"));
                table.foreign_keys.push(fk);
            }
            if let Some(fk) = table.foreign_keys.last_mut() {
                fk.columns.push(field(row, "from")?.to_string());
                if let Some(to) = row.get("to") {
                    fk.references_columns.push(to.to_string());
                }
            }
        }
        // The pragma lists foreign keys newest first.
        table.foreign_keys.reverse();
        for fk in &mut table.foreign_keys {
            fk.name = named_fks
                .iter()
                .find(|(_, columns)| *columns == fk.columns)
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| format!("{}_{}_fkey", self.name, fk.columns.join("_")));
        }

        snapshot.tables.push(table);
        Ok(())
    }
}

fn field<'r>(row: &'r Row, name: &str) -> MigrateResult<&'r str> {
    row.get(name)
        .ok_or_else(|| SqliteError::introspection(format!("schema row is missing '{}'", name)).into())
}

fn referential_action(action: Option<&str>) -> Option<String> {
    match action {
        None | Some("NO ACTION") | Some("") => None,
        Some(other) => Some(other.to_string()),
    }
}

/// An enum check constraint found in table SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumCheck {
    /// Enum name.
    pub enum_name: String,
    /// Constrained column.
    pub column: String,
    /// Allowed values, in declaration order.
    pub values: Vec<String>,
}

/// Find `CONSTRAINT "enum:<Enum>:<column>" CHECK ("<column>" IN (...))`
/// clauses.
pub fn enum_checks(sql: &str) -> Vec<EnumCheck> {
    let re = regex_lite::Regex::new(
        r#"CONSTRAINT "enum:([^:"]+):([^"]+)" CHECK \("(?:[^"]|"")+" IN \(((?:[^')]|'(?:[^']|'')*')*)\)\)"#,
    )
    .unwrap();
    re.captures_iter(sql)
        .map(|caps| EnumCheck {
            enum_name: caps[1].to_string(),
            column: caps[2].to_string(),
            values: parse_literals(&caps[3]),
        })
        .collect()
}

/// Named constraints of one kind (`UNIQUE`, `FOREIGN KEY`) with their
/// column lists.
fn named_constraints(sql: &str, kind: &str) -> Vec<(String, Vec<String>)> {
    let pattern = format!(
        r#"CONSTRAINT "((?:[^"]|"")+)" {} \(([^)]*)\)"#,
        kind.replace(' ', r"\s+")
    );
    let re = regex_lite::Regex::new(&pattern).unwrap();
    re.captures_iter(sql)
        .map(|caps| (caps[1].replace("\"\"", "\""), parse_identifiers(&caps[2])))
        .collect()
}

/// `'a', 'it''s'` into its values.
fn parse_literals(list: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut chars = list.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut value = String::new();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        values.push(value);
    }
    values
}

/// `"a", "b"` (or bare names) into identifiers.
fn parse_identifiers(list: &str) -> Vec<String> {
    list.split(',')
        .map(|part| {
            let part = part.trim();
            match part.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
                Some(inner) => inner.replace("\"\"", "\""),
                None => part.to_string(),
            }
        })
        .filter(|p| !p.is_empty())
        .collect()
}

/// Record an enum, keeping the first definition seen.
fn merge_enum(snapshot: &mut Snapshot, check: &EnumCheck) {
    let found = EnumDef::new(&check.enum_name, check.values.clone());
    match snapshot.enum_def(&check.enum_name) {
        Some(existing) if !existing.same_members(&found) => {
            warn!(
                enum_name = %check.enum_name,
                column = %check.column,
                "enum check constraints disagree; keeping the first definition"
            );
        }
        Some(_) => {}
        None => snapshot.enums.push(found),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_enum_checks() {
        let sql = "CREATE TABLE \"task\" (\n    \"id\" integer NOT NULL,\n    \
                   \"status\" TEXT NOT NULL CONSTRAINT \"enum:Status:status\" CHECK (\"status\" IN ('OPEN', 'it''s (done)'))\n)";
        assert_eq!(
            enum_checks(sql),
            vec![EnumCheck {
                enum_name: "Status".to_string(),
                column: "status".to_string(),
                values: vec!["OPEN".to_string(), "it's (done)".to_string()],
            }]
        );
    }

    #[test]
    fn test_named_constraints() {
        let sql = "CREATE TABLE \"post\" (\"id\" integer, \"author_id\" integer, \"slug\" text, \
                   CONSTRAINT \"post_slug_key\" UNIQUE (\"slug\"), \
                   CONSTRAINT \"post_author_fkey\" FOREIGN KEY (\"author_id\") REFERENCES \"user\" (\"id\"))";
        assert_eq!(
            named_constraints(sql, "UNIQUE"),
            vec![("post_slug_key".to_string(), vec!["slug".to_string()])]
        );
        assert_eq!(
            named_constraints(sql, "FOREIGN KEY"),
            vec![("post_author_fkey".to_string(), vec!["author_id".to_string()])]
        );
    }

    #[test]
    fn test_parse_identifiers() {
        assert_eq!(parse_identifiers("\"a\", \"b\"\"c\""), vec!["a", "b\"c"]);
        assert_eq!(parse_identifiers("a, b"), vec!["a", "b"]);
    }
}
