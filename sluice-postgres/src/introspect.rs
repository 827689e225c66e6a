//! Reading the live PostgreSQL schema from the system catalogs.

use sluice_migrate::{
    ColumnDef, Connection, EnumDef, ForeignKeyDef, IndexDef, MigrateResult, PrimaryKeyDef, Row,
    Snapshot, TableDef, UniqueConstraintDef,
};

use crate::ddl::default_primary_key_name;
use crate::error::PgError;

const TABLES_SQL: &str = "\
SELECT c.relname AS table_name
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = current_schema() AND c.relkind IN ('r', 'p')
ORDER BY c.oid";

const ENUMS_SQL: &str = "\
SELECT t.typname AS enum_name, e.enumlabel AS value
FROM pg_catalog.pg_type t
JOIN pg_catalog.pg_enum e ON e.enumtypid = t.oid
JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
WHERE n.nspname = current_schema()
ORDER BY t.oid, e.enumsortorder";

const COLUMNS_SQL: &str = "\
SELECT c.relname AS table_name,
       a.attname AS column_name,
       pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
       t.typtype AS type_kind,
       t.typname AS type_name,
       a.attnotnull AS not_null,
       a.attidentity AS identity,
       pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS default_expr
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = current_schema() AND c.relkind IN ('r', 'p')
  AND a.attnum > 0 AND NOT a.attisdropped
ORDER BY c.relname, a.attnum";

const CONSTRAINTS_SQL: &str = "\
SELECT c.relname AS table_name,
       con.conname AS constraint_name,
       con.contype AS kind,
       array_to_string(ARRAY(
           SELECT a.attname FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
           ORDER BY k.ord), ',') AS columns,
       f.relname AS references_table,
       array_to_string(ARRAY(
           SELECT a.attname FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
           ORDER BY k.ord), ',') AS references_columns,
       con.confdeltype AS on_delete,
       con.confupdtype AS on_update
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_catalog.pg_class f ON f.oid = con.confrelid
WHERE n.nspname = current_schema() AND con.contype IN ('p', 'u', 'f')
ORDER BY c.relname, con.conname";

const INDEXES_SQL: &str = "\
SELECT t.relname AS table_name,
       i.relname AS index_name,
       ix.indisunique AS is_unique,
       array_to_string(ARRAY(
           SELECT a.attname FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
           ORDER BY k.ord), ',') AS columns
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname = current_schema()
  AND NOT EXISTS (
      SELECT 1 FROM pg_catalog.pg_constraint con
      WHERE con.conindid = ix.indexrelid AND con.contype IN ('p', 'u', 'x'))
ORDER BY t.relname, i.relname";

/// Raw catalog rows, one query each.
#[derive(Debug, Default)]
pub struct CatalogRows {
    pub tables: Vec<Row>,
    pub enums: Vec<Row>,
    pub columns: Vec<Row>,
    pub constraints: Vec<Row>,
    pub indexes: Vec<Row>,
}

impl CatalogRows {
    /// Run every catalog query.
    pub async fn fetch(conn: &mut dyn Connection) -> MigrateResult<Self> {
        Ok(Self {
            tables: conn.query(TABLES_SQL).await?,
            enums: conn.query(ENUMS_SQL).await?,
            columns: conn.query(COLUMNS_SQL).await?,
            constraints: conn.query(CONSTRAINTS_SQL).await?,
            indexes: conn.query(INDEXES_SQL).await?,
        })
    }

    /// Assemble a snapshot, skipping `exclude_tables`.
    pub fn into_snapshot(self, exclude_tables: &[&str]) -> MigrateResult<Snapshot> {
        let mut snapshot = Snapshot::empty();

        for row in &self.enums {
            let name = field(row, "enum_name")?;
            let value = field(row, "value")?.to_string();
            match snapshot.enums.iter_mut().find(|e| e.name == name) {
                Some(e) => e.values.push(value),
                None => snapshot.enums.push(EnumDef::new(name, [value])),
            }
        }

        for row in &self.tables {
            let name = field(row, "table_name")?;
            if !exclude_tables.contains(&name) {
                snapshot.tables.push(TableDef::new(name));
            }
        }

        for row in &self.columns {
            let Some(table) = table_mut(&mut snapshot.tables, field(row, "table_name")?) else {
                continue;
            };
            table.columns.push(column_from_row(row)?);
        }

        for row in &self.constraints {
            let Some(table) = table_mut(&mut snapshot.tables, field(row, "table_name")?) else {
                continue;
            };
            let name = field(row, "constraint_name")?;
            let columns = split_columns(row.get("columns"));
            match field(row, "kind")? {
                "p" => {
                    let mut pk = PrimaryKeyDef::new(columns);
                    if name != default_primary_key_name(&table.name) {
                        pk = pk.named(name);
                    }
                    table.primary_key = Some(pk);
                }
                "u" => table
                    .unique_constraints
                    .push(UniqueConstraintDef::new(name, columns)),
                "f" => {
                    let mut fk = ForeignKeyDef::new(
                        name,
                        columns,
                        field(row, "references_table")?,
                        split_columns(row.get("references_columns")),
                    );
                    fk.on_delete = referential_action(row.get("on_delete"));
                    fk.on_update = referential_action(row.get("on_update"));
                    table.foreign_keys.push(fk);
                }
                _ => {}
            }
        }

        for row in &self.indexes {
            let Some(table) = table_mut(&mut snapshot.tables, field(row, "table_name")?) else {
                continue;
            };
            let mut index = IndexDef::new(field(row, "index_name")?, split_columns(row.get("columns")));
            if is_true(row.get("is_unique")) {
                index = index.unique();
            }
            table.indexes.push(index);
        }

        Ok(snapshot)
    }
}

fn field<'r>(row: &'r Row, name: &str) -> MigrateResult<&'r str> {
    row.get(name)
        .ok_or_else(|| PgError::introspection(format!("catalog row is missing '{}'", name)).into())
}

fn table_mut<'a>(tables: &'a mut [TableDef], name: &str) -> Option<&'a mut TableDef> {
    tables.iter_mut().find(|t| t.name == name)
}

fn is_true(value: Option<&str>) -> bool {
    matches!(value, Some("t") | Some("true"))
}

fn split_columns(value: Option<&str>) -> Vec<String> {
    match value {
        Some(s) if !s.is_empty() => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn column_from_row(row: &Row) -> MigrateResult<ColumnDef> {
    let name = field(row, "column_name")?;
    let sql_type = if row.get("type_kind") == Some("e") {
        field(row, "type_name")?.to_string()
    } else {
        normalize_type(field(row, "data_type")?)
    };

    let mut column = ColumnDef::new(name, sql_type);
    if !is_true(row.get("not_null")) {
        column = column.nullable();
    }

    let identity = matches!(row.get("identity"), Some("a") | Some("d"));
    let default = row.get("default_expr").filter(|d| !d.is_empty());
    match default {
        Some(expr) if expr.starts_with("nextval(") => column = column.auto_increment(),
        Some(expr) => column = column.default_expr(strip_literal_cast(expr)),
        None => {}
    }
    if identity {
        column = column.auto_increment();
    }
    Ok(column)
}

/// Map `confdeltype`/`confupdtype` codes to the action keyword. The default
/// (`NO ACTION`) maps to `None`.
fn referential_action(code: Option<&str>) -> Option<String> {
    let action = match code? {
        "r" => "RESTRICT",
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        _ => return None,
    };
    Some(action.to_string())
}

/// `'ACTIVE'::"Status"` becomes `'ACTIVE'`.
fn strip_literal_cast(expr: &str) -> &str {
    if !expr.starts_with('\'') {
        return expr;
    }
    match expr.rfind("'::") {
        Some(end) if end > 0 => &expr[..=end],
        _ => expr,
    }
}

/// Shorten `format_type` output to the names schemas are usually written
/// with.
pub fn normalize_type(data_type: &str) -> String {
    const LONG_FORMS: &[(&str, &str)] = &[
        ("character varying", "varchar"),
        ("character", "char"),
        ("timestamp without time zone", "timestamp"),
        ("timestamp with time zone", "timestamptz"),
        ("time without time zone", "time"),
        ("time with time zone", "timetz"),
    ];

    // Precision sits before the zone suffix: `timestamp(3) with time zone`.
    for suffix in [" without time zone", " with time zone"] {
        if let Some(head) = data_type.strip_suffix(suffix) {
            if let Some(open) = head.find('(') {
                let base = &head[..open];
                let precision = &head[open..];
                let short = match (base, suffix) {
                    ("timestamp", " without time zone") => "timestamp",
                    ("timestamp", _) => "timestamptz",
                    ("time", " without time zone") => "time",
                    _ => "timetz",
                };
                return format!("{}{}", short, precision);
            }
        }
    }

    for (long, short) in LONG_FORMS {
        if data_type == *long {
            return short.to_string();
        }
        if let Some(rest) = data_type.strip_prefix(long) {
            if rest.starts_with('(') || rest.starts_with("[]") {
                return format!("{}{}", short, rest);
            }
        }
    }
    data_type.to_string()
}
