//! SQLite DDL generation.
//!
//! SQLite's `ALTER TABLE` covers renames, added columns and dropped columns
//! only. Every other change to an existing table is carried out by
//! rebuilding it: create the desired definition under a scratch name, copy
//! the rows across, drop the original and rename the copy into place. A
//! rebuild is emitted once, at the last operation touching the table, and
//! swallows that table's other column, index and constraint operations.
//!
//! Enum types do not exist. An enum column is `TEXT` with a named check
//! constraint, `enum:<Enum>:<column>`, listing the allowed values.

use sluice_migrate::{
    ColumnDef, DdlContext, EnumValueMapping, ForeignKeyDef, IndexDef, Operation, TableDef,
    quote_ident, quote_idents, quote_literal,
};

/// Prefix of the scratch table used while rebuilding.
pub const REBUILD_PREFIX: &str = "__sluice_new_";

/// Name of the check constraint backing an enum column.
pub fn enum_constraint_name(enum_name: &str, column: &str) -> String {
    format!("enum:{}:{}", enum_name, column)
}

/// Statements for one operation.
pub fn operation_sql(operation: &Operation, ctx: &DdlContext<'_>) -> Vec<String> {
    let rebuilds = Rebuilds::plan(ctx);
    let position = ctx
        .operations
        .iter()
        .position(|o| std::ptr::eq(o, operation))
        .or_else(|| ctx.operations.iter().position(|o| o == operation));

    let mut statements = if rebuilds.absorbs(operation, ctx) {
        Vec::new()
    } else {
        native_sql(operation, ctx)
    };
    if let Some(position) = position {
        for table in rebuilds.at(position) {
            statements.extend(rebuild_table(table, ctx));
        }
    }
    statements
}

/// Tables rebuilt by a migration, each with the position of the last
/// operation touching it.
struct Rebuilds {
    last: Vec<(String, usize)>,
}

impl Rebuilds {
    fn plan(ctx: &DdlContext<'_>) -> Self {
        let mut tables: Vec<String> = Vec::new();
        for operation in ctx.operations {
            for table in rebuild_triggers(operation, ctx) {
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
        }

        let last = tables
            .into_iter()
            .filter_map(|table| {
                let position = ctx
                    .operations
                    .iter()
                    .rposition(|op| touched_tables(op, ctx).contains(&table))?;
                Some((table, position))
            })
            .collect();
        Self { last }
    }

    fn contains(&self, table: &str) -> bool {
        self.last.iter().any(|(t, _)| t == table)
    }

    fn at(&self, position: usize) -> impl Iterator<Item = &str> {
        self.last
            .iter()
            .filter(move |(_, p)| *p == position)
            .map(|(t, _)| t.as_str())
    }

    /// Whether the rebuild of the operation's table replaces it.
    fn absorbs(&self, operation: &Operation, ctx: &DdlContext<'_>) -> bool {
        match operation {
            Operation::CreateTable { .. }
            | Operation::DropTable { .. }
            | Operation::RenameTable { .. }
            | Operation::CreateEnum { .. }
            | Operation::DropEnum { .. }
            | Operation::AlterEnum { .. } => false,
            other => other
                .table()
                .is_some_and(|t| self.contains(&canonical_name(t, ctx))),
        }
    }
}

/// Name of a table once the migration's renames have run.
fn canonical_name(table: &str, ctx: &DdlContext<'_>) -> String {
    ctx.operations
        .iter()
        .find_map(|op| match op {
            Operation::RenameTable { from, to } if from == table => Some(to.clone()),
            _ => None,
        })
        .unwrap_or_else(|| table.to_string())
}

/// Name of a table before the migration's renames.
fn original_name<'a>(table: &'a str, ctx: &'a DdlContext<'_>) -> &'a str {
    ctx.operations
        .iter()
        .find_map(|op| match op {
            Operation::RenameTable { from, to } if to == table => Some(from.as_str()),
            _ => None,
        })
        .unwrap_or(table)
}

/// Existing tables typed by the enum.
fn enum_tables(enum_name: &str, ctx: &DdlContext<'_>) -> Vec<String> {
    ctx.desired
        .tables
        .iter()
        .filter(|t| !ctx.creates_table(&t.name))
        .filter(|t| t.columns.iter().any(|c| c.sql_type == enum_name))
        .map(|t| t.name.clone())
        .collect()
}

fn touched_tables(operation: &Operation, ctx: &DdlContext<'_>) -> Vec<String> {
    match operation {
        Operation::AlterEnum { name, .. } => enum_tables(name, ctx),
        other => other
            .table()
            .map(|t| canonical_name(t, ctx))
            .into_iter()
            .collect(),
    }
}

fn rebuild_triggers(operation: &Operation, ctx: &DdlContext<'_>) -> Vec<String> {
    let table = match operation {
        Operation::AlterEnum { name, .. } => return enum_tables(name, ctx),
        Operation::AddColumn { table, column } => {
            let unsupported = column.auto_increment || (!column.nullable && column.default.is_none());
            if !unsupported {
                return Vec::new();
            }
            table
        }
        Operation::AlterColumn { table, .. }
        | Operation::AddForeignKey { table, .. }
        | Operation::DropForeignKey { table, .. }
        | Operation::AddUniqueConstraint { table, .. }
        | Operation::DropUniqueConstraint { table, .. }
        | Operation::AddPrimaryKey { table, .. }
        | Operation::DropPrimaryKey { table, .. } => table,
        _ => return Vec::new(),
    };
    let table = canonical_name(table, ctx);
    if ctx.creates_table(&table) || ctx.desired.table(&table).is_none() {
        return Vec::new();
    }
    vec![table]
}

fn native_sql(operation: &Operation, ctx: &DdlContext<'_>) -> Vec<String> {
    match operation {
        Operation::CreateTable { table } => {
            // Foreign keys only exist inline, so build from the full definition.
            let full = ctx.desired.table(&table.name).unwrap_or(table);
            vec![create_table(&full.name, full, ctx)]
        }
        Operation::DropTable { name } => vec![format!("DROP TABLE {}", quote_ident(name))],
        Operation::RenameTable { from, to } => vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(from),
            quote_ident(to)
        )],
        Operation::AddColumn { table, column } => vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_definition(column, false, ctx)
        )],
        Operation::DropColumn { table, column } => vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        )],
        Operation::RenameColumn { table, from, to } => vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(table),
            quote_ident(from),
            quote_ident(to)
        )],
        Operation::CreateIndex { table, index } => vec![create_index(table, index)],
        Operation::DropIndex { name, .. } => vec![format!("DROP INDEX {}", quote_ident(name))],
        // Inline in CREATE TABLE, or part of a rebuild.
        Operation::AddForeignKey { .. }
        | Operation::DropForeignKey { .. }
        | Operation::AlterColumn { .. }
        | Operation::AddUniqueConstraint { .. }
        | Operation::DropUniqueConstraint { .. }
        | Operation::AddPrimaryKey { .. }
        | Operation::DropPrimaryKey { .. } => Vec::new(),
        Operation::CreateEnum { .. } | Operation::DropEnum { .. } | Operation::AlterEnum { .. } => {
            Vec::new()
        }
    }
}

/// Whether the column is the table's single-column auto-increment key,
/// written inline as `PRIMARY KEY AUTOINCREMENT`.
fn inline_primary_key(table: &TableDef, column: &ColumnDef) -> bool {
    column.auto_increment
        && table
            .primary_key
            .as_ref()
            .is_some_and(|pk| pk.columns.len() == 1 && pk.columns[0] == column.name)
}

fn create_table(name: &str, table: &TableDef, ctx: &DdlContext<'_>) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_definition(c, inline_primary_key(table, c), ctx))
        .collect();

    if let Some(pk) = &table.primary_key {
        let inlined = table.columns.iter().any(|c| inline_primary_key(table, c));
        if !inlined {
            let clause = format!("PRIMARY KEY ({})", quote_idents(&pk.columns));
            parts.push(match &pk.name {
                Some(name) => format!("CONSTRAINT {} {}", quote_ident(name), clause),
                None => clause,
            });
        }
    }
    for unique in &table.unique_constraints {
        parts.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote_ident(&unique.name),
            quote_idents(&unique.columns)
        ));
    }
    for fk in &table.foreign_keys {
        parts.push(foreign_key_clause(fk));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(name),
        parts.join(",\n    ")
    )
}

fn column_definition(column: &ColumnDef, inline_pk: bool, ctx: &DdlContext<'_>) -> String {
    let enum_def = ctx
        .desired
        .enum_def(&column.sql_type)
        .or_else(|| ctx.current.enum_def(&column.sql_type));
    let sql_type = if enum_def.is_some() {
        "TEXT"
    } else {
        column.sql_type.as_str()
    };

    let mut sql = format!("{} {}", quote_ident(&column.name), sql_type);
    if inline_pk {
        sql.push_str(" PRIMARY KEY AUTOINCREMENT");
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    if let Some(enum_def) = enum_def {
        let values: Vec<String> = enum_def.values.iter().map(|v| quote_literal(v)).collect();
        sql.push_str(&format!(
            " CONSTRAINT {} CHECK ({} IN ({}))",
            quote_ident(&enum_constraint_name(&enum_def.name, &column.name)),
            quote_ident(&column.name),
            values.join(", ")
        ));
    }
    sql
}

fn foreign_key_clause(fk: &ForeignKeyDef) -> String {
    let mut sql = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&fk.name),
        quote_idents(&fk.columns),
        quote_ident(&fk.references_table),
        quote_idents(&fk.references_columns)
    );
    if let Some(action) = &fk.on_delete {
        sql.push_str(" ON DELETE ");
        sql.push_str(action);
    }
    if let Some(action) = &fk.on_update {
        sql.push_str(" ON UPDATE ");
        sql.push_str(action);
    }
    sql
}

fn create_index(table: &str, index: &IndexDef) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(table),
        quote_idents(&index.columns)
    )
}

/// Rebuild `table` into its desired definition.
fn rebuild_table(table: &str, ctx: &DdlContext<'_>) -> Vec<String> {
    let Some(target) = ctx.desired.table(table) else {
        return Vec::new();
    };
    let old_name = original_name(table, ctx);
    let Some(source) = ctx.current.table(old_name) else {
        return Vec::new();
    };
    let scratch = format!("{}{}", REBUILD_PREFIX, table);

    let mut columns = Vec::new();
    let mut values = Vec::new();
    for column in &target.columns {
        let from = renamed_from(old_name, table, &column.name, ctx);
        if source.get_column(from).is_none() {
            continue;
        }
        columns.push(quote_ident(&column.name));
        values.push(copy_expression(old_name, from, ctx));
    }

    let mut statements = vec![create_table(&scratch, target, ctx)];
    if !columns.is_empty() {
        statements.push(format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote_ident(&scratch),
            columns.join(", "),
            values.join(", "),
            quote_ident(table)
        ));
    }
    statements.push(format!("DROP TABLE {}", quote_ident(table)));
    statements.push(format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(&scratch),
        quote_ident(table)
    ));
    statements.extend(target.indexes.iter().map(|i| create_index(table, i)));
    statements
}

/// Column of the live table that feeds `column`.
fn renamed_from<'a>(
    old_table: &str,
    table: &str,
    column: &'a str,
    ctx: &'a DdlContext<'_>,
) -> &'a str {
    ctx.operations
        .iter()
        .find_map(|op| match op {
            Operation::RenameColumn { table: t, from, to }
                if (t == table || t == old_table) && to == column =>
            {
                Some(from.as_str())
            }
            _ => None,
        })
        .unwrap_or(column)
}

/// The column itself, or a `CASE` remapping removed enum values.
fn copy_expression(old_table: &str, column: &str, ctx: &DdlContext<'_>) -> String {
    let mappings: Vec<&EnumValueMapping> = ctx
        .operations
        .iter()
        .filter_map(|op| match op {
            Operation::AlterEnum { mappings, .. } => Some(mappings),
            _ => None,
        })
        .flatten()
        .filter(|m| m.table == old_table && m.column == column && !m.values.is_empty())
        .collect();

    let quoted = quote_ident(column);
    if mappings.is_empty() {
        return quoted;
    }
    let mut sql = format!("CASE {}", quoted);
    for mapping in mappings {
        for (old, new) in &mapping.values {
            let value = match new {
                Some(v) => quote_literal(v),
                None => "NULL".to_string(),
            };
            sql.push_str(&format!(" WHEN {} THEN {}", quote_literal(old), value));
        }
    }
    sql.push_str(&format!(" ELSE {} END", quoted));
    sql
}
