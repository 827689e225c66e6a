//! PostgreSQL DDL generation.

use sluice_migrate::{
    ColumnDef, DdlContext, EnumColumnRef, EnumValueMapping, ForeignKeyDef, IndexDef, Operation,
    PrimaryKeyDef, TableDef, quote_ident, quote_idents, quote_literal,
};

const IDENTITY: &str = "GENERATED BY DEFAULT AS IDENTITY";

/// Statements for one operation.
pub fn operation_sql(operation: &Operation, ctx: &DdlContext<'_>) -> Vec<String> {
    match operation {
        Operation::CreateTable { table } => vec![create_table(table, ctx)],
        Operation::DropTable { name } => vec![format!("DROP TABLE {}", quote_ident(name))],
        Operation::RenameTable { from, to } => vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(from),
            quote_ident(to)
        )],
        Operation::AddColumn { table, column } => vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_definition(column, ctx)
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
        Operation::AlterColumn { table, from, to } => alter_column(table, from, to, ctx),
        Operation::CreateIndex { table, index } => vec![create_index(table, index)],
        Operation::DropIndex { name, .. } => vec![format!("DROP INDEX {}", quote_ident(name))],
        Operation::AddForeignKey { table, foreign_key } => vec![format!(
            "ALTER TABLE {} ADD {}",
            quote_ident(table),
            foreign_key_clause(foreign_key)
        )],
        Operation::DropForeignKey { table, name }
        | Operation::DropUniqueConstraint { table, name } => vec![drop_constraint(table, name)],
        Operation::AddUniqueConstraint { table, constraint } => vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            quote_ident(table),
            quote_ident(&constraint.name),
            quote_idents(&constraint.columns)
        )],
        Operation::AddPrimaryKey { table, primary_key } => vec![format!(
            "ALTER TABLE {} ADD {}",
            quote_ident(table),
            primary_key_clause(primary_key)
        )],
        Operation::DropPrimaryKey { table, primary_key } => {
            let name = primary_key
                .name
                .clone()
                .unwrap_or_else(|| default_primary_key_name(table));
            vec![drop_constraint(table, &name)]
        }
        Operation::CreateEnum { enum_def } => {
            vec![create_enum(&enum_def.name, &enum_def.values)]
        }
        Operation::DropEnum { name } => vec![format!("DROP TYPE {}", quote_ident(name))],
        Operation::AlterEnum {
            name,
            add_values,
            remove_values,
            new_values,
            dependent_columns,
            mappings,
        } => {
            if remove_values.is_empty() {
                add_enum_values(name, add_values, new_values)
            } else {
                let columns = if dependent_columns.is_empty() {
                    ctx.current.enum_columns(name)
                } else {
                    dependent_columns.clone()
                };
                rebuild_enum(name, new_values, &columns, mappings, ctx)
            }
        }
    }
}

/// Name PostgreSQL gives an unnamed primary key.
pub fn default_primary_key_name(table: &str) -> String {
    format!("{}_pkey", table)
}

fn create_table(table: &TableDef, ctx: &DdlContext<'_>) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_definition(c, ctx))
        .collect();
    if let Some(pk) = &table.primary_key {
        parts.push(primary_key_clause(pk));
    }
    for unique in &table.unique_constraints {
        parts.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote_ident(&unique.name),
            quote_idents(&unique.columns)
        ));
    }
    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(&table.name),
        parts.join(",\n    ")
    )
}

fn is_enum(sql_type: &str, ctx: &DdlContext<'_>) -> bool {
    ctx.desired.enum_def(sql_type).is_some() || ctx.current.enum_def(sql_type).is_some()
}

/// Column type as written in DDL. Enum types are quoted identifiers.
fn column_type(sql_type: &str, ctx: &DdlContext<'_>) -> String {
    if is_enum(sql_type, ctx) {
        quote_ident(sql_type)
    } else {
        sql_type.to_string()
    }
}

fn column_definition(column: &ColumnDef, ctx: &DdlContext<'_>) -> String {
    let mut sql = format!(
        "{} {}",
        quote_ident(&column.name),
        column_type(&column.sql_type, ctx)
    );
    if column.auto_increment {
        sql.push(' ');
        sql.push_str(IDENTITY);
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        if !column.auto_increment {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
    }
    sql
}

fn primary_key_clause(pk: &PrimaryKeyDef) -> String {
    match &pk.name {
        Some(name) => format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(name),
            quote_idents(&pk.columns)
        ),
        None => format!("PRIMARY KEY ({})", quote_idents(&pk.columns)),
    }
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

fn drop_constraint(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_ident(table),
        quote_ident(name)
    )
}

fn alter_column(table: &str, from: &ColumnDef, to: &ColumnDef, ctx: &DdlContext<'_>) -> Vec<String> {
    let prefix = format!(
        "ALTER TABLE {} ALTER COLUMN {}",
        quote_ident(table),
        quote_ident(&to.name)
    );
    let mut statements = Vec::new();
    let type_changed = from.sql_type != to.sql_type;
    let mut old_default = from.default.as_deref().filter(|_| !from.auto_increment);

    // A default typed for the old column blocks the conversion.
    if type_changed && old_default.is_some() {
        statements.push(format!("{} DROP DEFAULT", prefix));
        old_default = None;
    }
    if from.auto_increment && !to.auto_increment {
        statements.push(format!("{} DROP IDENTITY IF EXISTS", prefix));
    }
    if type_changed {
        let target = column_type(&to.sql_type, ctx);
        let using = if is_enum(&to.sql_type, ctx) {
            format!("{}::text::{}", quote_ident(&to.name), target)
        } else {
            format!("{}::{}", quote_ident(&to.name), target)
        };
        statements.push(format!("{} TYPE {} USING {}", prefix, target, using));
    }
    if from.nullable != to.nullable {
        let action = if to.nullable { "DROP" } else { "SET" };
        statements.push(format!("{} {} NOT NULL", prefix, action));
    }
    let new_default = to.default.as_deref().filter(|_| !to.auto_increment);
    if old_default != new_default {
        match new_default {
            Some(expr) => statements.push(format!("{} SET DEFAULT {}", prefix, expr)),
            None => statements.push(format!("{} DROP DEFAULT", prefix)),
        }
    }
    if !from.auto_increment && to.auto_increment {
        statements.push(format!("{} ADD {}", prefix, IDENTITY));
    }
    statements
}

fn create_enum(name: &str, values: &[String]) -> String {
    let values: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
    format!(
        "CREATE TYPE {} AS ENUM ({})",
        quote_ident(name),
        values.join(", ")
    )
}

/// `ADD VALUE` per new value, positioned to match the final order.
fn add_enum_values(name: &str, add_values: &[String], new_values: &[String]) -> Vec<String> {
    let mut statements = Vec::with_capacity(add_values.len());
    for (i, value) in new_values.iter().enumerate() {
        if !add_values.contains(value) {
            continue;
        }
        let mut sql = format!(
            "ALTER TYPE {} ADD VALUE IF NOT EXISTS {}",
            quote_ident(name),
            quote_literal(value)
        );
        if i > 0 {
            sql.push_str(&format!(" AFTER {}", quote_literal(&new_values[i - 1])));
        } else if let Some(next) = new_values.iter().find(|v| !add_values.contains(v)) {
            sql.push_str(&format!(" BEFORE {}", quote_literal(next)));
        }
        statements.push(sql);
    }
    statements
}

/// Replace the type: columns pass through text while values are remapped,
/// then convert to the new type.
fn rebuild_enum(
    name: &str,
    new_values: &[String],
    columns: &[EnumColumnRef],
    mappings: &[EnumValueMapping],
    ctx: &DdlContext<'_>,
) -> Vec<String> {
    let old_name = format!("{}_old", name);
    let mut statements = vec![
        format!(
            "ALTER TYPE {} RENAME TO {}",
            quote_ident(name),
            quote_ident(&old_name)
        ),
        create_enum(name, new_values),
    ];

    for column in columns {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            quote_ident(&column.table),
            quote_ident(&column.column)
        );
        let had_default = ctx
            .current
            .table(&column.table)
            .and_then(|t| t.get_column(&column.column))
            .is_some_and(|c| c.default.is_some());
        if had_default {
            statements.push(format!("{} DROP DEFAULT", prefix));
        }
        statements.push(format!(
            "{} TYPE text USING {}::text",
            prefix,
            quote_ident(&column.column)
        ));
    }

    for mapping in mappings {
        for (old, new) in &mapping.values {
            let value = match new {
                Some(v) => quote_literal(v),
                None => "NULL".to_string(),
            };
            statements.push(format!(
                "UPDATE {} SET {} = {} WHERE {} = {}",
                quote_ident(&mapping.table),
                quote_ident(&mapping.column),
                value,
                quote_ident(&mapping.column),
                quote_literal(old)
            ));
        }
    }

    for column in columns {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            quote_ident(&column.table),
            quote_ident(&column.column)
        );
        statements.push(format!(
            "{} TYPE {} USING {}::{}",
            prefix,
            quote_ident(name),
            quote_ident(&column.column),
            quote_ident(name)
        ));
        let default = desired_column(column, ctx).and_then(|c| c.default.as_deref());
        if let Some(default) = default {
            statements.push(format!("{} SET DEFAULT {}", prefix, default));
        }
    }

    statements.push(format!("DROP TYPE {}", quote_ident(&old_name)));
    statements
}

/// The desired definition of a column named as it is before the migration.
/// Enum rebuilds run before renames; the migration's renames are followed.
fn desired_column<'a>(column: &EnumColumnRef, ctx: &DdlContext<'a>) -> Option<&'a ColumnDef> {
    let table = ctx
        .operations
        .iter()
        .find_map(|op| match op {
            Operation::RenameTable { from, to } if *from == column.table => Some(to.as_str()),
            _ => None,
        })
        .unwrap_or(&column.table);
    let name = ctx
        .operations
        .iter()
        .find_map(|op| match op {
            Operation::RenameColumn {
                table: renamed_in,
                from,
                to,
            } if (renamed_in == table || *renamed_in == column.table)
                && *from == column.column =>
            {
                Some(to.as_str())
            }
            _ => None,
        })
        .unwrap_or(&column.column);
    ctx.desired.table(table).and_then(|t| t.get_column(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sluice_migrate::{EnumDef, Snapshot, UniqueConstraintDef};
    use std::collections::BTreeMap;

    fn sql(operation: &Operation, current: &Snapshot, desired: &Snapshot) -> Vec<String> {
        let ops = vec![operation.clone()];
        operation_sql(operation, &DdlContext::new(current, desired, &ops))
    }

    fn status_enum() -> EnumDef {
        EnumDef::new("Status", ["ACTIVE", "INACTIVE"])
    }

    #[test]
    fn test_create_table() {
        let desired = Snapshot::empty().with_enum(status_enum());
        let table = TableDef::new("user")
            .column(ColumnDef::new("id", "integer").auto_increment())
            .column(ColumnDef::new("email", "text"))
            .column(ColumnDef::new("status", "Status").default_expr("'ACTIVE'"))
            .column(ColumnDef::new("bio", "text").nullable())
            .primary_key(PrimaryKeyDef::new(["id"]))
            .unique(UniqueConstraintDef::new("user_email_key", ["email"]));

        let out = sql(&Operation::CreateTable { table }, &Snapshot::empty(), &desired);
        assert_eq!(
            out,
            vec![
                "CREATE TABLE \"user\" (\n    \
                 \"id\" integer GENERATED BY DEFAULT AS IDENTITY NOT NULL,\n    \
                 \"email\" text NOT NULL,\n    \
                 \"status\" \"Status\" NOT NULL DEFAULT 'ACTIVE',\n    \
                 \"bio\" text,\n    \
                 PRIMARY KEY (\"id\"),\n    \
                 CONSTRAINT \"user_email_key\" UNIQUE (\"email\")\n)"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_foreign_key_and_index() {
        let empty = Snapshot::empty();
        let fk = ForeignKeyDef::new("post_author_fkey", ["author_id"], "user", ["id"])
            .on_delete("CASCADE");
        assert_eq!(
            sql(
                &Operation::AddForeignKey {
                    table: "post".to_string(),
                    foreign_key: fk,
                },
                &empty,
                &empty
            ),
            vec![
                "ALTER TABLE \"post\" ADD CONSTRAINT \"post_author_fkey\" FOREIGN KEY (\"author_id\") REFERENCES \"user\" (\"id\") ON DELETE CASCADE"
            ]
        );
        assert_eq!(
            sql(
                &Operation::CreateIndex {
                    table: "post".to_string(),
                    index: IndexDef::new("post_slug_idx", ["slug"]).unique(),
                },
                &empty,
                &empty
            ),
            vec!["CREATE UNIQUE INDEX \"post_slug_idx\" ON \"post\" (\"slug\")"]
        );
    }

    #[test]
    fn test_drop_unnamed_primary_key() {
        let empty = Snapshot::empty();
        let out = sql(
            &Operation::DropPrimaryKey {
                table: "tag".to_string(),
                primary_key: PrimaryKeyDef::new(["id"]),
            },
            &empty,
            &empty,
        );
        assert_eq!(out, vec!["ALTER TABLE \"tag\" DROP CONSTRAINT \"tag_pkey\""]);
    }

    #[test]
    fn test_alter_column_type_with_default() {
        let empty = Snapshot::empty();
        let out = sql(
            &Operation::AlterColumn {
                table: "item".to_string(),
                from: ColumnDef::new("qty", "integer").default_expr("0"),
                to: ColumnDef::new("qty", "bigint").nullable().default_expr("1"),
            },
            &empty,
            &empty,
        );
        assert_eq!(
            out,
            vec![
                "ALTER TABLE \"item\" ALTER COLUMN \"qty\" DROP DEFAULT",
                "ALTER TABLE \"item\" ALTER COLUMN \"qty\" TYPE bigint USING \"qty\"::bigint",
                "ALTER TABLE \"item\" ALTER COLUMN \"qty\" DROP NOT NULL",
                "ALTER TABLE \"item\" ALTER COLUMN \"qty\" SET DEFAULT 1",
            ]
        );
    }

    #[test]
    fn test_alter_column_identity() {
        let empty = Snapshot::empty();
        let out = sql(
            &Operation::AlterColumn {
                table: "item".to_string(),
                from: ColumnDef::new("id", "integer"),
                to: ColumnDef::new("id", "integer").auto_increment(),
            },
            &empty,
            &empty,
        );
        assert_eq!(
            out,
            vec!["ALTER TABLE \"item\" ALTER COLUMN \"id\" ADD GENERATED BY DEFAULT AS IDENTITY"]
        );
    }

    #[test]
    fn test_enum_additions_keep_order() {
        let empty = Snapshot::empty();
        let out = sql(
            &Operation::AlterEnum {
                name: "Status".to_string(),
                add_values: vec!["DRAFT".to_string(), "ARCHIVED".to_string()],
                remove_values: vec![],
                new_values: vec![
                    "DRAFT".to_string(),
                    "ACTIVE".to_string(),
                    "INACTIVE".to_string(),
                    "ARCHIVED".to_string(),
                ],
                dependent_columns: vec![],
                mappings: vec![],
            },
            &empty,
            &empty,
        );
        assert_eq!(
            out,
            vec![
                "ALTER TYPE \"Status\" ADD VALUE IF NOT EXISTS 'DRAFT' BEFORE 'ACTIVE'",
                "ALTER TYPE \"Status\" ADD VALUE IF NOT EXISTS 'ARCHIVED' AFTER 'INACTIVE'",
            ]
        );
    }

    #[test]
    fn test_enum_removal_rebuilds_type() {
        let current = Snapshot::empty().with_enum(status_enum()).with_table(
            TableDef::new("user")
                .column(ColumnDef::new("status", "Status").default_expr("'ACTIVE'")),
        );
        let desired = Snapshot::empty()
            .with_enum(EnumDef::new("Status", ["ACTIVE"]))
            .with_table(
                TableDef::new("user")
                    .column(ColumnDef::new("status", "Status").default_expr("'ACTIVE'")),
            );
        let mut values = BTreeMap::new();
        values.insert("INACTIVE".to_string(), Some("ACTIVE".to_string()));

        let out = sql(
            &Operation::AlterEnum {
                name: "Status".to_string(),
                add_values: vec![],
                remove_values: vec!["INACTIVE".to_string()],
                new_values: vec!["ACTIVE".to_string()],
                dependent_columns: vec![EnumColumnRef {
                    table: "user".to_string(),
                    column: "status".to_string(),
                    nullable: false,
                }],
                mappings: vec![EnumValueMapping {
                    table: "user".to_string(),
                    column: "status".to_string(),
                    values,
                }],
            },
            &current,
            &desired,
        );
        assert_eq!(
            out,
            vec![
                "ALTER TYPE \"Status\" RENAME TO \"Status_old\"",
                "CREATE TYPE \"Status\" AS ENUM ('ACTIVE')",
                "ALTER TABLE \"user\" ALTER COLUMN \"status\" DROP DEFAULT",
                "ALTER TABLE \"user\" ALTER COLUMN \"status\" TYPE text USING \"status\"::text",
                "UPDATE \"user\" SET \"status\" = 'ACTIVE' WHERE \"status\" = 'INACTIVE'",
                "ALTER TABLE \"user\" ALTER COLUMN \"status\" TYPE \"Status\" USING \"status\"::\"Status\"",
                "ALTER TABLE \"user\" ALTER COLUMN \"status\" SET DEFAULT 'ACTIVE'",
                "DROP TYPE \"Status_old\"",
            ]
        );
    }

    #[test]
    fn test_enum_rebuild_restores_default_after_renames() {
        let current = Snapshot::empty().with_enum(status_enum()).with_table(
            TableDef::new("user")
                .column(ColumnDef::new("status", "Status").default_expr("'ACTIVE'")),
        );
        let desired = Snapshot::empty()
            .with_enum(EnumDef::new("Status", ["ACTIVE"]))
            .with_table(
                TableDef::new("member")
                    .column(ColumnDef::new("state", "Status").default_expr("'ACTIVE'")),
            );
        let alter = Operation::AlterEnum {
            name: "Status".to_string(),
            add_values: vec![],
            remove_values: vec!["INACTIVE".to_string()],
            new_values: vec!["ACTIVE".to_string()],
            dependent_columns: vec![EnumColumnRef {
                table: "user".to_string(),
                column: "status".to_string(),
                nullable: false,
            }],
            mappings: vec![],
        };
        let ops = vec![
            alter.clone(),
            Operation::RenameTable {
                from: "user".to_string(),
                to: "member".to_string(),
            },
            Operation::RenameColumn {
                table: "member".to_string(),
                from: "status".to_string(),
                to: "state".to_string(),
            },
        ];
        let out = operation_sql(&alter, &DdlContext::new(&current, &desired, &ops));

        let drop_default = "ALTER TABLE \"user\" ALTER COLUMN \"status\" DROP DEFAULT";
        assert!(out.iter().any(|s| s == drop_default));
        assert_eq!(
            out[out.len() - 2],
            "ALTER TABLE \"user\" ALTER COLUMN \"status\" SET DEFAULT 'ACTIVE'"
        );
    }
}
