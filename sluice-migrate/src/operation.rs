//! Concrete schema operations.
//!
//! Each [`Operation`] variant carries exactly what its DDL needs and nothing
//! that points back into a snapshot. Operations are never mutated after they
//! are produced; resolution builds new ones.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snapshot::{
    ColumnDef, EnumColumnRef, EnumDef, ForeignKeyDef, IndexDef, PrimaryKeyDef, TableDef,
    UniqueConstraintDef,
};

/// One directly executable schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Operation {
    /// Create a table with its columns, primary key and unique constraints.
    /// Foreign keys are emitted as separate [`Operation::AddForeignKey`]s.
    CreateTable {
        /// The table definition.
        table: TableDef,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        name: String,
    },
    /// Rename a table.
    RenameTable {
        /// Old name.
        from: String,
        /// New name.
        to: String,
    },
    /// Add a column.
    AddColumn {
        /// Table name.
        table: String,
        /// The new column.
        column: ColumnDef,
    },
    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Old column name.
        from: String,
        /// New column name.
        to: String,
    },
    /// Change a column's type, nullability, default or auto-increment.
    AlterColumn {
        /// Table name.
        table: String,
        /// Definition before the change.
        from: ColumnDef,
        /// Definition after the change.
        to: ColumnDef,
    },
    /// Create an index.
    CreateIndex {
        /// Table name.
        table: String,
        /// The index.
        index: IndexDef,
    },
    /// Drop an index.
    DropIndex {
        /// Table name.
        table: String,
        /// Index name.
        name: String,
    },
    /// Add a foreign key.
    AddForeignKey {
        /// Table name.
        table: String,
        /// The foreign key.
        foreign_key: ForeignKeyDef,
    },
    /// Drop a foreign key.
    DropForeignKey {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },
    /// Add a unique constraint.
    AddUniqueConstraint {
        /// Table name.
        table: String,
        /// The constraint.
        constraint: UniqueConstraintDef,
    },
    /// Drop a unique constraint.
    DropUniqueConstraint {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },
    /// Add a primary key.
    AddPrimaryKey {
        /// Table name.
        table: String,
        /// The key.
        primary_key: PrimaryKeyDef,
    },
    /// Drop a primary key.
    DropPrimaryKey {
        /// Table name.
        table: String,
        /// The key being dropped.
        primary_key: PrimaryKeyDef,
    },
    /// Create an enum type.
    CreateEnum {
        /// The enum.
        enum_def: EnumDef,
    },
    /// Drop an enum type.
    DropEnum {
        /// Enum name.
        name: String,
    },
    /// Add and/or remove enum values.
    AlterEnum {
        /// Enum name.
        name: String,
        /// Values being added.
        #[serde(default)]
        add_values: Vec<String>,
        /// Values being removed.
        #[serde(default)]
        remove_values: Vec<String>,
        /// Complete surviving membership, in storage order.
        new_values: Vec<String>,
        /// Every column typed by this enum.
        #[serde(default)]
        dependent_columns: Vec<EnumColumnRef>,
        /// Resolved per-column replacements for removed values.
        #[serde(default)]
        mappings: Vec<EnumValueMapping>,
    },
}

/// Replacement policy for removed enum values in one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValueMapping {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Removed value to replacement; `None` means NULL.
    pub values: BTreeMap<String, Option<String>>,
}

/// The tag of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    CreateTable,
    DropTable,
    RenameTable,
    AddColumn,
    DropColumn,
    RenameColumn,
    AlterColumn,
    CreateIndex,
    DropIndex,
    AddForeignKey,
    DropForeignKey,
    AddUniqueConstraint,
    DropUniqueConstraint,
    AddPrimaryKey,
    DropPrimaryKey,
    CreateEnum,
    DropEnum,
    AlterEnum,
}

impl OperationKind {
    /// camelCase name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTable => "createTable",
            Self::DropTable => "dropTable",
            Self::RenameTable => "renameTable",
            Self::AddColumn => "addColumn",
            Self::DropColumn => "dropColumn",
            Self::RenameColumn => "renameColumn",
            Self::AlterColumn => "alterColumn",
            Self::CreateIndex => "createIndex",
            Self::DropIndex => "dropIndex",
            Self::AddForeignKey => "addForeignKey",
            Self::DropForeignKey => "dropForeignKey",
            Self::AddUniqueConstraint => "addUniqueConstraint",
            Self::DropUniqueConstraint => "dropUniqueConstraint",
            Self::AddPrimaryKey => "addPrimaryKey",
            Self::DropPrimaryKey => "dropPrimaryKey",
            Self::CreateEnum => "createEnum",
            Self::DropEnum => "dropEnum",
            Self::AlterEnum => "alterEnum",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    /// The operation's tag.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateTable { .. } => OperationKind::CreateTable,
            Self::DropTable { .. } => OperationKind::DropTable,
            Self::RenameTable { .. } => OperationKind::RenameTable,
            Self::AddColumn { .. } => OperationKind::AddColumn,
            Self::DropColumn { .. } => OperationKind::DropColumn,
            Self::RenameColumn { .. } => OperationKind::RenameColumn,
            Self::AlterColumn { .. } => OperationKind::AlterColumn,
            Self::CreateIndex { .. } => OperationKind::CreateIndex,
            Self::DropIndex { .. } => OperationKind::DropIndex,
            Self::AddForeignKey { .. } => OperationKind::AddForeignKey,
            Self::DropForeignKey { .. } => OperationKind::DropForeignKey,
            Self::AddUniqueConstraint { .. } => OperationKind::AddUniqueConstraint,
            Self::DropUniqueConstraint { .. } => OperationKind::DropUniqueConstraint,
            Self::AddPrimaryKey { .. } => OperationKind::AddPrimaryKey,
            Self::DropPrimaryKey { .. } => OperationKind::DropPrimaryKey,
            Self::CreateEnum { .. } => OperationKind::CreateEnum,
            Self::DropEnum { .. } => OperationKind::DropEnum,
            Self::AlterEnum { .. } => OperationKind::AlterEnum,
        }
    }

    /// The table this operation touches, if it is table-scoped.
    ///
    /// A rename reports its new name.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::CreateTable { table } => Some(&table.name),
            Self::DropTable { name } => Some(name),
            Self::RenameTable { to, .. } => Some(to),
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. }
            | Self::AddUniqueConstraint { table, .. }
            | Self::DropUniqueConstraint { table, .. }
            | Self::AddPrimaryKey { table, .. }
            | Self::DropPrimaryKey { table, .. } => Some(table),
            Self::CreateEnum { .. } | Self::DropEnum { .. } | Self::AlterEnum { .. } => None,
        }
    }

    /// Whether executing this can discard existing data.
    pub fn is_destructive(&self) -> bool {
        match self {
            Self::DropTable { .. } | Self::DropColumn { .. } => true,
            Self::AlterColumn { from, to, .. } => is_lossy_alter(from, to),
            _ => false,
        }
    }

    /// Whether this only appends values to an existing enum type.
    pub fn is_enum_value_addition(&self) -> bool {
        matches!(
            self,
            Self::AlterEnum { add_values, remove_values, .. }
                if !add_values.is_empty() && remove_values.is_empty()
        )
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match self {
            Self::CreateTable { table } => format!("create table {}", table.name),
            Self::DropTable { name } => format!("drop table {}", name),
            Self::RenameTable { from, to } => format!("rename table {} to {}", from, to),
            Self::AddColumn { table, column } => format!("add column {}.{}", table, column.name),
            Self::DropColumn { table, column } => format!("drop column {}.{}", table, column),
            Self::RenameColumn { table, from, to } => {
                format!("rename column {}.{} to {}", table, from, to)
            }
            Self::AlterColumn { table, from, to } => {
                let mut changes = Vec::new();
                if from.sql_type != to.sql_type {
                    changes.push(format!("type {} -> {}", from.sql_type, to.sql_type));
                }
                if from.nullable != to.nullable {
                    changes.push(if to.nullable {
                        "drop not null".to_string()
                    } else {
                        "set not null".to_string()
                    });
                }
                if from.default != to.default {
                    changes.push("default".to_string());
                }
                if from.auto_increment != to.auto_increment {
                    changes.push("auto increment".to_string());
                }
                format!("alter column {}.{} ({})", table, to.name, changes.join(", "))
            }
            Self::CreateIndex { table, index } => format!("create index {} on {}", index.name, table),
            Self::DropIndex { table, name } => format!("drop index {} on {}", name, table),
            Self::AddForeignKey { table, foreign_key } => {
                format!("add foreign key {} on {}", foreign_key.name, table)
            }
            Self::DropForeignKey { table, name } => format!("drop foreign key {} on {}", name, table),
            Self::AddUniqueConstraint { table, constraint } => {
                format!("add unique constraint {} on {}", constraint.name, table)
            }
            Self::DropUniqueConstraint { table, name } => {
                format!("drop unique constraint {} on {}", name, table)
            }
            Self::AddPrimaryKey { table, .. } => format!("add primary key on {}", table),
            Self::DropPrimaryKey { table, .. } => format!("drop primary key on {}", table),
            Self::CreateEnum { enum_def } => format!("create enum {}", enum_def.name),
            Self::DropEnum { name } => format!("drop enum {}", name),
            Self::AlterEnum {
                name,
                add_values,
                remove_values,
                ..
            } => format!(
                "alter enum {} (+{} -{})",
                name,
                add_values.len(),
                remove_values.len()
            ),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A type change, or NULL -> NOT NULL, can fail or truncate on existing rows.
fn is_lossy_alter(from: &ColumnDef, to: &ColumnDef) -> bool {
    from.sql_type != to.sql_type || (from.nullable && !to.nullable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alter(from: ColumnDef, to: ColumnDef) -> Operation {
        Operation::AlterColumn {
            table: "users".to_string(),
            from,
            to,
        }
    }

    #[test]
    fn test_destructive_kinds() {
        assert!(Operation::DropTable { name: "t".into() }.is_destructive());
        assert!(
            Operation::DropColumn {
                table: "t".into(),
                column: "c".into()
            }
            .is_destructive()
        );
        assert!(
            !Operation::AddColumn {
                table: "t".into(),
                column: ColumnDef::new("c", "text")
            }
            .is_destructive()
        );
    }

    #[test]
    fn test_lossy_alter_column() {
        let nullable = ColumnDef::new("name", "text").nullable();
        let required = ColumnDef::new("name", "text");

        assert!(alter(nullable.clone(), required.clone()).is_destructive());
        assert!(!alter(required.clone(), nullable).is_destructive());
        assert!(alter(required.clone(), ColumnDef::new("name", "integer")).is_destructive());
        assert!(!alter(required.clone(), required.default_expr("'x'")).is_destructive());
    }

    #[test]
    fn test_enum_value_addition() {
        let add_only = Operation::AlterEnum {
            name: "Status".into(),
            add_values: vec!["ARCHIVED".into()],
            remove_values: vec![],
            new_values: vec!["ACTIVE".into(), "ARCHIVED".into()],
            dependent_columns: vec![],
            mappings: vec![],
        };
        assert!(add_only.is_enum_value_addition());
        assert_eq!(add_only.kind(), OperationKind::AlterEnum);
        assert_eq!(add_only.table(), None);
    }

    #[test]
    fn test_serde_kind_tag() {
        let op = Operation::RenameColumn {
            table: "users".into(),
            from: "name".into(),
            to: "full_name".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "renameColumn");
        assert_eq!(op.describe(), "rename column users.name to full_name");
    }
}
