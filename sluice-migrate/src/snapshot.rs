//! Canonical, dialect-agnostic schema snapshots.
//!
//! A [`Snapshot`] is a plain value: the model compiler produces the desired
//! one, a driver's introspection produces the current one, and the differ
//! compares them structurally. Type strings are already dialect-normalized, so
//! comparison never re-parses them.

use serde::{Deserialize, Serialize};

/// A complete schema description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Tables in declaration order.
    #[serde(default)]
    pub tables: Vec<TableDef>,
    /// Enum types.
    #[serde(default)]
    pub enums: Vec<EnumDef>,
}

impl Snapshot {
    /// An empty schema.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// Add an enum.
    pub fn with_enum(mut self, enum_def: EnumDef) -> Self {
        self.enums.push(enum_def);
        self
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Look up an enum by name.
    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Every column whose type is the named enum.
    pub fn enum_columns(&self, enum_name: &str) -> Vec<EnumColumnRef> {
        self.tables
            .iter()
            .flat_map(|table| {
                table
                    .columns
                    .iter()
                    .filter(|c| c.sql_type == enum_name)
                    .map(|c| EnumColumnRef {
                        table: table.name.clone(),
                        column: c.name.clone(),
                        nullable: c.nullable,
                    })
            })
            .collect()
    }

    /// Whether the snapshot holds nothing.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.enums.is_empty()
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in declaration order. Names are unique.
    pub columns: Vec<ColumnDef>,
    /// Primary key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKeyDef>,
    /// Indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
    /// Unique constraints.
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraintDef>,
}

impl TableDef {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    /// Add a column. A column with the same name is replaced.
    pub fn column(mut self, column: ColumnDef) -> Self {
        if let Some(existing) = self.columns.iter_mut().find(|c| c.name == column.name) {
            *existing = column;
        } else {
            self.columns.push(column);
        }
        self
    }

    /// Set the primary key.
    pub fn primary_key(mut self, pk: PrimaryKeyDef) -> Self {
        self.primary_key = Some(pk);
        self
    }

    /// Add an index.
    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKeyDef) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Add a unique constraint.
    pub fn unique(mut self, unique: UniqueConstraintDef) -> Self {
        self.unique_constraints.push(unique);
        self
    }

    /// Look up a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Copy of this table under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut table = self.clone();
        table.name = name.into();
        table
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Normalized type string (an enum name for enum-typed columns).
    #[serde(rename = "type")]
    pub sql_type: String,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Default expression, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Auto-increment / identity column.
    #[serde(default)]
    pub auto_increment: bool,
}

impl ColumnDef {
    /// A NOT NULL column of the given type.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: false,
            default: None,
            auto_increment: false,
        }
    }

    /// Accept NULL.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set a default expression.
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Mark as auto-increment.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Whether type, nullability, default or auto-increment differ.
    pub fn differs_from(&self, other: &ColumnDef) -> bool {
        self.sql_type != other.sql_type
            || self.nullable != other.nullable
            || self.default != other.default
            || self.auto_increment != other.auto_increment
    }
}

/// A primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyDef {
    /// Constraint name; some dialects do not preserve it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Key columns in order.
    pub columns: Vec<String>,
}

impl PrimaryKeyDef {
    /// An unnamed primary key.
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Name the constraint.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Same key, treating an absent name as a wildcard.
    pub fn matches(&self, other: &PrimaryKeyDef) -> bool {
        let names_match = match (&self.name, &other.name) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        names_match && self.columns == other.columns
    }
}

/// An index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Indexed columns in order.
    pub columns: Vec<String>,
    /// Unique index.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// A non-unique index.
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Constraint name.
    pub name: String,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
    /// ON DELETE action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
    /// ON UPDATE action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<String>,
}

impl ForeignKeyDef {
    /// A foreign key with no referential actions.
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
        references_table: impl Into<String>,
        references_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            references_table: references_table.into(),
            references_columns: references_columns.into_iter().map(Into::into).collect(),
            on_delete: None,
            on_update: None,
        }
    }

    /// Set the ON DELETE action.
    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }

    /// Set the ON UPDATE action.
    pub fn on_update(mut self, action: impl Into<String>) -> Self {
        self.on_update = Some(action.into());
        self
    }
}

/// A unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraintDef {
    /// Constraint name.
    pub name: String,
    /// Constrained columns.
    pub columns: Vec<String>,
}

impl UniqueConstraintDef {
    /// Create a unique constraint.
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// An enum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    /// Type name.
    pub name: String,
    /// Allowed values; order is the storage order for native enums.
    pub values: Vec<String>,
}

impl EnumDef {
    /// Create an enum.
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Same membership, ignoring order.
    pub fn same_members(&self, other: &EnumDef) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().all(|v| other.values.contains(v))
    }
}

/// A `table.column` pair typed by an enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumColumnRef {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot::empty()
            .with_enum(EnumDef::new("Status", ["ACTIVE", "INACTIVE"]))
            .with_table(
                TableDef::new("users")
                    .column(ColumnDef::new("id", "integer").auto_increment())
                    .column(ColumnDef::new("status", "Status").nullable())
                    .primary_key(PrimaryKeyDef::new(["id"])),
            )
            .with_table(
                TableDef::new("audit")
                    .column(ColumnDef::new("id", "integer"))
                    .column(ColumnDef::new("state", "Status")),
            )
    }

    #[test]
    fn test_enum_columns() {
        let snapshot = sample();
        let refs = snapshot.enum_columns("Status");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].table, "users");
        assert!(refs[0].nullable);
        assert_eq!(refs[1].column, "state");
        assert!(!refs[1].nullable);
    }

    #[test]
    fn test_column_replaced_by_name() {
        let table = TableDef::new("t")
            .column(ColumnDef::new("a", "text"))
            .column(ColumnDef::new("a", "integer"));
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.columns[0].sql_type, "integer");
    }

    #[test]
    fn test_primary_key_name_wildcard() {
        let named = PrimaryKeyDef::new(["id"]).named("users_pkey");
        let anonymous = PrimaryKeyDef::new(["id"]);
        assert!(named.matches(&anonymous));
        assert!(!named.matches(&PrimaryKeyDef::new(["id"]).named("other")));
        assert!(!named.matches(&PrimaryKeyDef::new(["id", "org"])));
    }

    #[test]
    fn test_enum_same_members_ignores_order() {
        let a = EnumDef::new("E", ["A", "B"]);
        let b = EnumDef::new("E", ["B", "A"]);
        assert!(a.same_members(&b));
        assert!(!a.same_members(&EnumDef::new("E", ["A"])));
    }

    #[test]
    fn test_serde_uses_type_key() {
        let json = serde_json::to_value(ColumnDef::new("id", "integer")).unwrap();
        assert_eq!(json["type"], "integer");
        let back: Snapshot = serde_json::from_str(&serde_json::to_string(&sample()).unwrap()).unwrap();
        assert_eq!(back, sample());
    }
}
