//! Schema diffing.
//!
//! The differ is a pure function of two snapshots. It never guesses a rename:
//! a name that disappears while another appears in the same scope is reported
//! as an [`AmbiguousChange`] and left to the resolver.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::operation::Operation;
use crate::snapshot::{ColumnDef, Snapshot, TableDef};

/// Output of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Changes that need no decision.
    pub operations: Vec<Operation>,
    /// Drop+add pairs that could be renames.
    pub ambiguous_changes: Vec<AmbiguousChange>,
}

impl DiffResult {
    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.ambiguous_changes.is_empty()
    }

    /// Human-readable summary of the diff.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "No changes".to_string();
        }
        let mut parts = vec![format!("{} operations", self.operations.len())];
        if !self.ambiguous_changes.is_empty() {
            parts.push(format!("{} ambiguous", self.ambiguous_changes.len()));
        }
        let destructive = self.operations.iter().filter(|o| o.is_destructive()).count();
        if destructive > 0 {
            parts.push(format!("{} destructive", destructive));
        }
        parts.join(", ")
    }

    fn extend(&mut self, other: DiffResult) {
        self.operations.extend(other.operations);
        self.ambiguous_changes.extend(other.ambiguous_changes);
    }
}

/// A name that vanished while another appeared in the same scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AmbiguousChange {
    /// Column dropped and another added in the same table.
    AmbiguousColumn {
        /// Table holding both columns.
        table: String,
        /// Column present only in the current schema.
        dropped: ColumnDef,
        /// Column present only in the desired schema.
        added: ColumnDef,
    },
    /// Table dropped and another added.
    AmbiguousTable {
        /// Table present only in the current schema.
        dropped: TableDef,
        /// Table present only in the desired schema.
        added: TableDef,
    },
}

impl AmbiguousChange {
    /// One-line human description.
    pub fn describe(&self) -> String {
        match self {
            Self::AmbiguousColumn {
                table,
                dropped,
                added,
            } => format!(
                "column {}.{} removed and {}.{} added",
                table, dropped.name, table, added.name
            ),
            Self::AmbiguousTable { dropped, added } => {
                format!("table {} removed and {} added", dropped.name, added.name)
            }
        }
    }
}

/// One enum-typed column losing values.
///
/// An enum may back several columns and each needs its own replacement
/// policy, so removals are reported per column rather than per enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumValueRemoval {
    /// Enum type losing values.
    pub enum_name: String,
    /// Table of the affected column.
    pub table: String,
    /// Affected column.
    pub column: String,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Values being removed.
    pub removed_values: Vec<String>,
    /// Values that remain valid replacements.
    pub available_values: Vec<String>,
}

impl EnumValueRemoval {
    /// One-line human description.
    pub fn describe(&self) -> String {
        format!(
            "remove {} from enum {} used by {}.{}",
            self.removed_values.join(", "),
            self.enum_name,
            self.table,
            self.column
        )
    }
}

/// Per-column removals implied by `alterEnum` operations.
pub fn detect_enum_removals(operations: &[Operation]) -> Vec<EnumValueRemoval> {
    operations
        .iter()
        .flat_map(|op| match op {
            Operation::AlterEnum {
                name,
                remove_values,
                new_values,
                dependent_columns,
                ..
            } if !remove_values.is_empty() => dependent_columns
                .iter()
                .map(|dep| EnumValueRemoval {
                    enum_name: name.clone(),
                    table: dep.table.clone(),
                    column: dep.column.clone(),
                    nullable: dep.nullable,
                    removed_values: remove_values.clone(),
                    available_values: new_values.clone(),
                })
                .collect(),
            _ => Vec::new(),
        })
        .collect()
}

/// Schema differ for comparing snapshots.
pub struct SchemaDiffer<'a> {
    /// Source snapshot (current database state).
    source: Option<&'a Snapshot>,
    /// Target snapshot (desired state).
    target: &'a Snapshot,
}

impl<'a> SchemaDiffer<'a> {
    /// Create a differ against an empty source.
    pub fn new(target: &'a Snapshot) -> Self {
        Self {
            source: None,
            target,
        }
    }

    /// Set the source snapshot.
    pub fn with_source(mut self, source: &'a Snapshot) -> Self {
        self.source = Some(source);
        self
    }

    /// Compute the diff.
    pub fn diff(&self) -> DiffResult {
        let empty = Snapshot::empty();
        diff(self.source.unwrap_or(&empty), self.target)
    }
}

/// Compare `current` with `desired`.
pub fn diff(current: &Snapshot, desired: &Snapshot) -> DiffResult {
    let mut result = DiffResult::default();

    diff_enums(current, desired, &mut result);

    let source_tables: IndexMap<&str, &TableDef> =
        current.tables.iter().map(|t| (t.name.as_str(), t)).collect();
    let target_tables: IndexMap<&str, &TableDef> =
        desired.tables.iter().map(|t| (t.name.as_str(), t)).collect();

    let added: Vec<&TableDef> = target_tables
        .values()
        .filter(|t| !source_tables.contains_key(t.name.as_str()))
        .copied()
        .collect();
    let dropped: Vec<&TableDef> = source_tables
        .values()
        .filter(|t| !target_tables.contains_key(t.name.as_str()))
        .copied()
        .collect();

    let pairs = pair_candidates(&dropped, &added, tables_look_alike);

    for (i, table) in added.iter().enumerate() {
        if let Some(dropped_table) = pairs.partner_of_added(i, &dropped) {
            result.ambiguous_changes.push(AmbiguousChange::AmbiguousTable {
                dropped: dropped_table.clone(),
                added: (*table).clone(),
            });
        } else {
            result.operations.extend(create_table_operations(table));
        }
    }

    for (name, target) in &target_tables {
        if let Some(source) = source_tables.get(name) {
            result.extend(diff_tables(source, target));
        }
    }

    for (i, table) in dropped.iter().enumerate() {
        if !pairs.is_dropped_paired(i) {
            result.operations.push(Operation::DropTable {
                name: table.name.clone(),
            });
        }
    }

    for enum_def in &current.enums {
        if desired.enum_def(&enum_def.name).is_none() {
            result.operations.push(Operation::DropEnum {
                name: enum_def.name.clone(),
            });
        }
    }

    result
}

/// Operations that build `table` from nothing.
///
/// Indexes and foreign keys become separate operations so the orderer can
/// place them after every table exists.
pub fn create_table_operations(table: &TableDef) -> Vec<Operation> {
    let mut bare = table.clone();
    bare.indexes.clear();
    bare.foreign_keys.clear();

    let mut ops = vec![Operation::CreateTable { table: bare }];
    ops.extend(table.indexes.iter().map(|index| Operation::CreateIndex {
        table: table.name.clone(),
        index: index.clone(),
    }));
    ops.extend(table.foreign_keys.iter().map(|fk| Operation::AddForeignKey {
        table: table.name.clone(),
        foreign_key: fk.clone(),
    }));
    ops
}

/// Diff two definitions of the same table. `source` must already carry the
/// target's name (callers rename it first when resolving a table rename).
pub fn diff_tables(source: &TableDef, target: &TableDef) -> DiffResult {
    let mut result = DiffResult::default();
    let table = target.name.as_str();

    let added: Vec<&ColumnDef> = target
        .columns
        .iter()
        .filter(|c| source.get_column(&c.name).is_none())
        .collect();
    let dropped: Vec<&ColumnDef> = source
        .columns
        .iter()
        .filter(|c| target.get_column(&c.name).is_none())
        .collect();

    let pairs = pair_candidates(&dropped, &added, |d, a| {
        d.sql_type == a.sql_type && d.nullable == a.nullable
    });

    for (i, column) in added.iter().enumerate() {
        if let Some(dropped_column) = pairs.partner_of_added(i, &dropped) {
            result
                .ambiguous_changes
                .push(AmbiguousChange::AmbiguousColumn {
                    table: table.to_string(),
                    dropped: dropped_column.clone(),
                    added: (*column).clone(),
                });
        } else {
            result.operations.push(Operation::AddColumn {
                table: table.to_string(),
                column: (*column).clone(),
            });
        }
    }

    for (i, column) in dropped.iter().enumerate() {
        if !pairs.is_dropped_paired(i) {
            result.operations.push(Operation::DropColumn {
                table: table.to_string(),
                column: column.name.clone(),
            });
        }
    }

    for target_column in &target.columns {
        let Some(source_column) = source.get_column(&target_column.name) else {
            continue;
        };
        if source_column.differs_from(target_column) {
            result.operations.push(Operation::AlterColumn {
                table: table.to_string(),
                from: source_column.clone(),
                to: target_column.clone(),
            });
        }
    }

    // Indexes, foreign keys and unique constraints are matched by name; a
    // changed definition is a drop followed by a re-create.
    for index in &source.indexes {
        let keep = target.indexes.iter().any(|i| i == index);
        if !keep {
            result.operations.push(Operation::DropIndex {
                table: table.to_string(),
                name: index.name.clone(),
            });
        }
    }
    for index in &target.indexes {
        if !source.indexes.iter().any(|i| i == index) {
            result.operations.push(Operation::CreateIndex {
                table: table.to_string(),
                index: index.clone(),
            });
        }
    }

    for fk in &source.foreign_keys {
        if !target.foreign_keys.iter().any(|f| f == fk) {
            result.operations.push(Operation::DropForeignKey {
                table: table.to_string(),
                name: fk.name.clone(),
            });
        }
    }
    for fk in &target.foreign_keys {
        if !source.foreign_keys.iter().any(|f| f == fk) {
            result.operations.push(Operation::AddForeignKey {
                table: table.to_string(),
                foreign_key: fk.clone(),
            });
        }
    }

    for unique in &source.unique_constraints {
        if !target.unique_constraints.iter().any(|u| u == unique) {
            result.operations.push(Operation::DropUniqueConstraint {
                table: table.to_string(),
                name: unique.name.clone(),
            });
        }
    }
    for unique in &target.unique_constraints {
        if !source.unique_constraints.iter().any(|u| u == unique) {
            result.operations.push(Operation::AddUniqueConstraint {
                table: table.to_string(),
                constraint: unique.clone(),
            });
        }
    }

    match (&source.primary_key, &target.primary_key) {
        (Some(old), Some(new)) if !old.matches(new) => {
            result.operations.push(Operation::DropPrimaryKey {
                table: table.to_string(),
                primary_key: old.clone(),
            });
            result.operations.push(Operation::AddPrimaryKey {
                table: table.to_string(),
                primary_key: new.clone(),
            });
        }
        (Some(old), None) => result.operations.push(Operation::DropPrimaryKey {
            table: table.to_string(),
            primary_key: old.clone(),
        }),
        (None, Some(new)) => result.operations.push(Operation::AddPrimaryKey {
            table: table.to_string(),
            primary_key: new.clone(),
        }),
        _ => {}
    }

    result
}

fn diff_enums(current: &Snapshot, desired: &Snapshot, result: &mut DiffResult) {
    for target in &desired.enums {
        match current.enum_def(&target.name) {
            None => result.operations.push(Operation::CreateEnum {
                enum_def: target.clone(),
            }),
            Some(source) if !source.same_members(target) => {
                let add_values: Vec<String> = target
                    .values
                    .iter()
                    .filter(|v| !source.values.contains(v))
                    .cloned()
                    .collect();
                let remove_values: Vec<String> = source
                    .values
                    .iter()
                    .filter(|v| !target.values.contains(v))
                    .cloned()
                    .collect();
                let dependent_columns = if remove_values.is_empty() {
                    Vec::new()
                } else {
                    current.enum_columns(&target.name)
                };
                result.operations.push(Operation::AlterEnum {
                    name: target.name.clone(),
                    add_values,
                    remove_values,
                    new_values: target.values.clone(),
                    dependent_columns,
                    mappings: Vec::new(),
                });
            }
            Some(_) => {}
        }
    }
}

fn tables_look_alike(dropped: &TableDef, added: &TableDef) -> bool {
    dropped.columns.len() == added.columns.len()
        && dropped
            .columns
            .iter()
            .all(|c| added.get_column(&c.name).is_some_and(|a| !a.differs_from(c)))
}

/// Rename candidates: `partners[i]` is the index of the dropped item paired
/// with the `i`th added item.
struct CandidatePairs {
    partners: Vec<Option<usize>>,
    taken: Vec<bool>,
}

impl CandidatePairs {
    fn partner_of_added<'a, T>(&self, added_index: usize, dropped: &[&'a T]) -> Option<&'a T> {
        self.partners[added_index].map(|i| dropped[i])
    }

    fn is_dropped_paired(&self, dropped_index: usize) -> bool {
        self.taken[dropped_index]
    }
}

/// Pair each added item with one dropped item, preferring a structurally
/// identical candidate, then the first unpaired one in declaration order.
fn pair_candidates<T>(
    dropped: &[&T],
    added: &[&T],
    alike: impl Fn(&T, &T) -> bool,
) -> CandidatePairs {
    let mut taken = vec![false; dropped.len()];
    let mut partners = Vec::with_capacity(added.len());

    for &candidate in added {
        let preferred = (0..dropped.len()).find(|&i| !taken[i] && alike(dropped[i], candidate));
        let chosen = preferred.or_else(|| taken.iter().position(|t| !t));
        if let Some(i) = chosen {
            taken[i] = true;
        }
        partners.push(chosen);
    }

    CandidatePairs { partners, taken }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::snapshot::{EnumDef, ForeignKeyDef, IndexDef, PrimaryKeyDef};
    use pretty_assertions::assert_eq;

    fn users() -> TableDef {
        TableDef::new("user")
            .column(ColumnDef::new("id", "integer").auto_increment())
            .column(ColumnDef::new("email", "text"))
            .primary_key(PrimaryKeyDef::new(["id"]))
            .index(IndexDef::new("user_email_idx", ["email"]).unique())
    }

    fn kinds(result: &DiffResult) -> Vec<OperationKind> {
        result.operations.iter().map(|o| o.kind()).collect()
    }

    #[test]
    fn test_identical_snapshots_have_no_diff() {
        let snapshot = Snapshot::empty()
            .with_enum(EnumDef::new("Status", ["A", "B"]))
            .with_table(users());
        assert_eq!(diff(&snapshot, &snapshot), DiffResult::default());
    }

    #[test]
    fn test_create_table_splits_indexes_and_foreign_keys() {
        let posts = TableDef::new("post")
            .column(ColumnDef::new("id", "integer"))
            .column(ColumnDef::new("author_id", "integer"))
            .foreign_key(ForeignKeyDef::new("post_author_fk", ["author_id"], "user", ["id"]));
        let desired = Snapshot::empty().with_table(users()).with_table(posts);

        let result = SchemaDiffer::new(&desired).diff();
        assert_eq!(
            kinds(&result),
            vec![
                OperationKind::CreateTable,
                OperationKind::CreateIndex,
                OperationKind::CreateTable,
                OperationKind::AddForeignKey,
            ]
        );
        if let Operation::CreateTable { table } = &result.operations[0] {
            assert!(table.indexes.is_empty());
        }
    }

    #[test]
    fn test_column_swap_is_ambiguous_not_rename() {
        let current = Snapshot::empty().with_table(users());
        let mut renamed = users();
        renamed.columns[1].name = "email_address".to_string();
        renamed.indexes.clear();
        let desired = Snapshot::empty().with_table(renamed);

        let result = diff(&current, &desired);
        assert!(
            !result
                .operations
                .iter()
                .any(|o| o.kind() == OperationKind::RenameColumn)
        );
        assert_eq!(result.ambiguous_changes.len(), 1);
        match &result.ambiguous_changes[0] {
            AmbiguousChange::AmbiguousColumn {
                table,
                dropped,
                added,
            } => {
                assert_eq!(table, "user");
                assert_eq!(dropped.name, "email");
                assert_eq!(added.name, "email_address");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_table_rename_is_single_ambiguous_table() {
        let current = Snapshot::empty().with_table(users());
        let desired = Snapshot::empty().with_table(users().renamed("account"));

        let result = diff(&current, &desired);
        assert!(result.operations.is_empty());
        assert_eq!(result.ambiguous_changes.len(), 1);
        assert!(matches!(
            &result.ambiguous_changes[0],
            AmbiguousChange::AmbiguousTable { dropped, added }
                if dropped.name == "user" && added.name == "account"
        ));
    }

    #[test]
    fn test_changed_column_becomes_alter() {
        let current = Snapshot::empty().with_table(users());
        let desired = Snapshot::empty().with_table(
            users().column(ColumnDef::new("email", "varchar(320)").nullable()),
        );

        let result = diff(&current, &desired);
        assert_eq!(kinds(&result), vec![OperationKind::AlterColumn]);
        assert!(result.ambiguous_changes.is_empty());
    }

    #[test]
    fn test_extra_dropped_column_is_plain_drop() {
        let current = Snapshot::empty().with_table(
            users()
                .column(ColumnDef::new("nickname", "text"))
                .column(ColumnDef::new("age", "integer")),
        );
        let desired = Snapshot::empty().with_table(users().column(ColumnDef::new("years", "integer")));

        let result = diff(&current, &desired);
        assert_eq!(result.ambiguous_changes.len(), 1);
        // "years" pairs with the structurally identical "age"
        assert!(matches!(
            &result.ambiguous_changes[0],
            AmbiguousChange::AmbiguousColumn { dropped, .. } if dropped.name == "age"
        ));
        assert_eq!(
            result.operations,
            vec![Operation::DropColumn {
                table: "user".to_string(),
                column: "nickname".to_string(),
            }]
        );
    }

    #[test]
    fn test_enum_value_removal_carries_dependents() {
        let table = TableDef::new("task")
            .column(ColumnDef::new("id", "integer"))
            .column(ColumnDef::new("status", "Status").nullable());
        let current = Snapshot::empty()
            .with_enum(EnumDef::new("Status", ["PENDING", "ACTIVE", "INACTIVE"]))
            .with_table(table.clone());
        let desired = Snapshot::empty()
            .with_enum(EnumDef::new("Status", ["ACTIVE", "INACTIVE", "ARCHIVED"]))
            .with_table(table);

        let result = diff(&current, &desired);
        assert_eq!(result.operations.len(), 1);
        match &result.operations[0] {
            Operation::AlterEnum {
                add_values,
                remove_values,
                new_values,
                dependent_columns,
                ..
            } => {
                assert_eq!(add_values, &vec!["ARCHIVED".to_string()]);
                assert_eq!(remove_values, &vec!["PENDING".to_string()]);
                assert_eq!(new_values.len(), 3);
                assert_eq!(dependent_columns.len(), 1);
                assert_eq!(dependent_columns[0].column, "status");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_detect_enum_removals_per_column() {
        let current = Snapshot::empty()
            .with_enum(EnumDef::new("Status", ["PENDING", "ACTIVE"]))
            .with_table(
                TableDef::new("task")
                    .column(ColumnDef::new("status", "Status"))
                    .column(ColumnDef::new("previous", "Status").nullable()),
            );
        let desired = Snapshot {
            enums: vec![EnumDef::new("Status", ["ACTIVE"])],
            ..current.clone()
        };

        let removals = detect_enum_removals(&diff(&current, &desired).operations);
        assert_eq!(removals.len(), 2);
        assert_eq!(removals[0].column, "status");
        assert!(!removals[0].nullable);
        assert!(removals[1].nullable);
        assert_eq!(removals[1].removed_values, vec!["PENDING".to_string()]);
        assert_eq!(removals[1].available_values, vec!["ACTIVE".to_string()]);
    }

    #[test]
    fn test_enum_reorder_is_not_a_change() {
        let current = Snapshot::empty().with_enum(EnumDef::new("E", ["A", "B"]));
        let desired = Snapshot::empty().with_enum(EnumDef::new("E", ["B", "A"]));
        assert!(diff(&current, &desired).is_empty());
    }

    #[test]
    fn test_changed_index_is_dropped_and_recreated() {
        let current = Snapshot::empty().with_table(users());
        let mut changed = users();
        changed.indexes = vec![IndexDef::new("user_email_idx", ["email", "id"])];
        let desired = Snapshot::empty().with_table(changed);

        let result = diff(&current, &desired);
        assert_eq!(
            kinds(&result),
            vec![OperationKind::DropIndex, OperationKind::CreateIndex]
        );
    }

    #[test]
    fn test_summary() {
        let desired = Snapshot::empty().with_table(users());
        let result = diff(&desired, &Snapshot::empty());
        assert_eq!(result.summary(), "1 operations, 1 destructive");
        assert_eq!(DiffResult::default().summary(), "No changes");
    }
}
