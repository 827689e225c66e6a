//! Change resolution.
//!
//! The differ leaves three kinds of change undecided: destructive operations,
//! ambiguous drop+add pairs, and enum values disappearing from columns that
//! still hold them. Each is handed to a [`Resolver`], whose per-kind methods
//! can only answer with the actions that make sense for that kind. When the
//! resolver has no opinion the [`ResolutionPolicy`] decides, and when the
//! policy has none either the whole resolution fails.
//!
//! ```rust,ignore
//! use sluice_migrate::resolve::{FnResolver, DestructiveResolution};
//!
//! // Proceed with everything except dropping `audit_log`.
//! let resolver = FnResolver::new().on_destructive(|change| {
//!     (change.table() == "audit_log").then_some(DestructiveResolution::Reject)
//! });
//! ```

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diff::{
    AmbiguousChange, DiffResult, EnumValueRemoval, create_table_operations, detect_enum_removals,
    diff_tables,
};
use crate::error::{MigrateResult, MigrationError};
use crate::operation::{EnumValueMapping, Operation, OperationKind};
use crate::order::priority;
use crate::snapshot::ColumnDef;

/// A destructive operation awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestructiveChange {
    /// The operation that would discard data.
    pub operation: Operation,
}

impl DestructiveChange {
    /// Table the operation touches.
    pub fn table(&self) -> &str {
        self.operation.table().unwrap_or_default()
    }

    /// Column the operation touches, if column-scoped.
    pub fn column(&self) -> Option<&str> {
        match &self.operation {
            Operation::DropColumn { column, .. } => Some(column),
            Operation::AlterColumn { to, .. } => Some(&to.name),
            _ => None,
        }
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        self.operation.describe()
    }
}

/// Answer to a destructive change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DestructiveResolution {
    /// Run the operation.
    Proceed,
    /// Abort the whole run.
    Reject,
}

/// Answer to an ambiguous change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AmbiguousResolution {
    /// Treat the pair as a rename, keeping data.
    Rename,
    /// Add the new item and drop the old one.
    AddAndDrop,
    /// Abort the whole run.
    Reject,
}

/// Answer to an enum value removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnumResolution {
    /// Replace removed values; keys are removed values, values are
    /// surviving ones. Unmapped values become NULL.
    MapValues(BTreeMap<String, String>),
    /// Replace every removed value with NULL.
    UseNull,
    /// Abort the whole run.
    Reject,
}

/// Any undecided change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveChange {
    /// A destructive operation.
    Destructive(DestructiveChange),
    /// A possible rename.
    Ambiguous(AmbiguousChange),
    /// Enum values vanishing from a column.
    EnumValueRemoval(EnumValueRemoval),
}

impl ResolveChange {
    /// Kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Destructive(_) => "destructive",
            Self::Ambiguous(_) => "ambiguous",
            Self::EnumValueRemoval(_) => "enumValueRemoval",
        }
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match self {
            Self::Destructive(change) => change.describe(),
            Self::Ambiguous(change) => change.describe(),
            Self::EnumValueRemoval(change) => change.describe(),
        }
    }
}

/// The answer given to a [`ResolveChange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Answer to a destructive change.
    Destructive(DestructiveResolution),
    /// Answer to an ambiguous change.
    Ambiguous(AmbiguousResolution),
    /// Answer to an enum value removal.
    EnumValueRemoval(EnumResolution),
}

/// Caller-supplied decisions. Every method defaults to "no opinion".
pub trait Resolver: Send + Sync {
    /// Decide a destructive operation.
    fn destructive(&self, _change: &DestructiveChange) -> Option<DestructiveResolution> {
        None
    }

    /// Decide a possible rename.
    fn ambiguous(&self, _change: &AmbiguousChange) -> Option<AmbiguousResolution> {
        None
    }

    /// Decide what replaces removed enum values in one column.
    fn enum_value_removal(&self, _change: &EnumValueRemoval) -> Option<EnumResolution> {
        None
    }
}

type Callback<C, R> = Box<dyn Fn(&C) -> Option<R> + Send + Sync>;

/// A [`Resolver`] assembled from closures.
#[derive(Default)]
pub struct FnResolver {
    destructive: Option<Callback<DestructiveChange, DestructiveResolution>>,
    ambiguous: Option<Callback<AmbiguousChange, AmbiguousResolution>>,
    enum_value_removal: Option<Callback<EnumValueRemoval, EnumResolution>>,
}

impl FnResolver {
    /// A resolver with no opinions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle destructive changes.
    pub fn on_destructive(
        mut self,
        f: impl Fn(&DestructiveChange) -> Option<DestructiveResolution> + Send + Sync + 'static,
    ) -> Self {
        self.destructive = Some(Box::new(f));
        self
    }

    /// Handle ambiguous changes.
    pub fn on_ambiguous(
        mut self,
        f: impl Fn(&AmbiguousChange) -> Option<AmbiguousResolution> + Send + Sync + 'static,
    ) -> Self {
        self.ambiguous = Some(Box::new(f));
        self
    }

    /// Handle enum value removals.
    pub fn on_enum_value_removal(
        mut self,
        f: impl Fn(&EnumValueRemoval) -> Option<EnumResolution> + Send + Sync + 'static,
    ) -> Self {
        self.enum_value_removal = Some(Box::new(f));
        self
    }
}

impl Resolver for FnResolver {
    fn destructive(&self, change: &DestructiveChange) -> Option<DestructiveResolution> {
        self.destructive.as_ref().and_then(|f| f(change))
    }

    fn ambiguous(&self, change: &AmbiguousChange) -> Option<AmbiguousResolution> {
        self.ambiguous.as_ref().and_then(|f| f(change))
    }

    fn enum_value_removal(&self, change: &EnumValueRemoval) -> Option<EnumResolution> {
        self.enum_value_removal.as_ref().and_then(|f| f(change))
    }
}

/// What happens to changes the resolver leaves undecided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPolicy {
    /// Nullable enum columns fall back to NULL; anything else fails.
    #[default]
    Standard,
    /// Everything undecided fails, including nullable enum columns.
    Strict,
    /// Rename ambiguous pairs, proceed with destructive changes, NULL removed
    /// enum values.
    Lenient,
    /// Add+drop ambiguous pairs, proceed with destructive changes, NULL
    /// removed enum values.
    Force,
}

impl ResolutionPolicy {
    /// The policy's answer when the resolver has none.
    pub fn fallback(self, change: &ResolveChange) -> Option<Resolution> {
        match self {
            Self::Force => Some(force_fallback(change)),
            Self::Lenient => Some(match change {
                ResolveChange::Destructive(_) => {
                    Resolution::Destructive(DestructiveResolution::Proceed)
                }
                ResolveChange::Ambiguous(_) => Resolution::Ambiguous(AmbiguousResolution::Rename),
                ResolveChange::EnumValueRemoval(_) => {
                    Resolution::EnumValueRemoval(EnumResolution::UseNull)
                }
            }),
            Self::Standard => match change {
                ResolveChange::EnumValueRemoval(removal) if removal.nullable => {
                    Some(Resolution::EnumValueRemoval(EnumResolution::UseNull))
                }
                _ => None,
            },
            Self::Strict => None,
        }
    }
}

/// The answer `force` gives to any change.
pub fn force_fallback(change: &ResolveChange) -> Resolution {
    match change {
        ResolveChange::Destructive(_) => Resolution::Destructive(DestructiveResolution::Proceed),
        ResolveChange::Ambiguous(_) => Resolution::Ambiguous(AmbiguousResolution::AddAndDrop),
        ResolveChange::EnumValueRemoval(_) => Resolution::EnumValueRemoval(EnumResolution::UseNull),
    }
}

/// Who made a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DecidedBy {
    /// The caller's resolver.
    Resolver,
    /// The active policy.
    Policy,
    /// The force fallback used for previews.
    DryRun,
}

/// A recorded decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The change that needed deciding.
    pub change: ResolveChange,
    /// The answer.
    pub resolution: Resolution,
    /// Where the answer came from.
    pub decided_by: DecidedBy,
}

/// Inputs to [`resolve`].
#[derive(Clone, Copy, Default)]
pub struct ResolveOptions<'a> {
    /// Caller decisions, consulted first.
    pub resolver: Option<&'a dyn Resolver>,
    /// Fallback for undecided changes. Unset means the engine's configured
    /// policy, or [`ResolutionPolicy::Standard`] outside an engine.
    pub policy: Option<ResolutionPolicy>,
    /// Nothing will be executed: undecided changes take the force fallback
    /// instead of failing.
    pub dry_run: bool,
}

impl<'a> ResolveOptions<'a> {
    /// Options with the given policy.
    pub fn new(policy: ResolutionPolicy) -> Self {
        Self {
            policy: Some(policy),
            ..Self::default()
        }
    }

    /// Use `policy` unless one was already picked.
    pub fn or_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = self.policy.or(Some(policy));
        self
    }

    /// The effective fallback policy.
    pub fn policy(&self) -> ResolutionPolicy {
        self.policy.unwrap_or_default()
    }

    /// Consult a resolver first.
    pub fn with_resolver(mut self, resolver: &'a dyn Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Mark as a preview.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Output of [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedChanges {
    /// Concrete operations, unordered.
    pub operations: Vec<Operation>,
    /// Every decision taken, in order.
    pub decisions: Vec<Decision>,
}

/// Turn a diff into concrete operations.
///
/// Ambiguous changes are settled first. A table rename re-diffs the renamed
/// table against its new definition and queues any ambiguity found there.
/// Destructive operations are then approved one by one, and finally removed
/// enum values get a per-column mapping attached to their `alterEnum`.
/// Any rejection or undecided change aborts the whole resolution.
pub fn resolve(diff: DiffResult, options: &ResolveOptions<'_>) -> MigrateResult<ResolvedChanges> {
    let mut session = Session {
        options,
        decisions: Vec::new(),
    };

    // (operation, already approved)
    let mut operations: Vec<(Operation, bool)> =
        diff.operations.into_iter().map(|op| (op, false)).collect();
    let mut queue: VecDeque<AmbiguousChange> = diff.ambiguous_changes.into();

    while let Some(change) = queue.pop_front() {
        let rename = session.ambiguous(&change)?;
        match change {
            AmbiguousChange::AmbiguousColumn {
                table,
                dropped,
                added,
            } => {
                if rename {
                    operations.push((
                        Operation::RenameColumn {
                            table: table.clone(),
                            from: dropped.name.clone(),
                            to: added.name.clone(),
                        },
                        false,
                    ));
                    let renamed = ColumnDef {
                        name: added.name.clone(),
                        ..dropped
                    };
                    if renamed.differs_from(&added) {
                        operations.push((
                            Operation::AlterColumn {
                                table,
                                from: renamed,
                                to: added,
                            },
                            false,
                        ));
                    }
                } else {
                    operations.push((
                        Operation::AddColumn {
                            table: table.clone(),
                            column: added,
                        },
                        true,
                    ));
                    operations.push((
                        Operation::DropColumn {
                            table,
                            column: dropped.name,
                        },
                        true,
                    ));
                }
            }
            AmbiguousChange::AmbiguousTable { dropped, added } => {
                if rename {
                    operations.push((
                        Operation::RenameTable {
                            from: dropped.name.clone(),
                            to: added.name.clone(),
                        },
                        false,
                    ));
                    let nested = diff_tables(&dropped.renamed(added.name.clone()), &added);
                    debug!(
                        table = %added.name,
                        operations = nested.operations.len(),
                        ambiguous = nested.ambiguous_changes.len(),
                        "diffed renamed table"
                    );
                    operations.extend(nested.operations.into_iter().map(|op| (op, false)));
                    queue.extend(nested.ambiguous_changes);
                } else {
                    operations.extend(create_table_operations(&added).into_iter().map(|op| (op, true)));
                    operations.push((Operation::DropTable { name: dropped.name }, true));
                }
            }
        }
    }

    for (operation, approved) in &operations {
        if !approved && operation.is_destructive() {
            session.destructive(DestructiveChange {
                operation: operation.clone(),
            })?;
        }
    }

    let renames: Vec<(String, String)> = operations
        .iter()
        .filter_map(|(op, _)| match op {
            Operation::RenameTable { from, to } => Some((from.clone(), to.clone())),
            _ => None,
        })
        .collect();

    let mut resolved = Vec::with_capacity(operations.len());
    for (operation, _) in operations {
        let operation = before_rename(operation, &renames);
        resolved.push(session.attach_enum_mappings(operation)?);
    }

    Ok(ResolvedChanges {
        operations: resolved,
        decisions: session.decisions,
    })
}

/// Operations ordered ahead of a table rename still address the table by
/// its old name.
fn before_rename(operation: Operation, renames: &[(String, String)]) -> Operation {
    if priority(operation.kind()) >= priority(OperationKind::RenameTable) {
        return operation;
    }
    let old_name = |table: &str| {
        renames
            .iter()
            .find(|(_, to)| to == table)
            .map(|(from, _)| from.clone())
    };
    match operation {
        Operation::DropColumn { table, column } => Operation::DropColumn {
            table: old_name(&table).unwrap_or(table),
            column,
        },
        Operation::DropIndex { table, name } => Operation::DropIndex {
            table: old_name(&table).unwrap_or(table),
            name,
        },
        Operation::DropForeignKey { table, name } => Operation::DropForeignKey {
            table: old_name(&table).unwrap_or(table),
            name,
        },
        Operation::DropUniqueConstraint { table, name } => Operation::DropUniqueConstraint {
            table: old_name(&table).unwrap_or(table),
            name,
        },
        Operation::DropPrimaryKey { table, primary_key } => Operation::DropPrimaryKey {
            table: old_name(&table).unwrap_or(table),
            primary_key,
        },
        other => other,
    }
}

struct Session<'a> {
    options: &'a ResolveOptions<'a>,
    decisions: Vec<Decision>,
}

impl Session<'_> {
    fn decide(&mut self, change: ResolveChange, asked: Option<Resolution>) -> Option<Resolution> {
        let (resolution, decided_by) = match asked {
            Some(resolution) => (resolution, DecidedBy::Resolver),
            None => match self.options.policy().fallback(&change) {
                Some(resolution) => (resolution, DecidedBy::Policy),
                None if self.options.dry_run => (force_fallback(&change), DecidedBy::DryRun),
                None => return None,
            },
        };
        info!(
            kind = change.kind(),
            change = %change.describe(),
            resolution = ?resolution,
            decided_by = ?decided_by,
            "resolved change"
        );
        self.decisions.push(Decision {
            change,
            resolution: resolution.clone(),
            decided_by,
        });
        Some(resolution)
    }

    /// Returns `true` for a rename, `false` for add+drop.
    fn ambiguous(&mut self, change: &AmbiguousChange) -> MigrateResult<bool> {
        let asked = self
            .options
            .resolver
            .and_then(|r| r.ambiguous(change))
            .map(Resolution::Ambiguous);
        match self.decide(ResolveChange::Ambiguous(change.clone()), asked) {
            Some(Resolution::Ambiguous(AmbiguousResolution::Rename)) => Ok(true),
            Some(Resolution::Ambiguous(AmbiguousResolution::AddAndDrop)) => Ok(false),
            Some(_) => Err(MigrationError::ChangeRejected {
                change: change.describe(),
            }),
            None => Err(MigrationError::AmbiguousUnresolved {
                change: change.describe(),
            }),
        }
    }

    fn destructive(&mut self, change: DestructiveChange) -> MigrateResult<()> {
        let asked = self
            .options
            .resolver
            .and_then(|r| r.destructive(&change))
            .map(Resolution::Destructive);
        let description = change.describe();
        let table = change.table().to_string();
        let column = change.column().map(str::to_string);

        match self.decide(ResolveChange::Destructive(change), asked) {
            Some(Resolution::Destructive(DestructiveResolution::Proceed)) => Ok(()),
            Some(_) => Err(self.rejected(description, table, column)),
            None => Err(MigrationError::destructive(description, table, column)),
        }
    }

    fn attach_enum_mappings(&mut self, operation: Operation) -> MigrateResult<Operation> {
        let removals = detect_enum_removals(std::slice::from_ref(&operation));
        if removals.is_empty() {
            return Ok(operation);
        }

        let mut mappings = Vec::with_capacity(removals.len());
        for removal in removals {
            mappings.push(self.enum_value_removal(removal)?);
        }

        match operation {
            Operation::AlterEnum {
                name,
                add_values,
                remove_values,
                new_values,
                dependent_columns,
                ..
            } => Ok(Operation::AlterEnum {
                name,
                add_values,
                remove_values,
                new_values,
                dependent_columns,
                mappings,
            }),
            other => Ok(other),
        }
    }

    fn enum_value_removal(&mut self, removal: EnumValueRemoval) -> MigrateResult<EnumValueMapping> {
        let asked = self
            .options
            .resolver
            .and_then(|r| r.enum_value_removal(&removal))
            .map(Resolution::EnumValueRemoval);
        let description = removal.describe();

        let decided = self.decide(ResolveChange::EnumValueRemoval(removal.clone()), asked);
        let values = match decided {
            Some(Resolution::EnumValueRemoval(EnumResolution::UseNull)) => removal
                .removed_values
                .iter()
                .map(|v| (v.clone(), None))
                .collect(),
            Some(Resolution::EnumValueRemoval(EnumResolution::MapValues(map))) => {
                mapped_values(&removal, &map)?
            }
            Some(_) => {
                return Err(self.rejected(description, removal.table, Some(removal.column)));
            }
            None => {
                return Err(MigrationError::destructive(
                    description,
                    removal.table,
                    Some(removal.column),
                ));
            }
        };

        Ok(EnumValueMapping {
            table: removal.table,
            column: removal.column,
            values,
        })
    }

    fn rejected(&self, change: String, table: String, column: Option<String>) -> MigrationError {
        if self.options.dry_run {
            MigrationError::ChangeRejected { change }
        } else {
            MigrationError::destructive(change, table, column)
        }
    }
}

fn mapped_values(
    removal: &EnumValueRemoval,
    map: &BTreeMap<String, String>,
) -> MigrateResult<BTreeMap<String, Option<String>>> {
    for (from, to) in map {
        if !removal.removed_values.contains(from) {
            return Err(MigrationError::invalid(format!(
                "mapping for {}.{} names '{}', which is not being removed",
                removal.table, removal.column, from
            )));
        }
        if !removal.available_values.contains(to) {
            return Err(MigrationError::invalid(format!(
                "mapping for {}.{} targets '{}', which is not a value of {}",
                removal.table, removal.column, to, removal.enum_name
            )));
        }
    }

    removal
        .removed_values
        .iter()
        .map(|value| match map.get(value) {
            Some(target) => Ok((value.clone(), Some(target.clone()))),
            None if removal.nullable => Ok((value.clone(), None)),
            None => Err(MigrationError::invalid(format!(
                "'{}' is left unmapped on NOT NULL column {}.{}",
                value, removal.table, removal.column
            ))),
        })
        .collect()
}
