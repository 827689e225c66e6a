//! Diff, resolve, order and render DDL: the pipeline shared by push and
//! generate.

use tracing::info;

use crate::diff::diff;
use crate::driver::{DdlContext, MigrationDriver};
use crate::error::MigrateResult;
use crate::operation::Operation;
use crate::order::order_operations;
use crate::resolve::{Decision, ResolveOptions, resolve};
use crate::snapshot::Snapshot;

/// One operation and the statements implementing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// The operation.
    pub operation: Operation,
    /// Its DDL, possibly empty.
    pub statements: Vec<String>,
}

/// A resolved, ordered migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Steps in execution order.
    pub steps: Vec<PlannedStep>,
    /// Decisions taken while resolving.
    pub decisions: Vec<Decision>,
}

impl MigrationPlan {
    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Operations in execution order.
    pub fn operations(&self) -> Vec<Operation> {
        self.steps.iter().map(|s| s.operation.clone()).collect()
    }

    /// Every statement in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|s| s.statements.iter().cloned())
            .collect()
    }

    /// Split into statements that must run outside a transaction (enum value
    /// additions, when `standalone_enum_additions` is set) and the rest.
    pub fn split_standalone(&self, standalone_enum_additions: bool) -> (Vec<String>, Vec<String>) {
        let mut standalone = Vec::new();
        let mut transactional = Vec::new();
        for step in &self.steps {
            if standalone_enum_additions && step.operation.is_enum_value_addition() {
                standalone.extend(step.statements.iter().cloned());
            } else {
                transactional.extend(step.statements.iter().cloned());
            }
        }
        (standalone, transactional)
    }
}

/// Plan the migration from `current` to `desired`.
pub fn plan<D: MigrationDriver + ?Sized>(
    driver: &D,
    current: &Snapshot,
    desired: &Snapshot,
    options: &ResolveOptions<'_>,
) -> MigrateResult<MigrationPlan> {
    let diff = diff(current, desired);
    info!(summary = %diff.summary(), "computed schema diff");

    let resolved = resolve(diff, options)?;
    let operations = order_operations(resolved.operations);
    let ctx = DdlContext::new(current, desired, &operations);

    let steps = operations
        .iter()
        .map(|operation| {
            Ok(PlannedStep {
                operation: operation.clone(),
                statements: driver.generate_ddl(operation, &ctx)?,
            })
        })
        .collect::<MigrateResult<Vec<_>>>()?;

    Ok(MigrationPlan {
        steps,
        decisions: resolved.decisions,
    })
}

/// Statements dropping every table of `snapshot` in reverse declaration
/// order, then every enum.
///
/// Reverse order avoids most foreign-key conflicts but not cycles.
pub fn drop_all<D: MigrationDriver + ?Sized>(
    driver: &D,
    snapshot: &Snapshot,
) -> MigrateResult<(Vec<String>, Vec<String>)> {
    let operations: Vec<Operation> = snapshot
        .tables
        .iter()
        .rev()
        .map(|t| Operation::DropTable {
            name: t.name.clone(),
        })
        .chain(snapshot.enums.iter().map(|e| Operation::DropEnum {
            name: e.name.clone(),
        }))
        .collect();

    let empty = Snapshot::empty();
    let ctx = DdlContext::new(snapshot, &empty, &operations);
    let mut statements = Vec::new();
    let mut dropped = Vec::with_capacity(operations.len());
    for operation in &operations {
        statements.extend(driver.generate_ddl(operation, &ctx)?);
        match operation {
            Operation::DropTable { name } | Operation::DropEnum { name } => {
                dropped.push(name.clone())
            }
            _ => {}
        }
    }
    Ok((dropped, statements))
}
