//! Push: bring the live database to the desired snapshot directly, without
//! migration files.

use tracing::{info, warn};

use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::driver::MigrationDriver;
use crate::error::MigrateResult;
use crate::operation::Operation;
use crate::plan::{drop_all, plan};
use crate::resolve::{Decision, ResolveOptions};
use crate::snapshot::Snapshot;
use crate::storage::MigrationStorage;

/// Options for [`push`].
#[derive(Clone, Copy, Default)]
pub struct PushOptions<'a> {
    /// How changes needing a decision are settled.
    pub resolve: ResolveOptions<'a>,
    /// Compute the plan without executing it.
    pub dry_run: bool,
    /// Drop every table and enum first, then clear tracking and file state.
    pub force_reset: bool,
}

impl<'a> PushOptions<'a> {
    /// Options resolving with `resolve`.
    pub fn new(resolve: ResolveOptions<'a>) -> Self {
        Self {
            resolve,
            ..Self::default()
        }
    }

    /// Preview only.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Start from an empty database.
    pub fn force_reset(mut self, force_reset: bool) -> Self {
        self.force_reset = force_reset;
        self
    }
}

/// Outcome of [`push`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushResult {
    /// Operations in execution order.
    pub operations: Vec<Operation>,
    /// Whether anything was executed.
    pub applied: bool,
    /// Every statement, executed or previewed.
    pub sql: Vec<String>,
    /// Decisions taken while resolving.
    pub decisions: Vec<Decision>,
}

/// Push `desired` to the database behind `ctx`.
///
/// Enum value additions run on their own before the transaction when the
/// driver cannot add them transactionally; everything else runs in one
/// transaction.
pub async fn push<C: Connection, D: MigrationDriver>(
    ctx: &mut ExecutionContext<C, D>,
    storage: Option<&dyn MigrationStorage>,
    desired: &Snapshot,
    options: &PushOptions<'_>,
) -> MigrateResult<PushResult> {
    if options.dry_run {
        return preview(ctx, desired, options).await;
    }

    ctx.with_lock(async |ctx| {
        let mut current = ctx.introspect().await?;
        let mut sql = Vec::new();

        if options.force_reset {
            let (dropped, statements) = drop_all(ctx.driver(), &current)?;
            warn!(count = dropped.len(), "force reset: dropping all tables and enums");
            ctx.transaction(async |ctx| {
                ctx.execute_all(&statements).await?;
                ctx.clear_tracking().await
            })
            .await?;
            if let Some(storage) = storage {
                storage.clear_state().await?;
            }
            sql.extend(statements);
            current = ctx.introspect().await?;
        }

        let plan = plan(ctx.driver(), &current, desired, &options.resolve)?;
        if plan.is_empty() {
            info!("schema is up to date");
            return Ok(PushResult {
                applied: options.force_reset,
                sql,
                decisions: plan.decisions,
                ..PushResult::default()
            });
        }

        let standalone_additions = !ctx.driver().supports_add_enum_value_in_transaction();
        let (standalone, transactional) = plan.split_standalone(standalone_additions);
        ctx.execute_all(&standalone).await?;
        ctx.transaction(async |ctx| ctx.execute_all(&transactional).await)
            .await?;

        info!(
            operations = plan.steps.len(),
            statements = standalone.len() + transactional.len(),
            "schema pushed"
        );
        sql.extend(standalone);
        sql.extend(transactional);
        Ok(PushResult {
            operations: plan.operations(),
            applied: true,
            sql,
            decisions: plan.decisions,
        })
    })
    .await
}

async fn preview<C: Connection, D: MigrationDriver>(
    ctx: &mut ExecutionContext<C, D>,
    desired: &Snapshot,
    options: &PushOptions<'_>,
) -> MigrateResult<PushResult> {
    let mut current = ctx.introspect().await?;
    let mut sql = Vec::new();
    if options.force_reset {
        let (_, statements) = drop_all(ctx.driver(), &current)?;
        sql.extend(statements);
        current = Snapshot::empty();
    }

    let resolve = options.resolve.dry_run(true);
    let plan = plan(ctx.driver(), &current, desired, &resolve)?;
    sql.extend(plan.statements());
    info!(operations = plan.steps.len(), "push preview");

    Ok(PushResult {
        operations: plan.operations(),
        applied: false,
        sql,
        decisions: plan.decisions,
    })
}
