//! # sluice-migrate
//!
//! Schema migration engine for the sluice toolkit.
//!
//! This crate provides:
//! - Snapshot diffing into concrete schema operations
//! - Resolution of destructive, ambiguous and enum-value changes through a
//!   caller resolver or a policy
//! - Dependency ordering of operations
//! - Transactional execution under an advisory lock
//! - A file-based workflow: generate, apply, status, down, reset, squash
//!
//! Dialect specifics (DDL, locking, introspection) live behind
//! [`MigrationDriver`]; `sluice-postgres` and `sluice-sqlite` implement it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────┐   ┌──────────┐   ┌─────────┐   ┌──────────────┐
//! │ Snapshot │──▶│ Differ │──▶│ Resolver │──▶│ Orderer │──▶│ Driver (DDL) │
//! └──────────┘   └────────┘   └──────────┘   └─────────┘   └──────────────┘
//!                                                                 │
//!                        ┌───────────────────┬────────────────────┤
//!                        ▼                   ▼                    ▼
//!                 ┌────────────┐      ┌─────────────┐      ┌────────────┐
//!                 │ Push (live)│      │ Migration   │─────▶│ Apply /    │
//!                 └────────────┘      │ file+journal│      │ Down/Reset │
//!                                     └─────────────┘      └────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use sluice_migrate::{GenerateOptions, ApplyOptions, MigrateConfig, MigrationEngine};
//!
//! async fn migrate(conn: impl Connection, driver: impl MigrationDriver, desired: Snapshot)
//!     -> Result<(), MigrationError>
//! {
//!     let config = MigrateConfig::new().migrations_dir("./migrations");
//!     let mut engine = MigrationEngine::new(conn, driver, config)?;
//!
//!     let generated = engine.generate(&desired, &GenerateOptions::new("add posts")).await?;
//!     println!("wrote {:?}", generated.entry.map(|e| e.file_name()));
//!
//!     let result = engine.apply(&ApplyOptions::default()).await?;
//!     println!("applied {} migrations", result.applied.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! ```text
//! migrations/
//! ├── 0000_init.sql
//! ├── 0001_add-posts.sql
//! ├── 0001_add-posts.down.sql   # optional
//! ├── _journal.json
//! ├── snapshot.json
//! └── archive/                  # squashed files
//! ```
//!
//! ## Resolving Changes
//!
//! Dropping a table, or any change that may lose data, needs approval. A
//! dropped and an added column in the same table may be a rename and is
//! never guessed:
//!
//! ```rust,ignore
//! use sluice_migrate::{AmbiguousChange, AmbiguousResolution, FnResolver, ResolveOptions};
//!
//! let resolver = FnResolver::new().on_ambiguous(|change| match change {
//!     AmbiguousChange::AmbiguousColumn { dropped, added, .. }
//!         if dropped.name == "name" && added.name == "full_name" =>
//!     {
//!         Some(AmbiguousResolution::Rename)
//!     }
//!     _ => None,
//! });
//! let options = ResolveOptions::default().with_resolver(&resolver);
//! ```

pub mod apply;
pub mod config;
pub mod connection;
pub mod context;
pub mod dialect;
pub mod diff;
pub mod down;
pub mod driver;
pub mod engine;
pub mod error;
pub mod file;
pub mod generate;
pub mod history;
pub mod journal;
pub mod logging;
pub mod operation;
pub mod order;
pub mod plan;
pub mod push;
pub mod reset;
pub mod resolve;
pub mod snapshot;
pub mod squash;
pub mod storage;

// Re-exports
pub use apply::{ApplyOptions, ApplyResult, MigrationState, MigrationStatus, StatusReport};
pub use config::{CONFIG_FILE, MigrateConfig};
pub use connection::{Connection, Row};
pub use context::{ExecutionContext, LockGuard};
pub use dialect::Dialect;
pub use diff::{
    AmbiguousChange, DiffResult, EnumValueRemoval, SchemaDiffer, detect_enum_removals, diff,
};
pub use down::{DownResult, DownTarget};
pub use driver::{DdlContext, MigrationDriver, quote_ident, quote_idents, quote_literal};
pub use engine::MigrationEngine;
pub use error::{ErrorCode, MigrateResult, MigrationError};
pub use file::{MigrationFile, ParsedMigration, checksum};
pub use generate::{GenerateOptions, GenerateResult};
pub use history::{AppliedMigration, DEFAULT_LOCK_ID, DEFAULT_TRACKING_TABLE};
pub use journal::{Journal, MigrationEntry};
pub use operation::{EnumValueMapping, Operation, OperationKind};
pub use order::order_operations;
pub use plan::{MigrationPlan, PlannedStep};
pub use push::{PushOptions, PushResult};
pub use reset::ResetResult;
pub use resolve::{
    AmbiguousResolution, DecidedBy, Decision, DestructiveChange, DestructiveResolution,
    EnumResolution, FnResolver, Resolution, ResolutionPolicy, ResolveChange, ResolveOptions,
    ResolvedChanges, Resolver, force_fallback, resolve,
};
pub use snapshot::{
    ColumnDef, EnumColumnRef, EnumDef, ForeignKeyDef, IndexDef, PrimaryKeyDef, Snapshot, TableDef,
    UniqueConstraintDef,
};
pub use squash::{SquashOptions, SquashResult};
pub use storage::{FsStorage, MemoryStorage, MigrationStorage};
