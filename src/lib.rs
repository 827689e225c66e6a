//! # Sluice
//!
//! Schema migrations for PostgreSQL and SQLite.
//!
//! Sluice compares the schema you want with the schema a database has,
//! turns the difference into ordered DDL, and runs it in a transaction.
//! Changes that can lose data or that could mean two different things are
//! never guessed: a resolver or a policy decides them.
//!
//! Two ways to migrate:
//! - **Push** applies the difference straight to a live database.
//! - **Migration files** are generated into a directory with a journal and
//!   applied, rolled back, reset or squashed later.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//! use sluice::sqlite::{SqliteConnection, SqliteDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = SqliteConnection::open("./app.db").await?;
//!     let config = MigrateConfig::new().migrations_dir("./migrations");
//!     let mut engine = MigrationEngine::new(conn, SqliteDriver::new(), config)?;
//!
//!     let desired = Snapshot::empty().with_table(
//!         TableDef::new("user")
//!             .column(ColumnDef::new("id", "integer"))
//!             .primary_key(PrimaryKeyDef::new(["id"])),
//!     );
//!
//!     engine.generate(&desired, &GenerateOptions::new("init")).await?;
//!     let result = engine.apply(&ApplyOptions::default()).await?;
//!     println!("applied {} migrations", result.applied.len());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The migration engine, snapshot model and workflows.
pub mod migrate {
    pub use sluice_migrate::*;
}

/// PostgreSQL driver.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use sluice_postgres::*;
}

/// SQLite driver.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use sluice_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use sluice_migrate::{
        ApplyOptions, ColumnDef, Connection, DownTarget, EnumDef, ForeignKeyDef,
        GenerateOptions, IndexDef, MigrateConfig, MigrationDriver, MigrationEngine,
        MigrationError, PrimaryKeyDef, PushOptions, ResolutionPolicy, ResolveOptions, Snapshot,
        SquashOptions, TableDef,
    };
}

// Re-export key types at the crate root
pub use sluice_migrate::{MigrateResult, MigrationEngine, MigrationError, Snapshot};
