//! SQLite driver for Sluice migrations.
//!
//! This crate provides SQLite support for the migration engine, using
//! `tokio-rusqlite` for asynchronous database access.
//!
//! # Features
//!
//! - Enum columns as `TEXT` with named check constraints
//! - Table rebuilds for changes `ALTER TABLE` cannot express
//! - Foreign keys declared inline in `CREATE TABLE`
//! - Introspection from `sqlite_master` and the `pragma_*` functions
//! - In-memory and file-based databases
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_migrate::{MigrateConfig, MigrationEngine, PushOptions};
//! use sluice_sqlite::{SqliteConnection, SqliteDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = SqliteConnection::open("./app.db").await?;
//!     let mut engine = MigrationEngine::new(conn, SqliteDriver::new(), MigrateConfig::new())?;
//!
//!     let result = engine.push(&desired_schema(), &PushOptions::default()).await?;
//!     println!("{} operations", result.operations.len());
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod ddl;
pub mod driver;
pub mod error;
pub mod introspect;

pub use connection::SqliteConnection;
pub use driver::SqliteDriver;
pub use error::{SqliteError, SqliteResult};
