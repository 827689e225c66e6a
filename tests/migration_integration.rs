//! Integration tests for the migration file workflow.
//!
//! Each test writes migrations into a temporary directory and runs them
//! against an in-memory SQLite database.

use std::path::Path;

use pretty_assertions::assert_eq;
use sluice::migrate::{
    ApplyOptions, ColumnDef, Dialect, DownTarget, ErrorCode, GenerateOptions, IndexDef,
    MigrateConfig, MigrationEngine, MigrationState, PrimaryKeyDef, Snapshot, SquashOptions,
    TableDef,
};
use sluice::sqlite::{SqliteConnection, SqliteDriver};
use tempfile::TempDir;

type Engine = MigrationEngine<SqliteConnection, SqliteDriver>;

fn users() -> TableDef {
    TableDef::new("user")
        .column(ColumnDef::new("id", "integer").auto_increment())
        .column(ColumnDef::new("email", "text"))
        .primary_key(PrimaryKeyDef::new(["id"]))
}

fn posts() -> TableDef {
    TableDef::new("post")
        .column(ColumnDef::new("id", "integer").auto_increment())
        .column(ColumnDef::new("author_id", "integer"))
        .primary_key(PrimaryKeyDef::new(["id"]))
        .index(IndexDef::new("post_author_idx", ["author_id"]))
}

fn comments() -> TableDef {
    TableDef::new("comment")
        .column(ColumnDef::new("id", "integer").auto_increment())
        .column(ColumnDef::new("body", "text").nullable())
        .primary_key(PrimaryKeyDef::new(["id"]))
}

fn v1() -> Snapshot {
    Snapshot::empty().with_table(users())
}

fn v2() -> Snapshot {
    v1().with_table(posts())
}

fn v3() -> Snapshot {
    v2().with_table(comments())
}

async fn engine(dir: &Path) -> Engine {
    let conn = SqliteConnection::open_in_memory().await.unwrap();
    let config = MigrateConfig::new().migrations_dir(dir);
    MigrationEngine::new(conn, SqliteDriver::new(), config).unwrap()
}

/// Generate one migration per schema version.
async fn generate_all(engine: &mut Engine, versions: &[(&str, Snapshot)]) {
    for (name, desired) in versions {
        let result = engine
            .generate(desired, &GenerateOptions::new(*name))
            .await
            .unwrap();
        assert!(result.written);
    }
}

async fn table_names(engine: &mut Engine) -> Vec<String> {
    let live = engine.introspect().await.unwrap();
    let mut names: Vec<String> = live.tables.into_iter().map(|t| t.name).collect();
    names.sort();
    names
}

/// Test generate writes the file, journal and snapshot
#[tokio::test]
async fn test_generate_writes_files() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;

    let result = engine
        .generate(&v1(), &GenerateOptions::new("Create users"))
        .await
        .unwrap();

    let entry = result.entry.unwrap();
    assert_eq!(entry.idx, 0);
    assert_eq!(entry.file_name(), "0000_create-users.sql");
    assert!(dir.path().join("0000_create-users.sql").exists());
    assert!(dir.path().join("_journal.json").exists());
    assert!(dir.path().join("snapshot.json").exists());

    let journal = engine.journal().await.unwrap().unwrap();
    assert_eq!(journal.dialect, Dialect::Sqlite);
    assert_eq!(journal.entries.len(), 1);
    assert_eq!(engine.snapshot().await.unwrap(), Some(v1()));
}

/// Test generating against an unchanged snapshot writes nothing
#[tokio::test]
async fn test_generate_without_changes() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1())]).await;

    let result = engine
        .generate(&v1(), &GenerateOptions::new("again"))
        .await
        .unwrap();
    assert!(result.entry.is_none());
    assert!(!result.written);
    assert_eq!(engine.journal().await.unwrap().unwrap().entries.len(), 1);
}

/// Test preview returns statements without writing
#[tokio::test]
async fn test_preview_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1())]).await;

    let result = engine
        .preview(&v2(), &GenerateOptions::new("add posts"))
        .await
        .unwrap();
    assert!(!result.written);
    assert!(!result.sql.is_empty());
    assert_eq!(result.entry.unwrap().file_name(), "0001_add-posts.sql");
    assert!(!dir.path().join("0001_add-posts.sql").exists());
    assert_eq!(engine.snapshot().await.unwrap(), Some(v1()));
}

/// Test apply runs pending migrations and status tracks them
#[tokio::test]
async fn test_apply_and_status() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1()), ("add posts", v2())]).await;

    assert_eq!(engine.pending().await.unwrap().len(), 2);

    let result = engine.apply(&ApplyOptions::to(0)).await.unwrap();
    assert_eq!(result.applied.len(), 1);
    assert_eq!(result.pending.len(), 1);

    let status = engine.status().await.unwrap();
    let states: Vec<MigrationState> = status.migrations.iter().map(|m| m.state).collect();
    assert_eq!(states, vec![MigrationState::Applied, MigrationState::Pending]);
    assert!(status.migrations[0].applied_at.is_some());

    let result = engine.apply(&ApplyOptions::default()).await.unwrap();
    assert_eq!(result.applied.len(), 1);
    assert!(engine.pending().await.unwrap().is_empty());
    assert_eq!(table_names(&mut engine).await, vec!["post", "user"]);
    assert_eq!(engine.introspect().await.unwrap(), v2());
}

/// Test apply refuses a migration file edited after generation
#[tokio::test]
async fn test_apply_rejects_edited_file() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1())]).await;

    let path = dir.path().join("0000_init.sql");
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, content.replace("\"email\"", "\"mail\"")).unwrap();

    let err = engine.apply(&ApplyOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ChecksumMismatch);
    assert!(table_names(&mut engine).await.is_empty());
}

/// Test a failing migration reports what ran and what did not
#[tokio::test]
async fn test_apply_failure_stops_run() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1()), ("add posts", v2())]).await;

    // A conflicting table makes the second migration fail.
    engine
        .context()
        .execute("CREATE TABLE \"post\" (\"id\" integer)")
        .await
        .unwrap();

    let err = engine.apply(&ApplyOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ApplyFailed);

    let status = engine.status().await.unwrap();
    assert_eq!(status.migrations[0].state, MigrationState::Applied);
    assert_eq!(status.migrations[1].state, MigrationState::Pending);
}

/// Test down rolls back with the down file and re-apply works
#[tokio::test]
async fn test_down_and_reapply() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1()), ("add posts", v2())]).await;
    std::fs::write(
        dir.path().join("0001_add-posts.down.sql"),
        "DROP TABLE \"post\"\n",
    )
    .unwrap();

    engine.apply(&ApplyOptions::default()).await.unwrap();
    let result = engine.down(&DownTarget::Count(1)).await.unwrap();

    assert_eq!(result.rolled_back.len(), 1);
    assert_eq!(result.rolled_back[0].file_name(), "0001_add-posts.sql");
    assert_eq!(table_names(&mut engine).await, vec!["user"]);
    assert_eq!(engine.pending().await.unwrap().len(), 1);

    engine.apply(&ApplyOptions::default()).await.unwrap();
    assert_eq!(table_names(&mut engine).await, vec!["post", "user"]);
}

/// Test down to a target keeps the target applied
#[tokio::test]
async fn test_down_to_target() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(
        &mut engine,
        &[("init", v1()), ("add posts", v2()), ("add comments", v3())],
    )
    .await;
    engine.apply(&ApplyOptions::default()).await.unwrap();

    // No down SQL anywhere: rows are forgotten and tables stay.
    let result = engine.down(&DownTarget::To("init".to_string())).await.unwrap();
    let names: Vec<String> = result.rolled_back.iter().map(|e| e.file_name()).collect();
    assert_eq!(names, vec!["0002_add-comments.sql", "0001_add-posts.sql"]);

    let status = engine.status().await.unwrap();
    assert_eq!(
        status.in_state(MigrationState::Applied).count(),
        1,
        "only init stays applied"
    );
    assert_eq!(table_names(&mut engine).await, vec!["comment", "post", "user"]);
}

/// Test reset drops everything and replays the journal
#[tokio::test]
async fn test_reset_replays_journal() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1()), ("add posts", v2())]).await;
    engine.apply(&ApplyOptions::default()).await.unwrap();
    engine
        .context()
        .execute("INSERT INTO \"user\" (email) VALUES ('a@x'); CREATE TABLE \"stray\" (\"id\" integer)")
        .await
        .unwrap();

    let result = engine.reset().await.unwrap();
    assert_eq!(result.applied.len(), 2);
    assert!(result.dropped.contains(&"stray".to_string()));

    assert_eq!(table_names(&mut engine).await, vec!["post", "user"]);
    let rows = engine
        .context()
        .query("SELECT COUNT(*) AS n FROM \"user\"")
        .await
        .unwrap();
    assert_eq!(rows[0].get("n"), Some("0"));
    assert!(engine.pending().await.unwrap().is_empty());
}

/// Test squash merges applied entries and re-indexes later ones
#[tokio::test]
async fn test_squash_applied_range() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(
        &mut engine,
        &[("init", v1()), ("add posts", v2()), ("add comments", v3())],
    )
    .await;
    engine.apply(&ApplyOptions::default()).await.unwrap();

    let result = engine
        .squash(&SquashOptions::new(0, 1).archive(true))
        .await
        .unwrap();
    assert_eq!(result.squashed_count, 2);
    assert_eq!(result.entry.file_name(), "0000_squash-0-1.sql");

    let journal = engine.journal().await.unwrap().unwrap();
    let files: Vec<String> = journal.entries.iter().map(|e| e.file_name()).collect();
    assert_eq!(files, vec!["0000_squash-0-1.sql", "0001_add-comments.sql"]);
    assert!(dir.path().join("0001_add-comments.sql").exists());
    assert!(!dir.path().join("0002_add-comments.sql").exists());
    assert!(dir.path().join("archive").join("0000_init.sql").exists());

    let status = engine.status().await.unwrap();
    assert!(status.orphaned.is_empty());
    assert_eq!(status.in_state(MigrationState::Applied).count(), 2);
}

/// Test a squashed pending range applies as one migration
#[tokio::test]
async fn test_squash_pending_range_then_apply() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1()), ("add posts", v2())]).await;

    engine
        .squash(&SquashOptions::new(0, 1).name("baseline"))
        .await
        .unwrap();
    let result = engine.apply(&ApplyOptions::default()).await.unwrap();

    assert_eq!(result.applied.len(), 1);
    assert_eq!(result.applied[0].file_name(), "0000_baseline.sql");
    assert_eq!(engine.introspect().await.unwrap(), v2());
}

/// Test squash refuses a partly applied range
#[tokio::test]
async fn test_squash_partly_applied_range() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path()).await;
    generate_all(&mut engine, &[("init", v1()), ("add posts", v2())]).await;
    engine.apply(&ApplyOptions::to(0)).await.unwrap();

    let err = engine.squash(&SquashOptions::new(0, 1)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMigration);
}

/// Test the file workflow needs a migrations directory
#[tokio::test]
async fn test_workflows_require_storage() {
    let conn = SqliteConnection::open_in_memory().await.unwrap();
    let mut engine = MigrationEngine::new(conn, SqliteDriver::new(), MigrateConfig::new()).unwrap();

    let err = engine.apply(&ApplyOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::StorageRequired);
}

/// Test a configured dialect must match the driver
#[tokio::test]
async fn test_dialect_mismatch() {
    let conn = SqliteConnection::open_in_memory().await.unwrap();
    let config = MigrateConfig::new().dialect(Dialect::Postgres);

    let err = MigrationEngine::new(conn, SqliteDriver::new(), config).err().unwrap();
    assert_eq!(err.code(), ErrorCode::DialectMismatch);
}
