//! Migration runner behavior on disk-backed databases: drift detection,
//! ordering, and repeatability.

use std::fs;
use tempfile::TempDir;

use kotadb_core::storage::{ConnectionPool, MigrationRunner};
use kotadb_core::types::sha256_hex;
use kotadb_core::Settings;

// The tests talk to SQLite directly for assertions
fn open_conn(dir: &TempDir) -> rusqlite::Connection {
    rusqlite::Connection::open(dir.path().join("index.db")).unwrap()
}

#[test]
fn modified_migration_is_drift_and_applies_nothing() {
    let workspace = TempDir::new().unwrap();
    let migrations = workspace.path().join("migrations");
    fs::create_dir_all(&migrations).unwrap();
    let migration_file = migrations.join("001_add_labels.sql");
    fs::write(
        &migration_file,
        "CREATE TABLE labels (id TEXT PRIMARY KEY);",
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.database.readers = 1;
    settings.database.migrations_dir = Some(migrations.clone());

    // First pool startup records the migration with its checksum
    let db_path = workspace.path().join("index.db");
    {
        let _pool = ConnectionPool::open_at(&db_path, &settings).unwrap();
    }

    // The file changes after being applied
    fs::write(
        &migration_file,
        "CREATE TABLE labels (id TEXT PRIMARY KEY, color TEXT);",
    )
    .unwrap();

    let mut conn = rusqlite::Connection::open(&db_path).unwrap();
    let report = MigrationRunner::new(Some(migrations)).run(&mut conn).unwrap();

    assert!(report.drift_detected());
    assert_eq!(report.drift, vec!["001_add_labels"]);
    assert!(report.applied.is_empty());

    // Drift is reported, not healed: the schema still has one column
    let columns: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('labels')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(columns, 1);

    // The recorded checksum is the original file's, untouched
    let stored: String = conn
        .query_row(
            "SELECT checksum FROM schema_migrations WHERE name = '001_add_labels'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(
        stored,
        sha256_hex("CREATE TABLE labels (id TEXT PRIMARY KEY);".as_bytes())
    );
}

#[test]
fn migrations_apply_once_across_repeated_startups() {
    let workspace = TempDir::new().unwrap();
    let migrations = workspace.path().join("migrations");
    fs::create_dir_all(&migrations).unwrap();
    fs::write(
        migrations.join("001_add_labels.sql"),
        "CREATE TABLE labels (id TEXT PRIMARY KEY);",
    )
    .unwrap();
    fs::write(
        migrations.join("002_seed_labels.sql"),
        "INSERT INTO labels (id) VALUES ('core');",
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.database.readers = 1;
    settings.database.migrations_dir = Some(migrations);

    let db_path = workspace.path().join("index.db");
    for _ in 0..3 {
        let _pool = ConnectionPool::open_at(&db_path, &settings).unwrap();
    }

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    // The seed row is there exactly once; re-running did not re-apply
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM labels", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
    let recorded: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
        .unwrap();
    assert_eq!(recorded, 2);
}

#[test]
fn migrations_on_identical_databases_produce_identical_rows() {
    let workspace = TempDir::new().unwrap();
    let migrations = workspace.path().join("migrations");
    fs::create_dir_all(&migrations).unwrap();
    fs::write(
        migrations.join("001_add_labels.sql"),
        "CREATE TABLE labels (id TEXT PRIMARY KEY, color TEXT DEFAULT 'grey');",
    )
    .unwrap();
    fs::write(
        migrations.join("002_seed.sql"),
        "INSERT INTO labels (id, color) VALUES ('core', 'blue'), ('edge', 'red');",
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.database.readers = 1;
    settings.database.migrations_dir = Some(migrations);

    let collect = |db: &std::path::Path| -> Vec<(String, String)> {
        let conn = rusqlite::Connection::open(db).unwrap();
        let mut stmt = conn
            .prepare("SELECT id, color FROM labels ORDER BY id")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        rows.map(Result::unwrap).collect()
    };

    let db_a = workspace.path().join("a.db");
    let db_b = workspace.path().join("b.db");
    {
        let _pool = ConnectionPool::open_at(&db_a, &settings).unwrap();
    }
    {
        let _pool = ConnectionPool::open_at(&db_b, &settings).unwrap();
    }

    assert_eq!(collect(&db_a), collect(&db_b));
}

#[test]
fn pool_startup_applies_baseline_without_a_migrations_dir() {
    let workspace = TempDir::new().unwrap();
    let settings = {
        let mut s = Settings::default();
        s.database.readers = 1;
        s
    };
    let db_path = workspace.path().join("index.db");
    let _pool = ConnectionPool::open_at(&db_path, &settings).unwrap();

    let conn = open_conn(&workspace);
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
             AND name IN ('repositories', 'indexed_files', 'indexed_symbols',
                          'indexed_references', 'dependency_graph', 'projects',
                          'project_repositories', 'schema_migrations')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tables, 8);
}
