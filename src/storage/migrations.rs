//! Schema migration runner with drift detection.
//!
//! At writer startup: when the base table set is absent the baseline schema
//! applies from the known script; otherwise the configured migrations
//! directory is scanned for `NNN_name.sql` files. Each unapplied file runs
//! inside its own IMMEDIATE transaction and is recorded in
//! `schema_migrations` with the SHA-256 of its exact text. A recorded
//! migration whose file now hashes differently is **drift**: reported,
//! never auto-corrected. Legacy rows without a checksum get one backfilled.

use regex::Regex;
use rusqlite::{Connection, TransactionBehavior, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::storage::schema;
use crate::types::sha256_hex;

/// Outcome of one runner pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    /// Migrations applied this pass
    pub applied: Vec<String>,
    /// Recorded migrations whose file content no longer matches its checksum
    pub drift: Vec<String>,
    /// Legacy rows that had their checksum backfilled
    pub backfilled: Vec<String>,
    /// The error that stopped the pass, if any
    pub errors: Vec<String>,
}

impl MigrationReport {
    pub fn drift_detected(&self) -> bool {
        !self.drift.is_empty()
    }
}

/// A migration file discovered on disk.
#[derive(Debug, Clone)]
struct MigrationFile {
    /// Decimal prefix, used for ordering
    sequence: u64,
    /// Full file name without extension, e.g. `001_initial_schema`
    name: String,
    path: PathBuf,
}

/// Runs pending migrations and verifies applied ones.
pub struct MigrationRunner {
    migrations_dir: Option<PathBuf>,
}

impl MigrationRunner {
    pub fn new(migrations_dir: Option<PathBuf>) -> Self {
        Self { migrations_dir }
    }

    /// Apply the baseline when the base tables are absent, then process the
    /// migrations directory (when configured).
    pub fn run(&self, conn: &mut Connection) -> IndexResult<MigrationReport> {
        let mut report = MigrationReport::default();

        if !schema::schema_exists(conn)? {
            info!("Base tables absent, applying baseline schema");
            schema::ensure_schema(conn)?;
        }

        let Some(dir) = &self.migrations_dir else {
            return Ok(report);
        };
        if !dir.is_dir() {
            return Ok(report);
        }

        let mut files = discover_migration_files(dir)?;
        files.sort_by(|a, b| a.sequence.cmp(&b.sequence).then(a.name.cmp(&b.name)));

        let recorded = load_recorded(conn)?;

        for file in files {
            let sql = std::fs::read_to_string(&file.path).map_err(|e| IndexError::FileRead {
                path: file.path.clone(),
                source: e,
            })?;
            let checksum = sha256_hex(sql.as_bytes());

            match recorded.get(&file.name) {
                Some(Some(stored)) if *stored == checksum => {
                    // Already applied and intact
                }
                Some(Some(stored)) => {
                    warn!(
                        "Migration drift detected in '{}': recorded {stored}, file now {checksum}",
                        file.name
                    );
                    report.drift.push(file.name.clone());
                    // Drift is reported, not healed. Later migrations still
                    // run; their ordering does not depend on this file's
                    // content.
                }
                Some(None) => {
                    conn.execute(
                        "UPDATE schema_migrations SET checksum = ?1 WHERE name = ?2",
                        params![checksum, file.name],
                    )
                    .map_err(IndexError::from_sqlite)?;
                    report.backfilled.push(file.name.clone());
                }
                None => {
                    if let Err(e) = apply_one(conn, &file, &sql, &checksum) {
                        report.errors.push(format!("{}: {e}", file.name));
                        // A failed statement stops the pass; nothing after
                        // this file is attempted.
                        return Ok(report);
                    }
                    info!("Applied migration '{}'", file.name);
                    report.applied.push(file.name.clone());
                }
            }
        }

        Ok(report)
    }
}

/// Writer-startup entry point used by the pool.
pub fn run_at_startup(conn: &mut Connection, settings: &Settings) -> IndexResult<MigrationReport> {
    let runner = MigrationRunner::new(settings.database.migrations_dir.clone());
    let report = runner.run(conn)?;
    if report.drift_detected() {
        warn!(
            "Schema drift detected in {} migration(s): {:?}",
            report.drift.len(),
            report.drift
        );
    }
    Ok(report)
}

/// Execute one migration inside an IMMEDIATE transaction and record it.
fn apply_one(
    conn: &mut Connection,
    file: &MigrationFile,
    sql: &str,
    checksum: &str,
) -> IndexResult<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(IndexError::from_sqlite)?;
    tx.execute_batch(sql)
        .map_err(|e| IndexError::MigrationFailed {
            name: file.name.clone(),
            reason: e.to_string(),
        })?;
    tx.execute(
        "INSERT INTO schema_migrations (name, checksum) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET checksum = excluded.checksum",
        params![file.name, checksum],
    )
    .map_err(IndexError::from_sqlite)?;
    tx.commit().map_err(IndexError::from_sqlite)?;
    Ok(())
}

/// Recorded migrations: name → checksum (None for legacy rows).
fn load_recorded(conn: &Connection) -> IndexResult<HashMap<String, Option<String>>> {
    let mut stmt = conn
        .prepare("SELECT name, checksum FROM schema_migrations")
        .map_err(IndexError::from_sqlite)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))
        .map_err(IndexError::from_sqlite)?;
    let mut map = HashMap::new();
    for row in rows {
        let (name, checksum) = row.map_err(IndexError::from_sqlite)?;
        map.insert(name, checksum);
    }
    Ok(map)
}

/// Files named `NNN_name.sql` (decimal NNN, one or more digits).
fn discover_migration_files(dir: &Path) -> IndexResult<Vec<MigrationFile>> {
    let pattern = Regex::new(r"^(\d+)_.+\.sql$").expect("static migration file pattern");
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| IndexError::FileRead {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| IndexError::FileRead {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(captures) = pattern.captures(name) else {
            continue;
        };
        let sequence: u64 = captures[1].parse().unwrap_or(u64::MAX);
        files.push(MigrationFile {
            sequence,
            name: name.trim_end_matches(".sql").to_string(),
            path: entry.path(),
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn open_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn baseline_applies_when_tables_absent() {
        let mut conn = open_conn();
        let report = MigrationRunner::new(None).run(&mut conn).unwrap();
        assert!(report.applied.is_empty());
        assert!(schema::schema_exists(&conn).unwrap());
    }

    #[test]
    fn new_migration_files_apply_in_sequence_order() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("002_add_notes.sql"),
            "ALTER TABLE repositories ADD COLUMN notes TEXT;",
        )
        .unwrap();
        fs::write(
            dir.path().join("001_add_tags.sql"),
            "CREATE TABLE tags (id TEXT PRIMARY KEY, label TEXT);",
        )
        .unwrap();

        let mut conn = open_conn();
        let runner = MigrationRunner::new(Some(dir.path().to_path_buf()));
        let report = runner.run(&mut conn).unwrap();
        assert_eq!(report.applied, vec!["001_add_tags", "002_add_notes"]);
        assert!(report.drift.is_empty());

        // Recorded with checksums
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM schema_migrations WHERE checksum IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("001_add_tags.sql"),
            "CREATE TABLE tags (id TEXT PRIMARY KEY);",
        )
        .unwrap();

        let mut conn = open_conn();
        let runner = MigrationRunner::new(Some(dir.path().to_path_buf()));
        runner.run(&mut conn).unwrap();
        let report = runner.run(&mut conn).unwrap();
        assert!(report.applied.is_empty());
        assert!(report.drift.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn modified_migration_is_reported_as_drift_not_reapplied() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("001_add_tags.sql");
        fs::write(&file, "CREATE TABLE tags (id TEXT PRIMARY KEY);").unwrap();

        let mut conn = open_conn();
        let runner = MigrationRunner::new(Some(dir.path().to_path_buf()));
        runner.run(&mut conn).unwrap();

        // Content changes after being applied
        fs::write(&file, "CREATE TABLE tags (id TEXT PRIMARY KEY, label TEXT);").unwrap();
        let report = runner.run(&mut conn).unwrap();
        assert!(report.drift_detected());
        assert_eq!(report.drift, vec!["001_add_tags"]);
        assert!(report.applied.is_empty());

        // Schema unchanged: the extra column was not applied
        let column_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM pragma_table_info('tags')", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(column_count, 1);
    }

    #[test]
    fn legacy_rows_get_checksums_backfilled() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("001_add_tags.sql"),
            "CREATE TABLE tags (id TEXT PRIMARY KEY);",
        )
        .unwrap();

        let mut conn = open_conn();
        schema::ensure_schema(&conn).unwrap();
        // Simulate an entry recorded before checksums existed; the table must
        // also exist so the runner does not try to re-create it.
        conn.execute_batch("CREATE TABLE tags (id TEXT PRIMARY KEY);").unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (name) VALUES ('001_add_tags')",
            [],
        )
        .unwrap();

        let runner = MigrationRunner::new(Some(dir.path().to_path_buf()));
        let report = runner.run(&mut conn).unwrap();
        assert_eq!(report.backfilled, vec!["001_add_tags"]);

        let checksum: Option<String> = conn
            .query_row(
                "SELECT checksum FROM schema_migrations WHERE name = '001_add_tags'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(checksum.is_some());
    }

    #[test]
    fn failing_migration_rolls_back_and_stops_the_pass() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("001_bad.sql"),
            "CREATE TABLE ok_table (id TEXT); THIS IS NOT SQL;",
        )
        .unwrap();
        fs::write(
            dir.path().join("002_never_runs.sql"),
            "CREATE TABLE later_table (id TEXT);",
        )
        .unwrap();

        let mut conn = open_conn();
        let runner = MigrationRunner::new(Some(dir.path().to_path_buf()));
        let report = runner.run(&mut conn).unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("001_bad"));
        assert!(report.applied.is_empty());

        // Neither the partial statement nor the later migration took effect
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('ok_table', 'later_table')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn non_migration_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "not sql").unwrap();
        fs::write(dir.path().join("schema.sql"), "CREATE TABLE x (id TEXT);").unwrap();

        let files = discover_migration_files(dir.path()).unwrap();
        assert!(files.is_empty());
    }
}
