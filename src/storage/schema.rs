//! Baseline database schema.
//!
//! Applied by the migration runner when the base table set is absent. Later
//! changes ship as `NNN_name.sql` files in the migrations directory; this
//! script is the known-good starting point.

use rusqlite::Connection;

use crate::error::{IndexError, IndexResult};

/// Full DDL for a fresh database. Multi-statement; executed as one batch.
///
/// `indexed_files_fts` is an external-content FTS5 table kept in sync by
/// triggers. File rows must be written with `ON CONFLICT ... DO UPDATE`
/// rather than `INSERT OR REPLACE`: REPLACE deletes conflicting rows without
/// firing the delete trigger unless recursive triggers are on, which would
/// desynchronize the FTS index.
pub const BASELINE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    org_id TEXT,
    name TEXT NOT NULL,
    full_name TEXT NOT NULL UNIQUE,
    git_url TEXT,
    default_branch TEXT NOT NULL DEFAULT 'main',
    last_indexed_at TEXT,
    created_at TEXT,
    updated_at TEXT,
    metadata TEXT DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS indexed_files (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    content TEXT NOT NULL,
    language TEXT,
    size_bytes INTEGER,
    content_hash TEXT,
    indexed_at TEXT,
    metadata TEXT DEFAULT '{}',
    UNIQUE(repository_id, path)
);

CREATE INDEX IF NOT EXISTS idx_indexed_files_repository ON indexed_files(repository_id);
CREATE INDEX IF NOT EXISTS idx_indexed_files_indexed_at ON indexed_files(indexed_at);

CREATE VIRTUAL TABLE IF NOT EXISTS indexed_files_fts USING fts5(
    path,
    content,
    content='indexed_files',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS indexed_files_fts_ai AFTER INSERT ON indexed_files BEGIN
    INSERT INTO indexed_files_fts(rowid, path, content)
    VALUES (new.rowid, new.path, new.content);
END;

CREATE TRIGGER IF NOT EXISTS indexed_files_fts_ad AFTER DELETE ON indexed_files BEGIN
    INSERT INTO indexed_files_fts(indexed_files_fts, rowid, path, content)
    VALUES ('delete', old.rowid, old.path, old.content);
END;

CREATE TRIGGER IF NOT EXISTS indexed_files_fts_au AFTER UPDATE ON indexed_files BEGIN
    INSERT INTO indexed_files_fts(indexed_files_fts, rowid, path, content)
    VALUES ('delete', old.rowid, old.path, old.content);
    INSERT INTO indexed_files_fts(rowid, path, content)
    VALUES (new.rowid, new.path, new.content);
END;

CREATE TABLE IF NOT EXISTS indexed_symbols (
    id TEXT PRIMARY KEY,
    file_id TEXT NOT NULL REFERENCES indexed_files(id) ON DELETE CASCADE,
    repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN (
        'function', 'class', 'interface', 'type', 'variable', 'constant',
        'method', 'property', 'module', 'namespace', 'enum', 'enum_member'
    )),
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    signature TEXT,
    documentation TEXT,
    metadata TEXT DEFAULT '{}',
    created_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_indexed_symbols_file ON indexed_symbols(file_id);
CREATE INDEX IF NOT EXISTS idx_indexed_symbols_name ON indexed_symbols(name);
CREATE INDEX IF NOT EXISTS idx_indexed_symbols_repository ON indexed_symbols(repository_id);

CREATE TABLE IF NOT EXISTS indexed_references (
    id TEXT PRIMARY KEY,
    file_id TEXT NOT NULL REFERENCES indexed_files(id) ON DELETE CASCADE,
    repository_id TEXT NOT NULL,
    symbol_name TEXT NOT NULL,
    target_symbol_id TEXT REFERENCES indexed_symbols(id) ON DELETE SET NULL,
    target_file_path TEXT,
    line_number INTEGER NOT NULL,
    column_number INTEGER DEFAULT 0,
    reference_type TEXT NOT NULL CHECK(reference_type IN (
        'import', 'call', 'extends', 'implements', 'property_access',
        'type_reference', 'variable_reference', 're_export', 'export_all',
        'dynamic_import'
    )),
    metadata TEXT DEFAULT '{}',
    created_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_indexed_references_file ON indexed_references(file_id);
CREATE INDEX IF NOT EXISTS idx_indexed_references_target ON indexed_references(target_symbol_id);
CREATE INDEX IF NOT EXISTS idx_indexed_references_name ON indexed_references(symbol_name);

CREATE TABLE IF NOT EXISTS dependency_graph (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL,
    from_file_id TEXT,
    to_file_id TEXT,
    from_symbol_id TEXT,
    to_symbol_id TEXT,
    dependency_type TEXT NOT NULL CHECK(dependency_type IN ('file_import', 'symbol_usage')),
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_dependency_graph_repository ON dependency_graph(repository_id);
CREATE INDEX IF NOT EXISTS idx_dependency_graph_from_file ON dependency_graph(from_file_id);
CREATE INDEX IF NOT EXISTS idx_dependency_graph_to_file ON dependency_graph(to_file_id);
CREATE INDEX IF NOT EXISTS idx_dependency_graph_from_symbol ON dependency_graph(from_symbol_id);
CREATE INDEX IF NOT EXISTS idx_dependency_graph_to_symbol ON dependency_graph(to_symbol_id);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    org_id TEXT,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT,
    updated_at TEXT,
    metadata TEXT DEFAULT '{}',
    UNIQUE(user_id, name),
    UNIQUE(org_id, name)
);

CREATE TABLE IF NOT EXISTS project_repositories (
    id TEXT PRIMARY KEY,
    project_id TEXT REFERENCES projects(id) ON DELETE CASCADE,
    repository_id TEXT REFERENCES repositories(id) ON DELETE CASCADE,
    added_at TEXT,
    UNIQUE(project_id, repository_id)
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now')),
    checksum TEXT
);
"#;

/// True when the base table set is present.
pub fn schema_exists(conn: &Connection) -> IndexResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name IN ('repositories', 'indexed_files', 'indexed_symbols')",
            [],
            |row| row.get(0),
        )
        .map_err(IndexError::from_sqlite)?;
    Ok(count == 3)
}

/// Apply the baseline schema. Idempotent.
pub fn ensure_schema(conn: &Connection) -> IndexResult<()> {
    conn.execute_batch(BASELINE_SCHEMA)
        .map_err(IndexError::from_sqlite)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn baseline_schema_applies_cleanly_and_is_idempotent() {
        let conn = open_memory();
        assert!(!schema_exists(&conn).unwrap());
        ensure_schema(&conn).unwrap();
        assert!(schema_exists(&conn).unwrap());
        // Second application is a no-op
        ensure_schema(&conn).unwrap();
    }

    #[test]
    fn kind_check_constraint_rejects_unknown_values() {
        let conn = open_memory();
        ensure_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO repositories (id, name, full_name) VALUES ('r1', 'x', 'a/x')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO indexed_files (id, repository_id, path, content) VALUES ('f1', 'r1', 'a.ts', '')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO indexed_symbols (id, file_id, repository_id, name, kind, line_start, line_end)
             VALUES ('s1', 'f1', 'r1', 'x', 'gadget', 1, 1)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn fts_triggers_track_inserts_updates_and_deletes() {
        let conn = open_memory();
        ensure_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO repositories (id, name, full_name) VALUES ('r1', 'x', 'a/x')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO indexed_files (id, repository_id, path, content)
             VALUES ('f1', 'r1', 'src/auth.ts', 'function authenticate() {}')",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM indexed_files_fts WHERE indexed_files_fts MATCH '\"authenticate\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        conn.execute(
            "UPDATE indexed_files SET content = 'function verify() {}' WHERE id = 'f1'",
            [],
        )
        .unwrap();
        let stale: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM indexed_files_fts WHERE indexed_files_fts MATCH '\"authenticate\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stale, 0);
        let fresh: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM indexed_files_fts WHERE indexed_files_fts MATCH '\"verify\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(fresh, 1);

        conn.execute("DELETE FROM indexed_files WHERE id = 'f1'", []).unwrap();
        let gone: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM indexed_files_fts WHERE indexed_files_fts MATCH '\"verify\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(gone, 0);
    }

    #[test]
    fn deleting_a_symbol_nulls_reference_targets() {
        let conn = open_memory();
        ensure_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO repositories (id, name, full_name) VALUES ('r1', 'x', 'a/x');
             INSERT INTO indexed_files (id, repository_id, path, content) VALUES ('f1', 'r1', 'a.ts', '');
             INSERT INTO indexed_symbols (id, file_id, repository_id, name, kind, line_start, line_end)
                 VALUES ('s1', 'f1', 'r1', 'foo', 'function', 1, 1);
             INSERT INTO indexed_references (id, file_id, repository_id, symbol_name, target_symbol_id, line_number, reference_type)
                 VALUES ('x1', 'f1', 'r1', 'foo', 's1', 2, 'call');",
        )
        .unwrap();

        conn.execute("DELETE FROM indexed_symbols WHERE id = 's1'", []).unwrap();

        let (count, target): (i64, Option<String>) = conn
            .query_row(
                "SELECT COUNT(*), MAX(target_symbol_id) FROM indexed_references WHERE id = 'x1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        // The reference survives with a nulled target link
        assert_eq!(count, 1);
        assert!(target.is_none());
    }
}
