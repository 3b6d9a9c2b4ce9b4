//! Git-trackable snapshots: JSON-lines export and import of selected
//! tables.
//!
//! One file per table (`<table>.jsonl`, one minified object per line,
//! trailing newline). Exports drop configured sensitive fields, hash their
//! output, and skip writing when nothing changed since the last export.
//! Export state lives in a `.export-state.json` sidecar next to the data.
//! A scheduler thread provides fixed-delay debouncing for repeated export
//! requests.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SnapshotConfig;
use crate::error::{IndexError, IndexResult};
use crate::storage::ConnectionPool;
use crate::types::{now_iso8601, sha256_hex};

/// Sidecar file holding per-table hashes and the last export time.
const STATE_FILE: &str = ".export-state.json";

/// Per-directory export state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExportState {
    #[serde(rename = "lastHashes", default)]
    last_hashes: HashMap<String, String>,
    #[serde(rename = "lastExportAt", default)]
    last_export_at: Option<String>,
}

/// What one export pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOutcome {
    /// Tables whose files were (re)written
    pub written: Vec<String>,
    /// Tables skipped because their content hash was unchanged
    pub skipped: Vec<String>,
}

/// What one import pass did.
#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub inserted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Result of validating a snapshot file without touching the database.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub line_count: usize,
    pub errors: Vec<String>,
}

/// Exports and imports table snapshots.
pub struct SnapshotExporter {
    pool: Arc<ConnectionPool>,
    dir: PathBuf,
    tables: Vec<String>,
    sensitive_fields: HashMap<String, Vec<String>>,
}

impl SnapshotExporter {
    pub fn new(pool: Arc<ConnectionPool>, dir: PathBuf, config: &SnapshotConfig) -> Self {
        Self {
            pool,
            dir,
            tables: config.tables.clone(),
            sensitive_fields: config.sensitive_fields.clone(),
        }
    }

    /// Export every configured table. Unchanged tables are skipped by hash
    /// comparison with the recorded state.
    pub fn export(&self) -> IndexResult<ExportOutcome> {
        std::fs::create_dir_all(&self.dir).map_err(|e| IndexError::FileWrite {
            path: self.dir.clone(),
            source: e,
        })?;
        let mut state = self.load_state();
        let mut outcome = ExportOutcome::default();

        for table in &self.tables {
            validate_identifier(table)?;
            let drop_fields = self
                .sensitive_fields
                .get(table)
                .map(|fields| fields.as_slice())
                .unwrap_or(&[]);
            let lines = self.render_table(table, drop_fields)?;
            let hash = sha256_hex(lines.as_bytes());

            if state.last_hashes.get(table) == Some(&hash) {
                debug!("Snapshot of '{table}' unchanged, skipping");
                outcome.skipped.push(table.clone());
                continue;
            }

            let file_path = self.dir.join(format!("{table}.jsonl"));
            std::fs::write(&file_path, &lines).map_err(|e| IndexError::FileWrite {
                path: file_path,
                source: e,
            })?;
            state.last_hashes.insert(table.clone(), hash);
            outcome.written.push(table.clone());
        }

        state.last_export_at = Some(now_iso8601());
        self.save_state(&state)?;
        info!(
            "Snapshot export: {} written, {} unchanged",
            outcome.written.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    /// Serialize a table to JSON-lines, primary-key order, sensitive fields
    /// removed.
    fn render_table(&self, table: &str, drop_fields: &[String]) -> IndexResult<String> {
        self.pool.read(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT * FROM {table} ORDER BY 1"))
                .map_err(IndexError::from_sqlite)?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(|n| n.to_string()).collect();

            let mut lines = String::new();
            let mut rows = stmt.query([]).map_err(IndexError::from_sqlite)?;
            while let Some(row) = rows.next().map_err(IndexError::from_sqlite)? {
                let mut object = serde_json::Map::new();
                for (idx, name) in column_names.iter().enumerate() {
                    if drop_fields.iter().any(|f| f == name) {
                        continue;
                    }
                    let value = row.get_ref(idx).map_err(IndexError::from_sqlite)?;
                    object.insert(name.clone(), json_value(value));
                }
                lines.push_str(&serde_json::to_string(&serde_json::Value::Object(object))?);
                lines.push('\n');
            }
            Ok(lines)
        })
    }

    /// Import one table's snapshot file by primary key. Malformed lines are
    /// skipped with their errors captured; valid rows land inside one
    /// IMMEDIATE transaction.
    pub fn import_table(&self, table: &str, primary_key: &str) -> IndexResult<ImportOutcome> {
        validate_identifier(table)?;
        validate_identifier(primary_key)?;
        let file_path = self.dir.join(format!("{table}.jsonl"));
        let file = std::fs::File::open(&file_path).map_err(|e| IndexError::FileRead {
            path: file_path.clone(),
            source: e,
        })?;

        let mut rows: Vec<serde_json::Map<String, serde_json::Value>> = Vec::new();
        let mut outcome = ImportOutcome::default();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| IndexError::FileRead {
                path: file_path.clone(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_snapshot_line(&line, primary_key) {
                Ok(object) => rows.push(object),
                Err(reason) => {
                    outcome.skipped += 1;
                    outcome.errors.push(format!("line {}: {reason}", idx + 1));
                }
            }
        }

        let table_columns = self.table_columns(table)?;
        let inserted = self.pool.write_transaction(|tx| {
            let mut inserted = 0usize;
            for object in &rows {
                let columns: Vec<&String> = object
                    .keys()
                    .filter(|key| table_columns.contains(*key))
                    .collect();
                if columns.is_empty() {
                    continue;
                }
                let placeholders: Vec<String> =
                    (1..=columns.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "INSERT OR REPLACE INTO {table} ({}) VALUES ({})",
                    columns
                        .iter()
                        .map(|c| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    placeholders.join(", ")
                );
                let params: Vec<Box<dyn rusqlite::ToSql>> = columns
                    .iter()
                    .map(|column| sql_value(&object[column.as_str()]))
                    .collect();
                tx.execute(&sql, rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())))
                    .map_err(IndexError::from_sqlite)?;
                inserted += 1;
            }
            Ok(inserted)
        })?;

        outcome.inserted = inserted;
        Ok(outcome)
    }

    /// Validate a snapshot file without mutating anything.
    pub fn validate(path: &Path, primary_key: &str) -> ValidationOutcome {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                return ValidationOutcome {
                    valid: false,
                    line_count: 0,
                    errors: vec![format!("cannot open {}: {e}", path.display())],
                };
            }
        };

        let mut line_count = 0usize;
        let mut errors = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    errors.push(format!("line {}: {e}", idx + 1));
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            line_count += 1;
            if let Err(reason) = parse_snapshot_line(&line, primary_key) {
                errors.push(format!("line {}: {reason}", idx + 1));
            }
        }

        ValidationOutcome {
            valid: errors.is_empty(),
            line_count,
            errors,
        }
    }

    fn table_columns(&self, table: &str) -> IndexResult<Vec<String>> {
        self.pool.read(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT name FROM pragma_table_info('{table}')"))
                .map_err(IndexError::from_sqlite)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(IndexError::from_sqlite)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(IndexError::from_sqlite)
        })
    }

    fn load_state(&self) -> ExportState {
        let path = self.dir.join(STATE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Corrupt export state at {}: {e}", path.display());
                ExportState::default()
            }),
            Err(_) => ExportState::default(),
        }
    }

    fn save_state(&self, state: &ExportState) -> IndexResult<()> {
        let path = self.dir.join(STATE_FILE);
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&path, content).map_err(|e| IndexError::FileWrite { path, source: e })
    }
}

/// Parse and validate one snapshot line: a JSON object with a non-null
/// primary key.
fn parse_snapshot_line(
    line: &str,
    primary_key: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    let serde_json::Value::Object(object) = value else {
        return Err("not a JSON object".to_string());
    };
    match object.get(primary_key) {
        None | Some(serde_json::Value::Null) => {
            Err(format!("missing required field '{primary_key}'"))
        }
        Some(_) => Ok(object),
    }
}

/// SQLite value → JSON value for export.
fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(text) => {
            serde_json::Value::String(String::from_utf8_lossy(text).into_owned())
        }
        ValueRef::Blob(blob) => serde_json::Value::String(String::from_utf8_lossy(blob).into_owned()),
    }
}

/// JSON value → SQLite parameter for import. Nested structures persist as
/// stringified JSON, matching how metadata columns are stored.
fn sql_value(value: &serde_json::Value) -> Box<dyn rusqlite::ToSql> {
    match value {
        serde_json::Value::Null => Box::new(None::<String>),
        serde_json::Value::Bool(b) => Box::new(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

/// Reject table/column names that are not plain identifiers before they go
/// anywhere near SQL text.
fn validate_identifier(name: &str) -> IndexResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().is_some_and(|c| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(IndexError::General(format!(
            "Invalid table or column identifier '{name}'"
        )))
    }
}

enum SchedulerMessage {
    Request,
    Shutdown,
}

/// Debounced export scheduler.
///
/// Requests within the debounce window collapse into one export at the end
/// of the window (fixed delay anchored at the first request, not sliding).
pub struct SnapshotScheduler {
    sender: Sender<SchedulerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotScheduler {
    pub fn start(exporter: SnapshotExporter, debounce: Duration) -> Self {
        let (sender, receiver) = unbounded();
        let handle = std::thread::Builder::new()
            .name("kotadb-snapshot".to_string())
            .spawn(move || scheduler_loop(exporter, receiver, debounce))
            .expect("spawning the snapshot scheduler thread");
        Self {
            sender,
            handle: Some(handle),
        }
    }

    /// Ask for an export. Cheap; callers may invoke this on every write.
    pub fn request_export(&self) {
        let _ = self.sender.send(SchedulerMessage::Request);
    }

    /// Stop the scheduler. A pending window is abandoned without exporting.
    pub fn shutdown(mut self) {
        let _ = self.sender.send(SchedulerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        let _ = self.sender.send(SchedulerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn scheduler_loop(
    exporter: SnapshotExporter,
    receiver: Receiver<SchedulerMessage>,
    debounce: Duration,
) {
    loop {
        match receiver.recv() {
            Ok(SchedulerMessage::Request) => {
                // Window opens at the first request and does not slide
                let deadline = Instant::now() + debounce;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match receiver.recv_timeout(remaining) {
                        Ok(SchedulerMessage::Request) => continue,
                        Ok(SchedulerMessage::Shutdown) => return,
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = exporter.export() {
                                warn!("Debounced snapshot export failed: {e}");
                            }
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
            Ok(SchedulerMessage::Shutdown) | Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("indexed_files").is_ok());
        assert!(validate_identifier("users2").is_ok());
        assert!(validate_identifier("2users").is_err());
        assert!(validate_identifier("users; DROP TABLE x").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn snapshot_line_parsing_requires_the_primary_key() {
        assert!(parse_snapshot_line(r#"{"id": "a", "name": "x"}"#, "id").is_ok());
        assert!(parse_snapshot_line(r#"{"name": "x"}"#, "id").is_err());
        assert!(parse_snapshot_line(r#"{"id": null}"#, "id").is_err());
        assert!(parse_snapshot_line("not json", "id").is_err());
        assert!(parse_snapshot_line(r#"[1, 2]"#, "id").is_err());
    }

    #[test]
    fn json_values_round_trip_to_sql_params() {
        // Nested metadata objects persist as stringified JSON
        let nested = serde_json::json!({"dependencies": ["a.ts"]});
        let boxed = sql_value(&nested);
        let rusqlite::types::ToSqlOutput::Borrowed(rusqlite::types::ValueRef::Text(bytes)) =
            boxed.to_sql().unwrap()
        else {
            panic!("expected borrowed text");
        };
        assert!(std::str::from_utf8(bytes).unwrap().contains("dependencies"));
    }
}
