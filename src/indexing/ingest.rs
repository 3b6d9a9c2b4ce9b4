//! Atomic ingestion: one IMMEDIATE write transaction persisting files,
//! symbols, references, and dependency edges.
//!
//! Per-item problems (a symbol whose file is missing from the batch, an
//! edge endpoint that never materialized) are logged and skipped; anything
//! the database rejects aborts the whole transaction and rolls back.

use rusqlite::{Transaction, params};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::extract::{ExtractedReference, ExtractedSymbol};
use crate::storage::ConnectionPool;
use crate::types::{
    DependencyKind, FileMetadata, Repository, SymbolMetadata, edge_id, file_id, now_iso8601,
    reference_id, sha256_hex, symbol_id, symbol_key,
};

/// Cooperative cancellation for an ingestion run. Checked before BEGIN and
/// between steps; a transaction already past its last checkpoint commits.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn checkpoint(&self) -> IndexResult<()> {
        if self.is_cancelled() {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One source file prepared for ingestion.
#[derive(Debug, Clone)]
pub struct IngestFile {
    /// Project-relative path with `/` separators
    pub path: String,
    pub content: String,
    /// Value for the `language` column; `None` for content-only files
    pub language: Option<String>,
    pub metadata: FileMetadata,
}

/// A reference after cross-file linking: the extractor's output plus the
/// target the linker found for it, when any.
#[derive(Debug, Clone)]
pub struct LinkedReference {
    pub reference: ExtractedReference,
    /// `"<file_path>::<name>::<line_start>"` of the resolved target symbol
    pub target_key: Option<String>,
    /// Set for inter-file references only
    pub target_file_path: Option<String>,
}

/// A dependency edge expressed in paths and symbol keys; ids are assigned
/// during the transaction.
#[derive(Debug, Clone)]
pub struct EdgeHint {
    pub kind: DependencyKind,
    pub from_file: Option<String>,
    pub to_file: Option<String>,
    pub from_symbol_key: Option<String>,
    pub to_symbol_key: Option<String>,
}

/// Everything one indexing run wants persisted.
#[derive(Debug)]
pub struct IngestBatch {
    pub repository: Repository,
    pub files: Vec<IngestFile>,
    /// Extracted symbols keyed by file path
    pub symbols: HashMap<String, Vec<ExtractedSymbol>>,
    /// Linked references keyed by source file path
    pub references: HashMap<String, Vec<LinkedReference>>,
    pub edges: Vec<EdgeHint>,
}

/// Counts returned from an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub repository_id: String,
    pub files_indexed: usize,
    pub symbols_extracted: usize,
    pub references_found: usize,
    pub dependencies_extracted: usize,
}

/// Persists one batch in one IMMEDIATE transaction.
pub struct Ingestor<'a> {
    pool: &'a ConnectionPool,
}

impl<'a> Ingestor<'a> {
    pub fn new(pool: &'a ConnectionPool) -> Self {
        Self { pool }
    }

    /// Run the full ingestion transaction. On any error the transaction
    /// rolls back and nothing of the batch is visible.
    pub fn ingest(
        &self,
        batch: &IngestBatch,
        cancel: Option<&CancellationToken>,
    ) -> IndexResult<IngestStats> {
        if let Some(token) = cancel {
            token.checkpoint()?;
        }

        self.pool.write_transaction(|tx| {
            let mut stats = IngestStats {
                repository_id: batch.repository.id.clone(),
                ..Default::default()
            };

            upsert_repository(tx, &batch.repository)?;

            // Step 2-3: upsert files, build path -> id map
            let mut file_ids: HashMap<&str, String> = HashMap::new();
            for file in &batch.files {
                let id = upsert_file(tx, &batch.repository.id, file)?;
                file_ids.insert(file.path.as_str(), id);
                stats.files_indexed += 1;
            }
            checkpoint(cancel)?;

            // Step 4: symbols, building key -> id for reference linking
            let mut symbol_ids: HashMap<String, String> = HashMap::new();
            for (path, symbols) in sorted(&batch.symbols) {
                let Some(fid) = file_ids.get(path.as_str()) else {
                    warn!("Skipping {} symbols for unknown file '{path}'", symbols.len());
                    continue;
                };
                // Replaced in full on every re-index
                tx.execute("DELETE FROM indexed_symbols WHERE file_id = ?1", params![fid])
                    .map_err(IndexError::from_sqlite)?;
                for symbol in symbols {
                    let sid = insert_symbol(tx, &batch.repository.id, fid, symbol)?;
                    symbol_ids.insert(symbol_key(path, &symbol.name, symbol.line_start), sid);
                    stats.symbols_extracted += 1;
                }
            }
            checkpoint(cancel)?;

            // Step 5: delete-then-insert references per file
            for (path, references) in sorted(&batch.references) {
                let Some(fid) = file_ids.get(path.as_str()) else {
                    warn!(
                        "Skipping {} references for unknown file '{path}'",
                        references.len()
                    );
                    continue;
                };
                tx.execute(
                    "DELETE FROM indexed_references WHERE file_id = ?1",
                    params![fid],
                )
                .map_err(IndexError::from_sqlite)?;
                for (ordinal, linked) in references.iter().enumerate() {
                    insert_reference(tx, &batch.repository.id, fid, linked, &symbol_ids, ordinal)?;
                    stats.references_found += 1;
                }
            }
            checkpoint(cancel)?;

            // Step 6: dependency edges, rebuilt for the repository
            tx.execute(
                "DELETE FROM dependency_graph WHERE repository_id = ?1",
                params![batch.repository.id],
            )
            .map_err(IndexError::from_sqlite)?;
            for hint in &batch.edges {
                if insert_edge(tx, &batch.repository.id, hint, &file_ids, &symbol_ids)? {
                    stats.dependencies_extracted += 1;
                }
            }

            debug!(
                "Ingested {} files, {} symbols, {} references, {} edges",
                stats.files_indexed,
                stats.symbols_extracted,
                stats.references_found,
                stats.dependencies_extracted
            );
            Ok(stats)
        })
    }
}

fn checkpoint(cancel: Option<&CancellationToken>) -> IndexResult<()> {
    match cancel {
        Some(token) => token.checkpoint(),
        None => Ok(()),
    }
}

/// Deterministic iteration order over a path-keyed map.
fn sorted<V>(map: &HashMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

/// Update-then-insert: the row is keyed both by its deterministic id and by
/// the unique full name, so a single UPSERT could trip whichever unique
/// index SQLite checks first. The two-statement form is unambiguous.
fn upsert_repository(tx: &Transaction<'_>, repository: &Repository) -> IndexResult<()> {
    let now = now_iso8601();
    let updated = tx
        .execute(
            "UPDATE repositories SET name = ?2, last_indexed_at = ?3, updated_at = ?3
             WHERE id = ?1",
            params![repository.id, repository.name, now],
        )
        .map_err(IndexError::from_sqlite)?;
    if updated == 0 {
        tx.execute(
            "INSERT INTO repositories (id, name, full_name, default_branch, last_indexed_at, created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5, ?6)",
            params![
                repository.id,
                repository.name,
                repository.full_name,
                repository.default_branch,
                now,
                serde_json::to_string(&repository.metadata)?,
            ],
        )
        .map_err(IndexError::from_sqlite)?;
    }
    Ok(())
}

/// Upsert on `(repository_id, path)` as update-then-insert. REPLACE would
/// bypass the FTS delete trigger; the UPDATE form fires the sync trigger
/// and sidesteps the double unique constraint (deterministic id plus the
/// path pair point at the same row). Re-indexing the same path yields the
/// same id.
fn upsert_file(tx: &Transaction<'_>, repository_id: &str, file: &IngestFile) -> IndexResult<String> {
    let id = file_id(repository_id, &file.path);
    let content_hash = sha256_hex(file.content.as_bytes());
    let now = now_iso8601();
    let metadata = serde_json::to_string(&file.metadata)?;
    let updated = tx
        .execute(
            "UPDATE indexed_files SET content = ?3, language = ?4, size_bytes = ?5,
                 content_hash = ?6, indexed_at = ?7, metadata = ?8
             WHERE repository_id = ?1 AND path = ?2",
            params![
                repository_id,
                file.path,
                file.content,
                file.language,
                file.content.len() as i64,
                content_hash,
                now,
                metadata,
            ],
        )
        .map_err(IndexError::from_sqlite)?;
    if updated == 0 {
        tx.execute(
            "INSERT INTO indexed_files (id, repository_id, path, content, language, size_bytes, content_hash, indexed_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                repository_id,
                file.path,
                file.content,
                file.language,
                file.content.len() as i64,
                content_hash,
                now,
                metadata,
            ],
        )
        .map_err(IndexError::from_sqlite)?;
    }
    Ok(id)
}

fn insert_symbol(
    tx: &Transaction<'_>,
    repository_id: &str,
    fid: &str,
    symbol: &ExtractedSymbol,
) -> IndexResult<String> {
    let id = symbol_id(fid, &symbol.name, symbol.line_start);
    let metadata = SymbolMetadata {
        is_exported: symbol.is_exported,
        is_async: symbol.is_async,
        access_modifier: symbol.access_modifier,
        generic_params: symbol.generic_params.clone(),
        column_start: symbol.column_start,
        column_end: symbol.column_end,
        fallback: symbol.fallback,
    };
    tx.execute(
        "INSERT OR REPLACE INTO indexed_symbols
             (id, file_id, repository_id, name, kind, line_start, line_end, signature, documentation, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            fid,
            repository_id,
            symbol.name,
            symbol.kind.as_str(),
            symbol.line_start,
            symbol.line_end,
            symbol.signature,
            symbol.documentation,
            serde_json::to_string(&metadata)?,
            now_iso8601(),
        ],
    )
    .map_err(IndexError::from_sqlite)?;
    Ok(id)
}

/// Insert one reference, resolving its target key against the symbols of
/// this batch. Unresolved keys leave the target link null; the reference is
/// stored either way. When the linker resolved a cross-file target, the
/// stored `symbol_name` is the full target key and the bare name moves to
/// metadata.
fn insert_reference(
    tx: &Transaction<'_>,
    repository_id: &str,
    fid: &str,
    linked: &LinkedReference,
    symbol_ids: &HashMap<String, String>,
    ordinal: usize,
) -> IndexResult<()> {
    let reference = &linked.reference;
    let target_symbol_id = linked
        .target_key
        .as_ref()
        .and_then(|key| symbol_ids.get(key))
        .cloned();

    let mut metadata = reference.metadata.clone();
    if let Some((name, line)) = &reference.containing {
        metadata.containing_symbol = Some(format!("{name}::{line}"));
    }
    let stored_name = match (&linked.target_key, &linked.target_file_path) {
        (Some(key), Some(_)) => {
            metadata.imported_name = Some(reference.name.clone());
            key.clone()
        }
        _ => reference.name.clone(),
    };

    let id = reference_id(fid, &reference.name, reference.line, reference.column, ordinal);
    tx.execute(
        "INSERT OR REPLACE INTO indexed_references
             (id, file_id, repository_id, symbol_name, target_symbol_id, target_file_path,
              line_number, column_number, reference_type, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            fid,
            repository_id,
            stored_name,
            target_symbol_id,
            linked.target_file_path,
            reference.line,
            reference.column,
            reference.kind.as_str(),
            serde_json::to_string(&metadata)?,
            now_iso8601(),
        ],
    )
    .map_err(IndexError::from_sqlite)?;
    Ok(())
}

/// Insert one edge when both endpoints materialized; skip (with a warning)
/// otherwise. Returns whether a row was written.
fn insert_edge(
    tx: &Transaction<'_>,
    repository_id: &str,
    hint: &EdgeHint,
    file_ids: &HashMap<&str, String>,
    symbol_ids: &HashMap<String, String>,
) -> IndexResult<bool> {
    let from_file_id = hint
        .from_file
        .as_deref()
        .and_then(|path| file_ids.get(path))
        .cloned();
    let to_file_id = hint
        .to_file
        .as_deref()
        .and_then(|path| file_ids.get(path))
        .cloned();
    let from_symbol_id = hint
        .from_symbol_key
        .as_deref()
        .and_then(|key| symbol_ids.get(key))
        .cloned();
    let to_symbol_id = hint
        .to_symbol_key
        .as_deref()
        .and_then(|key| symbol_ids.get(key))
        .cloned();

    let (from, to) = match hint.kind {
        DependencyKind::FileImport => (from_file_id.clone(), to_file_id.clone()),
        DependencyKind::SymbolUsage => (
            from_symbol_id.clone().or_else(|| from_file_id.clone()),
            to_symbol_id.clone(),
        ),
    };
    let (Some(from), Some(to)) = (from, to) else {
        warn!("Skipping dependency edge with unresolved endpoint: {hint:?}");
        return Ok(false);
    };

    // File endpoints stay null on symbol-level edges whose source resolved
    // to a concrete symbol; otherwise the file stands in for the source.
    let (row_from_file, row_from_symbol) = match hint.kind {
        DependencyKind::FileImport => (from_file_id, None),
        DependencyKind::SymbolUsage if from_symbol_id.is_some() => (None, from_symbol_id),
        DependencyKind::SymbolUsage => (from_file_id, None),
    };
    let (row_to_file, row_to_symbol) = match hint.kind {
        DependencyKind::FileImport => (to_file_id, None),
        DependencyKind::SymbolUsage => (None, to_symbol_id),
    };

    let id = edge_id(repository_id, &from, &to, hint.kind);
    tx.execute(
        "INSERT OR REPLACE INTO dependency_graph
             (id, repository_id, from_file_id, to_file_id, from_symbol_id, to_symbol_id, dependency_type, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '{}')",
        params![
            id,
            repository_id,
            row_from_file,
            row_to_file,
            row_from_symbol,
            row_to_symbol,
            hint.kind.as_str(),
        ],
    )
    .map_err(IndexError::from_sqlite)?;
    Ok(true)
}
