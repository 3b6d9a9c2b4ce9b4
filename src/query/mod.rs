//! Read-side operations: full-text search, recent files, path resolution,
//! and bounded transitive dependency queries.
//!
//! Everything here routes through reader connections. Query-path errors
//! propagate; there are no silent empty results. The one deliberate
//! exception is search input that sanitizes to nothing, which yields a
//! neutral empty result instead of an error.

pub mod projects;

use rusqlite::params;

use crate::error::{IndexError, IndexResult};
use crate::graph::{DependencyGraphView, TraversalHit};
use crate::storage::ConnectionPool;
use crate::types::{FileMetadata, Repository, SymbolKind, SymbolMetadata};

/// One full-text search hit, best matches first.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub file_id: String,
    pub repository_id: String,
    pub path: String,
    pub content: String,
    pub language: Option<String>,
    pub size_bytes: i64,
    pub metadata: FileMetadata,
    pub indexed_at: Option<String>,
    /// FTS5 BM25 rank; lower is better
    pub rank: f64,
}

/// A row from the recent-files listing.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub file_id: String,
    pub repository_id: String,
    pub path: String,
    pub language: Option<String>,
    pub size_bytes: i64,
    pub indexed_at: Option<String>,
}

/// Reduce arbitrary user input to a safe FTS5 MATCH expression.
///
/// Tokens split on anything outside `[A-Za-z0-9_]` and each one is double
/// quoted (internal quotes doubled), joined with spaces for an implicit
/// AND. FTS operators (`AND`, `OR`, `NOT`, `NEAR`) become literal quoted
/// terms like everything else. `None` when no token survives.
pub fn sanitize_match_query(input: &str) -> Option<String> {
    let tokens: Vec<String> = input
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Full-text search over `(path, content)`, ordered by relevance.
pub fn search_files(
    pool: &ConnectionPool,
    term: &str,
    repository_id: Option<&str>,
    limit: usize,
) -> IndexResult<Vec<SearchResult>> {
    let Some(match_query) = sanitize_match_query(term) else {
        // Nothing searchable in the input; neutral result, never an error
        return Ok(Vec::new());
    };

    pool.read(|conn| {
        let sql = "SELECT f.id, f.repository_id, f.path, f.content, f.language, f.size_bytes,
                          f.metadata, f.indexed_at, rank
                   FROM indexed_files_fts
                   JOIN indexed_files f ON f.rowid = indexed_files_fts.rowid
                   WHERE indexed_files_fts MATCH ?1
                     AND (?2 IS NULL OR f.repository_id = ?2)
                   ORDER BY rank
                   LIMIT ?3";
        let mut stmt = conn.prepare_cached(sql).map_err(IndexError::from_sqlite)?;
        let rows = stmt
            .query_map(params![match_query, repository_id, limit as i64], |row| {
                Ok(SearchResult {
                    file_id: row.get(0)?,
                    repository_id: row.get(1)?,
                    path: row.get(2)?,
                    content: row.get(3)?,
                    language: row.get(4)?,
                    size_bytes: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    metadata: serde_json::from_str(
                        &row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    )
                    .unwrap_or_default(),
                    indexed_at: row.get(7)?,
                    rank: row.get(8)?,
                })
            })
            .map_err(IndexError::from_sqlite)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::from_sqlite)
    })
}

/// Files ordered by indexed-at, newest first.
pub fn list_recent_files(pool: &ConnectionPool, limit: usize) -> IndexResult<Vec<FileSummary>> {
    pool.read(|conn| {
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, repository_id, path, language, size_bytes, indexed_at
                 FROM indexed_files
                 ORDER BY indexed_at DESC
                 LIMIT ?1",
            )
            .map_err(IndexError::from_sqlite)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(FileSummary {
                    file_id: row.get(0)?,
                    repository_id: row.get(1)?,
                    path: row.get(2)?,
                    language: row.get(3)?,
                    size_bytes: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    indexed_at: row.get(5)?,
                })
            })
            .map_err(IndexError::from_sqlite)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::from_sqlite)
    })
}

/// File id for the unique `(repository, path)` pair.
pub fn resolve_file_path(
    pool: &ConnectionPool,
    repository_id: &str,
    path: &str,
) -> IndexResult<Option<String>> {
    pool.read(|conn| {
        let mut stmt = conn
            .prepare_cached(
                "SELECT id FROM indexed_files WHERE repository_id = ?1 AND path = ?2",
            )
            .map_err(IndexError::from_sqlite)?;
        match stmt.query_row(params![repository_id, path], |row| row.get(0)) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(IndexError::from_sqlite(e)),
        }
    })
}

/// All nodes that transitively depend on the given file or symbol, within
/// `depth` hops. Exactly one of `file_id`/`symbol_id` must be provided.
pub fn query_dependents(
    pool: &ConnectionPool,
    repository_id: &str,
    file_id: Option<&str>,
    symbol_id: Option<&str>,
    depth: u32,
) -> IndexResult<Vec<TraversalHit>> {
    let (view, start) = load_graph(pool, repository_id, file_id, symbol_id)?;
    Ok(view.dependents(&start, depth))
}

/// All nodes the given file or symbol transitively depends on, within
/// `depth` hops.
pub fn query_dependencies(
    pool: &ConnectionPool,
    repository_id: &str,
    file_id: Option<&str>,
    symbol_id: Option<&str>,
    depth: u32,
) -> IndexResult<Vec<TraversalHit>> {
    let (view, start) = load_graph(pool, repository_id, file_id, symbol_id)?;
    Ok(view.dependencies(&start, depth))
}

/// One symbol row as the query surface exposes it.
#[derive(Debug, Clone)]
pub struct SymbolSummary {
    pub symbol_id: String,
    pub file_id: String,
    pub repository_id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub line_start: u32,
    pub line_end: u32,
    pub signature: Option<String>,
    pub documentation: Option<String>,
    pub metadata: SymbolMetadata,
}

fn symbol_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolSummary> {
    let kind_text: String = row.get(4)?;
    Ok(SymbolSummary {
        symbol_id: row.get(0)?,
        file_id: row.get(1)?,
        repository_id: row.get(2)?,
        name: row.get(3)?,
        kind: SymbolKind::from_str(&kind_text).unwrap_or(SymbolKind::Variable),
        line_start: row.get(5)?,
        line_end: row.get(6)?,
        signature: row.get(7)?,
        documentation: row.get(8)?,
        metadata: serde_json::from_str(&row.get::<_, Option<String>>(9)?.unwrap_or_default())
            .unwrap_or_default(),
    })
}

const SYMBOL_COLUMNS: &str = "id, file_id, repository_id, name, kind, line_start, line_end,
                              signature, documentation, metadata";

/// All symbols of one file, in source order.
pub fn list_file_symbols(pool: &ConnectionPool, file_id: &str) -> IndexResult<Vec<SymbolSummary>> {
    pool.read(|conn| {
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {SYMBOL_COLUMNS} FROM indexed_symbols
                 WHERE file_id = ?1 ORDER BY line_start, name"
            ))
            .map_err(IndexError::from_sqlite)?;
        let rows = stmt
            .query_map(params![file_id], symbol_from_row)
            .map_err(IndexError::from_sqlite)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::from_sqlite)
    })
}

/// Symbols matching a name within a repository, exact match.
pub fn find_symbols_by_name(
    pool: &ConnectionPool,
    repository_id: &str,
    name: &str,
    limit: usize,
) -> IndexResult<Vec<SymbolSummary>> {
    pool.read(|conn| {
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {SYMBOL_COLUMNS} FROM indexed_symbols
                 WHERE repository_id = ?1 AND name = ?2
                 ORDER BY file_id, line_start
                 LIMIT ?3"
            ))
            .map_err(IndexError::from_sqlite)?;
        let rows = stmt
            .query_map(params![repository_id, name, limit as i64], symbol_from_row)
            .map_err(IndexError::from_sqlite)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::from_sqlite)
    })
}

/// All repositories, most recently indexed first.
pub fn list_repositories(pool: &ConnectionPool) -> IndexResult<Vec<Repository>> {
    pool.read(|conn| {
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, name, full_name, default_branch, last_indexed_at, metadata
                 FROM repositories
                 ORDER BY last_indexed_at DESC, full_name",
            )
            .map_err(IndexError::from_sqlite)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Repository {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    full_name: row.get(2)?,
                    default_branch: row.get(3)?,
                    last_indexed_at: row.get(4)?,
                    metadata: serde_json::from_str(
                        &row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    )
                    .unwrap_or_else(|_| serde_json::json!({})),
                })
            })
            .map_err(IndexError::from_sqlite)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::from_sqlite)
    })
}

/// Cycle chains in a repository's file-import graph.
pub fn find_repository_cycles(
    pool: &ConnectionPool,
    repository_id: &str,
) -> IndexResult<Vec<Vec<String>>> {
    let edges = load_edges(pool, repository_id, true)?;
    Ok(DependencyGraphView::from_edges(edges).find_cycles())
}

/// Load the repository's edges at the appropriate level and validate the
/// query target.
fn load_graph(
    pool: &ConnectionPool,
    repository_id: &str,
    file_id: Option<&str>,
    symbol_id: Option<&str>,
) -> IndexResult<(DependencyGraphView, String)> {
    let start = match (file_id, symbol_id) {
        (Some(file), None) => file.to_string(),
        (None, Some(symbol)) => symbol.to_string(),
        _ => {
            return Err(IndexError::General(
                "Provide exactly one of file_id and symbol_id".to_string(),
            ));
        }
    };
    let file_level = file_id.is_some();
    let edges = load_edges(pool, repository_id, file_level)?;
    Ok((DependencyGraphView::from_edges(edges), start))
}

/// Edge pairs for one repository. File-level queries walk `file_import`
/// edges; symbol-level queries walk `symbol_usage` edges, where a source
/// without an enclosing definition is represented by its file id.
fn load_edges(
    pool: &ConnectionPool,
    repository_id: &str,
    file_level: bool,
) -> IndexResult<Vec<(String, String)>> {
    pool.read(|conn| {
        let sql = if file_level {
            "SELECT from_file_id, to_file_id FROM dependency_graph
             WHERE repository_id = ?1 AND dependency_type = 'file_import'
               AND from_file_id IS NOT NULL AND to_file_id IS NOT NULL"
        } else {
            "SELECT COALESCE(from_symbol_id, from_file_id), to_symbol_id FROM dependency_graph
             WHERE repository_id = ?1 AND dependency_type = 'symbol_usage'
               AND to_symbol_id IS NOT NULL"
        };
        let mut stmt = conn.prepare_cached(sql).map_err(IndexError::from_sqlite)?;
        let rows = stmt
            .query_map(params![repository_id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                ))
            })
            .map_err(IndexError::from_sqlite)?;
        let mut edges = Vec::new();
        for row in rows {
            let (from, to) = row.map_err(IndexError::from_sqlite)?;
            if let (Some(from), Some(to)) = (from, to) {
                edges.push((from, to));
            }
        }
        Ok(edges)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_quotes_plain_terms() {
        assert_eq!(sanitize_match_query("authenticate").as_deref(), Some("\"authenticate\""));
    }

    #[test]
    fn sanitizer_splits_hyphenated_terms() {
        assert_eq!(
            sanitize_match_query("pre-commit").as_deref(),
            Some("\"pre\" \"commit\"")
        );
    }

    #[test]
    fn sanitizer_neutralizes_fts_operators() {
        assert_eq!(
            sanitize_match_query("alpha AND beta").as_deref(),
            Some("\"alpha\" \"AND\" \"beta\"")
        );
        assert_eq!(sanitize_match_query("NEAR").as_deref(), Some("\"NEAR\""));
    }

    #[test]
    fn sanitizer_strips_quotes_and_punctuation() {
        assert_eq!(
            sanitize_match_query("\"quoted\" (parens) *star*").as_deref(),
            Some("\"quoted\" \"parens\" \"star\"")
        );
    }

    #[test]
    fn sanitizer_rejects_empty_and_symbol_only_input() {
        assert_eq!(sanitize_match_query(""), None);
        assert_eq!(sanitize_match_query("   "), None);
        assert_eq!(sanitize_match_query("()[]{}*&^%"), None);
    }

    #[test]
    fn sanitizer_keeps_unicode_word_characters() {
        assert_eq!(sanitize_match_query("数据库"), Some("\"数据库\"".to_string()));
    }
}
