//! Boundary behaviors: empty files, huge files, unicode, awkward paths,
//! FTS keywords as content, and syntax-error recovery end to end.

use std::sync::Arc;

use kotadb_core::error::IndexError;
use kotadb_core::indexing::{SourceInput, index_sources};
use kotadb_core::query;
use kotadb_core::storage::ConnectionPool;
use kotadb_core::Settings;

fn pool() -> ConnectionPool {
    ConnectionPool::in_memory().unwrap()
}

fn settings() -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.indexing.parallel_threads = 2;
    Arc::new(settings)
}

fn ingest(pool: &ConnectionPool, files: &[(&str, &str)]) -> kotadb_core::IngestStats {
    let sources = files
        .iter()
        .map(|(path, content)| SourceInput {
            path: path.to_string(),
            content: content.to_string(),
        })
        .collect();
    index_sources(pool, &settings(), "acme/app", sources, None, None, None).unwrap()
}

#[test]
fn empty_file_indexes_with_no_symbols_and_is_findable_by_path() {
    let pool = pool();
    let stats = ingest(&pool, &[("src/empty.ts", "")]);
    assert_eq!(stats.files_indexed, 1);
    assert_eq!(stats.symbols_extracted, 0);
    assert_eq!(stats.references_found, 0);

    // FTS finds it through path tokens only
    let results = query::search_files(&pool, "empty", None, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "src/empty.ts");
}

#[test]
fn large_file_records_exact_byte_length() {
    let pool = pool();
    let content = format!("export const blob = '{}';", "x".repeat(100_000));
    let expected = content.len() as i64;
    ingest(&pool, &[("src/huge.ts", &content)]);

    let size: i64 = pool
        .read(|conn| {
            conn.query_row(
                "SELECT size_bytes FROM indexed_files WHERE path = 'src/huge.ts'",
                [],
                |row| row.get(0),
            )
            .map_err(IndexError::from_sqlite)
        })
        .unwrap();
    assert_eq!(size, expected);

    // FTS indexing of the large content completes and matches
    let results = query::search_files(&pool, "blob", None, 10).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn unicode_content_is_stored_verbatim_and_ascii_searchable() {
    let pool = pool();
    let content = "export const greeting = '你好世界'; // welcome banner";
    ingest(&pool, &[("src/i18n.ts", content)]);

    let results = query::search_files(&pool, "greeting", None, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, content);

    let size: i64 = results[0].size_bytes;
    assert_eq!(size, content.len() as i64);
}

#[test]
fn paths_with_spaces_and_brackets_resolve() {
    let pool = pool();
    let stats = ingest(&pool, &[("src/[id]/page name.ts", "export const page = 1;")]);

    let file_id =
        query::resolve_file_path(&pool, &stats.repository_id, "src/[id]/page name.ts").unwrap();
    assert!(file_id.is_some());
}

#[test]
fn fts_keywords_as_content_do_not_break_search() {
    let pool = pool();
    ingest(
        &pool,
        &[(
            "src/logic.ts",
            "export const ops = ['AND', 'OR', 'NOT', 'NEAR'];",
        )],
    );

    for term in ["AND", "OR", "NOT", "NEAR"] {
        let results = query::search_files(&pool, term, None, 10).expect("no FTS parse error");
        assert_eq!(results.len(), 1, "term {term:?} should match as a literal");
    }
}

#[test]
fn embedded_double_quotes_in_search_input() {
    let pool = pool();
    ingest(&pool, &[("src/q.ts", "export const quoted = 'value';")]);

    let results = query::search_files(&pool, "\"quoted\"", None, 10).expect("no SQL error");
    assert_eq!(results.len(), 1);
}

#[test]
fn syntax_errors_still_index_the_good_declarations() {
    let pool = pool();
    let broken = "export function valid() { return 1; }\nfunction broken( {\n";
    let stats = ingest(&pool, &[("src/broken.ts", broken)]);

    assert_eq!(stats.files_indexed, 1);
    let names: Vec<String> = pool
        .read(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM indexed_symbols ORDER BY name")
                .map_err(IndexError::from_sqlite)?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(IndexError::from_sqlite)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(IndexError::from_sqlite)
        })
        .unwrap();
    assert!(names.contains(&"valid".to_string()));
}

#[test]
fn hopeless_source_still_indexes_and_fallback_symbols_are_tagged() {
    let pool = pool();
    // Broken beyond recovery or not, the file must index and salvage at
    // least the declaration on the first line
    let garbage = "export function salvage() (((\n}}}} ((( \nexport const RETRIES = 3 ((;\n";
    let stats = ingest(&pool, &[("src/garbage.ts", garbage)]);
    assert_eq!(stats.files_indexed, 1);

    let rows: Vec<(String, i64)> = pool
        .read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, COALESCE(json_extract(metadata, '$.fallback'), 0)
                     FROM indexed_symbols",
                )
                .map_err(IndexError::from_sqlite)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(IndexError::from_sqlite)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(IndexError::from_sqlite)
        })
        .unwrap();
    assert!(rows.iter().any(|(name, _)| name == "salvage"));
    // When the regex fallback produced the symbols, every one is tagged
    if rows.iter().any(|(_, fallback)| *fallback == 1) {
        assert!(rows.iter().all(|(_, fallback)| *fallback == 1));
    }
}

#[test]
fn reparsing_identical_content_reproduces_identical_symbol_rows() {
    let pool = pool();
    let source = "export class Engine {\n    start(): void {}\n}\nexport function run() {}\n";

    let collect = |pool: &ConnectionPool| -> Vec<(String, String, String, i64)> {
        pool.read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, kind, line_start FROM indexed_symbols ORDER BY name",
                )
                .map_err(IndexError::from_sqlite)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(IndexError::from_sqlite)?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(IndexError::from_sqlite)
        })
        .unwrap()
    };

    ingest(&pool, &[("src/engine.ts", source)]);
    let first = collect(&pool);
    ingest(&pool, &[("src/engine.ts", source)]);
    let second = collect(&pool);

    // Deterministic ids: same content, same rows, same ids
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
