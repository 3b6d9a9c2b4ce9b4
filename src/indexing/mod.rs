//! Indexing pipeline: discover files, parse and extract in parallel,
//! resolve imports, link references to their target symbols, and persist
//! everything in one transaction.

pub mod ingest;
pub mod walker;

pub use ingest::{CancellationToken, IngestBatch, IngestStats, Ingestor, LinkedReference};
pub use walker::FileWalker;

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::extract::{ExtractedReference, ExtractedSymbol, ReferenceExtractor, SymbolExtractor};
use self::ingest::{EdgeHint, IngestFile};
use crate::parsing::{FallbackExtractor, Language, SourceParser};
use crate::resolver::{ImportResolver, PathMappings};
use crate::storage::ConnectionPool;
use crate::types::{DependencyKind, FileMetadata, ReferenceKind, Repository, symbol_key};

/// One source file handed to the pipeline.
#[derive(Debug, Clone)]
pub struct SourceInput {
    /// Project-relative path with `/` separators
    pub path: String,
    pub content: String,
}

/// Per-file extraction result, produced in parallel.
struct FileExtraction {
    path: String,
    content: String,
    language: Option<Language>,
    symbols: Vec<ExtractedSymbol>,
    references: Vec<ExtractedReference>,
}

/// Index a directory tree into the given repository.
pub fn index_directory(
    pool: &ConnectionPool,
    settings: &Arc<Settings>,
    repository_full_name: &str,
    root: &Path,
    cancel: Option<&CancellationToken>,
) -> IndexResult<IngestStats> {
    let paths = FileWalker::new(settings.clone()).walk(root);
    info!(
        "Discovered {} files under {}",
        paths.len(),
        root.display()
    );

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        match std::fs::read_to_string(root.join(&path)) {
            Ok(content) => sources.push(SourceInput { path, content }),
            Err(e) => warn!("Skipping unreadable file '{path}': {e}"),
        }
    }

    let mappings = PathMappings::load(root);
    let project_root = Some(root.to_string_lossy().into_owned());
    index_sources(
        pool,
        settings,
        repository_full_name,
        sources,
        mappings,
        project_root,
        cancel,
    )
}

/// Index in-memory sources. This is the shared entry point for directory
/// runs and tests feeding literal file contents.
pub fn index_sources(
    pool: &ConnectionPool,
    settings: &Arc<Settings>,
    repository_full_name: &str,
    sources: Vec<SourceInput>,
    mappings: Option<PathMappings>,
    project_root: Option<String>,
    cancel: Option<&CancellationToken>,
) -> IndexResult<IngestStats> {
    let thread_count = settings.indexing.parallel_threads.max(1);
    let extractions = extract_all(sources, thread_count)?;

    let resolver = ImportResolver::new(
        extractions.iter().map(|e| e.path.clone()),
        mappings,
    );

    let batch = link_batch(
        Repository::new(repository_full_name),
        extractions,
        &resolver,
        project_root,
    );

    Ingestor::new(pool).ingest(&batch, cancel)
}

/// Parse and extract every file, fanning out across worker threads. Each
/// worker owns its parsers; tree-sitter parser state is not shareable.
fn extract_all(
    sources: Vec<SourceInput>,
    thread_count: usize,
) -> IndexResult<Vec<FileExtraction>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .map_err(|e| IndexError::General(format!("Cannot build worker pool: {e}")))?;

    Ok(pool.install(|| {
        sources
            .into_par_iter()
            .map_init(
                || (SourceParser::new(), FallbackExtractor::new()),
                |(parser, fallback), source| match parser {
                    Ok(parser) => extract_one(parser, fallback, source),
                    Err(e) => {
                        warn!("Parser unavailable ({e}); indexing '{}' as content only", source.path);
                        content_only(source)
                    }
                },
            )
            .collect()
    }))
}

/// Parse one file, falling back progressively: full parse, recovery,
/// regex scan, content-only.
fn extract_one(
    parser: &mut SourceParser,
    fallback: &FallbackExtractor,
    source: SourceInput,
) -> FileExtraction {
    let path = Path::new(&source.path);
    let language = Language::from_path(path);

    let Some(lang) = language.filter(Language::is_parseable) else {
        return content_only(source);
    };

    let recovered = parser.parse_with_recovery(path, &source.content);
    for error in &recovered.errors {
        match error.line {
            Some(line) => warn!("{}:{line}: {}", source.path, error.message),
            None => warn!("{}: {}", source.path, error.message),
        }
    }

    match recovered.ast {
        Some(ast) => {
            if recovered.partial {
                debug!("Recovered a partial tree for '{}'", source.path);
            }
            let symbols = SymbolExtractor::new().extract(&ast, &source.content);
            let references = ReferenceExtractor::new().extract(&ast, &source.content);
            FileExtraction {
                path: source.path,
                content: source.content,
                language: Some(lang),
                symbols,
                references,
            }
        }
        None => {
            // Nothing usable parsed; the regex fallback still yields a
            // reduced symbol set
            let symbols = fallback.extract(&source.content);
            debug!(
                "Regex fallback produced {} symbols for '{}'",
                symbols.len(),
                source.path
            );
            FileExtraction {
                path: source.path,
                content: source.content,
                language: Some(lang),
                symbols,
                references: Vec::new(),
            }
        }
    }
}

fn content_only(source: SourceInput) -> FileExtraction {
    let language = Language::from_path(Path::new(&source.path));
    FileExtraction {
        path: source.path,
        content: source.content,
        language,
        symbols: Vec::new(),
        references: Vec::new(),
    }
}

/// Best definition of `name` in one file: exported beats unexported,
/// earlier beats later. Returns the symbol's start line for key building.
fn best_definition(symbols: &[ExtractedSymbol], name: &str) -> Option<u32> {
    symbols
        .iter()
        .filter(|s| s.name == name)
        .min_by_key(|s| (!s.is_exported, s.line_start))
        .map(|s| s.line_start)
}

/// Cross-file linking: resolve import sources, attach target symbol keys to
/// references, collect file metadata dependencies, and derive dependency
/// edges.
fn link_batch(
    repository: Repository,
    extractions: Vec<FileExtraction>,
    resolver: &ImportResolver,
    project_root: Option<String>,
) -> IngestBatch {
    let symbols_by_path: HashMap<&str, &[ExtractedSymbol]> = extractions
        .iter()
        .map(|e| (e.path.as_str(), e.symbols.as_slice()))
        .collect();

    let mut files = Vec::with_capacity(extractions.len());
    let mut symbols_out: HashMap<String, Vec<ExtractedSymbol>> = HashMap::new();
    let mut references_out: HashMap<String, Vec<LinkedReference>> = HashMap::new();
    let mut file_edges: HashSet<(String, String)> = HashSet::new();
    let mut symbol_edges: HashSet<(String, Option<String>, String)> = HashSet::new();

    for extraction in &extractions {
        let own_path = extraction.path.as_str();

        // Local import table: binding name -> (resolved path, original name)
        let mut import_targets: HashMap<&str, (String, &str)> = HashMap::new();
        for reference in &extraction.references {
            if reference.kind != ReferenceKind::Import {
                continue;
            }
            let Some(spec) = reference.metadata.import_source.as_deref() else {
                continue;
            };
            let Some(target) = resolver.resolve(spec, own_path) else {
                continue;
            };
            if reference.metadata.is_side_effect_import {
                continue;
            }
            let local = reference
                .metadata
                .import_alias
                .as_deref()
                .unwrap_or(reference.name.as_str());
            import_targets.insert(local, (target, reference.name.as_str()));
        }

        let mut dependencies: Vec<String> = Vec::new();
        let mut linked = Vec::with_capacity(extraction.references.len());

        for reference in &extraction.references {
            let mut target_key = None;
            let mut target_file_path = None;

            if reference.kind.is_import_like() {
                if let Some(spec) = reference.metadata.import_source.as_deref() {
                    if let Some(target) = resolver.resolve(spec, own_path) {
                        file_edges.insert((own_path.to_string(), target.clone()));
                        if !dependencies.contains(&target) {
                            dependencies.push(target.clone());
                        }

                        // Named imports and re-exports can link to a concrete
                        // exported symbol; namespace/side-effect/star forms
                        // reference the module as a whole
                        let wants_symbol = matches!(
                            reference.kind,
                            ReferenceKind::Import | ReferenceKind::ReExport
                        ) && !reference.metadata.is_side_effect_import
                            && !reference.metadata.is_namespace_import;
                        if wants_symbol {
                            if let Some(target_symbols) = symbols_by_path.get(target.as_str()) {
                                if let Some(line) =
                                    best_definition(target_symbols, &reference.name)
                                {
                                    target_key =
                                        Some(symbol_key(&target, &reference.name, line));
                                }
                            }
                        }
                        target_file_path = Some(target);
                    }
                }
            } else {
                // Same-file definition first, then imported bindings
                if let Some(line) = best_definition(&extraction.symbols, &reference.name) {
                    target_key = Some(symbol_key(own_path, &reference.name, line));
                } else if let Some((target, original)) =
                    import_targets.get(reference.name.as_str())
                {
                    if let Some(target_symbols) = symbols_by_path.get(target.as_str()) {
                        if let Some(line) = best_definition(target_symbols, original) {
                            target_key = Some(symbol_key(target, original, line));
                            target_file_path = Some(target.clone());
                        }
                    }
                }
            }

            // Symbol-level edge: from the enclosing definition when the
            // reference sits inside one, else from the file
            if let Some(key) = &target_key {
                let from_symbol = reference.containing.as_ref().and_then(|(name, line)| {
                    extraction
                        .symbols
                        .iter()
                        .any(|s| s.name == *name && s.line_start == *line)
                        .then(|| symbol_key(own_path, name, *line))
                });
                symbol_edges.insert((own_path.to_string(), from_symbol, key.clone()));
            }

            linked.push(LinkedReference {
                reference: reference.clone(),
                target_key,
                target_file_path,
            });
        }

        dependencies.sort();
        files.push(IngestFile {
            path: extraction.path.clone(),
            content: extraction.content.clone(),
            language: extraction.language.map(|l| l.as_str().to_string()),
            metadata: FileMetadata {
                dependencies,
                project_root: project_root.clone(),
            },
        });
        references_out.insert(extraction.path.clone(), linked);
    }

    for extraction in extractions {
        symbols_out.insert(extraction.path, extraction.symbols);
    }

    let mut edges: Vec<EdgeHint> = Vec::new();
    for (from, to) in file_edges {
        edges.push(EdgeHint {
            kind: DependencyKind::FileImport,
            from_file: Some(from),
            to_file: Some(to),
            from_symbol_key: None,
            to_symbol_key: None,
        });
    }
    for (from_file, from_symbol_key, to_key) in symbol_edges {
        edges.push(EdgeHint {
            kind: DependencyKind::SymbolUsage,
            from_file: Some(from_file),
            to_file: None,
            from_symbol_key,
            to_symbol_key: Some(to_key),
        });
    }

    IngestBatch {
        repository,
        files,
        symbols: symbols_out,
        references: references_out,
        edges,
    }
}
