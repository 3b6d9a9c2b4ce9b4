//! Code-indexing core for KotaDB, a local-first developer knowledge engine.
//!
//! The pipeline ingests a source tree, parses each file with error
//! recovery, extracts symbols and references, resolves imports against the
//! discovered file set and configured path aliases, builds a dependency
//! graph, and persists everything atomically in an embedded SQLite store
//! with full-text search. Queries read through a writer/reader connection
//! pool; snapshots serialize tables to git-trackable JSON-lines files.
//!
//! Transports (HTTP, MCP, CLI) are thin adapters elsewhere; this crate
//! exposes in-process operations only.

pub mod config;
pub mod error;
pub mod extract;
pub mod graph;
pub mod indexing;
pub mod logging;
pub mod parsing;
pub mod query;
pub mod resolver;
pub mod snapshot;
pub mod storage;
pub mod types;

pub use config::Settings;
pub use error::{IndexError, IndexResult};
pub use extract::{ReferenceExtractor, SymbolExtractor};
pub use graph::{DependencyGraphView, TraversalHit};
pub use indexing::{
    CancellationToken, IngestStats, Ingestor, SourceInput, index_directory, index_sources,
};
pub use parsing::{FallbackExtractor, Language, SourceParser};
pub use resolver::{ImportResolver, PathMappings};
pub use snapshot::{SnapshotExporter, SnapshotScheduler};
pub use storage::{ConnectionPool, MigrationRunner, close_pool, create_pool, global_pool};
pub use types::{ReferenceKind, Repository, SymbolKind};
