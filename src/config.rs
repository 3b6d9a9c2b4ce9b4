//! Layered configuration for the indexing core.
//!
//! Sources, lowest to highest precedence:
//! - Built-in defaults
//! - `.kotadb/settings.toml` in the nearest project root
//! - Environment variables prefixed with `KOTADB_`, using double underscores
//!   for nesting: `KOTADB_DATABASE__BUSY_TIMEOUT_MS=5000` sets
//!   `database.busy_timeout_ms`.
//!
//! The database file path additionally honors the single dedicated override
//! variable `KOTADB_DB_PATH` (see `storage::path`), and the snapshot
//! directory honors `KOTADB_SNAPSHOT_DIR`.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// Database tunables
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Snapshot export/import settings
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Indexing pipeline settings
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Logging levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Explicit database file path. When absent, `KOTADB_DB_PATH` and the
    /// project-local `.kotadb/index.db` default apply, in that order.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// SQLITE_BUSY wait in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Page cache size in KiB (applied as a negative cache_size pragma)
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u64,

    /// Memory-mapped I/O region in bytes
    #[serde(default = "default_mmap_size")]
    pub mmap_size: u64,

    /// Reader connections in the pool. Defaults to the logical core count.
    #[serde(default = "default_readers")]
    pub readers: usize,

    /// Directory scanned for `NNN_name.sql` migration files at writer
    /// startup. No scanning when absent; the baseline schema still applies.
    #[serde(default)]
    pub migrations_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SnapshotConfig {
    /// Export directory. When absent, `KOTADB_SNAPSHOT_DIR` and then
    /// `.kotadb/snapshots` under the project root apply.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Fixed-delay debounce window for scheduled exports, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Tables serialized to JSON-lines files
    #[serde(default = "default_snapshot_tables")]
    pub tables: Vec<String>,

    /// Per-table fields dropped from exports (e.g. credential hashes)
    #[serde(default)]
    pub sensitive_fields: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Worker threads for parse/extract fan-out
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Extra glob patterns excluded from discovery, on top of the built-in
    /// VCS/dependency/build-output exclusions
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Depth limit for transitive dependency queries
    #[serde(default = "default_max_depth")]
    pub max_traversal_depth: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `ingest = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_busy_timeout_ms() -> u64 {
    30_000
}
fn default_cache_size_kib() -> u64 {
    65_536
}
fn default_mmap_size() -> u64 {
    256 * 1024 * 1024
}
fn default_readers() -> usize {
    num_cpus::get()
}
fn default_debounce_ms() -> u64 {
    5_000
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_max_depth() -> u32 {
    20
}
fn default_log_level() -> String {
    "warn".to_string()
}

fn default_snapshot_tables() -> Vec<String> {
    [
        "repositories",
        "indexed_files",
        "indexed_symbols",
        "indexed_references",
        "dependency_graph",
        "projects",
        "project_repositories",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            cache_size_kib: default_cache_size_kib(),
            mmap_size: default_mmap_size(),
            readers: default_readers(),
            migrations_dir: None,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: None,
            debounce_ms: default_debounce_ms(),
            tables: default_snapshot_tables(),
            sensitive_fields: HashMap::new(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            ignore_patterns: Vec::new(),
            max_traversal_depth: default_max_depth(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".kotadb/settings.toml"));
        Self::figment(config_path).extract()
    }

    /// Load configuration from a specific file plus env overrides.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref().to_path_buf()).extract()
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("KOTADB_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Locate `.kotadb/settings.toml` by walking ancestors of the current
    /// directory.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".kotadb");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }
        None
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.database.busy_timeout_ms, 30_000);
        assert_eq!(settings.database.cache_size_kib, 65_536);
        assert_eq!(settings.database.mmap_size, 256 * 1024 * 1024);
        assert_eq!(settings.snapshot.debounce_ms, 5_000);
        assert!(settings.database.readers > 0);
        assert!(
            settings
                .snapshot
                .tables
                .contains(&"indexed_files".to_string())
        );
    }

    #[test]
    fn load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
[database]
busy_timeout_ms = 5000
readers = 2

[snapshot]
debounce_ms = 250
tables = ["repositories"]

[indexing]
parallel_threads = 4
ignore_patterns = ["generated/**"]
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.database.busy_timeout_ms, 5000);
        assert_eq!(settings.database.readers, 2);
        assert_eq!(settings.snapshot.debounce_ms, 250);
        assert_eq!(settings.snapshot.tables, vec!["repositories"]);
        assert_eq!(settings.indexing.parallel_threads, 4);
        assert_eq!(settings.indexing.ignore_patterns, vec!["generated/**"]);
        // Untouched sections keep their defaults
        assert_eq!(settings.database.mmap_size, 256 * 1024 * 1024);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn save_and_reload_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let mut settings = Settings::default();
        settings.database.busy_timeout_ms = 1234;
        settings.indexing.max_traversal_depth = 7;
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.database.busy_timeout_ms, 1234);
        assert_eq!(loaded.indexing.max_traversal_depth, 7);
    }

    #[test]
    fn sensitive_fields_parse_per_table() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
[snapshot.sensitive_fields]
users = ["password_hash", "api_key_hash"]
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(
            settings.snapshot.sensitive_fields["users"],
            vec!["password_hash", "api_key_hash"]
        );
    }
}
