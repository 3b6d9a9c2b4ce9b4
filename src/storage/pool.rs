//! Connection pool: one writer plus N readers.
//!
//! All write paths go through the single writer connection; queries that
//! might write must route to the writer. Readers are handed out round-robin
//! and hold `PRAGMA query_only` so a misrouted write fails loudly instead of
//! fighting the writer for the lock. Write transactions BEGIN IMMEDIATE so
//! the reserved lock is taken up front rather than escalating mid-way.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::storage::{migrations, path as db_path};

/// Counter used to give every in-memory pool its own shared-cache namespace.
static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The process-wide pool instance, lazily created on first use.
static GLOBAL_POOL: Mutex<Option<Arc<ConnectionPool>>> = Mutex::new(None);

/// Writer + reader connections over one database.
pub struct ConnectionPool {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    /// URI or file path every connection opened; kept for diagnostics
    location: String,
}

impl ConnectionPool {
    /// Open a pool for the database path resolved from settings, running the
    /// migration runner on the writer before any reader is handed out.
    pub fn open(settings: &Settings) -> IndexResult<Self> {
        let path = db_path::resolve_db_path(settings)?;
        Self::open_at(&path, settings)
    }

    /// Open a pool at an explicit database file path.
    pub fn open_at(path: &Path, settings: &Settings) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let location = path.to_string_lossy().into_owned();
        Self::build(&location, false, settings)
    }

    /// Open an isolated in-memory pool (shared cache, so readers see the
    /// writer's data). Intended for tests and ephemeral indexes.
    pub fn in_memory() -> IndexResult<Self> {
        let mut settings = Settings::default();
        settings.database.readers = 2;
        Self::in_memory_with_settings(&settings)
    }

    /// In-memory pool honoring the given tunables.
    pub fn in_memory_with_settings(settings: &Settings) -> IndexResult<Self> {
        let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let location = format!("file:kotadb_mem_{n}?mode=memory&cache=shared");
        Self::build(&location, true, settings)
    }

    fn build(location: &str, in_memory: bool, settings: &Settings) -> IndexResult<Self> {
        let mut writer = Self::open_connection(location, in_memory)?;
        Self::apply_writer_pragmas(&writer, settings)?;
        migrations::run_at_startup(&mut writer, settings)?;

        let reader_count = settings.database.readers.max(1);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            let reader = Self::open_connection(location, in_memory)?;
            Self::apply_reader_pragmas(&reader, settings)?;
            readers.push(Mutex::new(reader));
        }

        debug!(
            "Opened connection pool at {location} with {reader_count} readers"
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            location: location.to_string(),
        })
    }

    fn open_connection(location: &str, in_memory: bool) -> IndexResult<Connection> {
        let flags = if in_memory {
            OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI
        } else {
            OpenFlags::default()
        };
        Connection::open_with_flags(location, flags).map_err(IndexError::from_sqlite)
    }

    /// Writer pragmas: WAL journaling, normal sync, foreign keys, busy
    /// timeout, memory temp store, mmap region, negative (KiB) cache size.
    fn apply_writer_pragmas(conn: &Connection, settings: &Settings) -> IndexResult<()> {
        let db = &settings.database;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {};
             PRAGMA temp_store = MEMORY;
             PRAGMA mmap_size = {};
             PRAGMA cache_size = -{};",
            db.busy_timeout_ms, db.mmap_size, db.cache_size_kib
        ))
        .map_err(IndexError::from_sqlite)
    }

    /// Readers skip the WAL/foreign-key pragmas but share cache and mmap
    /// settings, and are pinned read-only via query_only.
    fn apply_reader_pragmas(conn: &Connection, settings: &Settings) -> IndexResult<()> {
        let db = &settings.database;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};
             PRAGMA temp_store = MEMORY;
             PRAGMA mmap_size = {};
             PRAGMA cache_size = -{};
             PRAGMA query_only = ON;",
            db.busy_timeout_ms, db.mmap_size, db.cache_size_kib
        ))
        .map_err(IndexError::from_sqlite)
    }

    /// Where this pool's connections point.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run a read-only closure on the next reader connection (round-robin).
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> IndexResult<T>) -> IndexResult<T> {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx].lock();
        f(&conn)
    }

    /// Run a closure on the exclusive writer connection.
    pub fn write<T>(&self, f: impl FnOnce(&mut Connection) -> IndexResult<T>) -> IndexResult<T> {
        let mut conn = self.writer.lock();
        f(&mut conn)
    }

    /// Run a closure inside one IMMEDIATE write transaction. Commits on Ok;
    /// any Err rolls the transaction back before propagating.
    pub fn write_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> IndexResult<T>,
    ) -> IndexResult<T> {
        let mut conn = self.writer.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(IndexError::from_sqlite)?;
        let value = f(&tx)?;
        tx.commit().map_err(IndexError::from_sqlite)?;
        Ok(value)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("location", &self.location)
            .field("readers", &self.readers.len())
            .finish()
    }
}

/// Create the process-wide pool from settings and install it. Replaces any
/// previous instance.
pub fn create_pool(settings: &Settings) -> IndexResult<Arc<ConnectionPool>> {
    let pool = Arc::new(ConnectionPool::open(settings)?);
    *GLOBAL_POOL.lock() = Some(pool.clone());
    info!("Global connection pool created at {}", pool.location());
    Ok(pool)
}

/// Get the process-wide pool, lazily creating it from `Settings::load` on
/// first use.
pub fn global_pool() -> IndexResult<Arc<ConnectionPool>> {
    if let Some(pool) = GLOBAL_POOL.lock().as_ref() {
        return Ok(pool.clone());
    }
    let settings = Settings::load()?;
    create_pool(&settings)
}

/// Tear down the process-wide pool. Connections close (and their cached
/// prepared statements finalize) when the last Arc drops.
pub fn close_pool() {
    if GLOBAL_POOL.lock().take().is_some() {
        info!("Global connection pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_pool_shares_data_between_writer_and_readers() {
        let pool = ConnectionPool::in_memory().unwrap();

        pool.write(|conn| {
            conn.execute(
                "INSERT INTO repositories (id, name, full_name) VALUES ('r1', 'x', 'a/x')",
                [],
            )
            .map_err(IndexError::from_sqlite)?;
            Ok(())
        })
        .unwrap();

        let count: i64 = pool
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))
                    .map_err(IndexError::from_sqlite)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn readers_reject_writes() {
        let pool = ConnectionPool::in_memory().unwrap();
        let result = pool.read(|conn| {
            conn.execute(
                "INSERT INTO repositories (id, name, full_name) VALUES ('r2', 'y', 'a/y')",
                [],
            )
            .map_err(IndexError::from_sqlite)?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn write_transaction_rolls_back_on_error() {
        let pool = ConnectionPool::in_memory().unwrap();

        let result: IndexResult<()> = pool.write_transaction(|tx| {
            tx.execute(
                "INSERT INTO repositories (id, name, full_name) VALUES ('r1', 'x', 'a/x')",
                [],
            )
            .map_err(IndexError::from_sqlite)?;
            Err(IndexError::General("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = pool
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))
                    .map_err(IndexError::from_sqlite)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn separate_in_memory_pools_are_isolated() {
        let a = ConnectionPool::in_memory().unwrap();
        let b = ConnectionPool::in_memory().unwrap();

        a.write(|conn| {
            conn.execute(
                "INSERT INTO repositories (id, name, full_name) VALUES ('r1', 'x', 'a/x')",
                [],
            )
            .map_err(IndexError::from_sqlite)?;
            Ok(())
        })
        .unwrap();

        let count: i64 = b
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))
                    .map_err(IndexError::from_sqlite)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
