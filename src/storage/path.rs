//! Database and snapshot path resolution.
//!
//! The writer resolves its file path by priority: explicit configuration,
//! then the `KOTADB_DB_PATH` environment variable, then the project-local
//! default `.kotadb/index.db` under the nearest project root. When none
//! applies the operation fails with a descriptive error.

use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::{IndexError, IndexResult};

/// Environment variable overriding the database file path.
pub const DB_PATH_ENV: &str = "KOTADB_DB_PATH";

/// Environment variable overriding the snapshot directory.
pub const SNAPSHOT_DIR_ENV: &str = "KOTADB_SNAPSHOT_DIR";

/// VCS markers that identify a project root.
const VCS_MARKERS: &[&str] = &[".git", ".hg", ".svn"];

/// Find the nearest ancestor of `start` containing a VCS marker.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    for ancestor in start.ancestors() {
        if VCS_MARKERS.iter().any(|m| ancestor.join(m).exists()) {
            return Some(ancestor.to_path_buf());
        }
    }
    None
}

/// Resolve the database file path for the writer connection.
pub fn resolve_db_path(settings: &Settings) -> IndexResult<PathBuf> {
    if let Some(path) = &settings.database.path {
        return Ok(path.clone());
    }
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let cwd = std::env::current_dir()
        .map_err(|e| IndexError::General(format!("Cannot determine working directory: {e}")))?;
    match find_project_root(&cwd) {
        Some(root) => Ok(root.join(".kotadb").join("index.db")),
        None => Err(IndexError::ProjectRootNotFound),
    }
}

/// Resolve the snapshot export directory.
pub fn resolve_snapshot_dir(settings: &Settings) -> IndexResult<PathBuf> {
    if let Some(dir) = &settings.snapshot.dir {
        return Ok(dir.clone());
    }
    if let Ok(dir) = std::env::var(SNAPSHOT_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let cwd = std::env::current_dir()
        .map_err(|e| IndexError::General(format!("Cannot determine working directory: {e}")))?;
    match find_project_root(&cwd) {
        Some(root) => Ok(root.join(".kotadb").join("snapshots")),
        None => Err(IndexError::ProjectRootNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn explicit_config_wins() {
        let mut settings = Settings::default();
        settings.database.path = Some(PathBuf::from("/tmp/explicit.db"));
        // Env var would apply otherwise; explicit config takes priority.
        let resolved = resolve_db_path(&settings).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/explicit.db"));
    }

    #[test]
    fn project_root_found_by_vcs_marker() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join(".git")).unwrap();
        let nested = root.join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();

        let found = find_project_root(&nested).unwrap();
        assert_eq!(found, root);
    }

    #[test]
    fn no_marker_means_no_root() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_project_root(temp_dir.path()).is_none());
    }
}
