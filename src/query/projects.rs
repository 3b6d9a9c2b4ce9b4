//! Project grouping and repository management.
//!
//! Projects collect repositories through a junction table with unique
//! `(project, repository)` pairs. These operations write, so they route
//! through the writer connection.

use rusqlite::params;

use crate::error::{IndexError, IndexResult};
use crate::storage::ConnectionPool;
use crate::types::{Project, now_iso8601, project_id};

/// Create a project. Name uniqueness is enforced by the schema.
pub fn create_project(
    pool: &ConnectionPool,
    name: &str,
    description: Option<&str>,
) -> IndexResult<Project> {
    let project = Project {
        id: project_id(name),
        name: name.to_string(),
        description: description.map(|d| d.to_string()),
        created_at: now_iso8601(),
        updated_at: now_iso8601(),
    };
    pool.write(|conn| {
        conn.execute(
            "INSERT INTO projects (id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project.id,
                project.name,
                project.description,
                project.created_at,
                project.updated_at,
            ],
        )
        .map_err(IndexError::from_sqlite)?;
        Ok(())
    })?;
    Ok(project)
}

/// Attach a repository to a project. Idempotent: re-adding an existing pair
/// is a no-op.
pub fn add_repository_to_project(
    pool: &ConnectionPool,
    project_id: &str,
    repository_id: &str,
) -> IndexResult<()> {
    pool.write(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO project_repositories (id, project_id, repository_id, added_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                format!("projrepo_{project_id}_{repository_id}"),
                project_id,
                repository_id,
                now_iso8601(),
            ],
        )
        .map_err(IndexError::from_sqlite)?;
        Ok(())
    })
}

/// Detach a repository from a project.
pub fn remove_repository_from_project(
    pool: &ConnectionPool,
    project_id: &str,
    repository_id: &str,
) -> IndexResult<bool> {
    pool.write(|conn| {
        let removed = conn
            .execute(
                "DELETE FROM project_repositories WHERE project_id = ?1 AND repository_id = ?2",
                params![project_id, repository_id],
            )
            .map_err(IndexError::from_sqlite)?;
        Ok(removed > 0)
    })
}

/// All projects, name order.
pub fn list_projects(pool: &ConnectionPool) -> IndexResult<Vec<Project>> {
    pool.read(|conn| {
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, name, description, created_at, updated_at FROM projects ORDER BY name",
            )
            .map_err(IndexError::from_sqlite)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    created_at: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    updated_at: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })
            .map_err(IndexError::from_sqlite)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::from_sqlite)
    })
}

/// Repository ids attached to a project, in attachment order.
pub fn list_project_repositories(
    pool: &ConnectionPool,
    project_id: &str,
) -> IndexResult<Vec<String>> {
    pool.read(|conn| {
        let mut stmt = conn
            .prepare_cached(
                "SELECT repository_id FROM project_repositories
                 WHERE project_id = ?1 ORDER BY added_at",
            )
            .map_err(IndexError::from_sqlite)?;
        let rows = stmt
            .query_map(params![project_id], |row| row.get(0))
            .map_err(IndexError::from_sqlite)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::from_sqlite)
    })
}

/// Delete a repository and everything it owns. Files, symbols, references,
/// and project links go with it through the cascade rules.
pub fn delete_repository(pool: &ConnectionPool, repository_id: &str) -> IndexResult<bool> {
    pool.write(|conn| {
        let deleted = conn
            .execute(
                "DELETE FROM repositories WHERE id = ?1",
                params![repository_id],
            )
            .map_err(IndexError::from_sqlite)?;
        Ok(deleted > 0)
    })
}
