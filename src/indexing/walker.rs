//! File discovery for indexing runs.
//!
//! Walks a directory honoring .gitignore rules, excludes the customary
//! VCS/dependency/build directories, and applies extra ignore patterns from
//! configuration. Everything surviving the walk is indexed; only supported
//! extensions get AST parsing downstream.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::config::Settings;

/// Directory names excluded regardless of gitignore contents.
const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "dist",
    "build",
    "out",
    "target",
    "coverage",
    ".next",
    ".kotadb",
];

/// Walks directories to find files to index.
pub struct FileWalker {
    settings: Arc<Settings>,
}

impl FileWalker {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Walk `root`, returning project-relative paths with `/` separators.
    pub fn walk(&self, root: &Path) -> Vec<String> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_some_and(|ft| ft.is_dir())
                    && DEFAULT_EXCLUDED_DIRS.contains(&name.as_ref()))
            });

        // Extra exclusions from configuration, expressed as overrides
        let mut override_builder = ignore::overrides::OverrideBuilder::new(root);
        for pattern in &self.settings.indexing.ignore_patterns {
            if let Err(e) = override_builder.add(&format!("!{pattern}")) {
                warn!("Invalid ignore pattern '{pattern}': {e}");
            }
        }
        if let Ok(overrides) = override_builder.build() {
            builder.overrides(overrides);
        }

        let mut paths: Vec<String> = builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                let path = entry.path();
                // Hidden files never index
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
                {
                    return None;
                }
                relative_path(root, path)
            })
            .collect();
        paths.sort();
        paths
    }

    /// Count files that would be indexed (dry runs).
    pub fn count_files(&self, root: &Path) -> usize {
        self.walk(root).len()
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative: PathBuf = path.strip_prefix(root).ok()?.to_path_buf();
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
