//! Import specifier resolution.
//!
//! Given a specifier, the importing file's path, the set of discovered
//! files, and optional path mappings, produce the project-relative path of
//! the target file or `None`. Relative resolution is attempted before alias
//! resolution; bare specifiers are external packages and absolute paths are
//! not project imports.

pub mod pathmap;

pub use pathmap::PathMappings;

use std::collections::HashSet;

/// Extension search order. `.ts` is preferred over `.js` when both exist.
pub const EXTENSION_ORDER: [&str; 6] = [".ts", ".tsx", ".js", ".jsx", ".cjs", ".mjs"];

/// Resolves import specifiers against the set of files discovered in one
/// indexing run. All paths are project-relative with `/` separators.
pub struct ImportResolver {
    files: HashSet<String>,
    mappings: Option<PathMappings>,
}

impl ImportResolver {
    pub fn new(files: impl IntoIterator<Item = String>, mappings: Option<PathMappings>) -> Self {
        Self {
            files: files.into_iter().collect(),
            mappings,
        }
    }

    /// Resolve `specifier` as written in `importer`. Returns the resolved
    /// project-relative path, or `None` for externals, absolute paths, and
    /// misses.
    pub fn resolve(&self, specifier: &str, importer: &str) -> Option<String> {
        if specifier.starts_with("./") || specifier.starts_with("../") {
            let importer_dir = match importer.rfind('/') {
                Some(idx) => &importer[..idx],
                None => "",
            };
            let joined = if importer_dir.is_empty() {
                specifier.to_string()
            } else {
                format!("{importer_dir}/{specifier}")
            };
            let candidate = normalize(&joined)?;
            return self.try_candidate(&candidate);
        }

        // Absolute paths are not project imports
        if specifier.starts_with('/') {
            return None;
        }

        // Path aliases from tsconfig/jsconfig
        if let Some(mappings) = &self.mappings {
            for expanded in mappings.expand(specifier) {
                if let Some(normalized) = normalize(&expanded) {
                    if let Some(hit) = self.try_candidate(&normalized) {
                        return Some(hit);
                    }
                }
            }
        }

        // Bare specifier: external package
        None
    }

    /// Try the candidate itself, then extension variants, then index files.
    fn try_candidate(&self, candidate: &str) -> Option<String> {
        if self.files.contains(candidate) {
            return Some(candidate.to_string());
        }
        for ext in EXTENSION_ORDER {
            let with_ext = format!("{candidate}{ext}");
            if self.files.contains(&with_ext) {
                return Some(with_ext);
            }
        }
        for ext in EXTENSION_ORDER {
            let index = format!("{candidate}/index{ext}");
            if self.files.contains(&index) {
                return Some(index);
            }
        }
        None
    }
}

/// Collapse `.` and `..` segments. Returns `None` when `..` escapes the
/// project root.
fn normalize(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(paths: &[&str]) -> ImportResolver {
        ImportResolver::new(paths.iter().map(|p| p.to_string()), None)
    }

    #[test]
    fn relative_sibling_import() {
        let r = resolver(&["src/main.ts", "src/lib.ts"]);
        assert_eq!(r.resolve("./lib", "src/main.ts").as_deref(), Some("src/lib.ts"));
    }

    #[test]
    fn parent_directory_import() {
        let r = resolver(&["src/api/client.ts", "src/util.ts"]);
        assert_eq!(
            r.resolve("../util", "src/api/client.ts").as_deref(),
            Some("src/util.ts")
        );
    }

    #[test]
    fn ts_preferred_over_js() {
        let r = resolver(&["src/main.ts", "src/dual.ts", "src/dual.js"]);
        assert_eq!(
            r.resolve("./dual", "src/main.ts").as_deref(),
            Some("src/dual.ts")
        );
    }

    #[test]
    fn index_file_resolution() {
        let r = resolver(&["src/main.ts", "src/models/index.ts"]);
        assert_eq!(
            r.resolve("./models", "src/main.ts").as_deref(),
            Some("src/models/index.ts")
        );
    }

    #[test]
    fn index_ts_beats_index_js() {
        let r = resolver(&["src/main.ts", "src/models/index.ts", "src/models/index.js"]);
        assert_eq!(
            r.resolve("./models", "src/main.ts").as_deref(),
            Some("src/models/index.ts")
        );
    }

    #[test]
    fn explicit_extension_in_specifier() {
        // The candidate itself is checked before extension expansion
        let r = resolver(&["src/main.ts", "src/lib.ts"]);
        assert_eq!(
            r.resolve("./lib.ts", "src/main.ts").as_deref(),
            Some("src/lib.ts")
        );
    }

    #[test]
    fn bare_specifier_is_external() {
        let r = resolver(&["src/main.ts", "node_modules/react/index.js"]);
        assert_eq!(r.resolve("react", "src/main.ts"), None);
    }

    #[test]
    fn absolute_path_is_not_a_project_import() {
        let r = resolver(&["src/main.ts"]);
        assert_eq!(r.resolve("/etc/passwd", "src/main.ts"), None);
    }

    #[test]
    fn missing_relative_target_is_none() {
        let r = resolver(&["src/main.ts"]);
        assert_eq!(r.resolve("./missing", "src/main.ts"), None);
    }

    #[test]
    fn dotdot_escaping_the_root_is_none() {
        let r = resolver(&["src/main.ts", "lib.ts"]);
        assert_eq!(r.resolve("../../../lib", "src/main.ts"), None);
    }

    #[test]
    fn importer_at_root_resolves_siblings() {
        let r = resolver(&["main.ts", "lib.ts"]);
        assert_eq!(r.resolve("./lib", "main.ts").as_deref(), Some("lib.ts"));
    }
}
