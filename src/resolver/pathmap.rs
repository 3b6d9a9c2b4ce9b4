//! tsconfig/jsconfig path-mapping support.
//!
//! Reads the project's `tsconfig.json` (preferred) or `jsconfig.json`,
//! follows `extends` chains with a depth limit, and compiles
//! `compilerOptions.baseUrl` + `paths` into matchable rules. Both files are
//! JSONC in the wild; parsing goes through serde_json5 for comment and
//! trailing-comma tolerance.

use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Hard ceiling on `extends` hops, on top of cycle detection.
const MAX_EXTENDS_DEPTH: usize = 10;

/// Compiler options subset relevant to path resolution.
#[derive(Debug, Clone, Default, Deserialize)]
struct CompilerOptions {
    #[serde(rename = "baseUrl")]
    base_url: Option<String>,
    #[serde(default)]
    paths: HashMap<String, Vec<String>>,
}

/// Minimal tsconfig/jsconfig shape.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    extends: Option<String>,
    #[serde(rename = "compilerOptions", default)]
    compiler_options: CompilerOptions,
}

/// One compiled `paths` rule.
#[derive(Debug)]
struct PathRule {
    /// Original pattern, e.g. `@api/*` or `@api`
    pattern: String,
    /// Compiled matcher; wildcard `*` captures the remainder
    regex: Regex,
    /// Target templates tried in order, `*` replaced by the capture
    targets: Vec<String>,
}

impl PathRule {
    fn new(pattern: &str, targets: Vec<String>) -> Option<Self> {
        let escaped = regex::escape(pattern).replace("\\*", "(.*)");
        let regex = match Regex::new(&format!("^{escaped}$")) {
            Ok(regex) => regex,
            Err(e) => {
                warn!("Invalid path pattern '{pattern}': {e}");
                return None;
            }
        };
        Some(Self {
            pattern: pattern.to_string(),
            regex,
            targets,
        })
    }

    /// Expand the specifier through each target template.
    fn expand(&self, specifier: &str) -> Vec<String> {
        let Some(captures) = self.regex.captures(specifier) else {
            return Vec::new();
        };
        let remainder = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        self.targets
            .iter()
            .map(|template| template.replace('*', remainder))
            .collect()
    }
}

/// Compiled path mappings for one project.
#[derive(Debug)]
pub struct PathMappings {
    /// Project-relative directory all targets resolve under
    base: String,
    rules: Vec<PathRule>,
}

impl PathMappings {
    /// Load mappings for a project root. `tsconfig.json` takes precedence
    /// over `jsconfig.json` when both exist. `None` when neither file
    /// yields usable mappings.
    pub fn load(project_root: &Path) -> Option<Self> {
        for name in ["tsconfig.json", "jsconfig.json"] {
            let config_path = project_root.join(name);
            if !config_path.is_file() {
                continue;
            }
            let mut visited = HashSet::new();
            match read_config_chain(&config_path, &mut visited, 0) {
                Ok(config) => {
                    if let Some(mappings) = Self::compile(project_root, &config_path, &config) {
                        debug!("Loaded path mappings from {name}");
                        return Some(mappings);
                    }
                }
                Err(reason) => warn!("Skipping {name}: {reason}"),
            }
        }
        None
    }

    fn compile(project_root: &Path, config_path: &Path, config: &ConfigFile) -> Option<Self> {
        let options = &config.compiler_options;
        if options.paths.is_empty() {
            return None;
        }

        // baseUrl is relative to the config file's directory; targets are
        // relative to baseUrl. Reduce both to one project-relative prefix.
        let config_dir = config_path.parent().unwrap_or(project_root);
        let base_dir = match &options.base_url {
            Some(url) => config_dir.join(url),
            None => config_dir.to_path_buf(),
        };
        let base = relative_to(project_root, &base_dir)?;

        // Most specific patterns first: longer literals, fewer wildcards
        let mut entries: Vec<_> = options.paths.iter().collect();
        entries.sort_by_key(|(pattern, _)| {
            (-(pattern.len() as isize), pattern.matches('*').count())
        });

        let rules: Vec<PathRule> = entries
            .into_iter()
            .filter_map(|(pattern, targets)| PathRule::new(pattern, targets.clone()))
            .collect();
        if rules.is_empty() {
            return None;
        }
        Some(Self { base, rules })
    }

    /// Candidate project-relative paths for a specifier, in rule order.
    pub fn expand(&self, specifier: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        for rule in &self.rules {
            for target in rule.expand(specifier) {
                let joined = if self.base.is_empty() {
                    target
                } else {
                    format!("{}/{}", self.base, target)
                };
                candidates.push(joined);
            }
        }
        candidates
    }

    /// Patterns in match order, for diagnostics.
    pub fn patterns(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.pattern.as_str()).collect()
    }
}

/// Read a config and merge its `extends` ancestry (child wins).
fn read_config_chain(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<ConfigFile, String> {
    if depth > MAX_EXTENDS_DEPTH {
        return Err(format!(
            "extends chain deeper than {MAX_EXTENDS_DEPTH} at {}",
            path.display()
        ));
    }
    let canonical = path
        .canonicalize()
        .map_err(|e| format!("cannot canonicalize {}: {e}", path.display()))?;
    if !visited.insert(canonical.clone()) {
        return Err(format!("circular extends chain at {}", canonical.display()));
    }

    let content = std::fs::read_to_string(&canonical)
        .map_err(|e| format!("cannot read {}: {e}", canonical.display()))?;
    let mut config: ConfigFile = serde_json5::from_str(&content)
        .map_err(|e| format!("cannot parse {}: {e}", canonical.display()))?;

    if let Some(extends) = config.extends.clone() {
        let parent_path = if Path::new(&extends).is_absolute() {
            PathBuf::from(&extends)
        } else {
            canonical
                .parent()
                .ok_or_else(|| format!("no parent directory for {}", canonical.display()))?
                .join(&extends)
        };
        let parent_path = if parent_path.extension().is_none() {
            parent_path.with_extension("json")
        } else {
            parent_path
        };
        let parent = read_config_chain(&parent_path, visited, depth + 1)?;
        config = merge(parent, config);
    }

    Ok(config)
}

/// Child overrides parent; paths merge per-pattern.
fn merge(parent: ConfigFile, child: ConfigFile) -> ConfigFile {
    let mut paths = parent.compiler_options.paths;
    paths.extend(child.compiler_options.paths);
    ConfigFile {
        extends: child.extends,
        compiler_options: CompilerOptions {
            base_url: child.compiler_options.base_url.or(parent.compiler_options.base_url),
            paths,
        },
    }
}

/// Express `target` relative to `root` with `/` separators. `None` when the
/// target escapes the root.
fn relative_to(root: &Path, target: &Path) -> Option<String> {
    let mut segments: Vec<String> = Vec::new();
    for component in target.components() {
        use std::path::Component;
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                segments.pop();
            }
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => segments.clear(),
        }
    }
    let mut root_segments: Vec<String> = Vec::new();
    for component in root.components() {
        use std::path::Component;
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                root_segments.pop();
            }
            Component::Normal(part) => root_segments.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => root_segments.clear(),
        }
    }
    if segments.len() < root_segments.len() || segments[..root_segments.len()] != root_segments[..]
    {
        return None;
    }
    Some(segments[root_segments.len()..].join("/"))
}
