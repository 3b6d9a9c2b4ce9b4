//! File-extension based language classification.
//!
//! `.ts`, `.tsx`, `.js`, `.jsx`, `.cjs`, `.mjs` get full AST parsing.
//! `.sql` files are stored verbatim (path + content, no extraction). Every
//! other extension is discovered and stored for content search only.

use std::path::Path;

/// Languages the parser produces ASTs for, plus `Sql` which is stored
/// verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    TypeScript,
    /// TypeScript with JSX; parsed with the TSX grammar
    Tsx,
    /// Plain JavaScript, JSX, CommonJS, and ES modules
    JavaScript,
    Sql,
}

impl Language {
    /// Classify a path by extension. `None` means content-only storage.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Some(match ext {
            "ts" => Self::TypeScript,
            "tsx" => Self::Tsx,
            "js" | "jsx" | "cjs" | "mjs" => Self::JavaScript,
            "sql" => Self::Sql,
            _ => return None,
        })
    }

    /// True for languages the AST parser handles.
    pub fn is_parseable(&self) -> bool {
        !matches!(self, Self::Sql)
    }

    /// Value stored in the `language` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TypeScript | Self::Tsx => "typescript",
            Self::JavaScript => "javascript",
            Self::Sql => "sql",
        }
    }
}
