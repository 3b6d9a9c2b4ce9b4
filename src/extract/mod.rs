//! Symbol and reference extraction from parsed trees.
//!
//! Extractors are pure CPU: they walk a tree and emit intermediate values;
//! the ingestion layer assigns ids and persists. Both extractors tolerate
//! partial trees: ERROR subtrees are skipped, everything parseable around
//! them is still extracted.

pub mod references;
pub mod symbols;

pub use references::ReferenceExtractor;
pub use symbols::SymbolExtractor;

use tree_sitter::Node;

use crate::types::{AccessModifier, ReferenceKind, ReferenceMetadata, SymbolKind};

/// Maximum recursion depth for tree walks. Deeply nested source (large
/// literals, generated code) stops descending here instead of overflowing
/// the stack.
pub(crate) const MAX_TREE_DEPTH: usize = 500;

/// A definition before ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive
    pub line_start: u32,
    pub line_end: u32,
    /// 0-based
    pub column_start: u32,
    pub column_end: u32,
    pub signature: Option<String>,
    pub documentation: Option<String>,
    pub is_exported: bool,
    pub is_async: bool,
    pub access_modifier: Option<AccessModifier>,
    pub generic_params: Option<String>,
    /// Produced by the regex fallback; positions are approximate
    pub fallback: bool,
}

/// A use before ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReference {
    /// The textual reference
    pub name: String,
    pub kind: ReferenceKind,
    /// 1-based
    pub line: u32,
    /// 0-based
    pub column: u32,
    pub metadata: ReferenceMetadata,
    /// Name and start line of the enclosing definition, when one exists
    pub containing: Option<(String, u32)>,
}

impl ExtractedReference {
    pub(crate) fn new(name: impl Into<String>, kind: ReferenceKind, node: Node<'_>) -> Self {
        Self {
            name: name.into(),
            kind,
            line: start_line(node),
            column: start_column(node),
            metadata: ReferenceMetadata::default(),
            containing: None,
        }
    }
}

/// 1-based start line.
pub(crate) fn start_line(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based end line (inclusive).
pub(crate) fn end_line(node: Node<'_>) -> u32 {
    node.end_position().row as u32 + 1
}

/// 0-based start column.
pub(crate) fn start_column(node: Node<'_>) -> u32 {
    node.start_position().column as u32
}

/// 0-based end column.
pub(crate) fn end_column(node: Node<'_>) -> u32 {
    node.end_position().column as u32
}

/// Node text, empty on out-of-range spans (possible in partial trees).
pub(crate) fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Text of a string literal without its quotes. Works for both plain and
/// template strings by concatenating fragment children; escape sequences are
/// kept verbatim.
pub(crate) fn string_literal_text(node: Node<'_>, source: &str) -> String {
    let mut out = String::new();
    let mut cursor = node.walk();
    let mut saw_fragment = false;
    for child in node.children(&mut cursor) {
        if child.kind() == "string_fragment" {
            out.push_str(node_text(child, source));
            saw_fragment = true;
        }
    }
    if saw_fragment {
        return out;
    }
    // Empty literal: no fragment child, just the quote tokens
    node_text(node, source)
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

/// True when the expression chain carries `?.` anywhere on the node itself.
pub(crate) fn has_optional_chain(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .any(|child| child.kind() == "optional_chain")
}

/// JSDoc-style block comment immediately preceding a declaration.
///
/// The comment must end at most one line above the declaration (or the
/// `export` statement wrapping it) and start with `/**`.
pub(crate) fn doc_comment_for(node: Node<'_>, source: &str) -> Option<String> {
    // For `export function f()` the comment sits before the export statement
    let anchor = match node.parent() {
        Some(parent) if parent.kind() == "export_statement" => parent,
        _ => node,
    };
    let prev = anchor.prev_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    let gap = anchor.start_position().row.saturating_sub(prev.end_position().row);
    if gap > 1 {
        return None;
    }
    let text = node_text(prev, source);
    if !text.starts_with("/**") {
        return None;
    }
    Some(clean_jsdoc(text))
}

/// Strip comment markers and leading asterisks from a JSDoc block.
fn clean_jsdoc(raw: &str) -> String {
    let body = raw
        .trim_start_matches("/**")
        .trim_end_matches("*/")
        .trim();
    body.lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsdoc_markers_are_stripped() {
        let raw = "/**\n * Authenticates a user.\n *\n * @param user the user\n */";
        let cleaned = clean_jsdoc(raw);
        assert_eq!(cleaned, "Authenticates a user.\n@param user the user");
    }

    #[test]
    fn single_line_jsdoc() {
        assert_eq!(clean_jsdoc("/** Session token. */"), "Session token.");
    }
}
