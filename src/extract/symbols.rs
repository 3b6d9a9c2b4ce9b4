//! Symbol extraction: walks a parsed tree and emits definitions.
//!
//! Handles functions (including exported arrow/function const bindings),
//! classes and their members, interfaces, type aliases, enums and members,
//! namespaces/modules, and exported top-level bindings. Malformed subtrees
//! in partial trees are skipped; whatever parsed cleanly is still emitted.

use std::collections::HashSet;
use tree_sitter::Node;

use crate::extract::{
    ExtractedSymbol, MAX_TREE_DEPTH, doc_comment_for, end_column, end_line, node_text,
    start_column, start_line,
};
use crate::parsing::ParsedFile;
use crate::types::{AccessModifier, SymbolKind};

/// Longest signature text stored per symbol.
const MAX_SIGNATURE_LEN: usize = 300;

/// Walks a tree and emits definitions.
pub struct SymbolExtractor {
    /// Names exported via a local `export { X }` clause (no source)
    locally_exported: HashSet<String>,
    /// Names exported via `export default X`
    default_exported: HashSet<String>,
    symbols: Vec<ExtractedSymbol>,
}

impl SymbolExtractor {
    pub fn new() -> Self {
        Self {
            locally_exported: HashSet::new(),
            default_exported: HashSet::new(),
            symbols: Vec::new(),
        }
    }

    /// Extract every definition in the file.
    pub fn extract(mut self, parsed: &ParsedFile, source: &str) -> Vec<ExtractedSymbol> {
        let root = parsed.root();
        self.collect_export_clauses(root, source);
        self.walk(root, source, false, 0);

        // `export { X }` and `export default X` make earlier declarations
        // public after the fact.
        for symbol in &mut self.symbols {
            if self.locally_exported.contains(&symbol.name)
                || self.default_exported.contains(&symbol.name)
            {
                symbol.is_exported = true;
            }
        }
        self.symbols
    }

    /// First pass: names made public by source-less export clauses.
    fn collect_export_clauses(&mut self, root: Node<'_>, source: &str) {
        let mut cursor = root.walk();
        for node in root.children(&mut cursor) {
            if node.kind() != "export_statement" || node.child_by_field_name("source").is_some() {
                continue;
            }
            let mut inner = node.walk();
            for child in node.children(&mut inner) {
                match child.kind() {
                    "export_clause" => {
                        let mut spec_cursor = child.walk();
                        for spec in child.named_children(&mut spec_cursor) {
                            if spec.kind() == "export_specifier" {
                                if let Some(name) = spec.child_by_field_name("name") {
                                    self.locally_exported
                                        .insert(node_text(name, source).to_string());
                                }
                            }
                        }
                    }
                    "identifier" => {
                        // `export default Foo`
                        self.default_exported
                            .insert(node_text(child, source).to_string());
                    }
                    _ => {}
                }
            }
        }
    }

    fn walk(&mut self, node: Node<'_>, source: &str, exported: bool, depth: usize) {
        if depth > MAX_TREE_DEPTH {
            tracing::warn!(
                "Maximum tree depth exceeded at line {}; skipping subtree",
                start_line(node)
            );
            return;
        }
        if node.is_error() {
            return;
        }

        match node.kind() {
            "export_statement" => self.handle_export(node, source, depth),
            "function_declaration" | "generator_function_declaration" => {
                self.emit_function(node, source, exported);
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_children(body, source, false, depth + 1);
                }
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.emit_class(node, source, exported, depth);
            }
            "interface_declaration" => {
                self.emit_named(node, source, SymbolKind::Interface, exported);
            }
            "type_alias_declaration" => {
                self.emit_named(node, source, SymbolKind::Type, exported);
            }
            "enum_declaration" => self.emit_enum(node, source, exported),
            "internal_module" => {
                self.emit_named(node, source, SymbolKind::Namespace, exported);
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_children(body, source, false, depth + 1);
                }
            }
            "module" => {
                self.emit_named(node, source, SymbolKind::Module, exported);
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_children(body, source, false, depth + 1);
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                self.handle_variable_declaration(node, source, exported);
            }
            _ => self.walk_children(node, source, exported, depth),
        }
    }

    fn walk_children(&mut self, node: Node<'_>, source: &str, exported: bool, depth: usize) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, source, exported, depth + 1);
        }
    }

    fn handle_export(&mut self, node: Node<'_>, source: &str, depth: usize) {
        if let Some(declaration) = node.child_by_field_name("declaration") {
            self.walk(declaration, source, true, depth + 1);
            return;
        }
        // `export default <expression>`
        if let Some(value) = node.child_by_field_name("value") {
            match value.kind() {
                "arrow_function" | "function_expression" | "function" => {
                    self.symbols.push(build_symbol(
                        node,
                        value,
                        "<anonymous>".to_string(),
                        SymbolKind::Function,
                        source,
                        true,
                    ));
                }
                "class" | "class_expression" => {
                    let name = value
                        .child_by_field_name("name")
                        .map(|n| node_text(n, source).to_string())
                        .unwrap_or_else(|| "<anonymous>".to_string());
                    self.symbols.push(build_symbol(
                        node,
                        value,
                        name,
                        SymbolKind::Class,
                        source,
                        true,
                    ));
                }
                "identifier" => {
                    // Re-exports an existing declaration; handled in pass one
                }
                _ => {
                    self.symbols.push(build_symbol(
                        node,
                        value,
                        "<anonymous>".to_string(),
                        SymbolKind::Constant,
                        source,
                        true,
                    ));
                }
            }
        }
    }

    fn emit_function(&mut self, node: Node<'_>, source: &str, exported: bool) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source).to_string();
        let mut symbol = build_symbol(node, node, name, SymbolKind::Function, source, exported);
        symbol.is_async = has_keyword(node, "async");
        symbol.signature = Some(declaration_signature(node, source));
        symbol.generic_params = generic_params(node, source);
        self.symbols.push(symbol);
    }

    fn emit_class(&mut self, node: Node<'_>, source: &str, exported: bool, depth: usize) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let class_name = node_text(name_node, source).to_string();
        let mut symbol =
            build_symbol(node, node, class_name, SymbolKind::Class, source, exported);
        symbol.signature = Some(declaration_signature(node, source));
        symbol.generic_params = generic_params(node, source);
        self.symbols.push(symbol);

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            match member.kind() {
                "method_definition" | "abstract_method_signature" => {
                    self.emit_member(member, source, SymbolKind::Method, exported, depth);
                }
                "public_field_definition" => {
                    self.emit_member(member, source, SymbolKind::Property, exported, depth);
                }
                _ => {}
            }
        }
    }

    fn emit_member(
        &mut self,
        node: Node<'_>,
        source: &str,
        kind: SymbolKind,
        class_exported: bool,
        depth: usize,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        if name_node.kind() == "computed_property_name" {
            return;
        }
        let name = node_text(name_node, source)
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();

        // Members of an exported class are reachable from outside the file
        let mut symbol = build_symbol(node, node, name, kind, source, class_exported);
        symbol.is_async = has_keyword(node, "async");
        symbol.access_modifier = access_modifier(node, source);
        symbol.signature = Some(declaration_signature(node, source));
        symbol.generic_params = generic_params(node, source);
        self.symbols.push(symbol);

        // Nested function declarations inside method bodies
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, source, false, depth + 1);
        }
    }

    fn emit_enum(&mut self, node: Node<'_>, source: &str, exported: bool) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source).to_string();
        self.symbols
            .push(build_symbol(node, node, name, SymbolKind::Enum, source, exported));

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            let member_name_node = match member.kind() {
                "enum_assignment" => member.child_by_field_name("name"),
                "property_identifier" | "string" => Some(member),
                _ => None,
            };
            let Some(member_name_node) = member_name_node else {
                continue;
            };
            let member_name = node_text(member_name_node, source)
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string();
            self.symbols.push(build_symbol(
                member,
                member,
                member_name,
                SymbolKind::EnumMember,
                source,
                exported,
            ));
        }
    }

    fn emit_named(&mut self, node: Node<'_>, source: &str, kind: SymbolKind, exported: bool) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source)
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
        let mut symbol = build_symbol(node, node, name, kind, source, exported);
        symbol.signature = Some(declaration_signature(node, source));
        symbol.generic_params = generic_params(node, source);
        self.symbols.push(symbol);
    }

    /// `const`/`let`/`var` bindings, emitted only when exported. A binding
    /// whose value is a function counts as a function definition.
    fn handle_variable_declaration(&mut self, node: Node<'_>, source: &str, exported: bool) {
        let declaration_keyword = node
            .child(0)
            .map(|c| node_text(c, source).to_string())
            .unwrap_or_default();

        let mut cursor = node.walk();
        for declarator in node.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            if name_node.kind() != "identifier" {
                // Destructuring patterns have no single definition name
                continue;
            }
            let name = node_text(name_node, source).to_string();
            let is_exported = exported
                || self.locally_exported.contains(&name)
                || self.default_exported.contains(&name);
            if !is_exported {
                continue;
            }

            let value = declarator.child_by_field_name("value");
            let value_kind = value.map(|v| v.kind()).unwrap_or("");
            let is_function = matches!(
                value_kind,
                "arrow_function" | "function_expression" | "function" | "generator_function"
            );

            let kind = if is_function {
                SymbolKind::Function
            } else if declaration_keyword == "const" {
                SymbolKind::Constant
            } else {
                SymbolKind::Variable
            };

            let mut symbol = build_symbol(node, declarator, name, kind, source, true);
            if let Some(value) = value {
                symbol.is_async = is_function && has_keyword(value, "async");
            }
            symbol.signature = Some(declaration_signature(declarator, source));
            self.symbols.push(symbol);
        }
    }

}

impl Default for SymbolExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a symbol skeleton. `doc_anchor` is the node documentation attaches
/// to (the declaration or its export wrapper); `span` supplies the position.
fn build_symbol(
    doc_anchor: Node<'_>,
    span: Node<'_>,
    name: String,
    kind: SymbolKind,
    source: &str,
    is_exported: bool,
) -> ExtractedSymbol {
    ExtractedSymbol {
        name,
        kind,
        line_start: start_line(span),
        line_end: end_line(span),
        column_start: start_column(span),
        column_end: end_column(span),
        signature: None,
        documentation: doc_comment_for(doc_anchor, source),
        is_exported,
        is_async: false,
        access_modifier: None,
        generic_params: None,
        fallback: false,
    }
}

/// True when the declaration carries the given keyword token.
fn has_keyword(node: Node<'_>, keyword: &str) -> bool {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .any(|child| child.kind() == keyword)
}

/// Accessibility or readonly modifier of a class member.
fn access_modifier(node: Node<'_>, source: &str) -> Option<AccessModifier> {
    let mut cursor = node.walk();
    let mut readonly = false;
    for child in node.children(&mut cursor) {
        match child.kind() {
            "accessibility_modifier" => {
                return match node_text(child, source) {
                    "public" => Some(AccessModifier::Public),
                    "private" => Some(AccessModifier::Private),
                    "protected" => Some(AccessModifier::Protected),
                    _ => None,
                };
            }
            "readonly" => readonly = true,
            _ => {}
        }
    }
    readonly.then_some(AccessModifier::Readonly)
}

/// Declaration text up to (not including) the body, whitespace-collapsed.
fn declaration_signature(node: Node<'_>, source: &str) -> String {
    let end = node
        .child_by_field_name("body")
        .map(|body| body.start_byte())
        .unwrap_or_else(|| node.end_byte());
    let start = node.start_byte();
    let raw = source.get(start..end).unwrap_or("");
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(['{', ' ', '=']).trim_end();
    let mut out = String::with_capacity(trimmed.len().min(MAX_SIGNATURE_LEN));
    for ch in trimmed.chars() {
        if out.len() + ch.len_utf8() > MAX_SIGNATURE_LEN {
            break;
        }
        out.push(ch);
    }
    out
}

/// Text of the generic parameter list, when present.
fn generic_params(node: Node<'_>, source: &str) -> Option<String> {
    node.child_by_field_name("type_parameters")
        .map(|params| node_text(params, source).to_string())
}
