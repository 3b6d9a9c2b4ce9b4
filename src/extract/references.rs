//! Reference extraction: walks a parsed tree and emits uses.
//!
//! Produces all import forms, re-exports, export-all, calls, property
//! access, type references, extends/implements, dynamic imports, and
//! variable references to imported names. Each reference records the
//! enclosing definition so the graph layer can build symbol-level edges.

use std::collections::HashSet;
use tree_sitter::Node;

use crate::extract::{
    ExtractedReference, MAX_TREE_DEPTH, has_optional_chain, node_text, start_line,
    string_literal_text,
};
use crate::parsing::ParsedFile;
use crate::types::ReferenceKind;

/// Placeholder source for dynamic imports whose argument cannot be reduced
/// to a string or single-wildcard template.
const UNRESOLVABLE_DYNAMIC: &str = "<dynamic>";

/// Walks a tree and emits uses.
pub struct ReferenceExtractor {
    references: Vec<ExtractedReference>,
    /// Local names bound by import statements in this file
    imported_locals: HashSet<String>,
    /// Stack of enclosing definitions: (name, line_start)
    scope_stack: Vec<(String, u32)>,
}

impl ReferenceExtractor {
    pub fn new() -> Self {
        Self {
            references: Vec::new(),
            imported_locals: HashSet::new(),
            scope_stack: Vec::new(),
        }
    }

    /// Extract every reference in the file.
    pub fn extract(mut self, parsed: &ParsedFile, source: &str) -> Vec<ExtractedReference> {
        self.walk(parsed.root(), source, 0);
        self.references
    }

    fn push(&mut self, mut reference: ExtractedReference) {
        reference.containing = self.scope_stack.last().cloned();
        self.references.push(reference);
    }

    fn walk(&mut self, node: Node<'_>, source: &str, depth: usize) {
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
            "import_statement" => {
                self.handle_import(node, source);
                return;
            }
            "export_statement" => {
                if node.child_by_field_name("source").is_some() {
                    self.handle_re_export(node, source);
                    return;
                }
                // Local export clauses produce no references; exported
                // declarations keep being walked for their own uses.
            }
            "call_expression" => {
                self.handle_call(node, source, depth);
                return;
            }
            "member_expression" => {
                self.handle_member(node, source, depth, false);
                return;
            }
            "subscript_expression" => {
                // Computed access cannot be resolved statically; still walk
                // the object and index expressions for their own references.
            }
            "class_declaration" | "abstract_class_declaration" | "class" | "class_expression" => {
                self.handle_class(node, source, depth);
                return;
            }
            "interface_declaration" => {
                self.handle_interface(node, source, depth);
                return;
            }
            "type_identifier" => {
                self.handle_type_identifier(node, source);
                return;
            }
            "identifier" => {
                self.handle_identifier(node, source);
                return;
            }
            "function_declaration" | "generator_function_declaration" | "method_definition"
            | "enum_declaration" | "type_alias_declaration" => {
                let entered = self.enter_scope(node, source);
                self.walk_children(node, source, depth);
                if entered {
                    self.scope_stack.pop();
                }
                return;
            }
            _ => {}
        }

        self.walk_children(node, source, depth);
    }

    fn walk_children(&mut self, node: Node<'_>, source: &str, depth: usize) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, source, depth + 1);
        }
    }

    /// Track the enclosing definition for symbol-level dependency edges.
    fn enter_scope(&mut self, node: Node<'_>, source: &str) -> bool {
        let Some(name_node) = node.child_by_field_name("name") else {
            return false;
        };
        if name_node.kind() == "computed_property_name" {
            return false;
        }
        let name = node_text(name_node, source)
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
        self.scope_stack.push((name, start_line(node)));
        true
    }

    /// `import ... from "s"` in all four forms.
    fn handle_import(&mut self, node: Node<'_>, source: &str) {
        let Some(source_node) = node.child_by_field_name("source") else {
            return;
        };
        let import_source = string_literal_text(source_node, source);

        let mut clause = None;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "import_clause" {
                clause = Some(child);
            }
        }

        let Some(clause) = clause else {
            // Side-effect-only form: `import "s"`
            let mut reference =
                ExtractedReference::new(import_source.clone(), ReferenceKind::Import, node);
            reference.metadata.import_source = Some(import_source);
            reference.metadata.is_side_effect_import = true;
            self.push(reference);
            return;
        };

        let mut clause_cursor = clause.walk();
        for part in clause.named_children(&mut clause_cursor) {
            match part.kind() {
                "identifier" => {
                    // Default import
                    let local = node_text(part, source).to_string();
                    self.imported_locals.insert(local.clone());
                    let mut reference =
                        ExtractedReference::new(local, ReferenceKind::Import, part);
                    reference.metadata.import_source = Some(import_source.clone());
                    reference.metadata.is_default_import = true;
                    self.push(reference);
                }
                "namespace_import" => {
                    // `* as N`
                    let Some(local_node) = last_identifier(part) else {
                        continue;
                    };
                    let local = node_text(local_node, source).to_string();
                    self.imported_locals.insert(local.clone());
                    let mut reference =
                        ExtractedReference::new(local, ReferenceKind::Import, part);
                    reference.metadata.import_source = Some(import_source.clone());
                    reference.metadata.is_namespace_import = true;
                    self.push(reference);
                }
                "named_imports" => {
                    let mut spec_cursor = part.walk();
                    for spec in part.named_children(&mut spec_cursor) {
                        if spec.kind() != "import_specifier" {
                            continue;
                        }
                        let Some(name_node) = spec.child_by_field_name("name") else {
                            continue;
                        };
                        let imported = node_text(name_node, source).to_string();
                        let alias = spec
                            .child_by_field_name("alias")
                            .map(|a| node_text(a, source).to_string());
                        self.imported_locals
                            .insert(alias.clone().unwrap_or_else(|| imported.clone()));
                        let mut reference =
                            ExtractedReference::new(imported, ReferenceKind::Import, spec);
                        reference.metadata.import_source = Some(import_source.clone());
                        reference.metadata.import_alias = alias;
                        self.push(reference);
                    }
                }
                _ => {}
            }
        }
    }

    /// `export ... from "s"`: per-specifier re-exports and export-all.
    fn handle_re_export(&mut self, node: Node<'_>, source: &str) {
        let Some(source_node) = node.child_by_field_name("source") else {
            return;
        };
        let import_source = string_literal_text(source_node, source);

        let mut saw_clause = false;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "export_clause" => {
                    saw_clause = true;
                    let mut spec_cursor = child.walk();
                    for spec in child.named_children(&mut spec_cursor) {
                        if spec.kind() != "export_specifier" {
                            continue;
                        }
                        let Some(name_node) = spec.child_by_field_name("name") else {
                            continue;
                        };
                        let local = node_text(name_node, source).to_string();
                        let exported = spec
                            .child_by_field_name("alias")
                            .map(|a| node_text(a, source).to_string())
                            .unwrap_or_else(|| local.clone());
                        let mut reference =
                            ExtractedReference::new(local.clone(), ReferenceKind::ReExport, spec);
                        reference.metadata.import_source = Some(import_source.clone());
                        reference.metadata.local_name = Some(local);
                        reference.metadata.exported_name = Some(exported);
                        self.push(reference);
                    }
                }
                "namespace_export" => {
                    // `export * as N from "s"`
                    saw_clause = true;
                    let exported_as = last_identifier(child)
                        .map(|n| node_text(n, source).to_string());
                    let mut reference =
                        ExtractedReference::new("*", ReferenceKind::ExportAll, node);
                    reference.metadata.import_source = Some(import_source.clone());
                    reference.metadata.exported_as = exported_as;
                    self.push(reference);
                }
                _ => {}
            }
        }

        if !saw_clause {
            // `export * from "s"`
            let mut reference = ExtractedReference::new("*", ReferenceKind::ExportAll, node);
            reference.metadata.import_source = Some(import_source);
            self.push(reference);
        }
    }

    fn handle_call(&mut self, node: Node<'_>, source: &str, depth: usize) {
        let Some(function) = node.child_by_field_name("function") else {
            self.walk_children(node, source, depth);
            return;
        };

        match function.kind() {
            "import" => {
                self.handle_dynamic_import(node, source);
            }
            "identifier" => {
                let reference = ExtractedReference::new(
                    node_text(function, source),
                    ReferenceKind::Call,
                    node,
                );
                self.push(reference);
            }
            "member_expression" => {
                let optional = has_optional_chain(node) || has_optional_chain(function);
                if let Some(property) = function.child_by_field_name("property") {
                    let mut reference = ExtractedReference::new(
                        node_text(property, source),
                        ReferenceKind::Call,
                        node,
                    );
                    reference.metadata.is_method_call = true;
                    reference.metadata.is_optional_chaining = optional;
                    self.push(reference);
                }
                // The receiver chain still produces property accesses
                if let Some(object) = function.child_by_field_name("object") {
                    self.walk(object, source, depth + 1);
                }
            }
            _ => {
                self.walk(function, source, depth + 1);
            }
        }

        if let Some(arguments) = node.child_by_field_name("arguments") {
            self.walk_children(arguments, source, depth);
        }
    }

    /// `import("s")` and template variants.
    fn handle_dynamic_import(&mut self, node: Node<'_>, source: &str) {
        let argument = node
            .child_by_field_name("arguments")
            .and_then(|args| args.named_child(0));

        let (import_source, is_template) = match argument {
            Some(arg) if arg.kind() == "string" => (string_literal_text(arg, source), false),
            Some(arg) if arg.kind() == "template_string" => template_pattern(arg, source),
            _ => (UNRESOLVABLE_DYNAMIC.to_string(), false),
        };

        let mut reference =
            ExtractedReference::new(import_source.clone(), ReferenceKind::DynamicImport, node);
        reference.metadata.import_source = Some(import_source);
        reference.metadata.is_dynamic = true;
        reference.metadata.is_template_pattern = is_template;
        self.push(reference);
    }

    /// Member access outside call position.
    fn handle_member(&mut self, node: Node<'_>, source: &str, depth: usize, _in_call: bool) {
        if let Some(property) = node.child_by_field_name("property") {
            if property.kind() == "property_identifier" {
                let mut reference = ExtractedReference::new(
                    node_text(property, source),
                    ReferenceKind::PropertyAccess,
                    node,
                );
                reference.metadata.is_optional_chaining = has_optional_chain(node);
                self.push(reference);
            }
        }
        if let Some(object) = node.child_by_field_name("object") {
            self.walk(object, source, depth + 1);
        }
    }

    /// Class heritage: extends and implements clauses.
    fn handle_class(&mut self, node: Node<'_>, source: &str, depth: usize) {
        let entered = self.enter_scope(node, source);

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() != "class_heritage" {
                continue;
            }
            let mut heritage_cursor = child.walk();
            for clause in child.children(&mut heritage_cursor) {
                match clause.kind() {
                    "extends_clause" => {
                        if let Some(value) = clause.child_by_field_name("value") {
                            let name = base_identifier_text(value, source);
                            if !name.is_empty() {
                                self.push(ExtractedReference::new(
                                    name,
                                    ReferenceKind::Extends,
                                    value,
                                ));
                            }
                        }
                    }
                    "implements_clause" => {
                        let mut type_cursor = clause.walk();
                        for ty in clause.named_children(&mut type_cursor) {
                            let name = base_identifier_text(ty, source);
                            if !name.is_empty() {
                                self.push(ExtractedReference::new(
                                    name,
                                    ReferenceKind::Implements,
                                    ty,
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, source, depth);
        }
        if entered {
            self.scope_stack.pop();
        }
    }

    /// `interface A extends B, C` emits extends references for B and C.
    fn handle_interface(&mut self, node: Node<'_>, source: &str, depth: usize) {
        let entered = self.enter_scope(node, source);

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "extends_type_clause" {
                let mut type_cursor = child.walk();
                for ty in child.named_children(&mut type_cursor) {
                    let name = base_identifier_text(ty, source);
                    if !name.is_empty() {
                        self.push(ExtractedReference::new(name, ReferenceKind::Extends, ty));
                    }
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, source, depth);
        }
        if entered {
            self.scope_stack.pop();
        }
    }

    /// Type annotations and generic arguments.
    fn handle_type_identifier(&mut self, node: Node<'_>, source: &str) {
        if let Some(parent) = node.parent() {
            // Declaration names are definitions, not uses
            let is_declared_name = matches!(
                parent.kind(),
                "interface_declaration"
                    | "type_alias_declaration"
                    | "class_declaration"
                    | "enum_declaration"
                    | "type_parameter"
            ) && parent.child_by_field_name("name") == Some(node);
            if is_declared_name || parent.kind() == "type_parameter" {
                return;
            }
            // Heritage clauses were already emitted as extends/implements
            if matches!(
                parent.kind(),
                "extends_type_clause" | "implements_clause" | "extends_clause"
            ) {
                return;
            }
        }
        self.push(ExtractedReference::new(
            node_text(node, source),
            ReferenceKind::TypeReference,
            node,
        ));
    }

    /// Plain identifiers: emitted only when they name an imported binding,
    /// which keeps the output joinable without flooding it with every local.
    fn handle_identifier(&mut self, node: Node<'_>, source: &str) {
        let text = node_text(node, source);
        if !self.imported_locals.contains(text) {
            return;
        }
        if let Some(parent) = node.parent() {
            match parent.kind() {
                // Definition sites and import machinery, not uses
                "function_declaration" | "class_declaration" | "import_specifier"
                | "import_clause" | "namespace_import" | "export_specifier"
                | "required_parameter" | "optional_parameter" | "formal_parameters" => return,
                "variable_declarator" => {
                    // The binding name is a definition; the initializer is a use
                    if parent.child_by_field_name("name") == Some(node) {
                        return;
                    }
                }
                "call_expression" => {
                    if parent.child_by_field_name("function") == Some(node) {
                        return; // already a call reference
                    }
                }
                _ => {}
            }
        }
        self.push(ExtractedReference::new(
            text,
            ReferenceKind::VariableReference,
            node,
        ));
    }
}

impl Default for ReferenceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Last identifier child, e.g. the `N` of `* as N`.
fn last_identifier(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|c| c.kind() == "identifier")
        .last()
}

/// Identifier text of a (possibly generic or qualified) type or expression.
fn base_identifier_text(node: Node<'_>, source: &str) -> String {
    match node.kind() {
        "identifier" | "type_identifier" => node_text(node, source).to_string(),
        "generic_type" => node
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default(),
        "member_expression" | "nested_type_identifier" => {
            // Qualified name: keep the full dotted path
            node_text(node, source).to_string()
        }
        _ => String::new(),
    }
}

/// Reduce a template string to `prefix*` when it has exactly one
/// substitution; anything more dynamic is unresolvable.
fn template_pattern(node: Node<'_>, source: &str) -> (String, bool) {
    let mut prefix = String::new();
    let mut substitutions = 0;
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "string_fragment" => {
                if substitutions == 0 {
                    prefix.push_str(node_text(child, source));
                }
            }
            "template_substitution" => substitutions += 1,
            _ => {}
        }
    }
    if substitutions == 1 && !prefix.is_empty() {
        (format!("{prefix}*"), true)
    } else if substitutions == 0 && !prefix.is_empty() {
        (prefix, false)
    } else {
        (UNRESOLVABLE_DYNAMIC.to_string(), false)
    }
}
