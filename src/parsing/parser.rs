//! tree-sitter parsing with an explicit error-recovery contract.
//!
//! Two entry points:
//! - [`SourceParser::parse`] returns `None` on any syntax error.
//! - [`SourceParser::parse_with_recovery`] yields a best-effort tree plus
//!   diagnostics; downstream extractors tolerate the ERROR/MISSING subtrees
//!   tree-sitter leaves in a partial tree.

use std::path::Path;
use tree_sitter::{Node, Parser, Tree};

use crate::parsing::Language;

/// Cap on collected diagnostics per file; a torrent of cascading errors past
/// this point adds no information.
const MAX_DIAGNOSTICS: usize = 20;

/// A parsed source file. Owns the tree-sitter tree; the source text stays
/// with the caller and is passed alongside to the extractors.
#[derive(Debug)]
pub struct ParsedFile {
    pub tree: Tree,
    pub language: Language,
}

impl ParsedFile {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }
}

/// One syntax diagnostic from a failed or partial parse.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseDiagnostic {
    pub message: String,
    /// 1-based, when the error location is known
    pub line: Option<u32>,
}

/// Result of [`SourceParser::parse_with_recovery`].
///
/// On success `errors` is empty and `partial` is false. When recovery
/// succeeded on broken input, `partial` is true and `ast` is non-null.
/// When nothing usable came back, `ast` is `None` and `errors` holds at
/// least one diagnostic.
#[derive(Debug)]
pub struct RecoveredParse {
    pub ast: Option<ParsedFile>,
    pub errors: Vec<ParseDiagnostic>,
    pub partial: bool,
}

/// Parser over the supported TypeScript/JavaScript grammars. One instance
/// per thread; tree-sitter parsers are stateful and not `Sync`.
pub struct SourceParser {
    typescript: Parser,
    tsx: Parser,
    javascript: Parser,
}

impl SourceParser {
    pub fn new() -> Result<Self, String> {
        let mut typescript = Parser::new();
        typescript
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .map_err(|e| format!("Failed to load TypeScript grammar: {e}"))?;

        let mut tsx = Parser::new();
        tsx.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into())
            .map_err(|e| format!("Failed to load TSX grammar: {e}"))?;

        let mut javascript = Parser::new();
        javascript
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .map_err(|e| format!("Failed to load JavaScript grammar: {e}"))?;

        Ok(Self {
            typescript,
            tsx,
            javascript,
        })
    }

    /// Parse, returning `None` on syntax errors.
    pub fn parse(&mut self, path: &Path, content: &str) -> Option<ParsedFile> {
        let language = Language::from_path(path).filter(Language::is_parseable)?;
        let tree = self.parser_for(language).parse(content, None)?;
        if tree.root_node().has_error() {
            return None;
        }
        Some(ParsedFile { tree, language })
    }

    /// Parse with best-effort recovery. tree-sitter almost always produces a
    /// tree for broken input, marking unparseable stretches with ERROR and
    /// MISSING nodes; those become the diagnostics and the tree is returned
    /// as a partial AST.
    pub fn parse_with_recovery(&mut self, path: &Path, content: &str) -> RecoveredParse {
        let Some(language) = Language::from_path(path).filter(Language::is_parseable) else {
            return RecoveredParse {
                ast: None,
                errors: vec![ParseDiagnostic {
                    message: format!("Unsupported extension for AST parsing: '{}'", path.display()),
                    line: None,
                }],
                partial: false,
            };
        };

        let Some(tree) = self.parser_for(language).parse(content, None) else {
            return RecoveredParse {
                ast: None,
                errors: vec![ParseDiagnostic {
                    message: "Parser produced no tree".to_string(),
                    line: None,
                }],
                partial: false,
            };
        };

        if !tree.root_node().has_error() {
            return RecoveredParse {
                ast: Some(ParsedFile { tree, language }),
                errors: Vec::new(),
                partial: false,
            };
        }

        let errors = collect_diagnostics(tree.root_node(), content);
        // A root that is itself one big ERROR node carries no structure worth
        // extracting; report failure so the regex fallback can run.
        let usable = tree.root_node().kind() == "program"
            && tree
                .root_node()
                .named_children(&mut tree.root_node().walk())
                .any(|child| !child.is_error());

        if usable {
            RecoveredParse {
                ast: Some(ParsedFile { tree, language }),
                errors,
                partial: true,
            }
        } else {
            RecoveredParse {
                ast: None,
                errors,
                partial: false,
            }
        }
    }

    fn parser_for(&mut self, language: Language) -> &mut Parser {
        match language {
            Language::TypeScript => &mut self.typescript,
            Language::Tsx => &mut self.tsx,
            Language::JavaScript => &mut self.javascript,
            Language::Sql => unreachable!("sql is filtered before parsing"),
        }
    }
}

/// Walk the tree collecting ERROR and MISSING nodes as diagnostics.
fn collect_diagnostics(root: Node<'_>, content: &str) -> Vec<ParseDiagnostic> {
    let mut diagnostics = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if diagnostics.len() >= MAX_DIAGNOSTICS {
            break;
        }
        if node.is_error() {
            let snippet: String = node
                .utf8_text(content.as_bytes())
                .unwrap_or("")
                .chars()
                .take(40)
                .collect();
            diagnostics.push(ParseDiagnostic {
                message: format!("Syntax error near '{}'", snippet.trim()),
                line: Some(node.start_position().row as u32 + 1),
            });
            continue;
        }
        if node.is_missing() {
            diagnostics.push(ParseDiagnostic {
                message: format!("Missing '{}'", node.kind()),
                line: Some(node.start_position().row as u32 + 1),
            });
            continue;
        }
        if node.has_error() {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                stack.push(child);
            }
        }
    }
    if diagnostics.is_empty() {
        diagnostics.push(ParseDiagnostic {
            message: "Syntax error".to_string(),
            line: None,
        });
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ts_path() -> PathBuf {
        PathBuf::from("src/example.ts")
    }

    #[test]
    fn valid_source_parses_cleanly() {
        let mut parser = SourceParser::new().unwrap();
        let parsed = parser
            .parse(&ts_path(), "export function greet(name: string) { return name; }")
            .unwrap();
        assert_eq!(parsed.root().kind(), "program");
        assert!(!parsed.has_errors());
    }

    #[test]
    fn empty_content_yields_empty_program() {
        let mut parser = SourceParser::new().unwrap();
        let parsed = parser.parse(&ts_path(), "").unwrap();
        assert_eq!(parsed.root().kind(), "program");
        assert_eq!(parsed.root().named_child_count(), 0);
    }

    #[test]
    fn syntax_error_returns_none_from_strict_parse() {
        let mut parser = SourceParser::new().unwrap();
        let broken = "export function (((";
        assert!(parser.parse(&ts_path(), broken).is_none());
    }

    #[test]
    fn recovery_keeps_the_valid_declarations() {
        let mut parser = SourceParser::new().unwrap();
        let source = "export function good() { return 1; }\nfunction broken( {\n";
        let recovered = parser.parse_with_recovery(&ts_path(), source);
        assert!(recovered.partial);
        assert!(recovered.ast.is_some());
        assert!(!recovered.errors.is_empty());
        assert!(recovered.errors.iter().any(|e| e.line.is_some()));
    }

    #[test]
    fn clean_parse_reports_no_errors_and_not_partial() {
        let mut parser = SourceParser::new().unwrap();
        let recovered = parser.parse_with_recovery(&ts_path(), "const x = 1;");
        assert!(!recovered.partial);
        assert!(recovered.errors.is_empty());
        assert!(recovered.ast.is_some());
    }

    #[test]
    fn tsx_parses_jsx_syntax() {
        let mut parser = SourceParser::new().unwrap();
        let parsed = parser.parse(
            &PathBuf::from("src/App.tsx"),
            "export function App() { return <div>hello</div>; }",
        );
        assert!(parsed.is_some());
    }

    #[test]
    fn javascript_grammar_covers_cjs_and_mjs() {
        let mut parser = SourceParser::new().unwrap();
        assert!(
            parser
                .parse(&PathBuf::from("a.cjs"), "module.exports = function add(a, b) { return a + b; };")
                .is_some()
        );
        assert!(
            parser
                .parse(&PathBuf::from("a.mjs"), "export const x = 1;")
                .is_some()
        );
    }
}
