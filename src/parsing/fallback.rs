//! Regex fallback for files the parser could not recover.
//!
//! A line-oriented pass that finds top-level declarations and produces
//! approximate symbols. Everything emitted here is tagged `fallback` so
//! downstream consumers know positions and kinds carry reduced precision.

use regex::Regex;

use crate::extract::ExtractedSymbol;
use crate::types::SymbolKind;

/// Line-oriented declaration scanner.
pub struct FallbackExtractor {
    function: Regex,
    class: Regex,
    interface: Regex,
    type_alias: Regex,
    enum_decl: Regex,
    const_binding: Regex,
    let_var_binding: Regex,
}

impl FallbackExtractor {
    pub fn new() -> Self {
        // Patterns are anchored to line starts; indented (nested)
        // declarations are intentionally out of reach of the fallback.
        Self {
            function: Regex::new(
                r"^(?P<export>export\s+)?(?:default\s+)?(?P<async>async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)",
            )
            .expect("static fallback pattern"),
            class: Regex::new(
                r"^(?P<export>export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)",
            )
            .expect("static fallback pattern"),
            interface: Regex::new(
                r"^(?P<export>export\s+)?interface\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)",
            )
            .expect("static fallback pattern"),
            type_alias: Regex::new(
                r"^(?P<export>export\s+)?type\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)\s*(?:<[^=]*>)?\s*=",
            )
            .expect("static fallback pattern"),
            enum_decl: Regex::new(
                r"^(?P<export>export\s+)?(?:const\s+)?enum\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)",
            )
            .expect("static fallback pattern"),
            const_binding: Regex::new(
                r"^(?P<export>export\s+)?const\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)[^=]*=\s*(?P<value>.*)$",
            )
            .expect("static fallback pattern"),
            let_var_binding: Regex::new(
                r"^(?P<export>export\s+)(?:let|var)\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)",
            )
            .expect("static fallback pattern"),
        }
    }

    /// Scan content line by line for top-level declarations.
    pub fn extract(&self, content: &str) -> Vec<ExtractedSymbol> {
        let mut symbols = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let line_number = idx as u32 + 1;

            if let Some(caps) = self.function.captures(line) {
                symbols.push(fallback_symbol(
                    &caps["name"],
                    SymbolKind::Function,
                    line_number,
                    caps.name("export").is_some(),
                    caps.name("async").is_some(),
                    line,
                ));
                continue;
            }
            if let Some(caps) = self.class.captures(line) {
                symbols.push(fallback_symbol(
                    &caps["name"],
                    SymbolKind::Class,
                    line_number,
                    caps.name("export").is_some(),
                    false,
                    line,
                ));
                continue;
            }
            if let Some(caps) = self.interface.captures(line) {
                symbols.push(fallback_symbol(
                    &caps["name"],
                    SymbolKind::Interface,
                    line_number,
                    caps.name("export").is_some(),
                    false,
                    line,
                ));
                continue;
            }
            if let Some(caps) = self.enum_decl.captures(line) {
                symbols.push(fallback_symbol(
                    &caps["name"],
                    SymbolKind::Enum,
                    line_number,
                    caps.name("export").is_some(),
                    false,
                    line,
                ));
                continue;
            }
            if let Some(caps) = self.type_alias.captures(line) {
                symbols.push(fallback_symbol(
                    &caps["name"],
                    SymbolKind::Type,
                    line_number,
                    caps.name("export").is_some(),
                    false,
                    line,
                ));
                continue;
            }
            if let Some(caps) = self.const_binding.captures(line) {
                let value = caps.name("value").map(|m| m.as_str()).unwrap_or("");
                let is_function =
                    value.contains("=>") || value.trim_start().starts_with("function");
                let is_async = value.trim_start().starts_with("async");
                symbols.push(fallback_symbol(
                    &caps["name"],
                    if is_function {
                        SymbolKind::Function
                    } else {
                        SymbolKind::Constant
                    },
                    line_number,
                    caps.name("export").is_some(),
                    is_async,
                    line,
                ));
                continue;
            }
            if let Some(caps) = self.let_var_binding.captures(line) {
                symbols.push(fallback_symbol(
                    &caps["name"],
                    SymbolKind::Variable,
                    line_number,
                    true,
                    false,
                    line,
                ));
            }
        }

        symbols
    }
}

impl Default for FallbackExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn fallback_symbol(
    name: &str,
    kind: SymbolKind,
    line: u32,
    is_exported: bool,
    is_async: bool,
    line_text: &str,
) -> ExtractedSymbol {
    ExtractedSymbol {
        name: name.to_string(),
        kind,
        line_start: line,
        line_end: line,
        column_start: 0,
        column_end: line_text.len() as u32,
        signature: Some(line_text.trim_end().to_string()),
        documentation: None,
        is_exported,
        is_async,
        access_modifier: None,
        generic_params: None,
        fallback: true,
    }
}
