//! Core data model: enumerations, row records, typed metadata, and the
//! deterministic id/key helpers shared by the ingestion pipeline and the
//! storage layer.
//!
//! Every table stores `metadata` as stringified JSON; the structs here are
//! the typed view of that JSON at the API boundary. Serialization happens
//! only at the storage edge.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Definition kinds. The CHECK constraint on `indexed_symbols.kind` admits
/// exactly these twelve values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    Type,
    Variable,
    Constant,
    Method,
    Property,
    Module,
    Namespace,
    Enum,
    EnumMember,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Variable => "variable",
            Self::Constant => "constant",
            Self::Method => "method",
            Self::Property => "property",
            Self::Module => "module",
            Self::Namespace => "namespace",
            Self::Enum => "enum",
            Self::EnumMember => "enum_member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "function" => Self::Function,
            "class" => Self::Class,
            "interface" => Self::Interface,
            "type" => Self::Type,
            "variable" => Self::Variable,
            "constant" => Self::Constant,
            "method" => Self::Method,
            "property" => Self::Property,
            "module" => Self::Module,
            "namespace" => Self::Namespace,
            "enum" => Self::Enum,
            "enum_member" => Self::EnumMember,
            _ => return None,
        })
    }

    /// All values, in CHECK-constraint order.
    pub const ALL: [SymbolKind; 12] = [
        Self::Function,
        Self::Class,
        Self::Interface,
        Self::Type,
        Self::Variable,
        Self::Constant,
        Self::Method,
        Self::Property,
        Self::Module,
        Self::Namespace,
        Self::Enum,
        Self::EnumMember,
    ];
}

/// Use kinds. The CHECK constraint on `indexed_references.reference_type`
/// admits exactly these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Import,
    Call,
    Extends,
    Implements,
    PropertyAccess,
    TypeReference,
    VariableReference,
    ReExport,
    ExportAll,
    DynamicImport,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Call => "call",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::PropertyAccess => "property_access",
            Self::TypeReference => "type_reference",
            Self::VariableReference => "variable_reference",
            Self::ReExport => "re_export",
            Self::ExportAll => "export_all",
            Self::DynamicImport => "dynamic_import",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "import" => Self::Import,
            "call" => Self::Call,
            "extends" => Self::Extends,
            "implements" => Self::Implements,
            "property_access" => Self::PropertyAccess,
            "type_reference" => Self::TypeReference,
            "variable_reference" => Self::VariableReference,
            "re_export" => Self::ReExport,
            "export_all" => Self::ExportAll,
            "dynamic_import" => Self::DynamicImport,
        _ => return None,
        })
    }

    /// True for the import-family kinds that can produce `file_import`
    /// dependency edges.
    pub fn is_import_like(&self) -> bool {
        matches!(
            self,
            Self::Import | Self::ReExport | Self::ExportAll | Self::DynamicImport
        )
    }

    pub const ALL: [ReferenceKind; 10] = [
        Self::Import,
        Self::Call,
        Self::Extends,
        Self::Implements,
        Self::PropertyAccess,
        Self::TypeReference,
        Self::VariableReference,
        Self::ReExport,
        Self::ExportAll,
        Self::DynamicImport,
    ];
}

/// Dependency edge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    FileImport,
    SymbolUsage,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileImport => "file_import",
            Self::SymbolUsage => "symbol_usage",
        }
    }
}

/// Class-member access modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessModifier {
    Public,
    Private,
    Protected,
    Readonly,
}

/// A repository row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    pub last_indexed_at: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Repository {
    /// Build a repository with the conventional deterministic id.
    pub fn new(full_name: &str) -> Self {
        let name = full_name
            .rsplit('/')
            .next()
            .unwrap_or(full_name)
            .to_string();
        Self {
            id: repository_id(full_name),
            name,
            full_name: full_name.to_string(),
            default_branch: "main".to_string(),
            last_indexed_at: None,
            metadata: serde_json::json!({}),
        }
    }
}

/// Typed view of `indexed_files.metadata`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Paths of files this file imports, resolved during ingestion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Project root the file was discovered under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<String>,
}

/// One source file prepared for ingestion (and its row shape on read).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub repository_id: String,
    pub path: String,
    pub content: String,
    pub language: Option<String>,
    pub size_bytes: i64,
    pub content_hash: Option<String>,
    pub indexed_at: String,
    #[serde(default)]
    pub metadata: FileMetadata,
}

/// Typed view of `indexed_symbols.metadata`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SymbolMetadata {
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_modifier: Option<AccessModifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_params: Option<String>,
    #[serde(default)]
    pub column_start: u32,
    #[serde(default)]
    pub column_end: u32,
    /// True when produced by the regex fallback: positions and kinds are
    /// approximate
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

/// A definition extracted from one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: String,
    pub file_id: String,
    pub repository_id: String,
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive
    pub line_start: u32,
    pub line_end: u32,
    pub signature: Option<String>,
    pub documentation: Option<String>,
    #[serde(default)]
    pub metadata: SymbolMetadata,
}

impl SymbolRecord {
    /// The deterministic join key used to link references to this symbol.
    pub fn key(&self, file_path: &str) -> String {
        symbol_key(file_path, &self.name, self.line_start)
    }
}

/// Typed view of `indexed_references.metadata`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_alias: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default_import: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_namespace_import: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_side_effect_import: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_as: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_method_call: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_optional_chaining: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_dynamic: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_template_pattern: bool,
    /// Original textual name when `symbol_name` was rewritten to a full
    /// symbol key by the cross-file linker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_name: Option<String>,
    /// Key of the enclosing definition at the reference site, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containing_symbol: Option<String>,
}

/// A use of a name within a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: String,
    pub file_id: String,
    pub repository_id: String,
    /// The textual reference, or a full symbol key once the cross-file
    /// linker resolved the target
    pub symbol_name: String,
    pub target_symbol_id: Option<String>,
    pub target_file_path: Option<String>,
    /// 1-based
    pub line_number: u32,
    /// 0-based
    pub column_number: u32,
    pub kind: ReferenceKind,
    #[serde(default)]
    pub metadata: ReferenceMetadata,
}

/// A directed edge in the cross-file dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: String,
    pub repository_id: String,
    pub from_file_id: Option<String>,
    pub to_file_id: Option<String>,
    pub from_symbol_id: Option<String>,
    pub to_symbol_id: Option<String>,
    pub kind: DependencyKind,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A user-named grouping of repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// An applied schema migration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMigration {
    pub id: i64,
    pub name: String,
    pub applied_at: String,
    pub checksum: Option<String>,
}

/// SHA-256 of the input, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn short_hash(input: &str) -> String {
    sha256_hex(input.as_bytes())[..16].to_string()
}

/// Deterministic repository id from its unique full name.
pub fn repository_id(full_name: &str) -> String {
    format!("repo_{}", short_hash(full_name))
}

/// Deterministic file id: re-indexing the same `(repository, path)` pair
/// reproduces the same id.
pub fn file_id(repository_id: &str, path: &str) -> String {
    format!("file_{}", short_hash(&format!("{repository_id}:{path}")))
}

/// Deterministic symbol id from its owning file, name, and start line.
pub fn symbol_id(file_id: &str, name: &str, line_start: u32) -> String {
    format!(
        "sym_{}",
        short_hash(&format!("{file_id}:{name}:{line_start}"))
    )
}

/// Deterministic reference id. The ordinal disambiguates repeated uses of
/// the same name at the same position (one per extractor emission).
pub fn reference_id(file_id: &str, name: &str, line: u32, column: u32, ordinal: usize) -> String {
    format!(
        "ref_{}",
        short_hash(&format!("{file_id}:{name}:{line}:{column}:{ordinal}"))
    )
}

/// Deterministic dependency-edge id from its endpoints.
pub fn edge_id(repository_id: &str, from: &str, to: &str, kind: DependencyKind) -> String {
    format!(
        "dep_{}",
        short_hash(&format!("{repository_id}:{from}:{to}:{}", kind.as_str()))
    )
}

/// Deterministic project id from its unique name.
pub fn project_id(name: &str) -> String {
    format!("proj_{}", short_hash(name))
}

/// The deterministic reference→symbol join key.
///
/// Known limitation: two symbols with the same name starting on the same
/// line of the same file (same-line overloads) collide; the last inserted
/// symbol wins the key slot.
pub fn symbol_key(file_path: &str, name: &str, line_start: u32) -> String {
    format!("{file_path}::{name}::{line_start}")
}

/// Current UTC timestamp, ISO-8601 with seconds precision.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_kinds_round_trip_their_names() {
        for kind in SymbolKind::ALL {
            assert_eq!(SymbolKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(SymbolKind::ALL.len(), 12);
        assert!(SymbolKind::from_str("struct").is_none());
    }

    #[test]
    fn reference_kinds_round_trip_their_names() {
        for kind in ReferenceKind::ALL {
            assert_eq!(ReferenceKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ReferenceKind::ALL.len(), 10);
    }

    #[test]
    fn import_like_kinds() {
        assert!(ReferenceKind::Import.is_import_like());
        assert!(ReferenceKind::ReExport.is_import_like());
        assert!(ReferenceKind::ExportAll.is_import_like());
        assert!(ReferenceKind::DynamicImport.is_import_like());
        assert!(!ReferenceKind::Call.is_import_like());
    }

    #[test]
    fn ids_are_deterministic_and_prefixed() {
        let repo = repository_id("acme/widgets");
        assert_eq!(repo, repository_id("acme/widgets"));
        assert!(repo.starts_with("repo_"));

        let file = file_id(&repo, "src/auth.ts");
        assert_eq!(file, file_id(&repo, "src/auth.ts"));
        assert_ne!(file, file_id(&repo, "src/other.ts"));

        let sym = symbol_id(&file, "authenticate", 1);
        assert_eq!(sym, symbol_id(&file, "authenticate", 1));
        assert_ne!(sym, symbol_id(&file, "authenticate", 2));
    }

    #[test]
    fn symbol_key_format() {
        assert_eq!(
            symbol_key("src/lib.ts", "foo", 1),
            "src/lib.ts::foo::1"
        );
    }

    #[test]
    fn symbol_metadata_serializes_sparsely() {
        let json = serde_json::to_string(&SymbolMetadata::default()).unwrap();
        assert!(!json.contains("fallback"));
        assert!(!json.contains("access_modifier"));

        let meta = SymbolMetadata {
            is_exported: true,
            fallback: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"fallback\":true"));
    }

    #[test]
    fn kind_serde_names_match_check_constraint() {
        let json = serde_json::to_string(&SymbolKind::EnumMember).unwrap();
        assert_eq!(json, "\"enum_member\"");
        let json = serde_json::to_string(&ReferenceKind::TypeReference).unwrap();
        assert_eq!(json, "\"type_reference\"");
    }

    #[test]
    fn repository_short_name_from_full_name() {
        let repo = Repository::new("acme/widgets");
        assert_eq!(repo.name, "widgets");
        assert_eq!(repo.default_branch, "main");
    }
}
