//! Core type definitions for the graft engine
//!
//! ARCHITECTURE: This module defines the types shared across the library.
//! Design principle: type-first development with explicit error handling.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum input size per file to prevent memory exhaustion (50MB)
pub const MAX_INPUT_SIZE: usize = 50 * 1024 * 1024;

// ============================================================================
// Language Support
// ============================================================================

/// Supported programming languages
///
/// ARCHITECTURE: Adding a new language requires:
/// 1. Add variant here
/// 2. Add tree-sitter grammar to Cargo.toml
/// 3. Implement `grammar()` mapping
/// 4. Add file extension in `from_extension()`
/// 5. Fill in the registry tables in `parser::language`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Rust,
    Ruby,
    Php,
    C,
    Cpp,
}

impl Language {
    /// Detect language from file extension
    ///
    /// # Examples
    /// ```
    /// use graft_core::Language;
    ///
    /// assert_eq!(Language::from_extension("py"), Some(Language::Python));
    /// assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
    /// assert_eq!(Language::from_extension("unknown"), None);
    /// ```
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "tsx" => Some(Self::TypeScript),
            "java" => Some(Self::Java),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            "rb" => Some(Self::Ruby),
            "php" => Some(Self::Php),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some(Self::Cpp),
            _ => None,
        }
    }

    /// Detect language from file path
    ///
    /// Rejects paths with parent directory traversal components (`..`);
    /// absolute paths are allowed.
    pub fn from_path(path: &Path) -> Option<Self> {
        use std::path::Component;

        for component in path.components() {
            if matches!(component, Component::ParentDir) {
                return None;
            }
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Get language name for display
    pub fn name(self) -> &'static str {
        match self {
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
            Self::TypeScript => "TypeScript",
            Self::Java => "Java",
            Self::Go => "Go",
            Self::Rust => "Rust",
            Self::Ruby => "Ruby",
            Self::Php => "PHP",
            Self::C => "C",
            Self::Cpp => "C++",
        }
    }

    /// File extensions recognized for this language
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py", "pyi"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Self::TypeScript => &["ts", "tsx"],
            Self::Java => &["java"],
            Self::Go => &["go"],
            Self::Rust => &["rs"],
            Self::Ruby => &["rb"],
            Self::Php => &["php"],
            Self::C => &["c", "h"],
            Self::Cpp => &["cpp", "cc", "cxx", "hpp", "hh"],
        }
    }

    /// Convert to tree-sitter Language
    ///
    /// ARCHITECTURE: This is the ONLY place where tree-sitter grammars are
    /// loaded. Grammars are loaded lazily per language.
    pub(crate) fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Ruby => tree_sitter_ruby::LANGUAGE.into(),
            Self::Php => tree_sitter_php::LANGUAGE_PHP.into(),
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }

    /// All registered languages
    pub fn all() -> &'static [Language] {
        &[
            Self::Python,
            Self::JavaScript,
            Self::TypeScript,
            Self::Java,
            Self::Go,
            Self::Rust,
            Self::Ruby,
            Self::Php,
            Self::C,
            Self::Cpp,
        ]
    }
}

// ============================================================================
// Locators
// ============================================================================

/// Normalized CST node kind
///
/// Higher layers speak in these; the registry maps them to language-native
/// node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormKind {
    Function,
    Class,
    Method,
    Import,
    Statement,
    Interface,
    Enum,
}

impl NormKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Import => "import",
            Self::Statement => "statement",
            Self::Interface => "interface",
            Self::Enum => "enum",
        }
    }
}

/// Marker for the sexp locator form (`"type": "sexp"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SexpTag {
    #[serde(rename = "sexp")]
    Sexp,
}

/// Raw tree-sitter query locator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SexpLocator {
    #[serde(rename = "type")]
    pub tag: SexpTag,
    /// Tree-sitter query source
    pub query: String,
    /// Capture name whose nodes are returned
    pub capture: String,
    /// Target file (optional; steps may carry the file separately)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Structured locator: normalized kind + optional narrowing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLocator {
    pub kind: NormKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Nested locator; matches are retained only when inside a parent match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Locator>>,
    /// Named CST field to project each match onto (`body`, `parameters`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Child index to project onto; -1 selects the last named child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth_child: Option<i64>,
    /// Disambiguator when the locator matches more than one node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

/// A declarative address into a CST
///
/// Resolution is always performed against the current bytes of the target
/// file; results are never cached across edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    Sexp(SexpLocator),
    Node(NodeLocator),
}

impl Locator {
    /// The file this locator targets, if it names one
    pub fn file(&self) -> Option<&Path> {
        match self {
            Self::Sexp(s) => s.file.as_deref(),
            Self::Node(n) => n.file.as_deref(),
        }
    }

    /// Disambiguating index, if set
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Sexp(_) => None,
            Self::Node(n) => n.index,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// The single result type shared by primitives, templates, fragments,
/// surgery operators and composed operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// True when a failing edit restored the file's pre-call bytes
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rolled_back: bool,
    /// Read-only operations (locate, locate_region) return data here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl StepReport {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            warnings: Vec::new(),
            rolled_back: false,
            result: None,
        }
    }

    pub fn ok_with(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::ok()
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            warnings: Vec::new(),
            rolled_back: false,
            result: None,
        }
    }

    pub fn fail_rolled_back(message: impl Into<String>) -> Self {
        Self {
            rolled_back: true,
            ..Self::fail(message)
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// One plan-verifier finding
///
/// `level` names the producing check (`structural`, `param_validation`,
/// `l0b`..`l6`) and `step_index` the offending step, so an orchestrator
/// can patch a single slot instead of regenerating the whole plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyError {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub message: String,
}

/// Plan verifier output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    pub passed: bool,
    pub errors: Vec<VerifyError>,
    pub warnings: Vec<VerifyError>,
}

impl VerifyReport {
    pub fn error(&mut self, level: &str, step_index: Option<usize>, message: impl Into<String>) {
        self.errors.push(VerifyError {
            level: level.to_string(),
            step_index,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, level: &str, step_index: Option<usize>, message: impl Into<String>) {
        self.warnings.push(VerifyError {
            level: level.to_string(),
            step_index,
            message: message.into(),
        });
    }

    pub fn finish(mut self) -> Self {
        self.passed = self.errors.is_empty();
        self
    }
}

/// Execution options for a step
///
/// Advisory verification levels (referential, import closure, triviality)
/// can be switched off; blocking levels cannot.
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub advisory: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self { advisory: true }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for engine operations
///
/// ARCHITECTURE: Using thiserror for ergonomic error handling.
/// All library functions return Result<T, EngineError>.
/// NO panics allowed in library code (enforced by clippy lints).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Language could not be detected from file path
    #[error("Unsupported language for file: {0}")]
    UnsupportedLanguage(PathBuf),

    /// tree-sitter failed to parse source code
    #[error("Failed to parse source code: {0}")]
    Parse(String),

    /// tree-sitter language loading error
    #[error("Tree-sitter language error: {0}")]
    TreeSitter(#[from] tree_sitter::LanguageError),

    /// Malformed tree-sitter query
    #[error("Invalid query: {0}")]
    Query(String),

    /// Locator index disambiguator out of bounds
    #[error("locator index out of bounds: index {index} with {matches} matches")]
    LocatorIndex { index: usize, matches: usize },

    /// Plan or step document is malformed
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Input file exceeds the size cap
    #[error("File too large: {0}")]
    FileTooLarge(PathBuf),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// UTF-8 conversion error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// Parser Types
// ============================================================================

/// Wrapper around tree-sitter Parser with language context
///
/// ARCHITECTURE: Parser is injected, not global.
/// Each Parser instance is bound to a specific language.
pub struct Parser {
    language: Language,
    inner: tree_sitter::Parser,
}

impl Parser {
    /// Create parser for specific language
    ///
    /// # Errors
    /// Returns `EngineError::TreeSitter` if the grammar fails to load.
    pub fn new(language: Language) -> Result<Self> {
        let mut inner = tree_sitter::Parser::new();
        inner.set_language(&language.grammar())?;

        Ok(Self { language, inner })
    }

    /// Parse source bytes into a CST
    ///
    /// Returns a tree even for sources with syntax errors; callers detect
    /// ERROR subtrees via `parses_ok`.
    ///
    /// # Errors
    /// Returns `EngineError::Parse` if tree-sitter gives up entirely.
    pub fn parse(&mut self, source: &[u8]) -> Result<tree_sitter::Tree> {
        self.inner.parse(source, None).ok_or_else(|| {
            EngineError::Parse(format!("failed to parse {} source", self.language.name()))
        })
    }

    /// Get language for this parser
    pub fn language(&self) -> Language {
        self.language
    }
}

// ============================================================================
// Type Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_extension() {
        assert_eq!(Language::from_extension("py"), Some(Language::Python));
        assert_eq!(Language::from_extension("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("hpp"), Some(Language::Cpp));
        assert_eq!(Language::from_extension("unknown"), None);
    }

    #[test]
    fn test_language_from_path_rejects_traversal() {
        assert_eq!(
            Language::from_path(Path::new("src/main.rs")),
            Some(Language::Rust)
        );
        assert_eq!(Language::from_path(Path::new("../evil.py")), None);
        assert_eq!(Language::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_locator_deserialize_structured() {
        let loc: Locator = serde_json::from_str(
            r#"{"kind": "function", "name": "f", "file": "m.py", "field": "body"}"#,
        )
        .unwrap();
        match loc {
            Locator::Node(n) => {
                assert_eq!(n.kind, NormKind::Function);
                assert_eq!(n.name.as_deref(), Some("f"));
                assert_eq!(n.field.as_deref(), Some("body"));
            }
            Locator::Sexp(_) => panic!("expected structured locator"),
        }
    }

    #[test]
    fn test_locator_deserialize_sexp() {
        let loc: Locator = serde_json::from_str(
            r#"{"type": "sexp", "query": "(identifier) @id", "capture": "id"}"#,
        )
        .unwrap();
        match loc {
            Locator::Sexp(s) => {
                assert_eq!(s.capture, "id");
            }
            Locator::Node(_) => panic!("expected sexp locator"),
        }
    }

    #[test]
    fn test_nested_locator() {
        let loc: Locator = serde_json::from_str(
            r#"{"kind": "method", "name": "run",
                "parent": {"kind": "class", "name": "Task"}}"#,
        )
        .unwrap();
        match loc {
            Locator::Node(n) => assert!(n.parent.is_some()),
            Locator::Sexp(_) => panic!("expected structured locator"),
        }
    }

    #[test]
    fn test_step_report_serialization_omits_empty() {
        let json = serde_json::to_string(&StepReport::ok()).unwrap();
        assert_eq!(json, r#"{"success":true}"#);

        let json = serde_json::to_string(&StepReport::fail_rolled_back("boom")).unwrap();
        assert!(json.contains(r#""rolled_back":true"#));
    }

    #[test]
    fn test_verify_report_finish() {
        let mut report = VerifyReport::default();
        report.warn("l3", Some(0), "minor");
        assert!(report.finish().passed);

        let mut report = VerifyReport::default();
        report.error("l0b", Some(1), "major");
        assert!(!report.finish().passed);
    }

    #[test]
    fn test_verify_error_serialization() {
        let mut report = VerifyReport::default();
        report.error("param_validation", Some(2), "parameter 'condition' is not a valid expression");
        let json = serde_json::to_value(&report.finish()).unwrap();
        assert_eq!(json["errors"][0]["level"], "param_validation");
        assert_eq!(json["errors"][0]["step_index"], 2);
        assert!(json["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("condition"));
    }
}
