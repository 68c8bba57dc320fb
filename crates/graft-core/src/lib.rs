//! Graft Core - structured source transformation engine
//!
//! # Overview
//!
//! `graft-core` replaces free-form textual patches with a formal
//! three-tier operator system over a concrete syntax tree, paired with a
//! layered verification pipeline that catches structural, scope, and
//! import errors before an edit is committed.
//!
//! The layers, bottom to top:
//!
//! - **Language registry & parser facade** - ten tree-sitter grammars
//!   behind one `Language` enum; normalized kinds, symbol/import queries.
//! - **Graph builder** - symbols, imports and line-kind labels as compact
//!   JSON, consumed by the plan verifier.
//! - **Locator resolver** - declarative addresses resolved against the
//!   live tree before every use.
//! - **Primitive mutators** - six byte-level edits with preconditions,
//!   atomic per-file rollback, and postcondition verification.
//! - **Three transform tiers** - AST surgery, a 15-template catalog, and
//!   typed fragments serialized with correct indentation.
//! - **DSL & composed operators** - variable substitution, conditionals,
//!   built-in and plan-defined operator expansion.
//! - **Plan verifier** - seven static layers executed before the first
//!   byte is written.
//! - **Step router** - tier detection and dispatch to all of the above.
//!
//! # Example
//!
//! ```no_run
//! use graft_core::{execute_single_step, ExecOptions};
//! use serde_json::json;
//!
//! let step = json!({
//!     "template": "guard_clause",
//!     "params": {
//!         "target": {"kind": "function", "name": "f", "file": "m.py", "field": "body"},
//!         "condition": "x is None",
//!         "guard_body": "return None",
//!     },
//! });
//! let report = execute_single_step(&step, ExecOptions::default());
//! assert!(report.success);
//! ```
//!
//! # Design Principles
//!
//! 1. **Result types everywhere** - NO panics in library code (enforced
//!    by clippy)
//! 2. **Trees are never cached across edits** - every primitive re-reads
//!    and re-parses, which eliminates line-drift problems by construction
//! 3. **Advisory checks never block** - referential and import-closure
//!    findings are warnings; only parse/kind/containment failures roll
//!    back

pub use types::{
    EngineError,
    ExecOptions,
    Language,
    Locator,
    NodeLocator,
    NormKind,
    Parser,
    Result,
    SexpLocator,
    SexpTag,
    StepReport,
    VerifyError,
    VerifyReport,
    MAX_INPUT_SIZE,
};

pub use compose::{run_builtin, CustomOp, OpRegistry, BUILTIN_OPS};
pub use dsl::{eval_condition, substitute, DslStep, Scope};
pub use edit::{
    delete_node, insert_after_node, insert_before_node, locate, locate_region, replace_all_matching,
    replace_node, run_primitive, wrap_node, DeleteParams, InsertParams, LocateParams, MatchFilter,
    ReplaceAllParams, ReplaceNodeParams, WrapParams, PRIMITIVE_OPS,
};
pub use fragment::{
    execute_fragment, serialize_fragment, validate_fragment, FragAction, FragKind, Fragment,
    FragmentStep,
};
pub use graph::{build_graph, Graph, Import, Symbol};
pub use locator::resolve;
pub use parser::{parse_file, parse_source, parses_ok};
pub use plan::{parse_plan, verify_plan, PlanDoc, LEGACY_OPS};
pub use router::{execute_plan, execute_single_step, execute_step};
pub use surgery::SURGERY_OPS;
pub use template::{catalog, execute_template, lookup, ParamKind, ParamSpec, TemplateSpec};

mod compose;
mod dsl;
mod edit;
mod fragment;
mod graph;
mod locator;
mod parser;
mod plan;
mod router;
mod surgery;
mod template;
mod types;
mod verify;

// ============================================================================
// Introspection
// ============================================================================

/// Detect language from file extension
///
/// ```
/// use graft_core::{detect_language, Language};
///
/// assert_eq!(detect_language("py"), Some(Language::Python));
/// assert_eq!(detect_language("unknown"), None);
/// ```
pub fn detect_language(extension: &str) -> Option<Language> {
    Language::from_extension(extension)
}

/// Detect language from file path
pub fn detect_language_from_path(path: &std::path::Path) -> Option<Language> {
    Language::from_path(path)
}

/// Get library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Get list of supported languages
pub fn supported_languages() -> &'static [Language] {
    Language::all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_supported_languages() {
        assert_eq!(supported_languages().len(), 10);
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("go"), Some(Language::Go));
        assert_eq!(detect_language("php"), Some(Language::Php));
        assert_eq!(detect_language("unknown"), None);
    }
}
