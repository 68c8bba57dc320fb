//! Tier 2 - parameterized templates
//!
//! A closed catalog of fifteen templates. Each declares typed parameter
//! slots; the engine validates every slot, constructs the source text, and
//! delegates the write to the primitive layer. Handlers never touch bytes
//! directly.
//!
//! Validation failures are reported per parameter so an orchestrator can
//! patch a single slot instead of regenerating the whole step.

pub(crate) mod handlers;

use serde_json::{Map, Value};

use crate::fragment::{self, Fragment};
use crate::parser::{self, parses_ok};
use crate::surgery::validate_identifier;
use crate::types::{ExecOptions, Language, Locator, StepReport};

// ============================================================================
// Catalog
// ============================================================================

/// Typed parameter kinds and their validators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Identifier,
    Expression,
    Statement,
    LocatorRef,
    Choice,
    FragmentRef,
    /// Free text (import lines, decorator names); checked non-empty only
    Text,
}

/// One declared parameter slot
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<&'static str>,
    pub choices: &'static [&'static str],
}

const fn required(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        default: None,
        choices: &[],
    }
}

const fn optional(name: &'static str, kind: ParamKind, default: Option<&'static str>) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        default,
        choices: &[],
    }
}

/// A template declaration: name, slots, node-kind contract
pub struct TemplateSpec {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
    pub input_kind: &'static str,
    pub output_kind: &'static str,
    /// Templates that synthesize suite-structured code are Python-only
    pub python_only: bool,
}

/// The fifteen templates, grouped by intent
pub fn catalog() -> &'static [TemplateSpec] {
    const CATALOG: &[TemplateSpec] = &[
        // Adding code
        TemplateSpec {
            name: "guard_clause",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("condition", ParamKind::Expression),
                optional("guard_body", ParamKind::Statement, Some("return None")),
            ],
            input_kind: "statement",
            output_kind: "if_statement",
            python_only: true,
        },
        TemplateSpec {
            name: "add_import_and_use",
            params: &[
                required("import_statement", ParamKind::Statement),
                optional("target", ParamKind::LocatorRef, None),
                optional("replacement", ParamKind::Expression, None),
                optional("file", ParamKind::Text, None),
            ],
            input_kind: "module",
            output_kind: "module",
            python_only: true,
        },
        TemplateSpec {
            name: "add_method",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("name", ParamKind::Identifier),
                optional("parameters", ParamKind::Text, Some("self")),
                optional("body", ParamKind::Statement, Some("pass")),
            ],
            input_kind: "class",
            output_kind: "class",
            python_only: true,
        },
        TemplateSpec {
            name: "add_parameter",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("name", ParamKind::Identifier),
                optional("annotation", ParamKind::Text, None),
                optional("default", ParamKind::Expression, None),
                ParamSpec {
                    name: "position",
                    kind: ParamKind::Choice,
                    required: false,
                    default: Some("last"),
                    choices: &["first", "last"],
                },
            ],
            input_kind: "function",
            output_kind: "function",
            python_only: false,
        },
        TemplateSpec {
            name: "add_class_attribute",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("name", ParamKind::Identifier),
                required("value", ParamKind::Expression),
            ],
            input_kind: "class",
            output_kind: "class",
            python_only: true,
        },
        TemplateSpec {
            name: "add_decorator",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("decorator", ParamKind::Text),
            ],
            input_kind: "function",
            output_kind: "function",
            python_only: true,
        },
        TemplateSpec {
            name: "add_conditional_branch",
            params: &[
                required("target", ParamKind::LocatorRef),
                optional("condition", ParamKind::Expression, None),
                required("body", ParamKind::Statement),
            ],
            input_kind: "if_statement",
            output_kind: "if_statement",
            python_only: true,
        },
        // Modifying code
        TemplateSpec {
            name: "replace_expression",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("new_expression", ParamKind::Expression),
            ],
            input_kind: "expression",
            output_kind: "expression",
            python_only: false,
        },
        TemplateSpec {
            name: "modify_condition",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("new_condition", ParamKind::Expression),
            ],
            input_kind: "statement",
            output_kind: "statement",
            python_only: false,
        },
        TemplateSpec {
            name: "change_return_value",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("new_value", ParamKind::Expression),
            ],
            input_kind: "function",
            output_kind: "function",
            python_only: false,
        },
        TemplateSpec {
            name: "replace_function_body",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("new_body", ParamKind::FragmentRef),
            ],
            input_kind: "function",
            output_kind: "function",
            python_only: true,
        },
        // Wrapping code
        TemplateSpec {
            name: "wrap_try_except",
            params: &[
                required("target", ParamKind::LocatorRef),
                optional("exception_type", ParamKind::Expression, Some("Exception")),
                optional("exception_name", ParamKind::Identifier, None),
                optional("handler_body", ParamKind::Statement, Some("pass")),
            ],
            input_kind: "statement",
            output_kind: "try_statement",
            python_only: true,
        },
        TemplateSpec {
            name: "wrap_context_manager",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("context_expr", ParamKind::Expression),
                optional("alias", ParamKind::Identifier, None),
            ],
            input_kind: "statement",
            output_kind: "with_statement",
            python_only: true,
        },
        // Restructuring
        TemplateSpec {
            name: "extract_variable",
            params: &[
                required("target", ParamKind::LocatorRef),
                required("name", ParamKind::Identifier),
            ],
            input_kind: "expression",
            output_kind: "statement",
            python_only: true,
        },
        TemplateSpec {
            name: "inline_variable",
            params: &[required("target", ParamKind::LocatorRef)],
            input_kind: "statement",
            output_kind: "module",
            python_only: false,
        },
    ];
    CATALOG
}

/// Look up a template by name
pub fn lookup(name: &str) -> Option<&'static TemplateSpec> {
    catalog().iter().find(|t| t.name == name)
}

// ============================================================================
// Parameter validation
// ============================================================================

/// Validate a parameter map against a template spec
///
/// Returns the map with defaults filled in, or one message per failing
/// slot.
pub fn validate_params(
    spec: &TemplateSpec,
    params: &Map<String, Value>,
    language: Language,
) -> Result<Map<String, Value>, Vec<String>> {
    let mut errors = Vec::new();
    let mut resolved = params.clone();

    for slot in spec.params {
        let value = match resolved.get(slot.name) {
            Some(v) => v.clone(),
            None => match (slot.required, slot.default) {
                (true, _) => {
                    errors.push(format!("missing required parameter '{}'", slot.name));
                    continue;
                }
                (false, Some(default)) => {
                    let v = Value::String(default.to_string());
                    resolved.insert(slot.name.to_string(), v.clone());
                    v
                }
                (false, None) => continue,
            },
        };

        if let Err(reason) = validate_param_value(slot, &value, language) {
            errors.push(format!("parameter '{}' {reason}", slot.name));
        }
    }

    if errors.is_empty() {
        Ok(resolved)
    } else {
        Err(errors)
    }
}

fn validate_param_value(slot: &ParamSpec, value: &Value, language: Language) -> Result<(), String> {
    match slot.kind {
        ParamKind::Identifier => {
            let text = value
                .as_str()
                .ok_or_else(|| "must be a string".to_string())?;
            validate_identifier(language, text).map_err(|e| format!("is not valid: {e}"))
        }
        ParamKind::Expression => {
            let text = value
                .as_str()
                .ok_or_else(|| "must be a string".to_string())?;
            if parses_as_expression(language, text) {
                Ok(())
            } else {
                Err(format!("is not a valid expression: '{text}'"))
            }
        }
        ParamKind::Statement => {
            let text = value
                .as_str()
                .ok_or_else(|| "must be a string".to_string())?;
            if parses_as_statement(language, text) {
                Ok(())
            } else {
                Err(format!("is not a valid statement: '{text}'"))
            }
        }
        ParamKind::LocatorRef => serde_json::from_value::<Locator>(value.clone())
            .map(|_| ())
            .map_err(|e| format!("is not a valid locator: {e}")),
        ParamKind::Choice => {
            let text = value
                .as_str()
                .ok_or_else(|| "must be a string".to_string())?;
            if slot.choices.contains(&text) {
                Ok(())
            } else {
                Err(format!(
                    "must be one of {:?}, got '{text}'",
                    slot.choices
                ))
            }
        }
        ParamKind::FragmentRef => {
            // Single fragment or array of fragments
            let frags: Vec<Fragment> = match value {
                Value::Array(_) => serde_json::from_value(value.clone())
                    .map_err(|e| format!("is not a valid fragment list: {e}"))?,
                _ => vec![serde_json::from_value(value.clone())
                    .map_err(|e| format!("is not a valid fragment: {e}"))?],
            };
            for frag in &frags {
                fragment::validate_fragment(frag).map_err(|e| format!("is invalid: {e}"))?;
            }
            Ok(())
        }
        ParamKind::Text => {
            let text = value
                .as_str()
                .ok_or_else(|| "must be a string".to_string())?;
            if text.trim().is_empty() {
                Err("must be non-empty".to_string())
            } else {
                Ok(())
            }
        }
    }
}

/// Syntax-check an expression by embedding it in a synthetic assignment
pub(crate) fn parses_as_expression(language: Language, text: &str) -> bool {
    if text.trim().is_empty() || text.contains('\n') {
        return false;
    }
    let snippet = match language {
        Language::Python => format!("__v = ({text})\n"),
        Language::Ruby => format!("v = ({text})\n"),
        Language::JavaScript | Language::TypeScript => format!("const v = ({text});\n"),
        Language::Java => format!("class T {{ void m() {{ Object v = ({text}); }} }}\n"),
        Language::Go => format!("package p\nvar v = ({text})\n"),
        Language::Rust => format!("fn f() {{ let v = ({text}); }}\n"),
        Language::Php => format!("<?php $v = ({text});\n"),
        Language::C | Language::Cpp => format!("int f() {{ int v = ({text}); }}\n"),
    };
    snippet_parses(language, &snippet)
}

/// Syntax-check a statement in a minimal host
pub(crate) fn parses_as_statement(language: Language, text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let snippet = match language {
        Language::Python => format!("{text}\n"),
        Language::Ruby => format!("def f\n{text}\nend\n"),
        Language::JavaScript | Language::TypeScript => format!("function f() {{ {text} }}\n"),
        Language::Java => format!("class T {{ void m() {{ {text} }} }}\n"),
        Language::Go => format!("package p\nfunc f() {{ {text} }}\n"),
        Language::Rust => format!("fn f() {{ {text} }}\n"),
        Language::Php => format!("<?php {text}\n"),
        Language::C | Language::Cpp => format!("void f() {{ {text} }}\n"),
    };
    snippet_parses(language, &snippet)
}

fn snippet_parses(language: Language, snippet: &str) -> bool {
    parser::parse_source(language, snippet.as_bytes())
        .map(|tree| parses_ok(&tree))
        .unwrap_or(false)
}

// ============================================================================
// Execution
// ============================================================================

/// Execute a template step: look up, validate every slot, dispatch
pub fn execute_template(name: &str, params: &Value, opts: ExecOptions) -> StepReport {
    let Some(spec) = lookup(name) else {
        return StepReport::fail(format!("unknown template '{name}'"));
    };
    let Some(params) = params.as_object() else {
        return StepReport::fail(format!("template '{name}': params must be an object"));
    };

    // Language comes from the target locator's file (templates without a
    // target, like a bare import insertion, fall back to Python)
    let language = handlers::target_language(params).unwrap_or(Language::Python);
    if spec.python_only && language != Language::Python {
        return StepReport::fail(format!(
            "template '{name}' supports Python targets only; target file is {}",
            language.name()
        ));
    }

    let resolved = match validate_params(spec, params, language) {
        Ok(map) => map,
        Err(errors) => {
            return StepReport::fail(format!(
                "template '{name}': {}",
                errors.join("; ")
            ))
        }
    };

    handlers::dispatch(name, &resolved, opts)
}
