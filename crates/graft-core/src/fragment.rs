//! Tier 3 - typed fragments
//!
//! A fragment is a JSON description of an AST subtree. Validation checks
//! the kind, its required properties and the allowed-children rules;
//! serialization emits Python source at a requested indentation, with
//! child statements four columns deeper and sibling clauses
//! (elif/else/except/finally) at the parent construct's level.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edit::{self, ReplaceNodeParams, InsertParams};
use crate::locator;
use crate::types::{ExecOptions, Language, Locator, StepReport};

const INDENT_STEP: usize = 4;

/// Supported fragment kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragKind {
    FunctionDefinition,
    ClassDefinition,
    IfStatement,
    ElifClause,
    ElseClause,
    ForStatement,
    WhileStatement,
    WithStatement,
    TryStatement,
    ExceptClause,
    FinallyClause,
    ReturnStatement,
    RaiseStatement,
    Assignment,
    ExpressionStatement,
}

impl FragKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::FunctionDefinition => "function_definition",
            Self::ClassDefinition => "class_definition",
            Self::IfStatement => "if_statement",
            Self::ElifClause => "elif_clause",
            Self::ElseClause => "else_clause",
            Self::ForStatement => "for_statement",
            Self::WhileStatement => "while_statement",
            Self::WithStatement => "with_statement",
            Self::TryStatement => "try_statement",
            Self::ExceptClause => "except_clause",
            Self::FinallyClause => "finally_clause",
            Self::ReturnStatement => "return_statement",
            Self::RaiseStatement => "raise_statement",
            Self::Assignment => "assignment",
            Self::ExpressionStatement => "expression_statement",
        }
    }

    /// Properties that must be present and non-empty
    fn required_props(self) -> &'static [&'static str] {
        match self {
            Self::FunctionDefinition => &["name", "parameters"],
            Self::ClassDefinition => &["name"],
            Self::IfStatement | Self::ElifClause | Self::WhileStatement => &["condition"],
            Self::ForStatement => &["target", "iterable"],
            Self::WithStatement => &["context_expr"],
            Self::ReturnStatement | Self::RaiseStatement => &["value"],
            Self::Assignment => &["target", "value"],
            Self::ExpressionStatement => &["expression"],
            Self::ElseClause | Self::TryStatement | Self::ExceptClause | Self::FinallyClause => &[],
        }
    }

    /// Leaf kinds carry no children
    fn is_leaf(self) -> bool {
        matches!(
            self,
            Self::ReturnStatement
                | Self::RaiseStatement
                | Self::Assignment
                | Self::ExpressionStatement
        )
    }

    /// Clause kinds are emitted as siblings of their parent's header
    fn is_clause(self) -> bool {
        matches!(
            self,
            Self::ElifClause | Self::ElseClause | Self::ExceptClause | Self::FinallyClause
        )
    }

    /// Clause kinds admitted among this kind's children
    fn allowed_clauses(self) -> &'static [FragKind] {
        match self {
            Self::IfStatement | Self::ElifClause => &[FragKind::ElifClause, FragKind::ElseClause],
            Self::TryStatement => &[
                FragKind::ExceptClause,
                FragKind::ElseClause,
                FragKind::FinallyClause,
            ],
            Self::ForStatement | Self::WhileStatement => &[FragKind::ElseClause],
            _ => &[],
        }
    }
}

/// A typed AST fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Fragment>>,
    #[serde(flatten)]
    pub props: serde_json::Map<String, Value>,
}

impl Fragment {
    fn prop(&self, key: &str) -> Option<String> {
        match self.props.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validate a fragment tree: kind support, required properties,
/// leaf/children rules, allowed clause placement
pub fn validate_fragment(fragment: &Fragment) -> Result<(), String> {
    for prop in fragment.kind.required_props() {
        match fragment.prop(prop) {
            Some(value) if !value.trim().is_empty() => {}
            _ => {
                return Err(format!(
                    "fragment '{}' requires non-empty property '{prop}'",
                    fragment.kind.name()
                ))
            }
        }
    }

    let children = fragment.children.as_deref().unwrap_or(&[]);
    if fragment.kind.is_leaf() && !children.is_empty() {
        return Err(format!(
            "fragment '{}' is a leaf kind and cannot have children",
            fragment.kind.name()
        ));
    }

    for child in children {
        if child.kind.is_clause() && !fragment.kind.allowed_clauses().contains(&child.kind) {
            return Err(format!(
                "fragment '{}' does not admit '{}' children",
                fragment.kind.name(),
                child.kind.name()
            ));
        }
        validate_fragment(child)?;
    }
    Ok(())
}

// ============================================================================
// Serialization
// ============================================================================

/// Serialize a fragment to Python source at the given indentation (columns)
pub fn serialize_fragment(fragment: &Fragment, indent: usize) -> String {
    let mut out = String::new();
    write_fragment(fragment, indent, &mut out);
    out
}

fn write_fragment(fragment: &Fragment, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    let header = header_line(fragment);

    if fragment.kind.is_leaf() {
        out.push_str(&pad);
        out.push_str(&header);
        out.push('\n');
        return;
    }

    out.push_str(&pad);
    out.push_str(&header);
    out.push('\n');

    let children = fragment.children.as_deref().unwrap_or(&[]);
    let (clauses, body): (Vec<&Fragment>, Vec<&Fragment>) =
        children.iter().partition(|c| c.kind.is_clause());

    if body.is_empty() {
        out.push_str(&" ".repeat(indent + INDENT_STEP));
        out.push_str("pass\n");
    } else {
        for child in body {
            write_fragment(child, indent + INDENT_STEP, out);
        }
    }

    // Sibling clauses re-align with this construct's header
    for clause in clauses {
        write_fragment(clause, indent, out);
    }
}

fn header_line(fragment: &Fragment) -> String {
    let prop = |key: &str| fragment.prop(key).unwrap_or_default();
    match fragment.kind {
        FragKind::FunctionDefinition => {
            let returns = fragment
                .prop("returns")
                .map(|r| format!(" -> {r}"))
                .unwrap_or_default();
            format!("def {}({}){}:", prop("name"), prop("parameters"), returns)
        }
        FragKind::ClassDefinition => match fragment.prop("bases") {
            Some(bases) if !bases.is_empty() => format!("class {}({bases}):", prop("name")),
            _ => format!("class {}:", prop("name")),
        },
        FragKind::IfStatement => format!("if {}:", prop("condition")),
        FragKind::ElifClause => format!("elif {}:", prop("condition")),
        FragKind::ElseClause => "else:".to_string(),
        FragKind::ForStatement => format!("for {} in {}:", prop("target"), prop("iterable")),
        FragKind::WhileStatement => format!("while {}:", prop("condition")),
        FragKind::WithStatement => match fragment.prop("alias") {
            Some(alias) if !alias.is_empty() => {
                format!("with {} as {alias}:", prop("context_expr"))
            }
            _ => format!("with {}:", prop("context_expr")),
        },
        FragKind::TryStatement => "try:".to_string(),
        FragKind::ExceptClause => {
            let exception = fragment.prop("exception_type").unwrap_or_default();
            let name = fragment.prop("name").unwrap_or_default();
            match (exception.is_empty(), name.is_empty()) {
                (true, _) => "except:".to_string(),
                (false, true) => format!("except {exception}:"),
                (false, false) => format!("except {exception} as {name}:"),
            }
        }
        FragKind::FinallyClause => "finally:".to_string(),
        FragKind::ReturnStatement => format!("return {}", prop("value")),
        FragKind::RaiseStatement => format!("raise {}", prop("value")),
        FragKind::Assignment => format!("{} = {}", prop("target"), prop("value")),
        FragKind::ExpressionStatement => prop("expression"),
    }
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragAction {
    Replace,
    InsertBefore,
    InsertAfter,
}

#[derive(Debug, Deserialize)]
pub struct FragmentStep {
    pub fragment: Fragment,
    pub target: Locator,
    pub action: FragAction,
}

/// Apply a fragment step: validate, detect indentation from the target,
/// serialize, then route through the matching primitive
pub fn execute_fragment(step: &FragmentStep, opts: ExecOptions) -> StepReport {
    if let Err(message) = validate_fragment(&step.fragment) {
        return StepReport::fail(message);
    }

    let state = match edit::state_for(&step.target) {
        Ok(s) => s,
        Err(r) => return r,
    };
    if state.language != Language::Python {
        return StepReport::fail(format!(
            "fragments serialize Python source; target file is {}",
            state.language.name()
        ));
    }

    let text = serialize_fragment(&step.fragment, 0);
    let text = text.trim_end_matches('\n').to_string();

    match step.action {
        FragAction::Replace => {
            // Indentation of the replaced node's own line; continuation
            // lines of the serialized fragment are re-aligned to it
            let nodes =
                match locator::resolve(&step.target, state.language, &state.tree, &state.bytes) {
                    Ok(n) => n,
                    Err(e) => return StepReport::fail(e.to_string()),
                };
            let Some(node) = nodes.first() else {
                return StepReport::fail("locator resolved to no node");
            };
            let indent = edit::line_indent(&state.bytes, node.start_byte());
            let replacement = reindent_after_first(&text, &indent);
            drop(state);
            edit::replace_node(
                &ReplaceNodeParams {
                    locator: step.target.clone(),
                    replacement,
                    // The fragment's kind is the declared intent; a kind
                    // change here is explicit, not accidental
                    allow_kind_change: true,
                },
                opts,
            )
        }
        FragAction::InsertBefore => {
            drop(state);
            edit::insert_before_node(
                &InsertParams {
                    locator: step.target.clone(),
                    text,
                },
                opts,
            )
        }
        FragAction::InsertAfter => {
            drop(state);
            edit::insert_after_node(
                &InsertParams {
                    locator: step.target.clone(),
                    text,
                },
                opts,
            )
        }
    }
}

/// Keep the first line as-is, prefix every following line with `indent`
fn reindent_after_first(text: &str, indent: &str) -> String {
    let mut lines = text.lines();
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        if !line.is_empty() {
            out.push_str(indent);
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::{parse_source, parses_ok};
    use serde_json::json;

    fn fragment(value: Value) -> Fragment {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_requires_properties() {
        let frag = fragment(json!({"kind": "if_statement"}));
        let err = validate_fragment(&frag).unwrap_err();
        assert!(err.contains("condition"));
    }

    #[test]
    fn test_validate_leaf_rejects_children() {
        let frag = fragment(json!({
            "kind": "return_statement",
            "value": "1",
            "children": [{"kind": "expression_statement", "expression": "x"}],
        }));
        let err = validate_fragment(&frag).unwrap_err();
        assert!(err.contains("leaf"));
    }

    #[test]
    fn test_validate_clause_placement() {
        let frag = fragment(json!({
            "kind": "while_statement",
            "condition": "True",
            "children": [{"kind": "except_clause"}],
        }));
        assert!(validate_fragment(&frag).is_err());
    }

    #[test]
    fn test_serialize_if_raise() {
        let frag = fragment(json!({
            "kind": "if_statement",
            "condition": "not ok",
            "children": [{"kind": "raise_statement", "value": "ValueError('x')"}],
        }));
        assert_eq!(
            serialize_fragment(&frag, 0),
            "if not ok:\n    raise ValueError('x')\n"
        );
    }

    #[test]
    fn test_serialize_try_with_clauses() {
        let frag = fragment(json!({
            "kind": "try_statement",
            "children": [
                {"kind": "expression_statement", "expression": "risky()"},
                {"kind": "except_clause", "exception_type": "ValueError", "name": "e",
                 "children": [{"kind": "return_statement", "value": "None"}]},
                {"kind": "finally_clause",
                 "children": [{"kind": "expression_statement", "expression": "cleanup()"}]},
            ],
        }));
        assert_eq!(
            serialize_fragment(&frag, 4),
            "    try:\n        risky()\n    except ValueError as e:\n        return None\n    finally:\n        cleanup()\n"
        );
    }

    #[test]
    fn test_serialize_empty_body_emits_pass() {
        let frag = fragment(json!({
            "kind": "function_definition",
            "name": "f",
            "parameters": "x",
        }));
        assert_eq!(serialize_fragment(&frag, 0), "def f(x):\n    pass\n");
    }

    #[test]
    fn test_round_trip_every_kind() {
        let samples = vec![
            json!({"kind": "function_definition", "name": "f", "parameters": ["a", "b"]}),
            json!({"kind": "class_definition", "name": "C", "bases": "Base"}),
            json!({"kind": "if_statement", "condition": "x",
                   "children": [
                       {"kind": "return_statement", "value": "1"},
                       {"kind": "elif_clause", "condition": "y",
                        "children": [{"kind": "return_statement", "value": "2"}]},
                       {"kind": "else_clause",
                        "children": [{"kind": "return_statement", "value": "3"}]},
                   ]}),
            json!({"kind": "for_statement", "target": "i", "iterable": "range(10)",
                   "children": [{"kind": "expression_statement", "expression": "print(i)"}]}),
            json!({"kind": "while_statement", "condition": "running"}),
            json!({"kind": "with_statement", "context_expr": "open('f')", "alias": "fh"}),
            json!({"kind": "try_statement",
                   "children": [
                       {"kind": "expression_statement", "expression": "go()"},
                       {"kind": "except_clause", "exception_type": "KeyError"},
                   ]}),
            json!({"kind": "return_statement", "value": "x + 1"}),
            json!({"kind": "raise_statement", "value": "RuntimeError('no')"}),
            json!({"kind": "assignment", "target": "x", "value": "compute()"}),
            json!({"kind": "expression_statement", "expression": "do_it()"}),
        ];

        for sample in samples {
            let frag = fragment(sample.clone());
            validate_fragment(&frag).unwrap();
            let source = serialize_fragment(&frag, 0);
            let tree = parse_source(Language::Python, source.as_bytes()).unwrap();
            assert!(parses_ok(&tree), "round-trip failed for {sample}: {source}");
        }
    }

    #[test]
    fn test_execute_fragment_insert_before() {
        use std::fs;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def f(x):\n    return x + 1\n").unwrap();

        let step: FragmentStep = serde_json::from_value(json!({
            "fragment": {
                "kind": "if_statement",
                "condition": "x is None",
                "children": [{"kind": "return_statement", "value": "None"}],
            },
            "target": {
                "kind": "statement",
                "file": path.to_str().unwrap(),
                "index": 0,
            },
            "action": "insert_before",
        }))
        .unwrap();

        let report = execute_fragment(&step, ExecOptions { advisory: false });
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "def f(x):\n    if x is None:\n        return None\n    return x + 1\n"
        );
    }
}
