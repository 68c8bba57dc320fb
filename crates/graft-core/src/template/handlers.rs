//! Template handlers
//!
//! One handler per catalog entry. Handlers construct source text from the
//! validated parameter slots and route every write through the primitive
//! layer (or through a single atomic edit plan when one step needs two
//! coordinated splices).

use serde_json::{Map, Value};
use tree_sitter::Node;

use crate::compose;
use crate::edit::{self, ByteEdit, EditPlan, FileState, InsertParams, ReplaceNodeParams, WrapParams};
use crate::locator;
use crate::parser;
use crate::parser::language::{comment_kinds, identifier_kind, string_kinds};
use crate::types::{ExecOptions, Language, Locator, StepReport};

/// Language of the file a step's `target` locator points at
pub(crate) fn target_language(params: &Map<String, Value>) -> Option<Language> {
    let locator: Locator = serde_json::from_value(params.get("target")?.clone()).ok()?;
    Language::from_path(locator.file()?)
}

pub(crate) fn dispatch(name: &str, params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    match name {
        "guard_clause" => guard_clause(params, opts),
        "add_import_and_use" => add_import_and_use(params, opts),
        "add_method" => add_method(params, opts),
        "add_parameter" => add_parameter(params, opts),
        "add_class_attribute" => add_class_attribute(params, opts),
        "add_decorator" => add_decorator(params, opts),
        "add_conditional_branch" => add_conditional_branch(params, opts),
        "replace_expression" => replace_expression(params, opts),
        "modify_condition" => modify_condition(params, opts),
        "change_return_value" => change_return_value(params, opts),
        "replace_function_body" => replace_function_body(params, opts),
        "wrap_try_except" => wrap_try_except(params, opts),
        "wrap_context_manager" => wrap_context_manager(params, opts),
        "extract_variable" => extract_variable(params, opts),
        "inline_variable" => inline_variable(params, opts),
        other => StepReport::fail(format!("unknown template '{other}'")),
    }
}

// ============================================================================
// Parameter access
// ============================================================================

fn str_param<'p>(params: &'p Map<String, Value>, key: &str) -> Option<&'p str> {
    params.get(key).and_then(Value::as_str)
}

fn locator_param(params: &Map<String, Value>, key: &str) -> Result<Locator, StepReport> {
    let value = params
        .get(key)
        .ok_or_else(|| StepReport::fail(format!("missing parameter '{key}'")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| StepReport::fail(format!("parameter '{key}' is not a valid locator: {e}")))
}

fn unique_node<'s>(
    state: &'s FileState,
    locator: &Locator,
) -> Result<Node<'s>, StepReport> {
    let nodes = locator::resolve(locator, state.language, &state.tree, &state.bytes)
        .map_err(|e| StepReport::fail(e.to_string()))?;
    match nodes.len() {
        0 => Err(StepReport::fail("locator resolved to no node")),
        1 => Ok(nodes[0]),
        n => Err(StepReport::fail(format!(
            "locator resolved to {n} nodes; provide 'index'"
        ))),
    }
}

// ============================================================================
// Adding code
// ============================================================================

fn guard_clause(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let condition = str_param(params, "condition").unwrap_or_default();
    let body = str_param(params, "guard_body").unwrap_or("return None");

    let text = format!("if {condition}:\n{}", edit::indent_lines(body, "    "));
    edit::insert_before_node(&InsertParams { locator: target, text }, opts)
}

fn add_import_and_use(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let import_line = str_param(params, "import_statement").unwrap_or_default();
    let target = params.get("target").map(|_| locator_param(params, "target"));
    let target = match target {
        Some(Ok(l)) => Some(l),
        Some(Err(r)) => return r,
        None => None,
    };

    let path = match target
        .as_ref()
        .and_then(|l| l.file().map(|p| p.to_path_buf()))
        .or_else(|| str_param(params, "file").map(std::path::PathBuf::from))
    {
        Some(p) => p,
        None => return StepReport::fail("add_import_and_use needs 'target' or 'file'"),
    };

    // Insert after the last existing import (or at top), then the
    // optional use-site edit; both share the add_import composed op
    let inserted = compose::run_builtin(
        "add_import",
        &serde_json::json!({ "file": path, "import": import_line }),
        opts,
    );
    if !inserted.success {
        return inserted;
    }

    // Optional use-site edit against the freshly mutated file
    if let (Some(target), Some(replacement)) = (target, str_param(params, "replacement")) {
        let edited = edit::replace_node(
            &ReplaceNodeParams {
                locator: target,
                replacement: replacement.to_string(),
                allow_kind_change: true,
            },
            opts,
        );
        if !edited.success {
            return StepReport::fail(format!(
                "import inserted but use-site edit failed ({}); plan-level rollback required",
                edited.error.unwrap_or_default()
            ));
        }
        return edited.with_warnings(inserted.warnings);
    }
    inserted
}

fn add_method(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let name = str_param(params, "name").unwrap_or_default();
    let parameters = str_param(params, "parameters").unwrap_or("self");
    let body = str_param(params, "body").unwrap_or("pass");

    let code = format!("def {name}({parameters}):\n{}", edit::indent_lines(body, "    "));
    compose::run_builtin(
        "add_method",
        &serde_json::json!({ "class": target, "code": code }),
        opts,
    )
}

fn add_class_attribute(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let name = str_param(params, "name").unwrap_or_default();
    let value = str_param(params, "value").unwrap_or_default();

    compose::run_builtin(
        "add_class_attribute",
        &serde_json::json!({ "class": target, "code": format!("{name} = {value}") }),
        opts,
    )
}

fn add_parameter(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let name = str_param(params, "name").unwrap_or_default();
    let annotation = str_param(params, "annotation");
    let default = str_param(params, "default");
    let first = str_param(params, "position") == Some("first");

    let state = match edit::state_for(&target) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_node(&state, &target) {
        Ok(n) => n,
        Err(r) => return r,
    };
    let Some(params_node) = find_parameters(node) else {
        return StepReport::fail("target has no parameter list");
    };

    let entry = parameter_entry(state.language, name, annotation, default);
    let existing = edit::node_text_owned(params_node, &state.bytes);
    let inner = existing
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    let new_inner = if inner.is_empty() {
        entry
    } else if first {
        format!("{entry}, {inner}")
    } else {
        format!("{inner}, {entry}")
    };
    let replacement = format!("({new_inner})");

    let (start, end) = (params_node.start_byte(), params_node.end_byte());
    let kind = params_node.kind().to_string();
    let mut plan = EditPlan::new(
        vec![ByteEdit {
            start,
            end,
            text: replacement.clone(),
        }],
        start..end,
        start..start + replacement.len(),
    );
    plan.preserve_kind = Some(kind);
    plan.original_text = existing;
    edit::run_mutation(state, plan, opts)
}

/// Parameter lists live under a `parameters` field, except in C/C++ where
/// they hide inside the declarator chain
fn find_parameters(node: Node<'_>) -> Option<Node<'_>> {
    if let Some(found) = node.child_by_field_name("parameters") {
        return Some(found);
    }
    let mut current = node.child_by_field_name("declarator")?;
    loop {
        if let Some(found) = current.child_by_field_name("parameters") {
            return Some(found);
        }
        current = current.child_by_field_name("declarator")?;
    }
}

fn parameter_entry(
    language: Language,
    name: &str,
    annotation: Option<&str>,
    default: Option<&str>,
) -> String {
    match language {
        Language::Python | Language::TypeScript | Language::Rust => {
            let mut entry = name.to_string();
            if let Some(annotation) = annotation {
                entry.push_str(&format!(": {annotation}"));
            }
            if let Some(default) = default {
                entry.push_str(&format!(" = {default}"));
            }
            entry
        }
        Language::Java | Language::C | Language::Cpp => match annotation {
            Some(annotation) => format!("{annotation} {name}"),
            None => name.to_string(),
        },
        Language::Go => match annotation {
            Some(annotation) => format!("{name} {annotation}"),
            None => name.to_string(),
        },
        Language::JavaScript | Language::Ruby | Language::Php => match default {
            Some(default) => format!("{name} = {default}"),
            None => name.to_string(),
        },
    }
}

fn add_decorator(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let decorator = str_param(params, "decorator")
        .unwrap_or_default()
        .trim_start_matches('@');

    edit::insert_before_node(
        &InsertParams {
            locator: target,
            text: format!("@{decorator}"),
        },
        opts,
    )
}

fn add_conditional_branch(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let body = str_param(params, "body").unwrap_or("pass");
    let header = match str_param(params, "condition") {
        Some(condition) => format!("elif {condition}:"),
        None => "else:".to_string(),
    };

    // An elif/else emitted directly under the if statement re-attaches to
    // it on re-parse
    edit::insert_after_node(
        &InsertParams {
            locator: target,
            text: format!("{header}\n{}", edit::indent_lines(body, "    ")),
        },
        opts,
    )
}

// ============================================================================
// Modifying code
// ============================================================================

fn replace_expression(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let new_expression = str_param(params, "new_expression").unwrap_or_default();

    edit::replace_node(
        &ReplaceNodeParams {
            locator: target,
            replacement: new_expression.to_string(),
            // expression kinds legitimately change (call -> identifier)
            allow_kind_change: true,
        },
        opts,
    )
}

fn modify_condition(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let new_condition = str_param(params, "new_condition").unwrap_or_default();

    let state = match edit::state_for(&target) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_node(&state, &target) {
        Ok(n) => n,
        Err(r) => return r,
    };
    let Some(mut condition) = node.child_by_field_name("condition") else {
        return StepReport::fail(format!(
            "target '{}' has no condition field",
            node.kind()
        ));
    };
    // Brace languages wrap the condition in parens; splice inside them
    if condition.kind() == "parenthesized_expression" {
        if let Some(inner) = condition.named_child(0) {
            condition = inner;
        }
    }

    let (start, end) = (condition.start_byte(), condition.end_byte());
    let mut plan = EditPlan::new(
        vec![ByteEdit {
            start,
            end,
            text: new_condition.to_string(),
        }],
        start..end,
        start..start + new_condition.len(),
    );
    plan.original_text = edit::node_text_owned(condition, &state.bytes);
    edit::run_mutation(state, plan, opts)
}

fn change_return_value(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let new_value = str_param(params, "new_value").unwrap_or_default();

    let state = match edit::state_for(&target) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_node(&state, &target) {
        Ok(n) => n,
        Err(r) => return r,
    };

    let return_kinds = ["return_statement", "return_expression", "return"];
    let ret = if return_kinds.contains(&node.kind()) {
        node
    } else {
        // Last return inside the targeted function
        match parser::named_nodes(node)
            .into_iter()
            .filter(|n| return_kinds.contains(&n.kind()))
            .next_back()
        {
            Some(found) => found,
            None => return StepReport::fail("target contains no return statement"),
        }
    };

    let original = edit::node_text_owned(ret, &state.bytes);
    let semicolon = if original.trim_end().ends_with(';') { ";" } else { "" };
    let replacement = format!("return {new_value}{semicolon}");

    let (start, end) = (ret.start_byte(), ret.end_byte());
    let kind = ret.kind().to_string();
    let mut plan = EditPlan::new(
        vec![ByteEdit {
            start,
            end,
            text: replacement.clone(),
        }],
        start..end,
        start..start + replacement.len(),
    );
    plan.preserve_kind = Some(kind);
    plan.original_text = original;
    edit::run_mutation(state, plan, opts)
}

fn replace_function_body(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let Some(new_body) = params.get("new_body") else {
        return StepReport::fail("missing parameter 'new_body'");
    };
    let fragments: Vec<crate::fragment::Fragment> = match new_body {
        Value::Array(_) => match serde_json::from_value(new_body.clone()) {
            Ok(f) => f,
            Err(e) => return StepReport::fail(format!("new_body: {e}")),
        },
        _ => match serde_json::from_value(new_body.clone()) {
            Ok(f) => vec![f],
            Err(e) => return StepReport::fail(format!("new_body: {e}")),
        },
    };

    let state = match edit::state_for(&target) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_node(&state, &target) {
        Ok(n) => n,
        Err(r) => return r,
    };
    let Some(body) = node.child_by_field_name("body") else {
        return StepReport::fail("target has no body field");
    };

    let indent = edit::line_indent(&state.bytes, body.start_byte());
    let serialized = fragments
        .iter()
        .map(|f| crate::fragment::serialize_fragment(f, 0))
        .collect::<Vec<_>>()
        .join("");
    let serialized = serialized.trim_end_matches('\n');
    let replacement = reindent_after_first(serialized, &indent);

    let (start, end) = (body.start_byte(), body.end_byte());
    let kind = body.kind().to_string();
    let mut plan = EditPlan::new(
        vec![ByteEdit {
            start,
            end,
            text: replacement.clone(),
        }],
        start..end,
        start..start + replacement.len(),
    );
    plan.preserve_kind = Some(kind);
    plan.original_text = edit::node_text_owned(body, &state.bytes);
    edit::run_mutation(state, plan, opts)
}

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

// ============================================================================
// Wrapping code
// ============================================================================

fn wrap_try_except(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let exception = str_param(params, "exception_type").unwrap_or("Exception");
    let handler_body = str_param(params, "handler_body").unwrap_or("pass");
    let header = match str_param(params, "exception_name") {
        Some(name) => format!("except {exception} as {name}:"),
        None => format!("except {exception}:"),
    };

    edit::wrap_node(
        &WrapParams {
            locator: target,
            before: "try:".to_string(),
            after: format!("{header}\n{}", edit::indent_lines(handler_body, "    ")),
            indent_body: true,
        },
        opts,
    )
}

fn wrap_context_manager(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let context_expr = str_param(params, "context_expr").unwrap_or_default();
    let header = match str_param(params, "alias") {
        Some(alias) => format!("with {context_expr} as {alias}:"),
        None => format!("with {context_expr}:"),
    };

    edit::wrap_node(
        &WrapParams {
            locator: target,
            before: header,
            after: String::new(),
            indent_body: true,
        },
        opts,
    )
}

// ============================================================================
// Restructuring
// ============================================================================

fn extract_variable(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };
    let name = str_param(params, "name").unwrap_or_default();

    let state = match edit::state_for(&target) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let expr = match unique_node(&state, &target) {
        Ok(n) => n,
        Err(r) => return r,
    };
    let Some(statement) = enclosing_statement(expr) else {
        return StepReport::fail("expression has no enclosing statement");
    };

    let expr_text = edit::node_text_owned(expr, &state.bytes);
    let point = edit::line_start(&state.bytes, statement.start_byte());
    let indent = edit::line_indent(&state.bytes, statement.start_byte());

    // Two coordinated splices, one atomic mutation: the assignment on the
    // line above, the name at the expression's original location
    let edits = vec![
        ByteEdit {
            start: point,
            end: point,
            text: format!("{indent}{name} = {expr_text}\n"),
        },
        ByteEdit {
            start: expr.start_byte(),
            end: expr.end_byte(),
            text: name.to_string(),
        },
    ];
    let plan = EditPlan::new(edits, point..expr.end_byte(), point..point);
    edit::run_mutation(state, plan, opts)
}

/// Nearest ancestor (or the node itself) that sits directly in a block
fn enclosing_statement(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node;
    while let Some(parent) = current.parent() {
        if matches!(parent.kind(), "block" | "module" | "statement_block" | "program") {
            return Some(current);
        }
        current = parent;
    }
    None
}

fn inline_variable(params: &Map<String, Value>, opts: ExecOptions) -> StepReport {
    let target = match locator_param(params, "target") {
        Ok(l) => l,
        Err(r) => return r,
    };

    let state = match edit::state_for(&target) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_node(&state, &target) {
        Ok(n) => n,
        Err(r) => return r,
    };
    // Grammars disagree on the binding node: Python `assignment`,
    // JS/TS `variable_declarator` or `assignment_expression`, Go
    // `short_var_declaration`, Rust `let_declaration`
    const ASSIGN_KINDS: &[&str] = &[
        "assignment",
        "assignment_expression",
        "variable_declarator",
        "short_var_declaration",
        "let_declaration",
    ];
    let assignment = if ASSIGN_KINDS.contains(&node.kind()) {
        node
    } else {
        match parser::named_nodes(node)
            .into_iter()
            .find(|n| ASSIGN_KINDS.contains(&n.kind()))
        {
            Some(found) => found,
            None => return StepReport::fail("target is not an assignment"),
        }
    };

    let Some(left) = assignment
        .child_by_field_name("left")
        .or_else(|| assignment.child_by_field_name("name"))
        .or_else(|| assignment.child_by_field_name("pattern"))
    else {
        return StepReport::fail("assignment has no left side");
    };
    let Some(right) = assignment
        .child_by_field_name("right")
        .or_else(|| assignment.child_by_field_name("value"))
    else {
        return StepReport::fail("assignment has no right side");
    };
    let ident = identifier_kind(state.language);
    if left.kind() != ident {
        return StepReport::fail("inline_variable needs a simple name on the left side");
    }

    let name = edit::node_text_owned(left, &state.bytes);
    let value = edit::node_text_owned(right, &state.bytes);
    let substitution = if needs_parens(&value) {
        format!("({value})")
    } else {
        value.clone()
    };

    // Every later use of the name, outside strings and comments
    let mut excluded: Vec<&str> = string_kinds(state.language).to_vec();
    excluded.extend_from_slice(comment_kinds(state.language));
    let uses: Vec<Node<'_>> = parser::named_nodes(state.tree.root_node())
        .into_iter()
        .filter(|n| {
            n.kind() == ident
                && n.start_byte() >= assignment.end_byte()
                && n.utf8_text(&state.bytes).is_ok_and(|t| t == name)
                && !parser::has_ancestor_of_kind(*n, &excluded)
        })
        .collect();
    if uses.is_empty() {
        return StepReport::fail(format!("no uses of '{name}' after its assignment"));
    }

    let statement = enclosing_statement(assignment).unwrap_or(assignment);
    let delete = edit::deletion_range(&state.bytes, statement.start_byte(), statement.end_byte());

    let mut edits = vec![ByteEdit {
        start: delete.start,
        end: delete.end,
        text: String::new(),
    }];
    let mut max_end = delete.end;
    for use_node in &uses {
        max_end = max_end.max(use_node.end_byte());
        edits.push(ByteEdit {
            start: use_node.start_byte(),
            end: use_node.end_byte(),
            text: substitution.clone(),
        });
    }

    let plan = EditPlan::new(edits, delete.start..max_end, delete.start..delete.start);
    edit::run_mutation(state, plan, opts)
}

/// Composite expressions are parenthesized before substitution
fn needs_parens(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.contains(' ') {
        return true;
    }
    !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || "_.()[]'\"".contains(c))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::template::execute_template;
    use crate::types::ExecOptions;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn no_advisory() -> ExecOptions {
        ExecOptions { advisory: false }
    }

    #[test]
    fn test_guard_clause_scenario() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f(x):\n    return x + 1\n");
        let report = execute_template(
            "guard_clause",
            &json!({
                "target": {"kind": "function", "name": "f",
                            "file": path.to_str().unwrap(), "field": "body"},
                "condition": "x is None",
                "guard_body": "return None",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "def f(x):\n    if x is None:\n        return None\n    return x + 1\n"
        );
    }

    #[test]
    fn test_modify_condition_only_touches_condition() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "m.py",
            "if a and b:\n    do_thing()\nelse:\n    other()\n",
        );
        let report = execute_template(
            "modify_condition",
            &json!({
                "target": {"kind": "statement", "file": path.to_str().unwrap(), "index": 0},
                "new_condition": "a and b and c",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "if a and b and c:\n    do_thing()\nelse:\n    other()\n"
        );
    }

    #[test]
    fn test_modify_condition_invalid_expression_rejected_before_write() {
        let dir = TempDir::new().unwrap();
        let original = "if a and b:\n    do_thing()\n";
        let path = write_file(&dir, "m.py", original);
        let report = execute_template(
            "modify_condition",
            &json!({
                "target": {"kind": "statement", "file": path.to_str().unwrap(), "index": 0},
                "new_condition": "if x >",
            }),
            no_advisory(),
        );
        assert!(!report.success);
        assert!(report.error.unwrap().contains("not a valid expression"));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_wrap_try_except() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    risky()\n");
        let report = execute_template(
            "wrap_try_except",
            &json!({
                "target": {"kind": "statement", "file": path.to_str().unwrap()},
                "exception_type": "ValueError",
                "exception_name": "e",
                "handler_body": "return None",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "def f():\n    try:\n        risky()\n    except ValueError as e:\n        return None\n"
        );
    }

    #[test]
    fn test_wrap_context_manager() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    read_all()\n");
        let report = execute_template(
            "wrap_context_manager",
            &json!({
                "target": {"kind": "statement", "file": path.to_str().unwrap()},
                "context_expr": "open('data.txt')",
                "alias": "fh",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "def f():\n    with open('data.txt') as fh:\n        read_all()\n"
        );
    }

    #[test]
    fn test_add_parameter_last_with_default() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f(a, b):\n    return a + b\n");
        let report = execute_template(
            "add_parameter",
            &json!({
                "target": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
                "name": "scale",
                "annotation": "int",
                "default": "1",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert!(fs::read_to_string(&path)
            .unwrap()
            .contains("def f(a, b, scale: int = 1):"));
    }

    #[test]
    fn test_add_parameter_first_empty_list() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    return 1\n");
        let report = execute_template(
            "add_parameter",
            &json!({
                "target": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
                "name": "ctx",
                "position": "first",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert!(fs::read_to_string(&path).unwrap().contains("def f(ctx):"));
    }

    #[test]
    fn test_change_return_value() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f(x):\n    y = x * 2\n    return y\n");
        let report = execute_template(
            "change_return_value",
            &json!({
                "target": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
                "new_value": "y + 1",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert!(fs::read_to_string(&path).unwrap().contains("return y + 1"));
    }

    #[test]
    fn test_extract_variable() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f(x):\n    return compute(x) + 1\n");
        let report = execute_template(
            "extract_variable",
            &json!({
                "target": {
                    "type": "sexp",
                    "query": "(call) @c",
                    "capture": "c",
                    "file": path.to_str().unwrap(),
                },
                "name": "partial",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "def f(x):\n    partial = compute(x)\n    return partial + 1\n"
        );
    }

    #[test]
    fn test_inline_variable() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "m.py",
            "def f(x):\n    y = x + 1\n    return y * y\n",
        );
        let report = execute_template(
            "inline_variable",
            &json!({
                "target": {"kind": "statement", "file": path.to_str().unwrap(), "index": 0},
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "def f(x):\n    return (x + 1) * (x + 1)\n"
        );
    }

    #[test]
    fn test_inline_variable_javascript() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "m.js",
            "function f(x) {\n    var y = x + 1;\n    return y * y;\n}\n",
        );
        let report = execute_template(
            "inline_variable",
            &json!({
                "target": {"kind": "statement", "file": path.to_str().unwrap(), "index": 0},
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "function f(x) {\n    return (x + 1) * (x + 1);\n}\n"
        );
    }

    #[test]
    fn test_modify_condition_javascript_keeps_parens() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.js", "if (a && b) {\n    go();\n}\n");
        let report = execute_template(
            "modify_condition",
            &json!({
                "target": {"kind": "statement", "file": path.to_str().unwrap(), "index": 0},
                "new_condition": "a && b && c",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "if (a && b && c) {\n    go();\n}\n"
        );
    }

    #[test]
    fn test_change_return_value_javascript_keeps_semicolon() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.js", "function f(x) {\n    return x;\n}\n");
        let report = execute_template(
            "change_return_value",
            &json!({
                "target": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
                "new_value": "x * 2",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert!(fs::read_to_string(&path).unwrap().contains("return x * 2;"));
    }

    #[test]
    fn test_add_conditional_branch() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "if a:\n    do_a()\n");
        let report = execute_template(
            "add_conditional_branch",
            &json!({
                "target": {"kind": "statement", "file": path.to_str().unwrap(), "index": 0},
                "condition": "b",
                "body": "do_b()",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "if a:\n    do_a()\nelif b:\n    do_b()\n"
        );
    }

    #[test]
    fn test_add_decorator() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    return 1\n");
        let report = execute_template(
            "add_decorator",
            &json!({
                "target": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
                "decorator": "staticmethod",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "@staticmethod\ndef f():\n    return 1\n"
        );
    }

    #[test]
    fn test_add_import_and_use() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "m.py",
            "import os\n\ndef f():\n    return parse('x')\n",
        );
        let report = execute_template(
            "add_import_and_use",
            &json!({
                "import_statement": "from urllib.parse import urlparse",
                "file": path.to_str().unwrap(),
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "import os\nfrom urllib.parse import urlparse\n\ndef f():\n    return parse('x')\n"
        );
    }

    #[test]
    fn test_replace_function_body_requires_fragment() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f(x):\n    return x\n");
        let report = execute_template(
            "replace_function_body",
            &json!({
                "target": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
                "new_body": {"kind": "return_statement", "value": "x * 2"},
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "def f(x):\n    return x * 2\n"
        );
    }

    #[test]
    fn test_python_only_template_rejects_other_language() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.js", "function f(x) { return x + 1; }\n");
        let report = execute_template(
            "guard_clause",
            &json!({
                "target": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
                "condition": "x === null",
            }),
            ExecOptions::default(),
        );
        assert!(!report.success);
        assert!(report.error.unwrap().contains("Python"));
    }

    #[test]
    fn test_unknown_template() {
        let report = execute_template("frobnicate", &json!({}), ExecOptions::default());
        assert!(!report.success);
        assert!(report.error.unwrap().contains("unknown template"));
    }
}
