//! Step router
//!
//! Detects a step's tier from its shape and dispatches it:
//! surgery op -> Tier 1, `template` -> Tier 2, `fragment` -> Tier 3,
//! otherwise primitive, composed operator, or legacy string-pattern op.
//! Every path returns the shared `StepReport`.

use serde_json::Value;
use tracing::debug;

use crate::compose::OpRegistry;
use crate::edit::{self, ByteEdit, EditPlan, FileState, PRIMITIVE_OPS};
use crate::fragment::{self, FragmentStep};
use crate::plan::{PlanDoc, LEGACY_OPS};
use crate::surgery::{self, SURGERY_OPS};
use crate::template;
use crate::types::{ExecOptions, StepReport};

/// Execute one step against an operator registry
pub fn execute_step(step: &Value, registry: &OpRegistry, opts: ExecOptions) -> StepReport {
    let Some(map) = step.as_object() else {
        return StepReport::fail("step must be a JSON object");
    };

    // Tier 2: parameterized template
    if let Some(name) = map.get("template").and_then(Value::as_str) {
        debug!(template = name, "dispatching tier-2 step");
        let params = map.get("params").cloned().unwrap_or(Value::Null);
        return template::execute_template(name, &params, opts);
    }

    // Tier 3: typed fragment
    if map.contains_key("fragment") {
        debug!("dispatching tier-3 step");
        let parsed: FragmentStep = match serde_json::from_value(step.clone()) {
            Ok(p) => p,
            Err(e) => return StepReport::fail(format!("invalid fragment step: {e}")),
        };
        return fragment::execute_fragment(&parsed, opts);
    }

    let Some(op) = map.get("op").and_then(Value::as_str) else {
        return StepReport::fail("step has none of 'op', 'template', 'fragment'");
    };

    // Tier 1: AST surgery
    if SURGERY_OPS.contains(&op) {
        debug!(op, "dispatching tier-1 step");
        return surgery::execute(op, step, opts);
    }

    // Primitive with explicit params (or flattened into the step)
    if PRIMITIVE_OPS.contains(&op) {
        debug!(op, "dispatching primitive step");
        let params = map.get("params").cloned().unwrap_or_else(|| step.clone());
        return edit::run_primitive(op, &params, opts);
    }

    // Composed operator (built-in or plan-defined)
    if registry.contains(op) {
        debug!(op, "dispatching composed operator");
        let params = map.get("params").cloned().unwrap_or(Value::Null);
        return registry.execute(op, &params, opts);
    }

    // Legacy string-pattern operators
    if LEGACY_OPS.contains(&op) {
        debug!(op, "dispatching legacy step");
        return execute_legacy(op, step, opts);
    }

    StepReport::fail(format!("unknown op '{op}'"))
}

/// Execute one step with no plan context (built-in composed ops only)
pub fn execute_single_step(step: &Value, opts: ExecOptions) -> StepReport {
    execute_step(step, &OpRegistry::default(), opts)
}

/// Execute a whole plan strictly in order
///
/// A step must fully commit (or roll back) before the next begins; the
/// first failure stops execution and is left to the caller's plan-level
/// rollback.
pub fn execute_plan(plan: &PlanDoc, opts: ExecOptions) -> (bool, Vec<StepReport>) {
    let registry = OpRegistry::from_defines(&plan.defines);
    let mut reports = Vec::new();

    for step in &plan.steps {
        let report = execute_step(step, &registry, opts);
        let failed = !report.success;
        reports.push(report);
        if failed {
            return (false, reports);
        }
    }
    (true, reports)
}

// ============================================================================
// Legacy operators
// ============================================================================

fn execute_legacy(op: &str, step: &Value, opts: ExecOptions) -> StepReport {
    let Some(params) = step.get("params").and_then(Value::as_object) else {
        return StepReport::fail(format!("op '{op}' requires 'params'"));
    };
    let Some(file) = params.get("file").and_then(Value::as_str) else {
        return StepReport::fail(format!("op '{op}' requires params.file"));
    };
    let Some(pattern) = params.get("pattern").and_then(Value::as_str) else {
        return StepReport::fail(format!("op '{op}' requires params.pattern"));
    };

    let state = match FileState::load(std::path::Path::new(file)) {
        Ok(s) => s,
        Err(e) => return StepReport::fail(e.to_string()),
    };
    let content = String::from_utf8_lossy(&state.bytes).into_owned();
    let Some(offset) = content.find(pattern) else {
        return StepReport::fail(format!("pattern '{pattern}' not found in '{file}'"));
    };
    let end = offset + pattern.len();

    let plan = match op {
        "replace_text" => {
            let Some(replacement) = params.get("replacement").and_then(Value::as_str) else {
                return StepReport::fail("replace_text requires params.replacement");
            };
            let mut plan = EditPlan::new(
                vec![ByteEdit {
                    start: offset,
                    end,
                    text: replacement.to_string(),
                }],
                offset..end,
                offset..offset + replacement.len(),
            );
            plan.original_text = pattern.to_string();
            plan
        }
        "insert_text_after" => {
            let Some(text) = params.get("text").and_then(Value::as_str) else {
                return StepReport::fail("insert_text_after requires params.text");
            };
            let indent = edit::line_indent(&state.bytes, offset);
            let le = edit::line_end(&state.bytes, end);
            let (point, block) = if le >= state.bytes.len() {
                (le, format!("\n{}", edit::indent_lines(text, &indent)))
            } else {
                (le + 1, format!("{}\n", edit::indent_lines(text, &indent)))
            };
            EditPlan::new(
                vec![ByteEdit {
                    start: point,
                    end: point,
                    text: block,
                }],
                point..point,
                point..point,
            )
        }
        "delete_text" => {
            let range = edit::deletion_range(&state.bytes, offset, end);
            EditPlan::new(
                vec![ByteEdit {
                    start: range.start,
                    end: range.end,
                    text: String::new(),
                }],
                range.clone(),
                range.start..range.start,
            )
        }
        other => return StepReport::fail(format!("unknown legacy op '{other}'")),
    };

    edit::run_mutation(state, plan, opts)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plan::parse_plan;
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
    fn test_router_detects_tiers() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f(x):\n    return x\n");
        let file = path.to_str().unwrap();

        // Tier 1
        let report = execute_single_step(
            &json!({"op": "delete_node",
                    "target": {"kind": "function", "name": "f", "file": file}}),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);

        // Tier 2
        fs::write(&path, "def f(x):\n    return x\n").unwrap();
        let report = execute_single_step(
            &json!({"template": "guard_clause", "params": {
                "target": {"kind": "function", "name": "f", "file": file, "field": "body"},
                "condition": "x is None",
            }}),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);

        // Tier 3
        fs::write(&path, "def f(x):\n    return x\n").unwrap();
        let report = execute_single_step(
            &json!({
                "fragment": {"kind": "return_statement", "value": "x * 2"},
                "target": {"kind": "statement", "file": file, "index": 0},
                "action": "replace",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert!(fs::read_to_string(&path).unwrap().contains("return x * 2"));
    }

    #[test]
    fn test_router_primitive_path() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    return 1\n");
        let report = execute_single_step(
            &json!({"op": "locate", "params": {
                "locator": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
            }}),
            no_advisory(),
        );
        assert!(report.success);
        assert_eq!(report.result.unwrap()["count"], 1);
    }

    #[test]
    fn test_router_unknown_op() {
        let report = execute_single_step(&json!({"op": "bogus"}), no_advisory());
        assert!(!report.success);
        assert!(report.error.unwrap().contains("unknown op"));
    }

    #[test]
    fn test_legacy_replace_text() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    return 1\n");
        let report = execute_single_step(
            &json!({"op": "replace_text", "params": {
                "file": path.to_str().unwrap(),
                "pattern": "return 1",
                "replacement": "return 2",
            }}),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert!(fs::read_to_string(&path).unwrap().contains("return 2"));
    }

    #[test]
    fn test_legacy_rolls_back_on_syntax_error() {
        let dir = TempDir::new().unwrap();
        let original = "def f():\n    return 1\n";
        let path = write_file(&dir, "m.py", original);
        let report = execute_single_step(
            &json!({"op": "replace_text", "params": {
                "file": path.to_str().unwrap(),
                "pattern": "return 1",
                "replacement": "return ((",
            }}),
            no_advisory(),
        );
        assert!(!report.success);
        assert!(report.rolled_back);
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_execute_plan_stops_on_failure_and_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    return 1\n");
        let file = path.to_str().unwrap();
        let plan = parse_plan(&json!([
            {"op": "insert_before_node", "params": {
                "locator": {"kind": "function", "name": "f", "file": file},
                "text": "# first",
            }},
            {"op": "delete_node", "target": {"kind": "function", "name": "ghost", "file": file}},
            {"op": "insert_after_node", "params": {
                "locator": {"kind": "function", "name": "f", "file": file},
                "text": "# never",
            }},
        ]))
        .unwrap();

        let (passed, reports) = execute_plan(&plan, no_advisory());
        assert!(!passed);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].success);
        assert!(!reports[1].success);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("# first"));
        assert!(!content.contains("# never"));
    }

    #[test]
    fn test_execute_plan_with_custom_operator() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "class Widget:\n    def render(self):\n        return 1\n");
        let plan = parse_plan(&json!({
            "define_operators": [{
                "define": "add_stub_method",
                "params_schema": {"class": "locator", "name": "string"},
                "steps": [
                    {"op": "add_method",
                     "params": {"class": "$class", "code": "def $name(self):\n    pass"}},
                ],
            }],
            "plan": [
                {"op": "add_stub_method", "params": {
                    "class": {"kind": "class", "name": "Widget", "file": path.to_str().unwrap()},
                    "name": "refresh",
                }},
            ],
        }))
        .unwrap();

        let (passed, reports) = execute_plan(&plan, no_advisory());
        assert!(passed, "{:?}", reports);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("    def refresh(self):\n        pass"));
    }

    #[test]
    fn test_locator_freshness_across_steps() {
        // Step 2's locator must resolve against the bytes committed by
        // step 1
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    return 1\n");
        let file = path.to_str().unwrap();
        let plan = parse_plan(&json!([
            {"op": "insert_after_node", "params": {
                "locator": {"kind": "function", "name": "f", "file": file},
                "text": "def g():\n    return 2",
            }},
            {"op": "delete_node", "target": {"kind": "function", "name": "g", "file": file}},
        ]))
        .unwrap();

        let (passed, _) = execute_plan(&plan, no_advisory());
        assert!(passed);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("def f"));
        assert!(!content.contains("def g"));
    }
}
