//! Composed operators
//!
//! A composed operator is a named sequence of DSL steps expanded with
//! parameter substitution. Built-ins cover the common insertion patterns;
//! plan-defined operators (`define_operators`) are type-checked against
//! their declared schema and live only for the executing plan.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::dsl::{self, DslStep, Scope};
use crate::edit::{self, ByteEdit, EditPlan, FileState};
use crate::types::{ExecOptions, Locator, NodeLocator, StepReport};

/// Built-in composed operator names
pub const BUILTIN_OPS: &[&str] = &["add_method", "add_import", "add_class_attribute"];

const MAX_EXPANSION_DEPTH: usize = 8;

/// A plan-defined composed operator
#[derive(Debug, Clone, Deserialize)]
pub struct CustomOp {
    pub define: String,
    #[serde(default)]
    pub params_schema: HashMap<String, String>,
    pub steps: Vec<DslStep>,
}

/// Operator table for one plan: built-ins plus the plan's `define_operators`
#[derive(Debug, Default)]
pub struct OpRegistry {
    custom: HashMap<String, CustomOp>,
}

impl OpRegistry {
    pub fn from_defines(defines: &[CustomOp]) -> Self {
        let custom = defines
            .iter()
            .map(|op| (op.define.clone(), op.clone()))
            .collect();
        Self { custom }
    }

    pub fn contains(&self, name: &str) -> bool {
        BUILTIN_OPS.contains(&name) || self.custom.contains_key(name)
    }

    pub fn custom_op(&self, name: &str) -> Option<&CustomOp> {
        self.custom.get(name)
    }

    /// Expand and run a composed operator
    pub fn execute(&self, name: &str, params: &Value, opts: ExecOptions) -> StepReport {
        self.execute_at_depth(name, params, opts, 0)
    }

    fn execute_at_depth(
        &self,
        name: &str,
        params: &Value,
        opts: ExecOptions,
        depth: usize,
    ) -> StepReport {
        if depth > MAX_EXPANSION_DEPTH {
            return StepReport::fail(format!(
                "composed operator expansion too deep (>{MAX_EXPANSION_DEPTH}) at '{name}'"
            ));
        }

        if let Some(custom) = self.custom.get(name) {
            return self.run_custom(custom, params, opts, depth);
        }
        match name {
            "add_method" | "add_class_attribute" => self.run_member_insert(name, params, opts, depth),
            "add_import" => run_add_import(params, opts),
            other => StepReport::fail(format!("unknown composed operator '{other}'")),
        }
    }

    // ------------------------------------------------------------------
    // Built-ins
    // ------------------------------------------------------------------

    /// add_method / add_class_attribute: locate the class body, then
    /// insert the member after its last child (or before its first)
    fn run_member_insert(
        &self,
        name: &str,
        params: &Value,
        opts: ExecOptions,
        depth: usize,
    ) -> StepReport {
        #[derive(Deserialize)]
        struct MemberParams {
            class: Locator,
            code: String,
        }
        let parsed: MemberParams = match serde_json::from_value(params.clone()) {
            Ok(p) => p,
            Err(e) => return StepReport::fail(format!("{name}: {e}")),
        };

        let anchor = match body_child_locator(&parsed.class, name == "add_class_attribute") {
            Ok(l) => l,
            Err(message) => return StepReport::fail(format!("{name}: {message}")),
        };

        let mut scope = Scope::new();
        scope.set("anchor", anchor);
        scope.set("code", Value::String(parsed.code));

        let steps = if name == "add_class_attribute" {
            vec![
                locate_step("$anchor", "found"),
                primitive_step("insert_before_node", json!({"locator": "$anchor", "text": "$code"})),
            ]
        } else {
            vec![
                locate_step("$anchor", "found"),
                primitive_step("insert_after_node", json!({"locator": "$anchor", "text": "$code"})),
            ]
        };

        self.run_steps(&steps, &mut scope, opts, depth)
    }

    fn run_custom(
        &self,
        op: &CustomOp,
        params: &Value,
        opts: ExecOptions,
        depth: usize,
    ) -> StepReport {
        let Some(map) = params.as_object() else {
            return StepReport::fail(format!("'{}': params must be an object", op.define));
        };

        // Type-check against the declared schema
        for (param, expected) in &op.params_schema {
            let Some(value) = map.get(param) else {
                return StepReport::fail(format!(
                    "'{}': missing parameter '{param}'",
                    op.define
                ));
            };
            if let Err(message) = check_type(value, expected) {
                return StepReport::fail(format!(
                    "'{}': parameter '{param}' {message}",
                    op.define
                ));
            }
        }

        let mut scope = Scope::new();
        for (key, value) in map {
            scope.set(key.clone(), value.clone());
        }

        self.run_steps(&op.steps, &mut scope, opts, depth)
    }

    // ------------------------------------------------------------------
    // Step execution
    // ------------------------------------------------------------------

    fn run_steps(
        &self,
        steps: &[DslStep],
        scope: &mut Scope,
        opts: ExecOptions,
        depth: usize,
    ) -> StepReport {
        let mut warnings = Vec::new();
        for step in steps {
            let report = self.run_step(step, scope, opts, depth);
            if !report.success {
                return report.with_warnings(warnings);
            }
            warnings.extend(report.warnings);
        }
        StepReport::ok().with_warnings(warnings)
    }

    fn run_step(
        &self,
        step: &DslStep,
        scope: &mut Scope,
        opts: ExecOptions,
        depth: usize,
    ) -> StepReport {
        match step {
            DslStep::Primitive {
                primitive,
                params,
                bind,
            } => {
                let params = match dsl::substitute(params, scope) {
                    Ok(p) => p,
                    Err(message) => return StepReport::fail(message),
                };
                let report = edit::run_primitive(primitive, &params, opts);
                if report.success {
                    if let Some(bind) = bind {
                        let bound = report
                            .result
                            .clone()
                            .unwrap_or_else(|| json!({"success": true}));
                        scope.set(bind.clone(), bound);
                    }
                }
                report
            }
            DslStep::Conditional {
                condition,
                then,
                otherwise,
            } => match dsl::eval_condition(condition, scope) {
                Ok(true) => self.run_step(then, scope, opts, depth),
                Ok(false) => match otherwise {
                    Some(step) => self.run_step(step, scope, opts, depth),
                    None => StepReport::ok(),
                },
                Err(message) => StepReport::fail(format!("condition '{condition}': {message}")),
            },
            DslStep::Call { op, params } => {
                let params = match dsl::substitute(params, scope) {
                    Ok(p) => p,
                    Err(message) => return StepReport::fail(message),
                };
                self.execute_at_depth(op, &params, opts, depth + 1)
            }
        }
    }
}

/// Run a built-in composed operator outside any plan context
pub fn run_builtin(name: &str, params: &Value, opts: ExecOptions) -> StepReport {
    OpRegistry::default().execute(name, params, opts)
}

fn locate_step(locator_ref: &str, bind: &str) -> DslStep {
    DslStep::Primitive {
        primitive: "locate".to_string(),
        params: json!({ "locator": locator_ref }),
        bind: Some(bind.to_string()),
    }
}

fn primitive_step(name: &str, params: Value) -> DslStep {
    DslStep::Primitive {
        primitive: name.to_string(),
        params,
        bind: None,
    }
}

/// Project a class locator onto a child of its body: first child for
/// attribute inserts, last child for method appends
fn body_child_locator(class: &Locator, first: bool) -> Result<Value, String> {
    let Locator::Node(node) = class else {
        return Err("class locator must be a structured locator".to_string());
    };
    let projected = NodeLocator {
        field: Some("body".to_string()),
        nth_child: Some(if first { 0 } else { -1 }),
        ..node.clone()
    };
    serde_json::to_value(Locator::Node(projected)).map_err(|e| e.to_string())
}

/// add_import: splice the import line after the file's last import (or at
/// the top), sharing the primitive execution protocol
fn run_add_import(params: &Value, opts: ExecOptions) -> StepReport {
    #[derive(Deserialize)]
    struct AddImportParams {
        file: std::path::PathBuf,
        import: String,
    }
    let parsed: AddImportParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(e) => return StepReport::fail(format!("add_import: {e}")),
    };

    let state = match FileState::load(&parsed.file) {
        Ok(s) => s,
        Err(e) => return StepReport::fail(e.to_string()),
    };

    let imports = crate::verify::file_imports(state.language, &state.tree, &state.bytes);
    let point = imports
        .iter()
        .map(|i| i.line)
        .max()
        .map(|last_line| byte_offset_after_line(&state.bytes, last_line))
        .unwrap_or(0);

    let plan = EditPlan::new(
        vec![ByteEdit {
            start: point,
            end: point,
            text: format!("{}\n", parsed.import.trim_end()),
        }],
        point..point,
        point..point,
    );
    edit::run_mutation(state, plan, opts)
}

/// Byte offset just past the end of a 1-based line
fn byte_offset_after_line(bytes: &[u8], line: usize) -> usize {
    let mut seen = 0;
    for (offset, &byte) in bytes.iter().enumerate() {
        if byte == b'\n' {
            seen += 1;
            if seen == line {
                return offset + 1;
            }
        }
    }
    bytes.len()
}

fn check_type(value: &Value, expected: &str) -> Result<(), String> {
    let ok = match expected {
        "string" => value.is_string(),
        "int" => value.is_i64() || value.is_u64(),
        "bool" => value.is_boolean(),
        "list" => value.is_array(),
        "dict" => value.is_object(),
        "locator" => serde_json::from_value::<Locator>(value.clone()).is_ok(),
        "any" => true,
        other => return Err(format!("has unknown schema type '{other}'")),
    };
    if ok {
        Ok(())
    } else {
        Err(format!("is not a {expected}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
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
    fn test_builtin_add_method() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "m.py",
            "class Widget:\n    def render(self):\n        return 1\n",
        );
        let report = run_builtin(
            "add_method",
            &json!({
                "class": {"kind": "class", "name": "Widget", "file": path.to_str().unwrap()},
                "code": "def hide(self):\n    self.visible = False",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("    def hide(self):\n        self.visible = False"));
        // appended after render, inside the class
        assert!(content.find("def render").unwrap() < content.find("def hide").unwrap());
    }

    #[test]
    fn test_builtin_add_class_attribute() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "m.py",
            "class Widget:\n    def render(self):\n        return 1\n",
        );
        let report = run_builtin(
            "add_class_attribute",
            &json!({
                "class": {"kind": "class", "name": "Widget", "file": path.to_str().unwrap()},
                "code": "visible = True",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "class Widget:\n    visible = True\n    def render(self):\n        return 1\n"
        );
    }

    #[test]
    fn test_builtin_add_import() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "import os\nimport sys\n\nx = 1\n");
        let report = run_builtin(
            "add_import",
            &json!({"file": path.to_str().unwrap(), "import": "import json"}),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "import os\nimport sys\nimport json\n\nx = 1\n"
        );
    }

    #[test]
    fn test_builtin_add_import_empty_file_imports_at_top() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "x = 1\n");
        let report = run_builtin(
            "add_import",
            &json!({"file": path.to_str().unwrap(), "import": "import os"}),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(fs::read_to_string(&path).unwrap(), "import os\nx = 1\n");
    }

    #[test]
    fn test_custom_op_with_binding_and_condition() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.py", "def f():\n    return 1\n");

        let defines: Vec<CustomOp> = serde_json::from_value(json!([{
            "define": "annotate_function",
            "params_schema": {"func": "locator", "marker": "string"},
            "steps": [
                {"primitive": "locate", "params": {"locator": "$func"}, "bind": "where"},
                {"if": "$where.found",
                 "then": {"primitive": "insert_before_node",
                          "params": {"locator": "$func", "text": "# $marker"}}},
            ],
        }]))
        .unwrap();
        let registry = OpRegistry::from_defines(&defines);

        let report = registry.execute(
            "annotate_function",
            &json!({
                "func": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
                "marker": "reviewed",
            }),
            no_advisory(),
        );
        assert!(report.success, "{:?}", report.error);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# reviewed\ndef f():\n    return 1\n"
        );
    }

    #[test]
    fn test_custom_op_type_check() {
        let defines: Vec<CustomOp> = serde_json::from_value(json!([{
            "define": "typed",
            "params_schema": {"count": "int"},
            "steps": [],
        }]))
        .unwrap();
        let registry = OpRegistry::from_defines(&defines);

        let report = registry.execute("typed", &json!({"count": "three"}), ExecOptions::default());
        assert!(!report.success);
        assert!(report.error.unwrap().contains("not a int"));
    }

    #[test]
    fn test_custom_op_missing_param() {
        let defines: Vec<CustomOp> = serde_json::from_value(json!([{
            "define": "typed",
            "params_schema": {"count": "int"},
            "steps": [],
        }]))
        .unwrap();
        let registry = OpRegistry::from_defines(&defines);

        let report = registry.execute("typed", &json!({}), ExecOptions::default());
        assert!(!report.success);
        assert!(report.error.unwrap().contains("missing parameter"));
    }

    #[test]
    fn test_unknown_composed_op() {
        let report = run_builtin("nonsense", &json!({}), ExecOptions::default());
        assert!(!report.success);
    }

    #[test]
    fn test_expansion_depth_guard() {
        let defines: Vec<CustomOp> = serde_json::from_value(json!([{
            "define": "loop_forever",
            "params_schema": {},
            "steps": [{"op": "loop_forever", "params": {}}],
        }]))
        .unwrap();
        let registry = OpRegistry::from_defines(&defines);

        let report = registry.execute("loop_forever", &json!({}), ExecOptions::default());
        assert!(!report.success);
        assert!(report.error.unwrap().contains("too deep"));
    }
}
