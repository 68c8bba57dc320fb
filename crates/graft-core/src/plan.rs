//! Plan document and the seven-layer plan verifier
//!
//! The verifier runs before the first byte is written. Layers execute in
//! order and collect every finding rather than short-circuiting, so a
//! single revision can fix all of them. Blocking findings go to `errors`,
//! advisory ones to `warnings`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::compose::{CustomOp, BUILTIN_OPS};
use crate::edit::{FileState, PRIMITIVE_OPS};
use crate::graph::Graph;
use crate::locator;
use crate::parser::language::{comment_kinds, string_kinds};
use crate::parser::{self, parses_ok};
use crate::surgery::SURGERY_OPS;
use crate::template;
use crate::types::{EngineError, Language, Locator, Result, VerifyReport};

/// Legacy string-pattern operators, kept for backward compatibility
pub const LEGACY_OPS: &[&str] = &["replace_text", "insert_text_after", "delete_text"];

/// A parsed plan: optional operator definitions plus the ordered steps
#[derive(Debug, Default)]
pub struct PlanDoc {
    pub defines: Vec<CustomOp>,
    pub steps: Vec<Value>,
}

/// Parse a plan document
///
/// Accepts the bare array form `[Step]` and the object form
/// `{define_operators?, plan}`. An empty plan is rejected; every entry
/// must be an object carrying one of `op`/`template`/`fragment`.
pub fn parse_plan(value: &Value) -> Result<PlanDoc> {
    let (defines, steps) = match value {
        Value::Array(steps) => (Vec::new(), steps.clone()),
        Value::Object(map) => {
            let defines = match map.get("define_operators") {
                Some(defs) => serde_json::from_value(defs.clone())
                    .map_err(|e| EngineError::InvalidPlan(format!("define_operators: {e}")))?,
                None => Vec::new(),
            };
            let steps = map
                .get("plan")
                .and_then(Value::as_array)
                .ok_or_else(|| EngineError::InvalidPlan("missing 'plan' array".to_string()))?
                .clone();
            (defines, steps)
        }
        _ => {
            return Err(EngineError::InvalidPlan(
                "plan must be an array of steps or an object with a 'plan' array".to_string(),
            ))
        }
    };

    if steps.is_empty() {
        return Err(EngineError::InvalidPlan("plan is empty".to_string()));
    }
    for (index, step) in steps.iter().enumerate() {
        let Some(map) = step.as_object() else {
            return Err(EngineError::InvalidPlan(format!(
                "step {index} is not an object"
            )));
        };
        if !map.contains_key("op") && !map.contains_key("template") && !map.contains_key("fragment")
        {
            return Err(EngineError::InvalidPlan(format!(
                "step {index} has none of 'op', 'template', 'fragment'"
            )));
        }
    }

    Ok(PlanDoc { defines, steps })
}

// ============================================================================
// Verifier
// ============================================================================

/// Verify a plan against the graph and the files currently on disk
pub fn verify_plan(plan: &PlanDoc, graph: &Graph) -> VerifyReport {
    let mut report = VerifyReport::default();
    let custom_names: HashSet<&str> = plan.defines.iter().map(|op| op.define.as_str()).collect();
    let plan_files = plan_files(plan);

    // file -> cumulative line delta from earlier steps (layer 2)
    let mut drift: HashMap<PathBuf, i64> = HashMap::new();

    for (index, step) in plan.steps.iter().enumerate() {
        let shape = StepShape::of(step);

        layer0_structural(index, step, &shape, &custom_names, &mut report);
        layer0b_locators(index, step, &mut report);
        if shape.is_legacy() {
            layer1_pattern_existence(index, step, &mut report);
            layer3_pattern_context(index, step, &mut report);
        }
        layer2_line_drift(index, step, &shape, &mut drift, &mut report);
        if shape.op.as_deref() == Some("rename_identifier") {
            layer4_symbol_scope(index, step, &mut report);
        }
        layer5_preflight(index, step, &shape, &mut report);
        layer6_cross_file(index, step, &shape, graph, &plan_files, &mut report);
    }

    report.finish()
}

/// Discriminated view of one step's shape
struct StepShape {
    op: Option<String>,
    template: Option<String>,
    fragment: bool,
}

impl StepShape {
    fn of(step: &Value) -> Self {
        Self {
            op: step.get("op").and_then(Value::as_str).map(str::to_string),
            template: step
                .get("template")
                .and_then(Value::as_str)
                .map(str::to_string),
            fragment: step.get("fragment").is_some(),
        }
    }

    fn is_legacy(&self) -> bool {
        self.op
            .as_deref()
            .is_some_and(|op| LEGACY_OPS.contains(&op))
    }
}

/// All files any step references
fn plan_files(plan: &PlanDoc) -> HashSet<PathBuf> {
    let mut files = HashSet::new();
    for step in &plan.steps {
        for (_, locator) in step_locators(step) {
            if let Some(path) = locator.file() {
                files.insert(path.to_path_buf());
            }
        }
        if let Some(path) = legacy_file(step) {
            files.insert(path);
        }
    }
    files
}

fn legacy_file(step: &Value) -> Option<PathBuf> {
    step.get("params")?
        .get("file")?
        .as_str()
        .map(PathBuf::from)
}

/// Extract every locator-shaped value from a step (top level and params)
fn step_locators(step: &Value) -> Vec<(String, Locator)> {
    const LOCATOR_KEYS: &[&str] = &[
        "target",
        "locator",
        "source",
        "destination",
        "parent",
        "a",
        "b",
        "class",
    ];

    let mut out = Vec::new();
    let mut scan = |map: &serde_json::Map<String, Value>| {
        for key in LOCATOR_KEYS {
            if let Some(value) = map.get(*key) {
                if let Ok(locator) = serde_json::from_value::<Locator>(value.clone()) {
                    out.push((key.to_string(), locator));
                }
            }
        }
    };

    if let Some(map) = step.as_object() {
        scan(map);
        if let Some(params) = step.get("params").and_then(Value::as_object) {
            scan(params);
        }
    }
    out
}

// ============================================================================
// Layer 0 - structural
// ============================================================================

fn layer0_structural(
    index: usize,
    step: &Value,
    shape: &StepShape,
    custom_names: &HashSet<&str>,
    report: &mut VerifyReport,
) {
    if let Some(name) = &shape.template {
        match template::lookup(name) {
            None => report.error(
                "structural",
                Some(index),
                format!("unknown template '{name}'"),
            ),
            Some(spec) => {
                let params = step
                    .get("params")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let language = language_of_step(step).unwrap_or(Language::Python);
                if let Err(errors) = template::validate_params(spec, &params, language) {
                    for message in errors {
                        report.error(
                            "param_validation",
                            Some(index),
                            format!("template={name}: {message}"),
                        );
                    }
                }
            }
        }
    } else if shape.fragment {
        match step.get("fragment") {
            Some(fragment) => match serde_json::from_value::<crate::fragment::Fragment>(
                fragment.clone(),
            ) {
                Ok(parsed) => {
                    if let Err(message) = crate::fragment::validate_fragment(&parsed) {
                        report.error("param_validation", Some(index), format!("fragment: {message}"));
                    }
                }
                Err(e) => report.error("param_validation", Some(index), format!("fragment: {e}")),
            },
            None => report.error("structural", Some(index), "missing 'fragment'"),
        }
        if step.get("target").is_none() {
            report.error("structural", Some(index), "fragment step: missing 'target'");
        }
        if step.get("action").is_none() {
            report.error("structural", Some(index), "fragment step: missing 'action'");
        }
    } else if let Some(op) = &shape.op {
        let known = SURGERY_OPS.contains(&op.as_str())
            || PRIMITIVE_OPS.contains(&op.as_str())
            || BUILTIN_OPS.contains(&op.as_str())
            || LEGACY_OPS.contains(&op.as_str())
            || custom_names.contains(op.as_str());
        if !known {
            report.error("structural", Some(index), format!("unknown op '{op}'"));
        }
        for missing in missing_op_params(op, step) {
            report.error(
                "structural",
                Some(index),
                format!("op={op}: missing '{missing}'"),
            );
        }
    }

    // Referenced files must exist on disk
    for (key, locator) in step_locators(step) {
        if let Some(path) = locator.file() {
            if !path.exists() {
                report.error(
                    "structural",
                    Some(index),
                    format!("file '{}' (locator '{key}') does not exist", path.display()),
                );
            }
        }
    }
    if let Some(path) = legacy_file(step) {
        if !path.exists() {
            report.error(
                "structural",
                Some(index),
                format!("file '{}' does not exist", path.display()),
            );
        }
    }
}

fn missing_op_params(op: &str, step: &Value) -> Vec<&'static str> {
    let required: &[&str] = match op {
        "rename_identifier" => &["target", "new_name"],
        "reorder_children" => &["parent", "order"],
        "copy_node" | "move_node" => &["source", "destination"],
        "swap_nodes" => &["a", "b"],
        "delete_node" if step.get("params").is_none() => &["target"],
        "replace_text" | "delete_text" => &["params"],
        "insert_text_after" => &["params"],
        _ => &[],
    };
    required
        .iter()
        .filter(|key| step.get(**key).is_none())
        .copied()
        .collect()
}

fn language_of_step(step: &Value) -> Option<Language> {
    step_locators(step)
        .into_iter()
        .find_map(|(_, locator)| locator.file().and_then(Language::from_path))
}

// ============================================================================
// Layer 0b - locator preconditions
// ============================================================================

fn layer0b_locators(index: usize, step: &Value, report: &mut VerifyReport) {
    for (key, loc) in step_locators(step) {
        let Some(path) = loc.file().map(Path::to_path_buf) else {
            continue;
        };
        let state = match FileState::load(&path) {
            Ok(s) => s,
            Err(_) => continue, // reported by layer 0
        };
        match locator::resolve(&loc, state.language, &state.tree, &state.bytes) {
            Ok(nodes) if nodes.is_empty() => {
                report.error(
                    "l0b",
                    Some(index),
                    format!(
                        "locator '{key}' resolves to no node in '{}'",
                        path.display()
                    ),
                );
            }
            Ok(nodes) if nodes.len() > 1 && loc.index().is_none() => {
                report.warn(
                    "l0b",
                    Some(index),
                    format!(
                        "locator '{key}' is ambiguous ({} matches, no 'index')",
                        nodes.len()
                    ),
                );
            }
            Ok(_) => {}
            Err(e) => report.error("l0b", Some(index), format!("locator '{key}': {e}")),
        }
    }
}

// ============================================================================
// Layer 1 - pattern existence (legacy ops)
// ============================================================================

fn layer1_pattern_existence(index: usize, step: &Value, report: &mut VerifyReport) {
    let Some((path, pattern)) = legacy_pattern(step) else {
        return;
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
        return;
    };

    if content.contains(&pattern) {
        return;
    }

    // Fuzzy fallback: best line-level similarity
    let best = content
        .lines()
        .map(|line| similarity(line.trim(), pattern.trim()))
        .fold(0.0_f64, f64::max);
    if best >= 0.8 {
        report.warn(
            "l1",
            Some(index),
            format!(
                "pattern not found exactly; close match (similarity {best:.2}) exists in '{}'",
                path.display()
            ),
        );
    } else {
        report.error(
            "l1",
            Some(index),
            format!(
                "pattern '{}' not found in '{}'",
                truncate(&pattern, 40),
                path.display()
            ),
        );
    }
}

fn legacy_pattern(step: &Value) -> Option<(PathBuf, String)> {
    let params = step.get("params")?;
    let file = params.get("file")?.as_str()?;
    let pattern = params
        .get("pattern")
        .or_else(|| params.get("text"))?
        .as_str()?;
    Some((PathBuf::from(file), pattern.to_string()))
}

/// Normalized similarity: 1 - levenshtein / max_len
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut previous = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous + usize::from(ca != cb);
            previous = row[j + 1];
            row[j + 1] = substitution.min(previous + 1).min(row[j] + 1);
        }
    }
    row[b.len()]
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

// ============================================================================
// Layer 2 - line-drift analysis
// ============================================================================

fn layer2_line_drift(
    index: usize,
    step: &Value,
    shape: &StepShape,
    drift: &mut HashMap<PathBuf, i64>,
    report: &mut VerifyReport,
) {
    let file = step_file(step);

    // A later step that addresses lines directly inherits earlier drift
    if let Some(path) = &file {
        let accumulated = drift.get(path).copied().unwrap_or(0);
        if accumulated != 0 && step_uses_line_numbers(step) {
            report.warn(
                "l2",
                Some(index),
                format!(
                    "uses line numbers but earlier steps shift '{}' by {accumulated:+} lines",
                    path.display()
                ),
            );
        }
    }

    if let (Some(path), Some(delta)) = (file, estimate_line_delta(step, shape)) {
        *drift.entry(path).or_insert(0) += delta;
    }
}

fn step_file(step: &Value) -> Option<PathBuf> {
    step_locators(step)
        .into_iter()
        .find_map(|(_, locator)| locator.file().map(Path::to_path_buf))
        .or_else(|| legacy_file(step))
}

fn step_uses_line_numbers(step: &Value) -> bool {
    let Some(params) = step.get("params").and_then(Value::as_object) else {
        return false;
    };
    ["line", "start_line", "end_line"]
        .iter()
        .any(|key| params.contains_key(*key))
}

fn estimate_line_delta(step: &Value, shape: &StepShape) -> Option<i64> {
    let line_count = |text: &str| text.lines().count().max(1) as i64;
    let params = step.get("params");

    match shape.op.as_deref() {
        Some("insert_text_after") => {
            let text = params?.get("text")?.as_str()?;
            Some(line_count(text))
        }
        Some("delete_text") => {
            let pattern = params?.get("pattern")?.as_str()?;
            Some(-line_count(pattern))
        }
        Some("replace_text") => {
            let pattern = params?.get("pattern")?.as_str()?;
            let replacement = params?.get("replacement")?.as_str()?;
            Some(line_count(replacement) - line_count(pattern))
        }
        Some("insert_before_node" | "insert_after_node") => {
            let text = params?.get("text")?.as_str()?;
            Some(line_count(text))
        }
        _ => match shape.template.as_deref() {
            Some("guard_clause") => Some(2),
            Some("add_decorator") => Some(1),
            Some("wrap_try_except") => Some(2),
            _ => None,
        },
    }
}

// ============================================================================
// Layer 3 - AST context of pattern matches (legacy ops)
// ============================================================================

fn layer3_pattern_context(index: usize, step: &Value, report: &mut VerifyReport) {
    let Some((path, pattern)) = legacy_pattern(step) else {
        return;
    };
    let Ok(state) = FileState::load(&path) else {
        return;
    };
    let content = String::from_utf8_lossy(&state.bytes).into_owned();
    let Some(offset) = content.find(&pattern) else {
        return;
    };

    let Some(node) = state
        .tree
        .root_node()
        .named_descendant_for_byte_range(offset, offset + pattern.len().min(1))
    else {
        return;
    };
    let mut excluded: Vec<&str> = string_kinds(state.language).to_vec();
    excluded.extend_from_slice(comment_kinds(state.language));
    let inside = excluded.contains(&node.kind()) || parser::has_ancestor_of_kind(node, &excluded);
    if inside {
        report.warn(
            "l3",
            Some(index),
            format!(
                "pattern match falls inside a string or comment in '{}'",
                path.display()
            ),
        );
    }
}

// ============================================================================
// Layer 4 - symbol scope (rename-like ops)
// ============================================================================

fn layer4_symbol_scope(index: usize, step: &Value, report: &mut VerifyReport) {
    let Some((_, target)) = step_locators(step)
        .into_iter()
        .find(|(key, _)| key == "target")
    else {
        return;
    };
    let Some(path) = target.file().map(Path::to_path_buf) else {
        return;
    };
    let Ok(state) = FileState::load(&path) else {
        return;
    };
    let Ok(nodes) = locator::resolve(&target, state.language, &state.tree, &state.bytes) else {
        return;
    };

    let string_set = string_kinds(state.language);
    let comment_set = comment_kinds(state.language);
    let mut definitions = 0usize;
    let mut references = 0usize;
    let mut in_string = 0usize;
    let mut in_comment = 0usize;

    for node in &nodes {
        if parser::has_ancestor_of_kind(*node, string_set) {
            in_string += 1;
        } else if parser::has_ancestor_of_kind(*node, comment_set) {
            in_comment += 1;
        } else if node
            .parent()
            .and_then(|p| p.child_by_field_name("name"))
            .is_some_and(|n| n.id() == node.id())
        {
            definitions += 1;
        } else {
            references += 1;
        }
    }

    if in_string + in_comment > 0 {
        report.warn(
            "l4",
            Some(index),
            format!(
                "rename touches {definitions} definitions and {references} references; \
                 {in_string} occurrences in strings and {in_comment} in comments will not be renamed"
            ),
        );
    }
}

// ============================================================================
// Layer 5 - preflight syntax
// ============================================================================

fn layer5_preflight(index: usize, step: &Value, shape: &StepShape, report: &mut VerifyReport) {
    // Simulate the replacement splice in memory and parse the result
    let simulated: Option<(PathBuf, Locator, String, bool)> = match (
        shape.op.as_deref(),
        shape.template.as_deref(),
    ) {
        (Some("replace_node"), _) => {
            let params = step.get("params");
            let locator = params
                .and_then(|p| p.get("locator"))
                .and_then(|l| serde_json::from_value::<Locator>(l.clone()).ok());
            let replacement = params
                .and_then(|p| p.get("replacement"))
                .and_then(Value::as_str);
            match (locator, replacement) {
                (Some(l), Some(r)) => l
                    .file()
                    .map(|p| (p.to_path_buf(), l.clone(), r.to_string(), false)),
                _ => None,
            }
        }
        (_, Some("modify_condition")) => {
            let params = step.get("params");
            let target = params
                .and_then(|p| p.get("target"))
                .and_then(|l| serde_json::from_value::<Locator>(l.clone()).ok());
            let condition = params
                .and_then(|p| p.get("new_condition"))
                .and_then(Value::as_str);
            match (target, condition) {
                (Some(l), Some(c)) => l
                    .file()
                    .map(|p| (p.to_path_buf(), l.clone(), c.to_string(), true)),
                _ => None,
            }
        }
        _ => None,
    };

    let Some((path, loc, replacement, condition_field)) = simulated else {
        return;
    };
    let Ok(state) = FileState::load(&path) else {
        return;
    };
    let Ok(nodes) = locator::resolve(&loc, state.language, &state.tree, &state.bytes) else {
        return;
    };
    let Some(mut node) = nodes.first().copied() else {
        return;
    };
    if condition_field {
        match node.child_by_field_name("condition") {
            Some(condition) => node = condition,
            None => return,
        }
    }

    let mut simulated_bytes = state.bytes.clone();
    simulated_bytes.splice(node.start_byte()..node.end_byte(), replacement.bytes());
    match parser::parse_source(state.language, &simulated_bytes) {
        Ok(tree) if parses_ok(&tree) => {}
        _ => report.error(
            "l5",
            Some(index),
            format!(
                "preflight: replacement produces a syntax error in '{}'",
                path.display()
            ),
        ),
    }
}

// ============================================================================
// Layer 6 - cross-file impact
// ============================================================================

fn layer6_cross_file(
    index: usize,
    step: &Value,
    shape: &StepShape,
    graph: &Graph,
    plan_files: &HashSet<PathBuf>,
    report: &mut VerifyReport,
) {
    let renames = shape.op.as_deref() == Some("rename_identifier");
    let deletes = shape.op.as_deref() == Some("delete_node");
    if !renames && !deletes {
        return;
    }

    let Some(symbol) = affected_symbol(step) else {
        return;
    };

    let importers: Vec<&str> = graph
        .importers_of(&symbol)
        .into_iter()
        .filter(|file| !plan_files.contains(&PathBuf::from(file)))
        .collect();
    if !importers.is_empty() {
        let action = if renames { "renamed" } else { "deleted" };
        report.warn(
            "l6",
            Some(index),
            format!(
                "symbol '{symbol}' is {action} but still imported by files outside \
                 the plan: {}",
                importers.join(", ")
            ),
        );
    }
}

/// Symbol a rename/delete step touches, where statically recoverable
fn affected_symbol(step: &Value) -> Option<String> {
    for (key, locator) in step_locators(step) {
        if key != "target" && key != "locator" {
            continue;
        }
        match locator {
            Locator::Node(node) => {
                if let Some(name) = node.name {
                    return Some(name);
                }
            }
            Locator::Sexp(sexp) => {
                // #eq? @cap "name" in the query text
                if let Some(start) = sexp.query.find("#eq?") {
                    let rest = &sexp.query[start..];
                    let mut quoted = rest.split('"');
                    quoted.next();
                    if let Some(name) = quoted.next() {
                        return Some(name.to_string());
                    }
                }
            }
        }
    }
    None
}
