//! Tier 1 - AST surgery operators
//!
//! Move/copy/swap/rename/reorder/delete over existing subtrees. No code is
//! generated here; every operator rearranges bytes that already exist,
//! delegating the actual writes to the primitive layer (or to a single
//! atomic edit plan when both ends live in one file).

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::edit::{
    self, ByteEdit, DeleteParams, EditPlan, FileState, InsertParams, MatchFilter,
    ReplaceAllParams, ReplaceNodeParams,
};
use crate::locator;
use crate::parser::language::{identifier_pattern, keywords};
use crate::types::{ExecOptions, Language, Locator, StepReport};

/// The tier-1 operator set
pub const SURGERY_OPS: &[&str] = &[
    "rename_identifier",
    "delete_node",
    "copy_node",
    "move_node",
    "swap_nodes",
    "reorder_children",
];

#[derive(Debug, Deserialize)]
struct RenameStep {
    target: Locator,
    new_name: String,
    #[serde(default)]
    filter: Option<MatchFilter>,
}

#[derive(Debug, Deserialize)]
struct DeleteStep {
    #[serde(alias = "locator")]
    target: Locator,
}

#[derive(Debug, Deserialize)]
struct CopyMoveStep {
    source: Locator,
    destination: Locator,
    #[serde(default)]
    position: Position,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Position {
    Before,
    #[default]
    After,
}

#[derive(Debug, Deserialize)]
struct SwapStep {
    a: Locator,
    b: Locator,
}

#[derive(Debug, Deserialize)]
struct ReorderStep {
    parent: Locator,
    order: Vec<usize>,
}

/// Dispatch one surgery step
pub fn execute(op: &str, step: &Value, opts: ExecOptions) -> StepReport {
    let result = match op {
        "rename_identifier" => parse_step(step).map(|s| rename_identifier(&s, opts)),
        "delete_node" => parse_step(step).map(|s: DeleteStep| {
            edit::delete_node(&DeleteParams { locator: s.target }, opts)
        }),
        "copy_node" => parse_step(step).map(|s| copy_node(&s, opts)),
        "move_node" => parse_step(step).map(|s| move_node(&s, opts)),
        "swap_nodes" => parse_step(step).map(|s| swap_nodes(&s, opts)),
        "reorder_children" => parse_step(step).map(|s| reorder_children(&s, opts)),
        other => return StepReport::fail(format!("unknown surgery op '{other}'")),
    };
    match result {
        Ok(report) => report,
        Err(message) => StepReport::fail(message),
    }
}

fn parse_step<T: serde::de::DeserializeOwned>(step: &Value) -> Result<T, String> {
    serde_json::from_value(step.clone()).map_err(|e| format!("invalid step parameters: {e}"))
}

// ============================================================================
// rename_identifier
// ============================================================================

fn rename_identifier(step: &RenameStep, opts: ExecOptions) -> StepReport {
    let state = match edit::state_for(&step.target) {
        Ok(s) => s,
        Err(r) => return r,
    };
    if let Err(message) = validate_identifier(state.language, &step.new_name) {
        return StepReport::fail(message);
    }

    edit::replace_all_matching(
        &ReplaceAllParams {
            locator: step.target.clone(),
            replacement: step.new_name.clone(),
            filter: step.filter,
        },
        opts,
    )
}

pub(crate) fn validate_identifier(language: Language, name: &str) -> Result<(), String> {
    let pattern = Regex::new(identifier_pattern(language))
        .map_err(|e| format!("identifier pattern: {e}"))?;
    if !pattern.is_match(name) {
        return Err(format!(
            "'{name}' is not a valid {} identifier",
            language.name()
        ));
    }
    if keywords(language).contains(&name) {
        return Err(format!("'{name}' is a {} keyword", language.name()));
    }
    Ok(())
}

// ============================================================================
// copy_node / move_node
// ============================================================================

/// Node text with the source line's indentation stripped from every line,
/// so the insert primitive can re-indent it at the destination
fn dedented_source_text(state: &FileState, locator: &Locator) -> Result<String, StepReport> {
    let nodes = locator::resolve(locator, state.language, &state.tree, &state.bytes)
        .map_err(|e| StepReport::fail(e.to_string()))?;
    let node = match nodes.len() {
        0 => return Err(StepReport::fail("source locator resolved to no node")),
        1 => nodes[0],
        n => {
            return Err(StepReport::fail(format!(
                "source locator resolved to {n} nodes; provide 'index'"
            )))
        }
    };
    let indent = edit::line_indent(&state.bytes, node.start_byte());
    let text = edit::node_text_owned(node, &state.bytes);
    let stripped = text
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                line.to_string()
            } else {
                line.strip_prefix(indent.as_str()).unwrap_or(line).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(stripped)
}

fn copy_node(step: &CopyMoveStep, opts: ExecOptions) -> StepReport {
    let source_state = match edit::state_for(&step.source) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let text = match dedented_source_text(&source_state, &step.source) {
        Ok(t) => t,
        Err(r) => return r,
    };
    drop(source_state);

    insert_at(&step.destination, step.position, text, opts)
}

fn insert_at(destination: &Locator, position: Position, text: String, opts: ExecOptions) -> StepReport {
    let params = InsertParams {
        locator: destination.clone(),
        text,
    };
    match position {
        Position::Before => edit::insert_before_node(&params, opts),
        Position::After => edit::insert_after_node(&params, opts),
    }
}

fn move_node(step: &CopyMoveStep, opts: ExecOptions) -> StepReport {
    let same_file = step.source.file() == step.destination.file();
    if same_file {
        // Within one file the delete must come first (the inserted copy
        // would make the source locator ambiguous), and the insert then
        // resolves against the post-delete tree.
        let state = match edit::state_for(&step.source) {
            Ok(s) => s,
            Err(r) => return r,
        };
        let text = match dedented_source_text(&state, &step.source) {
            Ok(t) => t,
            Err(r) => return r,
        };
        drop(state);

        let deleted = edit::delete_node(
            &DeleteParams {
                locator: step.source.clone(),
            },
            opts,
        );
        if !deleted.success {
            return deleted;
        }
        let inserted = insert_at(&step.destination, step.position, text, opts);
        if !inserted.success {
            return StepReport::fail(format!(
                "move_node: source deleted but insert failed ({}); plan-level rollback required",
                inserted.error.unwrap_or_default()
            ));
        }
        inserted
    } else {
        // Across files the insert goes first so a failure leaves the
        // source untouched.
        let source_state = match edit::state_for(&step.source) {
            Ok(s) => s,
            Err(r) => return r,
        };
        let text = match dedented_source_text(&source_state, &step.source) {
            Ok(t) => t,
            Err(r) => return r,
        };
        drop(source_state);

        let inserted = insert_at(&step.destination, step.position, text, opts);
        if !inserted.success {
            return inserted;
        }
        let deleted = edit::delete_node(
            &DeleteParams {
                locator: step.source.clone(),
            },
            opts,
        );
        if !deleted.success {
            return StepReport::fail(format!(
                "move_node: copy inserted but source delete failed ({}); plan-level rollback required",
                deleted.error.unwrap_or_default()
            ));
        }
        deleted.with_warnings(inserted.warnings)
    }
}

// ============================================================================
// swap_nodes
// ============================================================================

fn swap_nodes(step: &SwapStep, opts: ExecOptions) -> StepReport {
    let same_file = step.a.file() == step.b.file();
    if !same_file {
        return swap_across_files(step, opts);
    }

    let state = match edit::state_for(&step.a) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let (a_range, a_text) = match unique_range(&state, &step.a, "a") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let (b_range, b_text) = match unique_range(&state, &step.b, "b") {
        Ok(v) => v,
        Err(r) => return r,
    };
    if a_range.start < b_range.end && b_range.start < a_range.end {
        return StepReport::fail("swap_nodes: nodes overlap");
    }

    let edits = vec![
        ByteEdit {
            start: a_range.start,
            end: a_range.end,
            text: b_text,
        },
        ByteEdit {
            start: b_range.start,
            end: b_range.end,
            text: a_text,
        },
    ];
    let covering = a_range.start.min(b_range.start)..a_range.end.max(b_range.end);
    let plan = EditPlan::new(edits, covering.clone(), covering.start..covering.start);
    edit::run_mutation(state, plan, opts)
}

fn swap_across_files(step: &SwapStep, opts: ExecOptions) -> StepReport {
    let state_a = match edit::state_for(&step.a) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let state_b = match edit::state_for(&step.b) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let (_, a_text) = match unique_range(&state_a, &step.a, "a") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let (_, b_text) = match unique_range(&state_b, &step.b, "b") {
        Ok(v) => v,
        Err(r) => return r,
    };
    drop(state_a);
    drop(state_b);

    let first = edit::replace_node(
        &ReplaceNodeParams {
            locator: step.a.clone(),
            replacement: b_text,
            allow_kind_change: true,
        },
        opts,
    );
    if !first.success {
        return first;
    }
    let second = edit::replace_node(
        &ReplaceNodeParams {
            locator: step.b.clone(),
            replacement: a_text,
            allow_kind_change: true,
        },
        opts,
    );
    if !second.success {
        return StepReport::fail(format!(
            "swap_nodes: first replacement committed but second failed ({}); plan-level rollback required",
            second.error.unwrap_or_default()
        ));
    }
    second.with_warnings(first.warnings)
}

fn unique_range(
    state: &FileState,
    loc: &Locator,
    label: &str,
) -> Result<(std::ops::Range<usize>, String), StepReport> {
    let nodes = locator::resolve(loc, state.language, &state.tree, &state.bytes)
        .map_err(|e| StepReport::fail(e.to_string()))?;
    match nodes.len() {
        0 => Err(StepReport::fail(format!(
            "locator '{label}' resolved to no node"
        ))),
        1 => {
            let node = nodes[0];
            Ok((
                node.start_byte()..node.end_byte(),
                edit::node_text_owned(node, &state.bytes),
            ))
        }
        n => Err(StepReport::fail(format!(
            "locator '{label}' resolved to {n} nodes; provide 'index'"
        ))),
    }
}

// ============================================================================
// reorder_children
// ============================================================================

fn reorder_children(step: &ReorderStep, opts: ExecOptions) -> StepReport {
    let state = match edit::state_for(&step.parent) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let (span_start, span_end, out) = {
        let nodes = match locator::resolve(&step.parent, state.language, &state.tree, &state.bytes)
        {
            Ok(n) => n,
            Err(e) => return StepReport::fail(e.to_string()),
        };
        let parent = match nodes.len() {
            0 => return StepReport::fail("parent locator resolved to no node"),
            1 => nodes[0],
            n => {
                return StepReport::fail(format!(
                    "parent locator resolved to {n} nodes; provide 'index'"
                ))
            }
        };

        let mut cursor = parent.walk();
        let children: Vec<_> = parent.named_children(&mut cursor).collect();
        if step.order.len() != children.len() {
            return StepReport::fail(format!(
                "order has {} entries but parent has {} named children",
                step.order.len(),
                children.len()
            ));
        }
        let mut seen = vec![false; children.len()];
        for &i in &step.order {
            if i >= children.len() || seen[i] {
                return StepReport::fail("order is not a permutation of child indices");
            }
            seen[i] = true;
        }

        if children.is_empty() {
            return StepReport::ok();
        }

        // Re-emit children in the permuted order, preserving the original
        // separators between consecutive child spans
        let span_start = children[0].start_byte();
        let span_end = children[children.len() - 1].end_byte();
        let mut out = String::new();
        for (position, &child_index) in step.order.iter().enumerate() {
            out.push_str(&edit::node_text_owned(children[child_index], &state.bytes));
            if position + 1 < children.len() {
                let sep_start = children[position].end_byte();
                let sep_end = children[position + 1].start_byte();
                out.push_str(&String::from_utf8_lossy(&state.bytes[sep_start..sep_end]));
            }
        }
        (span_start, span_end, out)
    };

    let new_end = span_start + out.len();
    let plan = EditPlan::new(
        vec![ByteEdit {
            start: span_start,
            end: span_end,
            text: out,
        }],
        span_start..span_end,
        span_start..new_end,
    );
    edit::run_mutation(state, plan, opts)
}
