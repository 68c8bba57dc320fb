//! Primitive mutators
//!
//! Six byte-level edits plus the read-only `locate`/`locate_region`. Every
//! mutating primitive follows one protocol:
//!
//! ```text
//! read bytes -> parse -> resolve locator -> PRE-check -> save snapshot ->
//! apply byte edit -> re-parse -> POST-check -> (fail => restore snapshot) ->
//! StepReport
//! ```
//!
//! Trees are never cached across edits; each primitive re-reads and
//! re-parses the file it touches.

pub(crate) mod snapshot;

use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use tree_sitter::{Node, Tree};

use crate::locator;
use crate::parser::language::{comment_kinds, string_kinds};
use crate::parser::{self, parses_ok};
use crate::types::{ExecOptions, Language, Locator, Result, StepReport};
use crate::verify;
use snapshot::Snapshot;

/// Operation names handled by this module
pub const PRIMITIVE_OPS: &[&str] = &[
    "replace_node",
    "insert_before_node",
    "insert_after_node",
    "delete_node",
    "wrap_node",
    "replace_all_matching",
    "locate",
    "locate_region",
];

// ============================================================================
// Parameter shapes
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceNodeParams {
    pub locator: Locator,
    pub replacement: String,
    /// Set by templates that declare an intentional kind change
    #[serde(default)]
    pub allow_kind_change: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertParams {
    pub locator: Locator,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteParams {
    pub locator: Locator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WrapParams {
    pub locator: Locator,
    pub before: String,
    pub after: String,
    #[serde(default)]
    pub indent_body: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceAllParams {
    pub locator: Locator,
    pub replacement: String,
    #[serde(default)]
    pub filter: Option<MatchFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFilter {
    NotInStringOrComment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocateParams {
    pub locator: Locator,
}

// ============================================================================
// Byte edits
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct ByteEdit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Splice a set of non-overlapping edits into a byte buffer
///
/// Edits are applied in descending start-byte order so earlier offsets stay
/// valid; the end state is invariant of the input order.
pub(crate) fn apply_edits(bytes: &[u8], mut edits: Vec<ByteEdit>) -> Vec<u8> {
    edits.sort_by(|a, b| b.start.cmp(&a.start));
    let mut out = bytes.to_vec();
    for edit in edits {
        let end = edit.end.min(out.len());
        let start = edit.start.min(end);
        out.splice(start..end, edit.text.bytes());
    }
    out
}

// ============================================================================
// File state
// ============================================================================

pub(crate) struct FileState {
    pub path: PathBuf,
    pub language: Language,
    pub bytes: Vec<u8>,
    pub tree: Tree,
}

impl FileState {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let (language, bytes, tree) = parser::parse_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            language,
            bytes,
            tree,
        })
    }
}

pub(crate) fn state_for(locator: &Locator) -> std::result::Result<FileState, StepReport> {
    let Some(path) = locator.file() else {
        return Err(StepReport::fail("locator must name a file"));
    };
    FileState::load(path).map_err(|e| StepReport::fail(e.to_string()))
}

// ============================================================================
// Preconditions
// ============================================================================

fn resolve_matches<'t>(
    locator: &Locator,
    state: &'t FileState,
) -> std::result::Result<Vec<Node<'t>>, StepReport> {
    locator::resolve(locator, state.language, &state.tree, &state.bytes)
        .map_err(|e| StepReport::fail(e.to_string()))
}

/// Exactly-one precondition (replace, delete, wrap)
fn unique_target<'t>(
    locator: &Locator,
    state: &'t FileState,
) -> std::result::Result<Node<'t>, StepReport> {
    let matches = resolve_matches(locator, state)?;
    match matches.len() {
        0 => Err(StepReport::fail("locator resolved to no node")),
        1 => Ok(matches[0]),
        n => Err(StepReport::fail(format!(
            "locator resolved to {n} nodes; provide 'index' to disambiguate"
        ))),
    }
}

/// At-least-one precondition (inserts, replace_all)
fn all_targets<'t>(
    locator: &Locator,
    state: &'t FileState,
) -> std::result::Result<Vec<Node<'t>>, StepReport> {
    let matches = resolve_matches(locator, state)?;
    if matches.is_empty() {
        Err(StepReport::fail("locator resolved to no node"))
    } else {
        Ok(matches)
    }
}

// ============================================================================
// Mutation runner
// ============================================================================

pub(crate) struct EditPlan {
    pub edits: Vec<ByteEdit>,
    /// Range the edit replaced in the pre-edit bytes
    pub old_range: Range<usize>,
    /// Range the new content occupies in the post-edit bytes
    pub new_range: Range<usize>,
    /// Native kind the replacement must preserve (replace_node)
    pub preserve_kind: Option<String>,
    /// Deleted node that must not survive: locator + start byte + text
    /// (delete_node)
    pub must_not_resolve: Option<(Locator, usize, String)>,
    pub original_text: String,
    pub result: Option<serde_json::Value>,
}

impl EditPlan {
    pub(crate) fn new(edits: Vec<ByteEdit>, old_range: Range<usize>, new_range: Range<usize>) -> Self {
        Self {
            edits,
            old_range,
            new_range,
            preserve_kind: None,
            must_not_resolve: None,
            original_text: String::new(),
            result: None,
        }
    }
}

/// Apply an edit plan under the primitive execution protocol
pub(crate) fn run_mutation(state: FileState, plan: EditPlan, opts: ExecOptions) -> StepReport {
    let snapshot = Snapshot::take(&state.path, state.bytes.clone());
    let new_bytes = apply_edits(&state.bytes, plan.edits);

    if let Err(e) = std::fs::write(&state.path, &new_bytes) {
        return StepReport::fail(format!("write failed: {e}"));
    }

    let new_tree = match parser::parse_source(state.language, &new_bytes) {
        Ok(tree) => tree,
        Err(e) => return rollback(&snapshot, format!("re-parse failed: {e}")),
    };

    // L0: parses-ok
    if !parses_ok(&new_tree) {
        return rollback(&snapshot, "L0: edit introduced a syntax error".to_string());
    }

    // L1: kind preservation
    if let Some(kind) = &plan.preserve_kind {
        if let Err(e) = verify::kind_preserved(kind, &new_tree, plan.new_range.clone()) {
            return rollback(&snapshot, format!("L1: {e}"));
        }
    }

    // L2: structural containment
    if let Err(e) = verify::containment(
        &state.tree,
        snapshot.bytes(),
        &new_tree,
        &new_bytes,
        plan.old_range.clone(),
    ) {
        return rollback(&snapshot, format!("L2: {e}"));
    }

    // delete_node postcondition: re-resolve and make sure the deleted node
    // did not survive in place (same bytes at the same offset)
    if let Some((loc, start, text)) = &plan.must_not_resolve {
        let still = locator::resolve(loc, state.language, &new_tree, &new_bytes)
            .map(|nodes| {
                nodes.iter().any(|node| {
                    node.start_byte() == *start
                        && node.utf8_text(&new_bytes).is_ok_and(|t| t == text.as_str())
                })
            })
            .unwrap_or(false);
        if still {
            return rollback(&snapshot, "locator still resolves after delete".to_string());
        }
    }

    // Advisory levels (L3/L4/L6) never block
    let warnings = if opts.advisory && plan.new_range.start < plan.new_range.end {
        verify::advisory_warnings(
            state.language,
            &new_tree,
            &new_bytes,
            plan.new_range.clone(),
            &plan.original_text,
        )
    } else {
        Vec::new()
    };
    for finding in &warnings {
        warn!(path = %state.path.display(), "{finding}");
    }

    debug!(
        path = %state.path.display(),
        old = ?plan.old_range,
        new = ?plan.new_range,
        "primitive committed"
    );

    let mut report = StepReport::ok().with_warnings(warnings);
    report.result = plan.result;
    report
}

fn rollback(snapshot: &Snapshot, message: String) -> StepReport {
    match snapshot.restore() {
        Ok(()) => StepReport::fail_rolled_back(message),
        Err(e) => StepReport::fail(format!("{message}; ROLLBACK FAILED: {e}")),
    }
}

// ============================================================================
// Primitives
// ============================================================================

pub fn replace_node(params: &ReplaceNodeParams, opts: ExecOptions) -> StepReport {
    let state = match state_for(&params.locator) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_target(&params.locator, &state) {
        Ok(n) => n,
        Err(r) => return r,
    };

    let (start, end) = (node.start_byte(), node.end_byte());
    let original = node_text_owned(node, &state.bytes);
    let mut plan = EditPlan::new(
        vec![ByteEdit {
            start,
            end,
            text: params.replacement.clone(),
        }],
        start..end,
        start..start + params.replacement.len(),
    );
    if !params.allow_kind_change {
        plan.preserve_kind = Some(node.kind().to_string());
    }
    plan.original_text = original;
    run_mutation(state, plan, opts)
}

pub fn insert_before_node(params: &InsertParams, opts: ExecOptions) -> StepReport {
    insert_relative(params, opts, true)
}

pub fn insert_after_node(params: &InsertParams, opts: ExecOptions) -> StepReport {
    insert_relative(params, opts, false)
}

fn insert_relative(params: &InsertParams, opts: ExecOptions, before: bool) -> StepReport {
    let state = match state_for(&params.locator) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let targets = match all_targets(&params.locator, &state) {
        Ok(t) => t,
        Err(r) => return r,
    };

    let mut edits = Vec::new();
    let mut first_point = usize::MAX;
    let mut first_len = 0;
    for node in &targets {
        // Inserted text is indented to the column of the anchor's line
        let indent = line_indent(&state.bytes, node.start_byte());
        let block = indent_lines(&params.text, &indent);
        let (point, text) = if before {
            (line_start(&state.bytes, node.start_byte()), format!("{block}\n"))
        } else {
            let le = line_end(&state.bytes, node.end_byte());
            if le >= state.bytes.len() {
                (le, format!("\n{block}\n"))
            } else {
                (le + 1, format!("{block}\n"))
            }
        };
        if point < first_point {
            first_point = point;
            first_len = text.len();
        }
        edits.push(ByteEdit {
            start: point,
            end: point,
            text,
        });
    }

    let plan = EditPlan::new(edits, first_point..first_point, first_point..first_point + first_len);
    run_mutation(state, plan, opts)
}

pub fn delete_node(params: &DeleteParams, opts: ExecOptions) -> StepReport {
    let state = match state_for(&params.locator) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_target(&params.locator, &state) {
        Ok(n) => n,
        Err(r) => return r,
    };

    let range = deletion_range(&state.bytes, node.start_byte(), node.end_byte());
    let deleted_text = node_text_owned(node, &state.bytes);
    let deleted_start = node.start_byte();
    let mut plan = EditPlan::new(
        vec![ByteEdit {
            start: range.start,
            end: range.end,
            text: String::new(),
        }],
        range.clone(),
        range.start..range.start,
    );
    plan.must_not_resolve = Some((params.locator.clone(), deleted_start, deleted_text));
    run_mutation(state, plan, opts)
}

/// Expand a node's range to whole lines when only whitespace surrounds it
pub(crate) fn deletion_range(bytes: &[u8], start: usize, end: usize) -> Range<usize> {
    let ls = line_start(bytes, start);
    let le = line_end(bytes, end);
    let prefix_ws = bytes[ls..start].iter().all(|b| b.is_ascii_whitespace());
    let suffix_ws = bytes[end..le].iter().all(|b| b.is_ascii_whitespace());
    if prefix_ws && suffix_ws {
        ls..(le + 1).min(bytes.len())
    } else {
        start..end
    }
}

pub fn wrap_node(params: &WrapParams, opts: ExecOptions) -> StepReport {
    let state = match state_for(&params.locator) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_target(&params.locator, &state) {
        Ok(n) => n,
        Err(r) => return r,
    };

    let ls = line_start(&state.bytes, node.start_byte());
    let le = line_end(&state.bytes, node.end_byte());
    let indent = line_indent(&state.bytes, node.start_byte());
    let region = String::from_utf8_lossy(&state.bytes[ls..le]).into_owned();

    let body = if params.indent_body {
        shift_right(&region, 4)
    } else {
        region.clone()
    };
    let new_region = if params.after.trim().is_empty() {
        format!(
            "{}\n{}",
            indent_lines(params.before.trim_end(), &indent),
            body
        )
    } else {
        format!(
            "{}\n{}\n{}",
            indent_lines(params.before.trim_end(), &indent),
            body,
            indent_lines(params.after.trim_end(), &indent),
        )
    };

    let mut plan = EditPlan::new(
        vec![ByteEdit {
            start: ls,
            end: le,
            text: new_region.clone(),
        }],
        ls..le,
        ls..ls + new_region.len(),
    );
    plan.original_text = region;
    run_mutation(state, plan, opts)
}

pub fn replace_all_matching(params: &ReplaceAllParams, opts: ExecOptions) -> StepReport {
    let state = match state_for(&params.locator) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let mut targets = match all_targets(&params.locator, &state) {
        Ok(t) => t,
        Err(r) => return r,
    };

    if params.filter == Some(MatchFilter::NotInStringOrComment) {
        let mut excluded: Vec<&str> = string_kinds(state.language).to_vec();
        excluded.extend_from_slice(comment_kinds(state.language));
        targets.retain(|node| !parser::has_ancestor_of_kind(*node, &excluded));
        if targets.is_empty() {
            return StepReport::fail("no eligible occurrences");
        }
    }

    // Descending start-byte order keeps earlier offsets valid
    targets.sort_by(|a, b| b.start_byte().cmp(&a.start_byte()));

    let covering_start = targets.iter().map(|n| n.start_byte()).min().unwrap_or(0);
    let covering_end = targets.iter().map(|n| n.end_byte()).max().unwrap_or(0);
    let mut delta: isize = 0;
    let mut edits = Vec::new();
    for node in &targets {
        delta += params.replacement.len() as isize - (node.end_byte() - node.start_byte()) as isize;
        edits.push(ByteEdit {
            start: node.start_byte(),
            end: node.end_byte(),
            text: params.replacement.clone(),
        });
    }
    let new_end = (covering_end as isize + delta).max(covering_start as isize) as usize;

    let replaced = targets.len();
    let mut plan = EditPlan::new(edits, covering_start..covering_end, covering_start..new_end);
    plan.result = Some(json!({ "replaced": replaced }));
    run_mutation(state, plan, opts)
}

/// Dispatch a primitive by name with JSON params
///
/// The single entry point used by the DSL interpreter and the step router.
pub fn run_primitive(name: &str, params: &serde_json::Value, opts: ExecOptions) -> StepReport {
    fn parsed<T: serde::de::DeserializeOwned>(
        params: &serde_json::Value,
    ) -> std::result::Result<T, StepReport> {
        serde_json::from_value(params.clone())
            .map_err(|e| StepReport::fail(format!("invalid primitive parameters: {e}")))
    }

    match name {
        "replace_node" => match parsed::<ReplaceNodeParams>(params) {
            Ok(p) => replace_node(&p, opts),
            Err(r) => r,
        },
        "insert_before_node" => match parsed::<InsertParams>(params) {
            Ok(p) => insert_before_node(&p, opts),
            Err(r) => r,
        },
        "insert_after_node" => match parsed::<InsertParams>(params) {
            Ok(p) => insert_after_node(&p, opts),
            Err(r) => r,
        },
        "delete_node" => match parsed::<DeleteParams>(params) {
            Ok(p) => delete_node(&p, opts),
            Err(r) => r,
        },
        "wrap_node" => match parsed::<WrapParams>(params) {
            Ok(p) => wrap_node(&p, opts),
            Err(r) => r,
        },
        "replace_all_matching" => match parsed::<ReplaceAllParams>(params) {
            Ok(p) => replace_all_matching(&p, opts),
            Err(r) => r,
        },
        "locate" => match parsed::<LocateParams>(params) {
            Ok(p) => locate(&p),
            Err(r) => r,
        },
        "locate_region" => match parsed::<LocateParams>(params) {
            Ok(p) => locate_region(&p),
            Err(r) => r,
        },
        other => StepReport::fail(format!("unknown primitive '{other}'")),
    }
}

// ============================================================================
// Read-only operations
// ============================================================================

const PREVIEW_LEN: usize = 80;

pub fn locate(params: &LocateParams) -> StepReport {
    let state = match state_for(&params.locator) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let matches = match resolve_matches(&params.locator, &state) {
        Ok(m) => m,
        Err(r) => return r,
    };

    let nodes: Vec<serde_json::Value> = matches
        .iter()
        .map(|node| {
            let text = node_text_owned(*node, &state.bytes);
            let preview: String = text.chars().take(PREVIEW_LEN).collect();
            json!({
                "start_line": node.start_position().row + 1,
                "end_line": node.end_position().row + 1,
                "kind": node.kind(),
                "text_preview": preview,
            })
        })
        .collect();

    StepReport::ok_with(json!({
        "found": !nodes.is_empty(),
        "count": nodes.len(),
        "nodes": nodes,
    }))
}

pub fn locate_region(params: &LocateParams) -> StepReport {
    let state = match state_for(&params.locator) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let node = match unique_target(&params.locator, &state) {
        Ok(n) => n,
        Err(r) => return r,
    };

    StepReport::ok_with(json!({
        "start_byte": node.start_byte(),
        "end_byte": node.end_byte(),
        "start_line": node.start_position().row + 1,
        "end_line": node.end_position().row + 1,
        "text": node_text_owned(node, &state.bytes),
    }))
}

// ============================================================================
// Text utilities
// ============================================================================

pub(crate) fn node_text_owned(node: Node<'_>, bytes: &[u8]) -> String {
    node.utf8_text(bytes).unwrap_or_default().to_string()
}

/// Byte offset of the start of the line containing `offset`
pub(crate) fn line_start(bytes: &[u8], offset: usize) -> usize {
    let offset = offset.min(bytes.len());
    bytes[..offset]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |p| p + 1)
}

/// Byte offset of the newline ending the line containing `offset` (or EOF)
pub(crate) fn line_end(bytes: &[u8], offset: usize) -> usize {
    let offset = offset.min(bytes.len());
    bytes[offset..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| offset + p)
}

/// Leading whitespace of the line containing `offset`
pub(crate) fn line_indent(bytes: &[u8], offset: usize) -> String {
    let ls = line_start(bytes, offset);
    let mut end = ls;
    while end < bytes.len() && (bytes[end] == b' ' || bytes[end] == b'\t') {
        end += 1;
    }
    String::from_utf8_lossy(&bytes[ls..end]).into_owned()
}

/// Prefix every line of `text` with `indent`
pub(crate) fn indent_lines(text: &str, indent: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shift every non-empty line right by `columns` spaces
pub(crate) fn shift_right(text: &str, columns: usize) -> String {
    let pad = " ".repeat(columns);
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
