//! Integration tests for graft-core
//!
//! End-to-end coverage of the engine: plan execution through the router,
//! the universal invariants (parse preservation, atomic rollback, locator
//! freshness, advisory independence), and the concrete scenarios the
//! engine is specified against.

#![allow(clippy::unwrap_used)]

use graft_core::{
    build_graph, execute_plan, execute_single_step, parse_plan, parse_source, parses_ok,
    serialize_fragment, validate_fragment, verify_plan, ExecOptions, Fragment, Language,
};
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

// ============================================================================
// Scenario: guard insertion
// ============================================================================

#[test]
fn test_guard_insertion_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "m.py", "def f(x):\n    return x + 1\n");

    let report = execute_single_step(
        &json!({
            "template": "guard_clause",
            "params": {
                "target": {"kind": "function", "name": "f",
                            "file": path.to_str().unwrap(), "field": "body"},
                "condition": "x is None",
                "guard_body": "return None",
            },
        }),
        ExecOptions::default(),
    );
    assert!(report.success, "{:?}", report.error);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "def f(x):\n    if x is None:\n        return None\n    return x + 1\n"
    );

    // Parse preservation: the mutated file still parses cleanly
    let bytes = fs::read(&path).unwrap();
    assert!(parses_ok(&parse_source(Language::Python, &bytes).unwrap()));
}

// ============================================================================
// Scenario: condition modification
// ============================================================================

#[test]
fn test_condition_modification_leaves_body_untouched() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "m.py", "if a and b:\n    process()\n    commit()\n");

    let report = execute_single_step(
        &json!({
            "template": "modify_condition",
            "params": {
                "target": {"kind": "statement", "file": path.to_str().unwrap(), "index": 0},
                "new_condition": "a and b and c",
            },
        }),
        no_advisory(),
    );
    assert!(report.success, "{:?}", report.error);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "if a and b and c:\n    process()\n    commit()\n"
    );
}

// ============================================================================
// Scenario: rename with filter
// ============================================================================

#[test]
fn test_rename_with_string_comment_filter() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "m.py", "x = \"x\"  # keep\ny = x + 1\n");

    let report = execute_single_step(
        &json!({
            "op": "rename_identifier",
            "target": {"type": "sexp",
                       "query": "((identifier) @id (#eq? @id \"x\"))",
                       "capture": "id",
                       "file": path.to_str().unwrap()},
            "new_name": "z",
            "filter": "not_in_string_or_comment",
        }),
        no_advisory(),
    );
    assert!(report.success, "{:?}", report.error);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "z = \"x\"  # keep\ny = z + 1\n"
    );
}

// ============================================================================
// Scenario: kind-preservation failure
// ============================================================================

#[test]
fn test_kind_preservation_rejects_and_restores_bit_identical() {
    let dir = TempDir::new().unwrap();
    let original = "def g():\n    return 1\n";
    let path = write_file(&dir, "m.py", original);

    let report = execute_single_step(
        &json!({
            "op": "replace_node",
            "params": {
                "locator": {"kind": "function", "name": "g", "file": path.to_str().unwrap()},
                "replacement": "g = 1",
            },
        }),
        ExecOptions::default(),
    );
    assert!(!report.success);
    assert!(report.rolled_back);
    // Atomic-per-primitive rollback: bytes bit-identical to pre-call state
    assert_eq!(fs::read(&path).unwrap(), original.as_bytes());
}

// ============================================================================
// Scenario: fragment round-trip
// ============================================================================

#[test]
fn test_fragment_round_trip() {
    let fragment: Fragment = serde_json::from_value(json!({
        "kind": "if_statement",
        "condition": "not ok",
        "children": [{"kind": "raise_statement", "value": "ValueError('x')"}],
    }))
    .unwrap();
    validate_fragment(&fragment).unwrap();

    let source = serialize_fragment(&fragment, 0);
    assert_eq!(source, "if not ok:\n    raise ValueError('x')\n");
    let tree = parse_source(Language::Python, source.as_bytes()).unwrap();
    assert!(parses_ok(&tree));
}

// ============================================================================
// Scenario: cross-file warning
// ============================================================================

#[test]
fn test_cross_file_rename_warns_but_passes() {
    let dir = TempDir::new().unwrap();
    let lib = write_file(&dir, "lib.py", "def helper():\n    return 1\n");
    let a = write_file(&dir, "a.py", "from lib import helper\n");
    let b = write_file(&dir, "b.py", "from lib import helper\n");
    let graph = build_graph(&[lib.clone(), a, b]);

    let plan = parse_plan(&json!([{
        "op": "rename_identifier",
        "target": {"type": "sexp",
                   "query": "((identifier) @id (#eq? @id \"helper\"))",
                   "capture": "id",
                   "file": lib.to_str().unwrap()},
        "new_name": "assist",
    }]))
    .unwrap();

    let report = verify_plan(&plan, &graph);
    assert!(report.passed, "{:?}", report.errors);
    let warning = report
        .warnings
        .iter()
        .find(|w| w.message.contains("imported by files outside"))
        .unwrap();
    assert_eq!(warning.level, "l6");
    assert_eq!(warning.step_index, Some(0));
    assert!(warning.message.contains("a.py") && warning.message.contains("b.py"));
}

// ============================================================================
// Universal invariants
// ============================================================================

#[test]
fn test_locator_freshness_within_plan() {
    // Step i's locator resolves against the bytes committed by steps 0..i-1
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "m.py", "def f():\n    return 1\n");
    let file = path.to_str().unwrap();

    let plan = parse_plan(&json!([
        {"template": "add_method_stub_placeholder", "params": {}},
    ]));
    // sanity: unknown template fails at verify time, not silently
    assert!(plan.is_ok());

    let plan = parse_plan(&json!([
        {"op": "insert_after_node", "params": {
            "locator": {"kind": "function", "name": "f", "file": file},
            "text": "def g():\n    return 2",
        }},
        {"op": "rename_identifier",
         "target": {"type": "sexp",
                    "query": "((identifier) @id (#eq? @id \"g\"))",
                    "capture": "id", "file": file},
         "new_name": "h"},
    ]))
    .unwrap();

    let (passed, reports) = execute_plan(&plan, no_advisory());
    assert!(passed, "{:?}", reports);
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("def h()"));
    assert!(!content.contains("def g()"));
}

#[test]
fn test_advisory_warnings_never_block() {
    // A replacement referencing an unknown symbol succeeds with warnings
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "m.py", "def f(x):\n    return x\n");

    let step = json!({
        "op": "replace_node",
        "params": {
            "locator": {"kind": "function", "name": "f", "file": path.to_str().unwrap()},
            "replacement": "def f(x):\n    return frobnicate(x)",
        },
    });

    let with_advisory = execute_single_step(&step, ExecOptions::default());
    assert!(with_advisory.success, "{:?}", with_advisory.error);
    assert!(with_advisory
        .warnings
        .iter()
        .any(|w| w.contains("frobnicate")));

    // success is independent of the advisory outcome
    fs::write(&path, "def f(x):\n    return x\n").unwrap();
    let without_advisory = execute_single_step(&step, no_advisory());
    assert!(without_advisory.success);
    assert!(without_advisory.warnings.is_empty());
}

#[test]
fn test_replace_all_order_independence() {
    // End state is invariant of match order: replacing all occurrences in
    // one pass equals the documented descending-offset policy
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "m.py", "a = 1\nb = a + a\nc = a * 2\n");

    let report = execute_single_step(
        &json!({
            "op": "replace_all_matching",
            "params": {
                "locator": {"type": "sexp",
                            "query": "((identifier) @id (#eq? @id \"a\"))",
                            "capture": "id",
                            "file": path.to_str().unwrap()},
                "replacement": "alpha",
            },
        }),
        no_advisory(),
    );
    assert!(report.success, "{:?}", report.error);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "alpha = 1\nb = alpha + alpha\nc = alpha * 2\n"
    );
    assert_eq!(report.result.unwrap()["replaced"], 4);
}

#[test]
fn test_containment_sibling_hashes_unchanged() {
    // After a single-node edit, untouched top-level siblings are intact
    let dir = TempDir::new().unwrap();
    let path = write_file(
        &dir,
        "m.py",
        "def a():\n    return 1\n\ndef b():\n    return 2\n\ndef c():\n    return 3\n",
    );

    let report = execute_single_step(
        &json!({
            "op": "replace_node",
            "params": {
                "locator": {"kind": "function", "name": "b", "file": path.to_str().unwrap()},
                "replacement": "def b():\n    return 20",
            },
        }),
        no_advisory(),
    );
    assert!(report.success, "{:?}", report.error);
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("def a():\n    return 1"));
    assert!(content.contains("def b():\n    return 20"));
    assert!(content.contains("def c():\n    return 3"));
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn test_empty_plan_rejected() {
    assert!(parse_plan(&json!([])).is_err());
}

#[test]
fn test_locator_index_out_of_bounds() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "m.py", "def f():\n    return 1\n");

    let report = execute_single_step(
        &json!({
            "op": "locate",
            "params": {"locator": {"kind": "function",
                                    "file": path.to_str().unwrap(),
                                    "index": 9}},
        }),
        ExecOptions::default(),
    );
    assert!(!report.success);
    assert!(report
        .error
        .unwrap()
        .contains("locator index out of bounds"));
}

#[test]
fn test_modify_condition_breaking_host_is_rejected_without_write() {
    // The condition parses standalone but breaks the host statement
    let dir = TempDir::new().unwrap();
    let original = "if a:\n    run()\n";
    let path = write_file(&dir, "m.py", original);

    let report = execute_single_step(
        &json!({
            "template": "modify_condition",
            "params": {
                "target": {"kind": "statement", "file": path.to_str().unwrap(), "index": 0},
                "new_condition": "a #",
            },
        }),
        no_advisory(),
    );
    assert!(!report.success);
    assert_eq!(fs::read_to_string(&path).unwrap(), original);
}

#[test]
fn test_multi_language_graph() {
    let dir = TempDir::new().unwrap();
    let py = write_file(&dir, "m.py", "def f():\n    return 1\n");
    let js = write_file(&dir, "m.js", "function g() { return 2; }\n");
    let rs = write_file(&dir, "m.rs", "fn h() -> i32 { 3 }\n");
    let go = write_file(&dir, "m.go", "package main\nfunc k() int { return 4 }\n");

    let graph = build_graph(&[py, js, rs, go]);
    assert!(graph.errors.is_empty(), "{:?}", graph.errors);
    let names: Vec<_> = graph.symbols.iter().map(|s| s.name.as_str()).collect();
    for expected in ["f", "g", "h", "k"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
}
