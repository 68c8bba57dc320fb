//! Parser facade - tree-sitter wrapper
//!
//! ARCHITECTURE: This module (with `types::Parser`) is the only place that
//! touches the tree-sitter parsing and query APIs. Trees are re-built
//! before every edit and after every edit; nothing caches a tree across a
//! byte change.

pub mod language;

use std::collections::HashMap;
use std::path::Path;

use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Query, QueryCursor, Tree};

use crate::types::{EngineError, Language, Parser, Result, MAX_INPUT_SIZE};

/// True iff the tree contains no ERROR or MISSING subtree
pub fn parses_ok(tree: &Tree) -> bool {
    !tree.root_node().has_error()
}

/// Parse a byte buffer in the given language
pub fn parse_source(language: Language, source: &[u8]) -> Result<Tree> {
    Parser::new(language)?.parse(source)
}

/// Read a file, detect its language, and parse it
///
/// Enforces the per-file size cap. The returned bytes are exactly the bytes
/// that were parsed.
pub fn parse_file(path: &Path) -> Result<(Language, Vec<u8>, Tree)> {
    let language = Language::from_path(path)
        .ok_or_else(|| EngineError::UnsupportedLanguage(path.to_path_buf()))?;
    let bytes = std::fs::read(path)?;
    if bytes.len() > MAX_INPUT_SIZE {
        return Err(EngineError::FileTooLarge(path.to_path_buf()));
    }
    let tree = parse_source(language, &bytes)?;
    Ok((language, bytes, tree))
}

/// Run a query and collect `(capture name -> nodes)` per match
///
/// Captures are keyed by name, not index order, so query-shape differences
/// across grammar versions stay internal to this function.
pub(crate) fn run_query<'t>(
    query_src: &str,
    language: Language,
    node: Node<'t>,
    source: &[u8],
) -> Result<Vec<HashMap<String, Node<'t>>>> {
    let query = Query::new(&language.grammar(), query_src)
        .map_err(|e| EngineError::Query(e.to_string()))?;
    let names = query.capture_names();

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, node, source);

    let mut rows = Vec::new();
    while let Some(m) = matches.next() {
        let mut row: HashMap<String, Node<'t>> = HashMap::new();
        for capture in m.captures {
            row.insert(names[capture.index as usize].to_string(), capture.node);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Run a query and return the nodes of a single capture name
pub(crate) fn query_capture_nodes<'t>(
    query_src: &str,
    language: Language,
    node: Node<'t>,
    source: &[u8],
    capture: &str,
) -> Result<Vec<Node<'t>>> {
    let rows = run_query(query_src, language, node, source)?;
    Ok(rows
        .into_iter()
        .filter_map(|mut row| row.remove(capture))
        .collect())
}

/// Node text as &str (lossless; sources are required to be UTF-8)
pub(crate) fn node_text<'s>(node: Node<'_>, source: &'s [u8]) -> Result<&'s str> {
    Ok(node.utf8_text(source)?)
}

/// Pre-order traversal of all named nodes
pub(crate) fn named_nodes<'t>(root: Node<'t>) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_named() {
            out.push(node);
        }
        let mut cursor = node.walk();
        // Reverse so pop order is document order
        let children: Vec<_> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    out
}

/// Whether any ancestor of `node` has one of the given kinds
pub(crate) fn has_ancestor_of_kind(node: Node<'_>, kinds: &[&str]) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        if kinds.contains(&parent.kind()) {
            return true;
        }
        current = parent.parent();
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_languages() {
        let cases: Vec<(Language, &str)> = vec![
            (Language::Python, "def test():\n    pass\n"),
            (Language::JavaScript, "function test() {}"),
            (Language::TypeScript, "function test(): void {}"),
            (Language::Java, "class Test { void test() {} }"),
            (Language::Go, "package main\nfunc test() {}"),
            (Language::Rust, "fn test() {}"),
            (Language::Ruby, "def test\nend\n"),
            (Language::Php, "<?php function test() {} ?>"),
            (Language::C, "int test() { return 0; }"),
            (Language::Cpp, "class Test { int test() { return 0; } };"),
        ];

        for (language, source) in cases {
            let tree = parse_source(language, source.as_bytes()).unwrap();
            assert!(parses_ok(&tree), "clean parse failed for {:?}", language);
        }
    }

    #[test]
    fn test_parses_ok_detects_errors() {
        let tree = parse_source(Language::Python, b"def broken(:\n").unwrap();
        assert!(!parses_ok(&tree));
    }

    #[test]
    fn test_run_query_keyed_by_capture_name() {
        let source = b"def f():\n    pass\n\ndef g():\n    pass\n";
        let tree = parse_source(Language::Python, source).unwrap();
        let rows = run_query(
            "(function_definition name: (identifier) @name) @def",
            Language::Python,
            tree.root_node(),
            source,
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        let names: Vec<_> = rows
            .iter()
            .map(|row| node_text(row["name"], source).unwrap())
            .collect();
        assert_eq!(names, vec!["f", "g"]);
    }

    #[test]
    fn test_text_predicates_are_applied() {
        let source = b"x = 1\ny = x + 1\n";
        let tree = parse_source(Language::Python, source).unwrap();
        let nodes = query_capture_nodes(
            "((identifier) @id (#eq? @id \"x\"))",
            Language::Python,
            tree.root_node(),
            source,
            "id",
        )
        .unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_has_ancestor_of_kind() {
        let source = b"x = \"hello\"\n";
        let tree = parse_source(Language::Python, source).unwrap();
        let all = named_nodes(tree.root_node());
        let inside_string = all
            .iter()
            .find(|n| n.kind() == "string_content" || n.kind() == "string_start");
        if let Some(node) = inside_string {
            assert!(has_ancestor_of_kind(*node, &["string"]));
        }
        let assignment = all.iter().find(|n| n.kind() == "assignment").unwrap();
        assert!(!has_ancestor_of_kind(*assignment, &["string"]));
    }
}
