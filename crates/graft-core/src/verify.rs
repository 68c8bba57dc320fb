//! Post-edit verification levels
//!
//! Run in order after every mutating primitive. L0 (parse), L1 (kind
//! preservation) and L2 (containment) block and trigger per-primitive
//! rollback; L3 (referential), L4 (import closure) and L6 (triviality) are
//! advisory and must never block - framework-heavy code produces spurious
//! unknowns, so their findings surface as warnings only.

use std::collections::HashSet;
use std::ops::Range;

use sha2::{Digest, Sha256};
use tree_sitter::{Node, Tree};

use crate::graph::Import;
use crate::parser::language::{builtins, identifier_kind, imports_query};
use crate::parser::{self, run_query};
use crate::types::Language;

// ============================================================================
// Blocking levels
// ============================================================================

/// L1: the replacement's root node must keep the replaced node's native type
pub(crate) fn kind_preserved(
    old_kind: &str,
    new_tree: &Tree,
    new_range: Range<usize>,
) -> std::result::Result<(), String> {
    let Some(root) = replacement_root(new_tree, new_range.clone()) else {
        return Err(format!(
            "kind preservation: no node found at replacement range {}..{}",
            new_range.start, new_range.end
        ));
    };
    if root.kind() == old_kind {
        Ok(())
    } else {
        Err(format!(
            "kind preservation: replaced '{}' but replacement parses as '{}'",
            old_kind,
            root.kind()
        ))
    }
}

/// Smallest-start, widest named node covering the replacement range
///
/// Starts at the innermost node for the range and climbs while ancestors
/// begin at the same byte and stay inside the range.
pub(crate) fn replacement_root(tree: &Tree, range: Range<usize>) -> Option<Node<'_>> {
    let end = range.end.max(range.start + 1);
    let mut node = tree
        .root_node()
        .named_descendant_for_byte_range(range.start, range.start)?;
    while let Some(parent) = node.parent() {
        if parent.start_byte() == node.start_byte()
            && parent.end_byte() <= end
            && parent.is_named()
            && parent.id() != tree.root_node().id()
        {
            node = parent;
        } else {
            break;
        }
    }
    Some(node)
}

/// L2: top-level siblings outside the edit range are byte-identical
///
/// Root-level nodes entirely before the edit must match as a prefix, nodes
/// entirely after it as a suffix; whatever the edit touched (including its
/// enclosing top-level node) is exempt. Content hashes, not offsets, are
/// compared, so pure shifts pass.
pub(crate) fn containment(
    before_tree: &Tree,
    before_bytes: &[u8],
    after_tree: &Tree,
    after_bytes: &[u8],
    old_range: Range<usize>,
) -> std::result::Result<(), String> {
    let before = sibling_hashes(before_tree, before_bytes);
    let after = sibling_hashes(after_tree, after_bytes);

    // Nodes directly adjacent to the edit point are exempt as well: an
    // insertion can legally merge into a neighbour (an elif attaching to
    // the if above it, a decorator attaching to the def below it)
    let prefix = before
        .iter()
        .take_while(|(range, _)| range.end + 1 < old_range.start)
        .count();
    let suffix = before
        .iter()
        .rev()
        .take_while(|(range, _)| range.start > old_range.end)
        .count()
        // A top-level edit may be counted on both sides of an empty range
        .min(before.len() - prefix);

    if after.len() < prefix + suffix {
        return Err("containment: top-level siblings outside the edit range disappeared".to_string());
    }
    let prefix_ok = before[..prefix]
        .iter()
        .zip(&after[..prefix])
        .all(|((_, b), (_, a))| b == a);
    let suffix_ok = before[before.len() - suffix..]
        .iter()
        .zip(&after[after.len() - suffix..])
        .all(|((_, b), (_, a))| b == a);

    if prefix_ok && suffix_ok {
        Ok(())
    } else {
        Err("containment: a top-level sibling outside the edit range changed".to_string())
    }
}

type SiblingHash = (Range<usize>, [u8; 32]);

fn sibling_hashes(tree: &Tree, bytes: &[u8]) -> Vec<SiblingHash> {
    let root = tree.root_node();
    let mut cursor = root.walk();
    root.named_children(&mut cursor)
        .map(|node| {
            let mut hasher = Sha256::new();
            hasher.update(&bytes[node.start_byte()..node.end_byte()]);
            (node.start_byte()..node.end_byte(), hasher.finalize().into())
        })
        .collect()
}

// ============================================================================
// Advisory levels
// ============================================================================

/// Run L3/L4/L6 over the replacement span; findings are warnings only
pub(crate) fn advisory_warnings(
    language: Language,
    tree: &Tree,
    bytes: &[u8],
    span: Range<usize>,
    original_text: &str,
) -> Vec<String> {
    let mut warnings = Vec::new();

    let reads = identifier_reads(language, tree, bytes, &span);
    let locals = visible_bindings(language, tree, bytes);
    let imports = file_imports(language, tree, bytes);
    let builtin_set: HashSet<&str> = builtins(language).iter().copied().collect();

    // L3: referential integrity
    for name in &reads {
        let known = locals.contains(name.as_str())
            || builtin_set.contains(name.as_str())
            || imported(&imports, name);
        if !known {
            warnings.push(format!("L3: unresolved identifier '{name}' in replacement"));
        }
    }

    // L4: import closure
    let star = imports.iter().any(|i| i.symbol.as_deref() == Some("*"));
    if !star {
        for name in &reads {
            if locals.contains(name.as_str()) || builtin_set.contains(name.as_str()) {
                continue;
            }
            if !imported(&imports, name) {
                warnings.push(format!(
                    "L4: symbol '{name}' is not importable via the file's current imports"
                ));
            }
        }
    }

    // L6: non-triviality
    let new_text = std::str::from_utf8(&bytes[span.start..span.end.min(bytes.len())])
        .unwrap_or("")
        .trim();
    let degenerate = new_text.is_empty()
        || new_text == "pass"
        || new_text == "return None"
        || new_text == original_text.trim();
    if degenerate {
        warnings.push("L6: replacement body is trivial (empty, pass, return None, or unchanged)".to_string());
    }

    warnings
}

fn imported(imports: &[Import], name: &str) -> bool {
    imports.iter().any(|import| {
        import.symbol.as_deref() == Some(name)
            || import.symbol.as_deref() == Some("*")
            || import.module == name
            || import.module.split('.').next() == Some(name)
            || import.module.ends_with(&format!(".{name}"))
    })
}

/// Identifiers read inside the span
///
/// Name fields of definitions, attribute accesses and keyword-argument
/// names are not reads.
fn identifier_reads(
    language: Language,
    tree: &Tree,
    bytes: &[u8],
    span: &Range<usize>,
) -> Vec<String> {
    let ident = identifier_kind(language);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for node in parser::named_nodes(tree.root_node()) {
        if node.kind() != ident
            || node.start_byte() < span.start
            || node.end_byte() > span.end
        {
            continue;
        }
        if let Some(parent) = node.parent() {
            let is_name_field = parent
                .child_by_field_name("name")
                .is_some_and(|n| n.id() == node.id());
            let is_attribute = parent.kind() == "attribute"
                && parent
                    .child_by_field_name("attribute")
                    .is_some_and(|n| n.id() == node.id());
            if is_name_field || is_attribute {
                continue;
            }
        }
        if let Ok(text) = node.utf8_text(bytes) {
            if seen.insert(text.to_string()) {
                out.push(text.to_string());
            }
        }
    }
    out
}

/// Every binding visible in the file: definition names, parameters,
/// assignment targets, import names
///
/// A whole-file collection over-approximates the scope chain; for advisory
/// checks an over-approximation only suppresses warnings, never adds them.
fn visible_bindings(language: Language, tree: &Tree, bytes: &[u8]) -> HashSet<String> {
    let ident = identifier_kind(language);
    let mut bindings = HashSet::new();

    for node in parser::named_nodes(tree.root_node()) {
        // Any `name:` field anywhere defines that name
        if let Some(name) = node.child_by_field_name("name") {
            if let Ok(text) = name.utf8_text(bytes) {
                bindings.insert(text.to_string());
            }
        }
        let kind = node.kind();
        // Parameters bind every identifier they contain
        if kind.contains("parameter") {
            for inner in parser::named_nodes(node) {
                if inner.kind() == ident {
                    if let Ok(text) = inner.utf8_text(bytes) {
                        bindings.insert(text.to_string());
                    }
                }
            }
        }
        // Assignment-like constructs bind their left side
        if kind.contains("assignment")
            || kind == "let_declaration"
            || kind == "short_var_declaration"
            || kind == "for_statement"
            || kind == "with_statement"
        {
            if let Some(left) = node
                .child_by_field_name("left")
                .or_else(|| node.child_by_field_name("pattern"))
                .or_else(|| node.named_child(0))
            {
                for inner in parser::named_nodes(left) {
                    if inner.kind() == ident {
                        if let Ok(text) = inner.utf8_text(bytes) {
                            bindings.insert(text.to_string());
                        }
                    }
                }
            }
        }
    }

    for import in file_imports(language, tree, bytes) {
        if let Some(symbol) = import.symbol {
            bindings.insert(symbol);
        }
        if let Some(first) = import.module.split(['.', ':']).next() {
            bindings.insert(first.to_string());
        }
    }

    bindings
}

/// Imports of the (already-parsed) file, for closure checks
pub(crate) fn file_imports(language: Language, tree: &Tree, bytes: &[u8]) -> Vec<Import> {
    let rows = match run_query(imports_query(language), language, tree.root_node(), bytes) {
        Ok(rows) => rows,
        Err(_) => return Vec::new(),
    };
    let mut out = Vec::new();
    for row in rows {
        let Some(&node) = row.get("import") else { continue };
        for (module, symbol) in crate::graph::import_parts_for(language, node, bytes) {
            out.push(Import {
                file: String::new(),
                module,
                symbol,
                line: node.start_position().row + 1,
            });
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    #[test]
    fn test_kind_preserved_accepts_same_kind() {
        let new_src = b"def g():\n    return 2\n";
        let tree = parse_source(Language::Python, new_src).unwrap();
        assert!(kind_preserved("function_definition", &tree, 0..new_src.len() - 1).is_ok());
    }

    #[test]
    fn test_kind_preserved_rejects_change() {
        let new_src = b"g = 1\n";
        let tree = parse_source(Language::Python, new_src).unwrap();
        let err = kind_preserved("function_definition", &tree, 0..5).unwrap_err();
        assert!(err.contains("kind preservation"));
    }

    #[test]
    fn test_containment_detects_sibling_change() {
        let before = b"def a():\n    pass\n\ndef b():\n    pass\n";
        let after_ok = b"def a():\n    return 1\n\ndef b():\n    pass\n";
        let after_bad = b"def a():\n    return 1\n\ndef b():\n    return 9\n";

        let t_before = parse_source(Language::Python, before).unwrap();
        let t_ok = parse_source(Language::Python, after_ok).unwrap();
        let t_bad = parse_source(Language::Python, after_bad).unwrap();

        // Edit range covers def a; def b must survive byte-identical
        assert!(containment(&t_before, before, &t_ok, after_ok, 0..17).is_ok());
        assert!(containment(&t_before, before, &t_bad, after_bad, 0..17).is_err());
    }

    #[test]
    fn test_advisory_unresolved_identifier() {
        let src = b"import os\n\ndef f(x):\n    return frobnicate(x)\n";
        let tree = parse_source(Language::Python, src).unwrap();
        let span_start = src.windows(6).position(|w| w == b"return").unwrap();
        let warnings = advisory_warnings(
            Language::Python,
            &tree,
            src,
            span_start..src.len() - 1,
            "return x",
        );
        assert!(warnings.iter().any(|w| w.contains("L3") && w.contains("frobnicate")));
        assert!(warnings.iter().any(|w| w.contains("L4") && w.contains("frobnicate")));
        // x is a parameter: no warning for it
        assert!(!warnings.iter().any(|w| w.contains("'x'")));
    }

    #[test]
    fn test_advisory_triviality() {
        let src = b"def f():\n    pass\n";
        let tree = parse_source(Language::Python, src).unwrap();
        let start = src.iter().position(|&b| b == b'p').unwrap();
        let warnings =
            advisory_warnings(Language::Python, &tree, src, start..start + 4, "return 1");
        assert!(warnings.iter().any(|w| w.contains("L6")));
    }

    #[test]
    fn test_imported_star() {
        let imports = vec![Import {
            file: String::new(),
            module: "os".into(),
            symbol: Some("*".into()),
            line: 1,
        }];
        assert!(imported(&imports, "anything"));
    }
}
