//! Locator resolver
//!
//! Resolves a structured locator (or raw tree-sitter query) against a live
//! parse tree. Resolution always runs against the current bytes of the
//! target file; nothing here caches results across edits.

use tracing::warn;
use tree_sitter::{Node, Tree};

use crate::parser::language::{native_kinds, symbol_name};
use crate::parser::{self, query_capture_nodes};
use crate::types::{EngineError, Language, Locator, NodeLocator, Result, SexpLocator};

/// Resolve a locator to the set of matching nodes
///
/// A locator that matches nothing returns an empty vec, not an error. The
/// only resolver error is an `index` disambiguator pointing past a
/// non-empty match set.
pub fn resolve<'t>(
    locator: &Locator,
    language: Language,
    tree: &'t Tree,
    source: &[u8],
) -> Result<Vec<Node<'t>>> {
    let matches = match locator {
        Locator::Sexp(sexp) => resolve_sexp(sexp, language, tree, source),
        Locator::Node(node_loc) => resolve_structured(node_loc, language, tree, source)?,
    };

    apply_index(locator.index(), matches)
}

fn resolve_sexp<'t>(
    locator: &SexpLocator,
    language: Language,
    tree: &'t Tree,
    source: &[u8],
) -> Vec<Node<'t>> {
    match query_capture_nodes(&locator.query, language, tree.root_node(), source, &locator.capture)
    {
        Ok(nodes) => nodes,
        Err(error) => {
            // A bad query resolves to nothing; the caller's precondition
            // reports the empty match set.
            warn!(query = %locator.query, %error, "sexp locator query failed to compile");
            Vec::new()
        }
    }
}

fn resolve_structured<'t>(
    locator: &NodeLocator,
    language: Language,
    tree: &'t Tree,
    source: &[u8],
) -> Result<Vec<Node<'t>>> {
    let target_types = native_kinds(language, locator.kind);

    let mut matches: Vec<Node<'t>> = parser::named_nodes(tree.root_node())
        .into_iter()
        .filter(|node| target_types.contains(&node.kind()))
        .filter(|node| match &locator.name {
            Some(name) => symbol_name(*node, source).as_deref() == Some(name.as_str()),
            None => true,
        })
        .collect();

    if let Some(parent_loc) = &locator.parent {
        let parents = resolve(parent_loc, language, tree, source)?;
        matches.retain(|node| {
            parents.iter().any(|parent| {
                parent.id() != node.id()
                    && parent.start_byte() <= node.start_byte()
                    && node.end_byte() <= parent.end_byte()
            })
        });
    }

    if let Some(field) = &locator.field {
        matches = matches
            .into_iter()
            .filter_map(|node| node.child_by_field_name(field.as_str()))
            .collect();
    }

    if let Some(nth) = locator.nth_child {
        matches = matches
            .into_iter()
            .filter_map(|node| {
                let count = node.named_child_count();
                let position = if nth < 0 {
                    count.checked_sub(nth.unsigned_abs() as usize)?
                } else {
                    nth as usize
                };
                node.named_child(position)
            })
            .collect();
    }

    Ok(matches)
}

fn apply_index<'t>(index: Option<usize>, matches: Vec<Node<'t>>) -> Result<Vec<Node<'t>>> {
    match index {
        Some(i) if !matches.is_empty() => {
            if i >= matches.len() {
                return Err(EngineError::LocatorIndex {
                    index: i,
                    matches: matches.len(),
                });
            }
            Ok(vec![matches[i]])
        }
        _ => Ok(matches),
    }
}
