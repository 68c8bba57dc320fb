//! Graph builder - structural summary of a file set
//!
//! Extracts symbol definitions, imports, and per-line node-kind labels into
//! a compact JSON document. The plan verifier uses it for referential and
//! cross-file checks. Errors are reported as data in `Graph::errors`, never
//! raised; one unparseable file does not stop the rest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::parser::language::{classify_definition, imports_query, line_kind, symbol_name, symbols_query};
use crate::parser::{self, node_text, run_query};
use crate::types::Language;

/// A symbol definition with its line range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// One imported module/symbol pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub file: String,
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub line: usize,
}

/// Structural summary used by the plan verifier
///
/// Rebuilt before every plan; immutable during execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub symbols: Vec<Symbol>,
    pub imports: Vec<Import>,
    /// file -> line (1-based) -> label
    pub line_kinds: BTreeMap<String, BTreeMap<usize, String>>,
    pub errors: Vec<String>,
}

impl Graph {
    /// Files that import the given symbol (by symbol or module name)
    pub fn importers_of(&self, symbol: &str) -> Vec<&str> {
        let mut files: Vec<&str> = self
            .imports
            .iter()
            .filter(|import| {
                import.symbol.as_deref() == Some(symbol)
                    || import.module == symbol
                    || import.module.ends_with(&format!(".{symbol}"))
            })
            .map(|import| import.file.as_str())
            .collect();
        files.sort_unstable();
        files.dedup();
        files
    }

    /// Imports declared by one file
    pub fn imports_of(&self, file: &str) -> Vec<&Import> {
        self.imports.iter().filter(|i| i.file == file).collect()
    }
}

/// Build the graph for a list of files
///
/// Empty input produces an empty graph. Per-file failures are recorded as
/// `"<path>: <reason>"` in `errors`.
pub fn build_graph(paths: &[PathBuf]) -> Graph {
    let mut graph = Graph::default();

    for path in paths {
        if let Err(error) = add_file(&mut graph, path) {
            graph.errors.push(format!("{}: {error}", path.display()));
        }
    }

    graph
}

fn add_file(graph: &mut Graph, path: &Path) -> crate::types::Result<()> {
    let (language, bytes, tree) = parser::parse_file(path)?;
    let file = path.to_string_lossy().into_owned();
    let root = tree.root_node();

    // Symbols
    for row in run_query(symbols_query(language), language, root, &bytes)? {
        let Some(&def) = row.get("def") else { continue };
        let name = match row.get("name") {
            Some(&name_node) => node_text(name_node, &bytes)?.to_string(),
            None => match symbol_name(def, &bytes) {
                Some(name) => name,
                None => continue,
            },
        };
        graph.symbols.push(Symbol {
            name,
            kind: classify_definition(language, def.kind()).to_string(),
            file: file.clone(),
            start_line: def.start_position().row + 1,
            end_line: def.end_position().row + 1,
        });
    }

    // Imports
    for row in run_query(imports_query(language), language, root, &bytes)? {
        let Some(&import_node) = row.get("import") else { continue };
        let line = import_node.start_position().row + 1;
        for (module, symbol) in import_parts(language, import_node, &bytes) {
            graph.imports.push(Import {
                file: file.clone(),
                module,
                symbol,
                line,
            });
        }
    }

    // Line kinds: pre-order walk, outermost label wins per line
    let mut lines: BTreeMap<usize, String> = BTreeMap::new();
    for node in parser::named_nodes(root) {
        if let Some(label) = line_kind(language, node.kind()) {
            lines
                .entry(node.start_position().row + 1)
                .or_insert_with(|| label.to_string());
        }
    }
    graph.line_kinds.insert(file, lines);

    Ok(())
}

/// Extract `(module, symbol)` pairs from one import-like node
///
/// Shared with the post-edit import-closure check.
pub(crate) fn import_parts_for(
    language: Language,
    node: Node<'_>,
    source: &[u8],
) -> Vec<(String, Option<String>)> {
    import_parts(language, node, source)
}

/// Structure varies wildly across grammars; where fields are awkward this
/// falls back to text heuristics. The result feeds advisory checks only.
fn import_parts(language: Language, node: Node<'_>, source: &[u8]) -> Vec<(String, Option<String>)> {
    let text = node.utf8_text(source).unwrap_or_default().trim().to_string();

    match language {
        Language::Python => python_import_parts(node, source, &text),
        Language::JavaScript | Language::TypeScript => {
            let module = node
                .child_by_field_name("source")
                .and_then(|n| n.utf8_text(source).ok())
                .map(|s| s.trim_matches(|c| c == '"' || c == '\'').to_string())
                .unwrap_or_else(|| text.clone());
            let mut out = Vec::new();
            for child in named_descendants_of_kind(node, "import_specifier") {
                if let Some(name) = child
                    .child_by_field_name("name")
                    .and_then(|n| n.utf8_text(source).ok())
                {
                    out.push((module.clone(), Some(name.to_string())));
                }
            }
            if out.is_empty() {
                out.push((module, None));
            }
            out
        }
        Language::Java => {
            let module = text
                .trim_start_matches("import")
                .trim_start_matches(" static")
                .trim()
                .trim_end_matches(';')
                .to_string();
            let symbol = module.rsplit('.').next().map(str::to_string);
            vec![(module, symbol)]
        }
        Language::Go => {
            let mut out = Vec::new();
            for child in named_descendants_of_kind(node, "interpreted_string_literal") {
                if let Ok(path) = child.utf8_text(source) {
                    out.push((path.trim_matches('"').to_string(), None));
                }
            }
            if out.is_empty() {
                out.push((text, None));
            }
            out
        }
        Language::Rust => {
            let module = text
                .trim_start_matches("pub ")
                .trim_start_matches("use ")
                .trim_end_matches(';')
                .to_string();
            let symbol = module
                .rsplit("::")
                .next()
                .filter(|s| !s.contains('{') && *s != "*")
                .map(str::to_string);
            vec![(module, symbol)]
        }
        Language::Ruby => {
            let module = node
                .child_by_field_name("arguments")
                .and_then(|args| args.named_child(0))
                .and_then(|arg| arg.utf8_text(source).ok())
                .map(|s| s.trim_matches(|c| c == '"' || c == '\'').to_string())
                .unwrap_or(text);
            vec![(module, None)]
        }
        Language::Php => {
            let module = text
                .trim_start_matches("use ")
                .trim_end_matches(';')
                .to_string();
            let symbol = module.rsplit('\\').next().map(str::to_string);
            vec![(module, symbol)]
        }
        Language::C | Language::Cpp => {
            let module = node
                .child_by_field_name("path")
                .and_then(|n| n.utf8_text(source).ok())
                .map(|s| s.trim_matches(|c| c == '"' || c == '<' || c == '>').to_string())
                .unwrap_or(text);
            vec![(module, None)]
        }
    }
}

fn python_import_parts(node: Node<'_>, source: &[u8], text: &str) -> Vec<(String, Option<String>)> {
    match node.kind() {
        "import_from_statement" => {
            let module = node
                .child_by_field_name("module_name")
                .and_then(|n| n.utf8_text(source).ok())
                .unwrap_or("")
                .to_string();
            let mut out = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "dotted_name" | "aliased_import" => {
                        // The module_name field is also a dotted_name; skip it
                        if Some(child) == node.child_by_field_name("module_name") {
                            continue;
                        }
                        let name_node = if child.kind() == "aliased_import" {
                            child.child_by_field_name("name")
                        } else {
                            Some(child)
                        };
                        if let Some(name) =
                            name_node.and_then(|n| n.utf8_text(source).ok())
                        {
                            out.push((module.clone(), Some(name.to_string())));
                        }
                    }
                    "wildcard_import" => out.push((module.clone(), Some("*".to_string()))),
                    _ => {}
                }
            }
            if out.is_empty() {
                out.push((module, None));
            }
            out
        }
        _ => {
            // import a.b, c -> one entry per dotted name
            let mut out = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "dotted_name" => {
                        if let Ok(module) = child.utf8_text(source) {
                            out.push((module.to_string(), None));
                        }
                    }
                    "aliased_import" => {
                        if let Some(module) = child
                            .child_by_field_name("name")
                            .and_then(|n| n.utf8_text(source).ok())
                        {
                            out.push((module.to_string(), None));
                        }
                    }
                    _ => {}
                }
            }
            if out.is_empty() {
                out.push((text.to_string(), None));
            }
            out
        }
    }
}

fn named_descendants_of_kind<'t>(node: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    parser::named_nodes(node)
        .into_iter()
        .filter(|n| n.kind() == kind)
        .collect()
}
