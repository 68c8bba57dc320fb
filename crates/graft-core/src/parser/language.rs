//! Per-language registry tables
//!
//! ARCHITECTURE: Everything language-specific lives here: normalized-kind
//! to native-kind maps, symbol/import query strings, line-kind labels,
//! keyword and builtin tables. Higher layers speak in normalized kinds and
//! never in language-native node types.

use tree_sitter::Node;

use crate::types::{Language, NormKind};

// ============================================================================
// Normalized kind -> native node types
// ============================================================================

/// Native node types for a normalized kind
///
/// An empty slice means the language has no equivalent construct (for
/// example `interface` in Python); locators over it resolve to nothing.
pub(crate) fn native_kinds(language: Language, kind: NormKind) -> &'static [&'static str] {
    use Language::*;
    use NormKind::*;

    match (language, kind) {
        (Python, Function | Method) => &["function_definition"],
        (Python, Class) => &["class_definition"],
        (Python, Import) => &["import_statement", "import_from_statement"],
        (Python, Statement) => PYTHON_STATEMENTS,
        (Python, Interface | Enum) => &[],

        (JavaScript, Function) => &["function_declaration", "function_expression", "arrow_function"],
        (JavaScript, Method) => &["method_definition"],
        (JavaScript, Class) => &["class_declaration"],
        (JavaScript, Import) => &["import_statement"],
        (JavaScript, Statement) => JS_STATEMENTS,
        (JavaScript, Interface | Enum) => &[],

        (TypeScript, Function) => &["function_declaration", "function_expression", "arrow_function"],
        (TypeScript, Method) => &["method_definition"],
        (TypeScript, Class) => &["class_declaration"],
        (TypeScript, Import) => &["import_statement"],
        (TypeScript, Statement) => JS_STATEMENTS,
        (TypeScript, Interface) => &["interface_declaration"],
        (TypeScript, Enum) => &["enum_declaration"],

        (Java, Function | Method) => &["method_declaration", "constructor_declaration"],
        (Java, Class) => &["class_declaration"],
        (Java, Import) => &["import_declaration"],
        (Java, Statement) => JAVA_STATEMENTS,
        (Java, Interface) => &["interface_declaration"],
        (Java, Enum) => &["enum_declaration"],

        (Go, Function) => &["function_declaration", "method_declaration"],
        (Go, Method) => &["method_declaration"],
        (Go, Class) => &["type_declaration"],
        (Go, Import) => &["import_declaration"],
        (Go, Statement) => GO_STATEMENTS,
        (Go, Interface) => &["type_declaration"],
        (Go, Enum) => &[],

        (Rust, Function | Method) => &["function_item"],
        (Rust, Class) => &["struct_item", "impl_item"],
        (Rust, Import) => &["use_declaration"],
        (Rust, Statement) => RUST_STATEMENTS,
        (Rust, Interface) => &["trait_item"],
        (Rust, Enum) => &["enum_item"],

        (Ruby, Function | Method) => &["method", "singleton_method"],
        (Ruby, Class) => &["class", "module"],
        (Ruby, Import) => &["call"],
        (Ruby, Statement) => RUBY_STATEMENTS,
        (Ruby, Interface | Enum) => &[],

        (Php, Function) => &["function_definition"],
        (Php, Method) => &["method_declaration"],
        (Php, Class) => &["class_declaration"],
        (Php, Import) => &["namespace_use_declaration"],
        (Php, Statement) => PHP_STATEMENTS,
        (Php, Interface) => &["interface_declaration"],
        (Php, Enum) => &["enum_declaration"],

        (C, Function | Method) => &["function_definition"],
        (C, Class) => &["struct_specifier"],
        (C, Import) => &["preproc_include"],
        (C, Statement) => C_STATEMENTS,
        (C, Interface) => &[],
        (C, Enum) => &["enum_specifier"],

        (Cpp, Function | Method) => &["function_definition"],
        (Cpp, Class) => &["class_specifier", "struct_specifier"],
        (Cpp, Import) => &["preproc_include"],
        (Cpp, Statement) => C_STATEMENTS,
        (Cpp, Interface) => &[],
        (Cpp, Enum) => &["enum_specifier"],
    }
}

const PYTHON_STATEMENTS: &[&str] = &[
    "expression_statement",
    "if_statement",
    "for_statement",
    "while_statement",
    "with_statement",
    "try_statement",
    "return_statement",
    "raise_statement",
    "assert_statement",
    "pass_statement",
];

const JS_STATEMENTS: &[&str] = &[
    "expression_statement",
    "if_statement",
    "for_statement",
    "for_in_statement",
    "while_statement",
    "try_statement",
    "return_statement",
    "throw_statement",
    "lexical_declaration",
    "variable_declaration",
];

const JAVA_STATEMENTS: &[&str] = &[
    "expression_statement",
    "if_statement",
    "for_statement",
    "enhanced_for_statement",
    "while_statement",
    "try_statement",
    "return_statement",
    "throw_statement",
    "local_variable_declaration",
];

const GO_STATEMENTS: &[&str] = &[
    "expression_statement",
    "if_statement",
    "for_statement",
    "return_statement",
    "go_statement",
    "defer_statement",
    "short_var_declaration",
    "assignment_statement",
];

const RUST_STATEMENTS: &[&str] = &[
    "expression_statement",
    "let_declaration",
    "if_expression",
    "for_expression",
    "while_expression",
    "match_expression",
    "return_expression",
];

const RUBY_STATEMENTS: &[&str] = &[
    "assignment",
    "if",
    "while",
    "for",
    "case",
    "return",
    "call",
];

const PHP_STATEMENTS: &[&str] = &[
    "expression_statement",
    "if_statement",
    "for_statement",
    "foreach_statement",
    "while_statement",
    "try_statement",
    "return_statement",
    "echo_statement",
];

const C_STATEMENTS: &[&str] = &[
    "expression_statement",
    "if_statement",
    "for_statement",
    "while_statement",
    "return_statement",
    "declaration",
    "switch_statement",
];

// ============================================================================
// Queries
// ============================================================================

/// Query capturing symbol definitions as `@def` with `@name`
///
/// Name nodes use the wildcard `(_)` so the same query shape works across
/// grammars that disagree on identifier node kinds.
pub(crate) fn symbols_query(language: Language) -> &'static str {
    match language {
        Language::Python => {
            "(function_definition name: (_) @name) @def\n\
             (class_definition name: (_) @name) @def"
        }
        Language::JavaScript => {
            "(function_declaration name: (_) @name) @def\n\
             (class_declaration name: (_) @name) @def\n\
             (method_definition name: (_) @name) @def"
        }
        Language::TypeScript => {
            "(function_declaration name: (_) @name) @def\n\
             (class_declaration name: (_) @name) @def\n\
             (method_definition name: (_) @name) @def\n\
             (interface_declaration name: (_) @name) @def\n\
             (enum_declaration name: (_) @name) @def\n\
             (type_alias_declaration name: (_) @name) @def"
        }
        Language::Java => {
            "(method_declaration name: (_) @name) @def\n\
             (class_declaration name: (_) @name) @def\n\
             (interface_declaration name: (_) @name) @def\n\
             (enum_declaration name: (_) @name) @def"
        }
        Language::Go => {
            "(function_declaration name: (_) @name) @def\n\
             (method_declaration name: (_) @name) @def\n\
             (type_declaration (type_spec name: (_) @name)) @def"
        }
        Language::Rust => {
            "(function_item name: (_) @name) @def\n\
             (struct_item name: (_) @name) @def\n\
             (enum_item name: (_) @name) @def\n\
             (trait_item name: (_) @name) @def"
        }
        Language::Ruby => {
            "(method name: (_) @name) @def\n\
             (class name: (_) @name) @def\n\
             (module name: (_) @name) @def"
        }
        Language::Php => {
            "(function_definition name: (_) @name) @def\n\
             (method_declaration name: (_) @name) @def\n\
             (class_declaration name: (_) @name) @def\n\
             (interface_declaration name: (_) @name) @def"
        }
        Language::C => {
            "(function_definition declarator: (function_declarator declarator: (_) @name)) @def\n\
             (struct_specifier name: (_) @name) @def\n\
             (enum_specifier name: (_) @name) @def"
        }
        Language::Cpp => {
            "(function_definition declarator: (function_declarator declarator: (_) @name)) @def\n\
             (class_specifier name: (_) @name) @def\n\
             (struct_specifier name: (_) @name) @def\n\
             (enum_specifier name: (_) @name) @def"
        }
    }
}

/// Query capturing import-like statements as `@import`
pub(crate) fn imports_query(language: Language) -> &'static str {
    match language {
        Language::Python => {
            "(import_statement) @import\n\
             (import_from_statement) @import"
        }
        Language::JavaScript | Language::TypeScript => "(import_statement) @import",
        Language::Java => "(import_declaration) @import",
        Language::Go => "(import_declaration) @import",
        Language::Rust => "(use_declaration) @import",
        Language::Ruby => {
            "(call method: (identifier) @fn (#match? @fn \"^require\")) @import"
        }
        Language::Php => "(namespace_use_declaration) @import",
        Language::C | Language::Cpp => "(preproc_include) @import",
    }
}

// ============================================================================
// Line kinds
// ============================================================================

/// Label for the line a native node starts on, if the node is structural
pub(crate) fn line_kind(language: Language, native: &str) -> Option<&'static str> {
    if native_kinds(language, NormKind::Function).contains(&native) {
        return Some("def");
    }
    if native_kinds(language, NormKind::Class).contains(&native) {
        return Some("class");
    }
    if native_kinds(language, NormKind::Import).contains(&native) {
        return Some("import");
    }
    if comment_kinds(language).contains(&native) {
        return Some("comment");
    }
    if string_kinds(language).contains(&native) {
        return Some("string");
    }
    match native {
        "if_statement" | "for_statement" | "while_statement" | "try_statement"
        | "if_expression" | "for_expression" | "while_expression" | "match_expression"
        | "switch_statement" | "if" | "while" | "for" | "case" => Some("flow"),
        "return_statement" | "return_expression" | "return" => Some("return"),
        "assignment" | "short_var_declaration" | "let_declaration"
        | "lexical_declaration" | "local_variable_declaration" => Some("assign"),
        _ => None,
    }
}

// ============================================================================
// String / comment kinds (ancestor-chain filters)
// ============================================================================

pub(crate) fn string_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &["string"],
        Language::JavaScript | Language::TypeScript => &["string", "template_string"],
        Language::Java => &["string_literal"],
        Language::Go => &["interpreted_string_literal", "raw_string_literal"],
        Language::Rust => &["string_literal", "raw_string_literal"],
        Language::Ruby => &["string"],
        Language::Php => &["string", "encapsed_string"],
        Language::C | Language::Cpp => &["string_literal", "char_literal"],
    }
}

pub(crate) fn comment_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Java | Language::Rust => &["line_comment", "block_comment"],
        _ => &["comment"],
    }
}

// ============================================================================
// Keywords / builtins / identifiers
// ============================================================================

/// Reserved words; identifiers must not collide with these
pub(crate) fn keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &[
            "False", "None", "True", "and", "as", "assert", "async", "await", "break",
            "class", "continue", "def", "del", "elif", "else", "except", "finally",
            "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal",
            "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
        ],
        Language::JavaScript | Language::TypeScript => &[
            "break", "case", "catch", "class", "const", "continue", "debugger",
            "default", "delete", "do", "else", "export", "extends", "finally", "for",
            "function", "if", "import", "in", "instanceof", "let", "new", "return",
            "super", "switch", "this", "throw", "try", "typeof", "var", "void",
            "while", "with", "yield",
        ],
        Language::Java => &[
            "abstract", "boolean", "break", "case", "catch", "class", "const",
            "continue", "default", "do", "else", "enum", "extends", "final",
            "finally", "for", "if", "implements", "import", "instanceof",
            "interface", "new", "package", "private", "protected", "public",
            "return", "static", "super", "switch", "this", "throw", "throws",
            "try", "void", "while",
        ],
        Language::Go => &[
            "break", "case", "chan", "const", "continue", "default", "defer",
            "else", "fallthrough", "for", "func", "go", "goto", "if", "import",
            "interface", "map", "package", "range", "return", "select", "struct",
            "switch", "type", "var",
        ],
        Language::Rust => &[
            "as", "async", "await", "break", "const", "continue", "crate", "dyn",
            "else", "enum", "extern", "fn", "for", "if", "impl", "in", "let",
            "loop", "match", "mod", "move", "mut", "pub", "ref", "return", "self",
            "static", "struct", "super", "trait", "type", "unsafe", "use", "where",
            "while",
        ],
        Language::Ruby => &[
            "alias", "and", "begin", "break", "case", "class", "def", "do", "else",
            "elsif", "end", "ensure", "false", "for", "if", "in", "module", "next",
            "nil", "not", "or", "redo", "rescue", "retry", "return", "self",
            "super", "then", "true", "unless", "until", "when", "while", "yield",
        ],
        Language::Php => &[
            "abstract", "and", "array", "as", "break", "case", "catch", "class",
            "const", "continue", "default", "do", "echo", "else", "elseif", "enum",
            "extends", "final", "finally", "for", "foreach", "function", "global",
            "if", "implements", "interface", "namespace", "new", "or", "private",
            "protected", "public", "return", "static", "switch", "throw", "trait",
            "try", "use", "while",
        ],
        Language::C | Language::Cpp => &[
            "auto", "break", "case", "char", "const", "continue", "default", "do",
            "double", "else", "enum", "extern", "float", "for", "goto", "if",
            "int", "long", "register", "return", "short", "signed", "sizeof",
            "static", "struct", "switch", "typedef", "union", "unsigned", "void",
            "volatile", "while",
        ],
    }
}

/// Names assumed to resolve without definition or import
///
/// Used only by the advisory referential/import checks; an incomplete list
/// produces spurious warnings, never failures.
pub(crate) fn builtins(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &[
            "abs", "all", "any", "bool", "bytes", "callable", "chr", "classmethod",
            "dict", "dir", "divmod", "enumerate", "filter", "float", "format",
            "frozenset", "getattr", "globals", "hasattr", "hash", "hex", "id",
            "input", "int", "isinstance", "issubclass", "iter", "len", "list",
            "locals", "map", "max", "min", "next", "object", "open", "ord", "pow",
            "print", "property", "range", "repr", "reversed", "round", "set",
            "setattr", "slice", "sorted", "staticmethod", "str", "sum", "super",
            "tuple", "type", "vars", "zip", "Exception", "ValueError", "TypeError",
            "KeyError", "IndexError", "AttributeError", "RuntimeError",
            "StopIteration", "NotImplementedError", "OSError", "IOError", "self",
            "cls", "__name__", "__file__", "__doc__", "NotImplemented", "Ellipsis",
            "BaseException", "ArithmeticError", "ZeroDivisionError", "OverflowError",
            "FileNotFoundError", "PermissionError", "TimeoutError", "bytearray",
            "memoryview", "complex", "compile", "eval", "exec", "breakpoint",
            "delattr", "help", "bin", "oct", "ascii", "vars",
        ],
        Language::JavaScript | Language::TypeScript => &[
            "console", "Math", "JSON", "Object", "Array", "String", "Number",
            "Boolean", "Promise", "Error", "Map", "Set", "Date", "RegExp",
            "parseInt", "parseFloat", "isNaN", "undefined", "null", "this",
            "window", "document", "require", "module", "exports", "process",
        ],
        Language::Java => &[
            "System", "String", "Integer", "Long", "Double", "Boolean", "Object",
            "Math", "List", "Map", "Set", "Exception", "RuntimeException", "this",
            "super",
        ],
        Language::Go => &[
            "append", "cap", "close", "copy", "delete", "len", "make", "new",
            "panic", "recover", "print", "println", "error", "string", "int",
            "bool", "byte", "rune", "nil", "true", "false",
        ],
        Language::Rust => &[
            "Some", "None", "Ok", "Err", "String", "Vec", "Box", "Option",
            "Result", "println", "format", "vec", "self", "Self",
        ],
        Language::Ruby => &[
            "puts", "print", "p", "require", "require_relative", "raise", "lambda",
            "proc", "self", "nil", "true", "false", "Array", "Hash", "String",
            "Integer", "Float",
        ],
        Language::Php => &[
            "echo", "print", "count", "strlen", "array", "isset", "empty", "unset",
            "this", "self", "null", "true", "false",
        ],
        Language::C | Language::Cpp => &[
            "printf", "malloc", "free", "sizeof", "NULL", "memcpy", "memset",
            "strlen", "strcmp",
        ],
    }
}

/// Identifier pattern for the language (anchored)
pub(crate) fn identifier_pattern(language: Language) -> &'static str {
    match language {
        // PHP variables carry a leading $
        Language::Php => r"^\$?[A-Za-z_][A-Za-z0-9_]*$",
        _ => r"^[A-Za-z_][A-Za-z0-9_]*$",
    }
}

/// The native node kind of a plain identifier
pub(crate) fn identifier_kind(language: Language) -> &'static str {
    match language {
        Language::Php => "name",
        _ => "identifier",
    }
}

// ============================================================================
// Symbol name extraction
// ============================================================================

/// Extract the defined name from a definition node
///
/// Most grammars expose a `name` field; C and C++ bury the identifier
/// inside a declarator chain.
pub(crate) fn symbol_name<'t>(node: Node<'t>, source: &[u8]) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return name.utf8_text(source).ok().map(str::to_string);
    }
    // C/C++: function_definition -> declarator -> ... -> identifier
    let mut current = node.child_by_field_name("declarator")?;
    loop {
        if current.kind() == "identifier" || current.kind() == "field_identifier" {
            return current.utf8_text(source).ok().map(str::to_string);
        }
        match current.child_by_field_name("declarator") {
            Some(next) => current = next,
            None => return None,
        }
    }
}

/// Normalized label for a definition node kind, for graph symbols
pub(crate) fn classify_definition(language: Language, native: &str) -> &'static str {
    if native_kinds(language, NormKind::Interface).contains(&native) {
        "interface"
    } else if native_kinds(language, NormKind::Enum).contains(&native) {
        "enum"
    } else if native_kinds(language, NormKind::Class).contains(&native) {
        "class"
    } else {
        "function"
    }
}
