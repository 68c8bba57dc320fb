//! DSL interpreter support: variable scope, substitution, conditions
//!
//! Substitution handles three shapes inside any string of a step's params:
//! `$var` (the value as-is, deep copy), `"prefix $var suffix"` (string
//! interpolation), and `$var.field` / `$var.0` (field or index lookup).
//! The condition language is deliberately tiny: `and`/`or`/`not`,
//! `==`/`!=`, literals and `$var` references; it is side-effect free.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// A plan's variable scope, owned by the interpreter
#[derive(Debug, Default, Clone)]
pub struct Scope {
    vars: HashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Resolve a dotted reference: `var`, `var.field`, `var.0`
    fn lookup(&self, path: &str) -> Result<Value, String> {
        let mut segments = path.split('.');
        let name = segments.next().unwrap_or_default();
        let mut current = self
            .get(name)
            .ok_or_else(|| format!("unknown variable '${name}'"))?
            .clone();
        for segment in segments {
            current = match &current {
                Value::Object(map) => map
                    .get(segment)
                    .cloned()
                    .ok_or_else(|| format!("'${path}': no field '{segment}'"))?,
                Value::Array(items) => {
                    let index: usize = segment
                        .parse()
                        .map_err(|_| format!("'${path}': '{segment}' is not an index"))?;
                    items
                        .get(index)
                        .cloned()
                        .ok_or_else(|| format!("'${path}': index {index} out of bounds"))?
                }
                _ => return Err(format!("'${path}': cannot descend into scalar")),
            };
        }
        Ok(current)
    }
}

// ============================================================================
// Substitution
// ============================================================================

fn reference_pattern() -> Result<Regex, String> {
    Regex::new(r"\$[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*").map_err(|e| e.to_string())
}

/// Substitute `$var` references throughout a JSON value
pub fn substitute(value: &Value, scope: &Scope) -> Result<Value, String> {
    match value {
        Value::String(text) => substitute_string(text, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| substitute(item, scope).map(|v| (key.clone(), v)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn substitute_string(text: &str, scope: &Scope) -> Result<Value, String> {
    let pattern = reference_pattern()?;

    // A string that is exactly one reference keeps the value's type
    if let Some(found) = pattern.find(text) {
        if found.start() == 0 && found.end() == text.len() {
            return scope.lookup(&text[1..]);
        }
    } else {
        return Ok(Value::String(text.to_string()));
    }

    // Otherwise interpolate each reference into the string
    let mut out = String::new();
    let mut last = 0;
    for found in pattern.find_iter(text) {
        out.push_str(&text[last..found.start()]);
        let value = scope.lookup(&found.as_str()[1..])?;
        out.push_str(&stringify(&value));
        last = found.end();
    }
    out.push_str(&text[last..]);
    Ok(Value::String(out))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// Evaluate a boolean expression over the scope
pub fn eval_condition(expression: &str, scope: &Scope) -> Result<bool, String> {
    let tokens = tokenize(expression)?;
    let mut parser = CondParser {
        tokens,
        position: 0,
        scope,
    };
    let value = parser.or_expr()?;
    if parser.position != parser.tokens.len() {
        return Err(format!("trailing input in condition '{expression}'"));
    }
    Ok(truthy(&value))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Literal(Value),
    Reference(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err("unterminated string in condition".to_string());
                }
                let text: String = chars[start..j].iter().collect();
                tokens.push(Token::Literal(Value::String(text)));
                i = j + 1;
            }
            '$' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len()
                    && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '.')
                {
                    j += 1;
                }
                if j == start {
                    return Err("bare '$' in condition".to_string());
                }
                tokens.push(Token::Reference(chars[start..j].iter().collect()));
                i = j;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                // Integers stay integers so they compare equal to scope
                // values bound from integer JSON
                let value = if text.contains('.') {
                    text.parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                } else {
                    text.parse::<i64>().ok().map(Value::from)
                }
                .ok_or_else(|| format!("bad number '{text}' in condition"))?;
                tokens.push(Token::Literal(value));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let word: String = chars[start..j].iter().collect();
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" | "True" => Token::Literal(Value::Bool(true)),
                    "false" | "False" => Token::Literal(Value::Bool(false)),
                    "null" | "None" => Token::Literal(Value::Null),
                    other => return Err(format!("unknown word '{other}' in condition")),
                };
                tokens.push(token);
                i = j;
            }
            other => return Err(format!("unexpected character '{other}' in condition")),
        }
    }
    Ok(tokens)
}

struct CondParser<'s> {
    tokens: Vec<Token>,
    position: usize,
    scope: &'s Scope,
}

impl CondParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn or_expr(&mut self) -> Result<Value, String> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and_expr()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value, String> {
        let mut left = self.not_expr()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.not_expr()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Value, String> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let value = self.not_expr()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, String> {
        let left = self.atom()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.advance();
                let right = self.atom()?;
                Ok(Value::Bool(left == right))
            }
            Some(Token::Ne) => {
                self.advance();
                let right = self.atom()?;
                Ok(Value::Bool(left != right))
            }
            _ => Ok(left),
        }
    }

    fn atom(&mut self) -> Result<Value, String> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(Token::Literal(value)) => Ok(value),
            Some(Token::Reference(path)) => self.scope.lookup(&path),
            other => Err(format!("unexpected token {other:?} in condition")),
        }
    }
}

// ============================================================================
// DSL step shape
// ============================================================================

/// One step of a composed operator's expansion
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DslStep {
    /// Call a primitive, optionally binding its result into the scope
    Primitive {
        primitive: String,
        params: Value,
        #[serde(default)]
        bind: Option<String>,
    },
    /// Conditional: evaluate `if` over the scope, run `then` or `else`
    Conditional {
        #[serde(rename = "if")]
        condition: String,
        then: Box<DslStep>,
        #[serde(default, rename = "else")]
        otherwise: Option<Box<DslStep>>,
    },
    /// Call another composed operator
    Call {
        op: String,
        #[serde(default)]
        params: Value,
    },
}
