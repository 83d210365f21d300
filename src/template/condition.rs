//! Restricted boolean expressions used by `conditional` steps.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := primary ( ( "==" | "!=" | ">" | "<" | ">=" | "<=" ) primary )?
//! primary := number | string | true | false | null | path | "(" or ")"
//! ```
//!
//! Nothing outside this grammar is accepted, so job parameters cannot smuggle calls or
//! assignments into a condition.

use super::path::{parse_path, resolve_segments, PathSegment};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,
    #[error("unexpected character `{ch}` at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("invalid number `{raw}`")]
    InvalidNumber { raw: String },
    #[error("invalid variable reference `{raw}`: {reason}")]
    InvalidPath { raw: String, reason: String },
    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(Vec<PathSegment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Cmp(CompareOp),
    Literal(Value),
    Ident(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::LParen => "`(`".to_string(),
            Self::RParen => "`)`".to_string(),
            Self::Not => "`!`".to_string(),
            Self::And => "`&&`".to_string(),
            Self::Or => "`||`".to_string(),
            Self::Cmp(op) => format!("`{}`", op.symbol()),
            Self::Literal(value) => format!("literal {value}"),
            Self::Ident(name) => format!("`{name}`"),
        }
    }

    fn starts_operand(prev: Option<&Token>) -> bool {
        matches!(
            prev,
            None | Some(Token::LParen)
                | Some(Token::Not)
                | Some(Token::And)
                | Some(Token::Or)
                | Some(Token::Cmp(_))
        )
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' => {
                let op = match (ch, next == Some('=')) {
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    ('<', true) => CompareOp::Le,
                    _ => CompareOp::Lt,
                };
                tokens.push(Token::Cmp(op));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = ch;
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let c = chars[j].1;
                    if c == '\\' && j + 1 < chars.len() {
                        text.push(chars[j + 1].1);
                        j += 2;
                        continue;
                    }
                    if c == quote {
                        closed = true;
                        break;
                    }
                    text.push(c);
                    j += 1;
                }
                if !closed {
                    return Err(ConditionError::UnterminatedString { offset });
                }
                tokens.push(Token::Literal(Value::String(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-'
                    && next.is_some_and(|n| n.is_ascii_digit())
                    && Token::starts_operand(tokens.last())) =>
            {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let raw: String = chars[i..j].iter().map(|(_, c)| *c).collect();
                tokens.push(Token::Literal(parse_number(&raw)?));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while j < chars.len() {
                    let c = chars[j].1;
                    if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']') {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let raw: String = chars[i..j].iter().map(|(_, c)| *c).collect();
                tokens.push(match raw.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    _ => Token::Ident(raw),
                });
                i = j;
            }
            other => {
                return Err(ConditionError::UnexpectedChar { ch: other, offset });
            }
        }
    }
    Ok(tokens)
}

fn parse_number(raw: &str) -> Result<Value, ConditionError> {
    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Value::from(int));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ConditionError::InvalidNumber {
            raw: raw.to_string(),
        })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn found(&self) -> String {
        self.peek()
            .map(Token::describe)
            .unwrap_or_else(|| "end of input".to_string())
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_primary()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let found = self.found();
        match self.advance() {
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::Ident(raw)) => parse_path(&raw)
                .map(Expr::Var)
                .map_err(|reason| ConditionError::InvalidPath { raw, reason }),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if self.advance() != Some(Token::RParen) {
                    return Err(ConditionError::Unexpected {
                        expected: "`)`".to_string(),
                        found: self.previous_description(),
                    });
                }
                Ok(inner)
            }
            _ => Err(ConditionError::Unexpected {
                expected: "a value, variable or `(`".to_string(),
                found,
            }),
        }
    }

    fn previous_description(&self) -> String {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(Token::describe)
            .unwrap_or_else(|| "end of input".to_string())
    }
}

/// A parsed condition, kept together with its source text for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(ConditionError::Unexpected {
                expected: "an operator or end of input".to_string(),
                found: parser.found(),
            });
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, context: &Map<String, Value>) -> bool {
        truthy(&eval(&self.expr, context))
    }
}

/// Convenience for one-off evaluation.
pub fn evaluate_condition(
    source: &str,
    context: &Map<String, Value>,
) -> Result<bool, ConditionError> {
    Ok(Condition::parse(source)?.evaluate(context))
}

fn eval(expr: &Expr, context: &Map<String, Value>) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Var(segments) => resolve_segments(context, segments)
            .cloned()
            .unwrap_or(Value::Null),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, context))),
        Expr::And(left, right) => {
            Value::Bool(truthy(&eval(left, context)) && truthy(&eval(right, context)))
        }
        Expr::Or(left, right) => {
            Value::Bool(truthy(&eval(left, context)) || truthy(&eval(right, context)))
        }
        Expr::Compare(left, op, right) => {
            Value::Bool(compare(&eval(left, context), *op, &eval(right, context)))
        }
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    let numeric = match (left, right) {
        (Value::Number(_), _) | (_, Value::Number(_)) => as_number(left).zip(as_number(right)),
        _ => None,
    };
    let ordering = match (numeric, left, right) {
        (Some((l, r)), _, _) => l.partial_cmp(&r),
        (None, Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (None, Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (None, Value::Null, Value::Null) => Some(std::cmp::Ordering::Equal),
        (None, l, r) if matches!(op, CompareOp::Eq | CompareOp::Ne) => {
            return (l == r) == (op == CompareOp::Eq);
        }
        _ => None,
    };
    match (op, ordering) {
        (CompareOp::Eq, Some(ord)) => ord.is_eq(),
        (CompareOp::Ne, Some(ord)) => ord.is_ne(),
        (CompareOp::Ne, None) => true,
        (CompareOp::Gt, Some(ord)) => ord.is_gt(),
        (CompareOp::Lt, Some(ord)) => ord.is_lt(),
        (CompareOp::Ge, Some(ord)) => ord.is_ge(),
        (CompareOp::Le, Some(ord)) => ord.is_le(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn precedence_binds_and_tighter_than_or() {
        let context = ctx(json!({"a": true, "b": false, "c": false}));
        assert!(evaluate_condition("a || b && c", &context).expect("parse"));
        assert!(!evaluate_condition("(a || b) && c", &context).expect("parse"));
    }

    #[test]
    fn numeric_strings_compare_numerically() {
        let context = ctx(json!({"count": "12", "limit": 5}));
        assert!(evaluate_condition("count > limit", &context).expect("parse"));
        assert!(evaluate_condition("count == 12", &context).expect("parse"));
        assert!(evaluate_condition("-1 < limit", &context).expect("parse"));
    }

    #[test]
    fn missing_variables_are_null_and_falsy() {
        let context = ctx(json!({}));
        assert!(!evaluate_condition("missing.value", &context).expect("parse"));
        assert!(evaluate_condition("missing == null", &context).expect("parse"));
        assert!(!evaluate_condition("missing > 3", &context).expect("parse"));
    }

    #[test]
    fn rejects_anything_outside_the_grammar() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("a = 1").is_err());
        assert!(Condition::parse("exec('rm -rf /')").is_err());
        assert!(Condition::parse("a + 1 > 2").is_err());
        assert!(Condition::parse("(a > 1").is_err());
        assert!(Condition::parse("a > 1 b").is_err());
        assert!(Condition::parse("'open").is_err());
    }
}
