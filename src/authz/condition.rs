//! Expression parser and evaluator for rule conditions.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!` (`&&`/`||` short-circuit)
//! - Membership: `x in list`, `key in map`
//! - Variables: `r.sub`, `r.act`, `r.obj.<path>`
//! - Literals: integers, floats, `"strings"`, `'strings'`, `true`, `false`
//! - Function calls: `name(arg, ...)`, resolved through a [`Functions`] registry
//! - Parentheses for grouping

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::authz::errors::AuthzError;

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LitValue),
    Path(Vec<String>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNot(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Returns the call if the whole expression is a single function call.
    pub fn as_call(&self) -> Option<(&str, &[Expr])> {
        match self {
            Expr::Call { name, args } => Some((name.as_str(), args.as_slice())),
            _ => None,
        }
    }

    /// Whether any `r.obj` path appears anywhere in the expression.
    pub fn references_object(&self) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Path(segments) => {
                matches!(segments.as_slice(), [root, field, ..] if root == "r" && field == "obj")
            }
            Expr::BinOp { left, right, .. } => {
                left.references_object() || right.references_object()
            }
            Expr::UnaryNot(inner) => inner.references_object(),
            Expr::In {
                element,
                collection,
            } => element.references_object() || collection.references_object(),
            Expr::Call { args, .. } => args.iter().any(Expr::references_object),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Dot,
    Comma,
    LParen,
    RParen,
    Eq,  // ==
    Ne,  // !=
    Gt,  // >
    Lt,  // <
    Ge,  // >=
    Le,  // <=
    And, // &&
    Or,  // ||
    Not, // !
    In,  // in
}

fn tokenize(input: &str) -> Result<Vec<Token>, AuthzError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if i + 1 < chars.len() && chars[i + 1] == '&' => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if i + 1 < chars.len() && chars[i + 1] == '|' => {
                tokens.push(Token::Or);
                i += 2;
            }
            quote @ ('"' | '\'') => {
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(AuthzError::InvalidCondition(
                        "unterminated string literal".into(),
                    ));
                }
                tokens.push(Token::Str(s));
                i += 1; // skip closing quote
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                if num_str.contains('.') {
                    let f: f64 = num_str.parse().map_err(|_| {
                        AuthzError::InvalidCondition(format!("invalid float `{num_str}`"))
                    })?;
                    tokens.push(Token::Float(f));
                } else {
                    let n: i64 = num_str.parse().map_err(|_| {
                        AuthzError::InvalidCondition(format!("invalid integer `{num_str}`"))
                    })?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(AuthzError::InvalidCondition(format!(
                    "unexpected character `{c}`"
                )));
            }
        }
    }
    Ok(tokens)
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect_rparen(&mut self) -> Result<(), AuthzError> {
        if self.advance() != Some(Token::RParen) {
            return Err(AuthzError::InvalidCondition(
                "expected closing parenthesis `)`".into(),
            ));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, AuthzError> {
        self.parse_or()
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// comparison = unary (("==" | "!=" | ">" | "<" | ">=" | "<=" | "in") unary)?
    fn parse_comparison(&mut self) -> Result<Expr, AuthzError> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::Le) => BinOp::Le,
            Some(Token::In) => {
                self.advance();
                let right = self.parse_unary()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_unary()?;
        Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// unary = "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, AuthzError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::UnaryNot(Box::new(expr)));
        }
        self.parse_primary()
    }

    /// primary = literal | call | path | "(" expr ")"
    fn parse_primary(&mut self) -> Result<Expr, AuthzError> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Int(n)))
            }
            Some(Token::Float(f)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Float(f)))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Str(s)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(false)))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let args = self.parse_args()?;
                    return Ok(Expr::Call { name, args });
                }
                let mut path = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        _ => {
                            return Err(AuthzError::InvalidCondition(
                                "expected identifier after `.`".into(),
                            ));
                        }
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            other => Err(AuthzError::InvalidCondition(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }

    /// args = (expr ("," expr)*)? ")"
    fn parse_args(&mut self) -> Result<Vec<Expr>, AuthzError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => {
                    return Err(AuthzError::InvalidCondition(
                        "expected `,` or `)` in argument list".into(),
                    ))
                }
            }
        }
    }
}

/// Parse a condition expression string into an AST.
pub fn parse_condition(input: &str) -> Result<Expr, AuthzError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AuthzError::InvalidCondition("empty expression".into()));
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(AuthzError::InvalidCondition(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

// ─── Function registry ──────────────────────────────────────────────────

pub type Predicate = Arc<dyn Fn(&[EvalValue]) -> Result<EvalValue, AuthzError> + Send + Sync>;

/// Named functions callable from conditions. Populated once when the engine
/// starts and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct Functions {
    map: HashMap<String, Predicate>,
}

impl std::fmt::Debug for Functions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.map.keys().collect();
        names.sort();
        f.debug_struct("Functions").field("names", &names).finish()
    }
}

impl Functions {
    /// Registry with the string helpers every condition may use.
    pub fn with_builtins() -> Self {
        let mut functions = Self::default();
        functions.register("startsWith", |args| {
            let (s, p) = two_strings("startsWith", args)?;
            Ok(EvalValue::Bool(s.starts_with(p)))
        });
        functions.register("endsWith", |args| {
            let (s, p) = two_strings("endsWith", args)?;
            Ok(EvalValue::Bool(s.ends_with(p)))
        });
        functions.register("contains", |args| {
            let (s, p) = two_strings("contains", args)?;
            Ok(EvalValue::Bool(s.contains(p)))
        });
        functions.register("glob", |args| {
            let (pattern, s) = two_strings("glob", args)?;
            Ok(EvalValue::Bool(crate::authz::selector::wildcard_match(
                pattern, s,
            )))
        });
        functions
    }

    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[EvalValue]) -> Result<EvalValue, AuthzError> + Send + Sync + 'static,
    {
        self.map.insert(name.to_string(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    fn call(&self, name: &str, args: &[EvalValue]) -> Result<EvalValue, AuthzError> {
        let f = self
            .map
            .get(name)
            .ok_or_else(|| AuthzError::InvalidCondition(format!("unknown function `{name}`")))?;
        f(args)
    }
}

/// Null arguments (undefined attributes) compare as empty strings.
fn two_strings<'a>(name: &str, args: &'a [EvalValue]) -> Result<(&'a str, &'a str), AuthzError> {
    match args {
        [a, b] => Ok((a.as_str().unwrap_or(""), b.as_str().unwrap_or(""))),
        _ => Err(AuthzError::InvalidCondition(format!(
            "`{name}` expects 2 arguments, got {}",
            args.len()
        ))),
    }
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// The `r` tuple conditions are evaluated against.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub sub: &'a str,
    /// Attribute bundle as a nested map; `Null` when the caller sent none.
    pub obj: Value,
    pub act: &'a str,
}

/// Evaluate a parsed expression against a request.
/// Returns `true` if the condition is satisfied.
pub fn evaluate(expr: &Expr, request: &Request<'_>, functions: &Functions) -> Result<bool, AuthzError> {
    match eval_value(expr, request, functions)? {
        EvalValue::Bool(b) => Ok(b),
        other => Err(AuthzError::InvalidCondition(format!(
            "condition must evaluate to boolean, got: {other:?}"
        ))),
    }
}

#[derive(Debug, Clone)]
pub enum EvalValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Array(Vec<EvalValue>),
    /// Objects keep their JSON form so functions can inspect them.
    Object(Value),
    Null,
}

impl EvalValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Int(n) => Some(*n as f64),
            EvalValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvalValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// JSON view of the value, used by predicates that take structured input.
    pub fn to_json(&self) -> Value {
        match self {
            EvalValue::Int(n) => Value::from(*n),
            EvalValue::Float(f) => Value::from(*f),
            EvalValue::Str(s) => Value::String(s.clone()),
            EvalValue::Bool(b) => Value::Bool(*b),
            EvalValue::Array(items) => Value::Array(items.iter().map(|i| i.to_json()).collect()),
            EvalValue::Object(v) => v.clone(),
            EvalValue::Null => Value::Null,
        }
    }
}

impl PartialEq for EvalValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EvalValue::Int(a), EvalValue::Int(b)) => a == b,
            (EvalValue::Float(a), EvalValue::Float(b)) => a == b,
            (EvalValue::Int(a), EvalValue::Float(b)) => (*a as f64) == *b,
            (EvalValue::Float(a), EvalValue::Int(b)) => *a == (*b as f64),
            (EvalValue::Str(a), EvalValue::Str(b)) => a == b,
            (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
            (EvalValue::Array(a), EvalValue::Array(b)) => a == b,
            (EvalValue::Object(a), EvalValue::Object(b)) => a == b,
            (EvalValue::Null, EvalValue::Null) => true,
            _ => false,
        }
    }
}

fn resolve_path(segments: &[String], request: &Request<'_>) -> Result<EvalValue, AuthzError> {
    let Some((root, rest)) = segments.split_first() else {
        return Err(AuthzError::InvalidCondition("empty variable path".into()));
    };
    if root != "r" {
        return Err(AuthzError::InvalidCondition(format!(
            "unknown variable `{root}` (expected r.sub, r.obj or r.act)"
        )));
    }
    let Some((field, rest)) = rest.split_first() else {
        return Err(AuthzError::InvalidCondition(
            "`r` must be followed by .sub, .obj or .act".into(),
        ));
    };
    match field.as_str() {
        "sub" if rest.is_empty() => Ok(EvalValue::Str(request.sub.to_string())),
        "act" if rest.is_empty() => Ok(EvalValue::Str(request.act.to_string())),
        "obj" => {
            let mut current = &request.obj;
            for seg in rest {
                current = current.get(seg).unwrap_or(&Value::Null);
            }
            Ok(json_to_eval(current))
        }
        other => Err(AuthzError::InvalidCondition(format!(
            "unknown variable `r.{other}`"
        ))),
    }
}

fn eval_value(
    expr: &Expr,
    request: &Request<'_>,
    functions: &Functions,
) -> Result<EvalValue, AuthzError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            LitValue::Int(n) => EvalValue::Int(*n),
            LitValue::Float(f) => EvalValue::Float(*f),
            LitValue::Str(s) => EvalValue::Str(s.clone()),
            LitValue::Bool(b) => EvalValue::Bool(*b),
        }),
        Expr::Path(segments) => resolve_path(segments, request),
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|a| eval_value(a, request, functions))
                .collect::<Result<Vec<_>, _>>()?;
            functions.call(name, &values)
        }
        Expr::UnaryNot(inner) => match eval_value(inner, request, functions)? {
            EvalValue::Bool(b) => Ok(EvalValue::Bool(!b)),
            _ => Err(AuthzError::InvalidCondition(
                "`!` operator requires a boolean operand".into(),
            )),
        },
        Expr::In {
            element,
            collection,
        } => {
            let elem = eval_value(element, request, functions)?;
            match eval_value(collection, request, functions)? {
                EvalValue::Array(items) => Ok(EvalValue::Bool(items.contains(&elem))),
                EvalValue::Object(Value::Object(map)) => Ok(EvalValue::Bool(
                    elem.as_str().map(|k| map.contains_key(k)).unwrap_or(false),
                )),
                EvalValue::Null => Ok(EvalValue::Bool(false)),
                _ => Err(AuthzError::InvalidCondition(
                    "`in` operator requires an array or map on the right side".into(),
                )),
            }
        }
        Expr::BinOp {
            op: op @ (BinOp::And | BinOp::Or),
            left,
            right,
        } => {
            let EvalValue::Bool(l) = eval_value(left, request, functions)? else {
                return Err(AuthzError::InvalidCondition(
                    "`&&`/`||` require boolean operands".into(),
                ));
            };
            match (op, l) {
                (BinOp::And, false) => return Ok(EvalValue::Bool(false)),
                (BinOp::Or, true) => return Ok(EvalValue::Bool(true)),
                _ => {}
            }
            match eval_value(right, request, functions)? {
                EvalValue::Bool(r) => Ok(EvalValue::Bool(r)),
                _ => Err(AuthzError::InvalidCondition(
                    "`&&`/`||` require boolean operands".into(),
                )),
            }
        }
        Expr::BinOp { op, left, right } => {
            let l = eval_value(left, request, functions)?;
            let r = eval_value(right, request, functions)?;
            match op {
                BinOp::Eq => Ok(EvalValue::Bool(l == r)),
                BinOp::Ne => Ok(EvalValue::Bool(l != r)),
                _ => compare(op, &l, &r).map(EvalValue::Bool),
            }
        }
    }
}

fn compare(op: &BinOp, l: &EvalValue, r: &EvalValue) -> Result<bool, AuthzError> {
    let ordering = match (l, r) {
        (EvalValue::Str(a), EvalValue::Str(b)) => a.cmp(b),
        _ => {
            let lf = l.as_f64().ok_or_else(|| {
                AuthzError::InvalidCondition(
                    "comparison operator requires numeric or string operands".into(),
                )
            })?;
            let rf = r.as_f64().ok_or_else(|| {
                AuthzError::InvalidCondition(
                    "comparison operator requires numeric or string operands".into(),
                )
            })?;
            lf.partial_cmp(&rf).ok_or_else(|| {
                AuthzError::InvalidCondition("cannot compare NaN".into())
            })?
        }
    };
    Ok(match op {
        BinOp::Gt => ordering.is_gt(),
        BinOp::Lt => ordering.is_lt(),
        BinOp::Ge => ordering.is_ge(),
        BinOp::Le => ordering.is_le(),
        _ => false,
    })
}

fn json_to_eval(value: &Value) -> EvalValue {
    match value {
        Value::Null => EvalValue::Null,
        Value::Bool(b) => EvalValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EvalValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                EvalValue::Float(f)
            } else {
                EvalValue::Null
            }
        }
        Value::String(s) => EvalValue::Str(s.clone()),
        Value::Array(arr) => EvalValue::Array(arr.iter().map(json_to_eval).collect()),
        Value::Object(_) => EvalValue::Object(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(obj: Value) -> Request<'static> {
        Request {
            sub: "alice",
            obj,
            act: "run",
        }
    }

    fn eval(input: &str, obj: Value) -> Result<bool, AuthzError> {
        let expr = parse_condition(input)?;
        evaluate(&expr, &req(obj), &Functions::with_builtins())
    }

    #[test]
    fn test_parse_simple_comparison() {
        let expr = parse_condition("r.act == 5").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp {
                op: BinOp::Eq,
                left: Box::new(Expr::Path(vec!["r".into(), "act".into()])),
                right: Box::new(Expr::Literal(LitValue::Int(5))),
            }
        );
    }

    #[test]
    fn test_parse_single_quoted_string() {
        let expr = parse_condition("r.sub == 'alice'").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp {
                op: BinOp::Eq,
                left: Box::new(Expr::Path(vec!["r".into(), "sub".into()])),
                right: Box::new(Expr::Literal(LitValue::Str("alice".into()))),
            }
        );
    }

    #[test]
    fn test_parse_call_with_args() {
        let expr = parse_condition(r#"matchPerm(r.obj, "a1", "env=prod")"#).unwrap();
        let (name, args) = expr.as_call().unwrap();
        assert_eq!(name, "matchPerm");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_parse_parentheses() {
        let expr = parse_condition("(r.sub == 'a' || r.sub == 'b') && r.act == 'run'").unwrap();
        match expr {
            Expr::BinOp {
                op: BinOp::And,
                left,
                ..
            } => assert!(matches!(*left, Expr::BinOp { op: BinOp::Or, .. })),
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn test_evaluate_nested_object_paths() {
        let obj = json!({
            "playbook": { "name": "restart-deployment" },
            "config": { "tags": { "namespace": "default" } }
        });
        assert!(eval(
            "r.obj.playbook.name == 'restart-deployment' && r.obj.config.tags.namespace == 'default'",
            obj.clone()
        )
        .unwrap());
        assert!(!eval("r.obj.playbook.name == 'other'", obj).unwrap());
    }

    #[test]
    fn test_missing_fields_inside_a_bundle_are_null() {
        let obj = json!({ "playbook": { "name": "restart" } });
        assert!(!eval("r.obj.config.name == 'x'", obj.clone()).unwrap());
        assert!(eval("r.obj.config.name != 'x'", obj).unwrap());
    }

    #[test]
    fn test_references_object() {
        let reads = |src: &str| parse_condition(src).unwrap().references_object();
        assert!(reads("r.obj.playbook.name != 'drop-db'"));
        assert!(reads("r.sub == 'alice' && !('env' in r.obj.config.tags)"));
        assert!(reads("matchResourceSelector(r.obj, 'abc')"));
        assert!(!reads("r.sub == 'alice' || r.act == 'read'"));
        assert!(!reads("startsWith(r.sub, 'svc-')"));
    }

    #[test]
    fn test_short_circuit_guards_absence() {
        // Right side would fail on a null operand if it were evaluated.
        assert!(!eval(
            "'env' in r.obj.config.tags && r.obj.config.tags.env > 'a'",
            json!({})
        )
        .unwrap());
        assert!(eval("r.sub == 'alice' || r.obj.check.severity > 1", Value::Null).unwrap());
    }

    #[test]
    fn test_unknown_variable_is_error() {
        let err = eval("request.ip == '1'", json!({})).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidCondition(_)));
        let err = eval("r.env == '1'", json!({})).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidCondition(_)));
    }

    #[test]
    fn test_unknown_function_is_error() {
        let err = eval("nope(r.sub)", json!({})).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidCondition(_)));
    }

    #[test]
    fn test_evaluate_in_array_and_map() {
        let obj = json!({ "config": { "tags": { "env": "prod" } }, "allowed": ["alice", "bob"] });
        assert!(eval("r.sub in r.obj.allowed", obj.clone()).unwrap());
        assert!(eval("'env' in r.obj.config.tags", obj.clone()).unwrap());
        assert!(!eval("'team' in r.obj.config.tags", obj).unwrap());
    }

    #[test]
    fn test_string_functions() {
        let obj = json!({ "config": { "name": "prod-api" } });
        assert!(eval("startsWith(r.obj.config.name, 'prod-')", obj.clone()).unwrap());
        assert!(eval("endsWith(r.obj.config.name, 'api')", obj.clone()).unwrap());
        assert!(eval("contains(r.obj.config.name, 'd-a')", obj.clone()).unwrap());
        assert!(eval("glob('prod-*', r.obj.config.name)", obj.clone()).unwrap());
        assert!(!eval("glob('dev-*', r.obj.config.name)", obj).unwrap());
    }

    #[test]
    fn test_numeric_and_string_comparison() {
        let obj = json!({ "check": { "severity": 3, "name": "b" } });
        assert!(eval("r.obj.check.severity >= 3", obj.clone()).unwrap());
        assert!(eval("r.obj.check.severity < 3.5", obj.clone()).unwrap());
        assert!(eval("r.obj.check.name > 'a'", obj).unwrap());
    }

    #[test]
    fn test_custom_predicate() {
        let mut functions = Functions::with_builtins();
        functions.register("isAlice", |args| {
            Ok(EvalValue::Bool(args.first().and_then(|a| a.as_str()) == Some("alice")))
        });
        let expr = parse_condition("isAlice(r.sub)").unwrap();
        assert!(evaluate(&expr, &req(Value::Null), &functions).unwrap());
    }

    #[test]
    fn test_non_boolean_result_is_error() {
        assert!(eval("r.sub", json!({})).is_err());
    }

    #[test]
    fn test_invalid_empty_expression() {
        assert!(parse_condition("").is_err());
    }

    #[test]
    fn test_invalid_unterminated_string() {
        assert!(parse_condition(r#""hello"#).is_err());
        assert!(parse_condition("'hello").is_err());
    }
}
