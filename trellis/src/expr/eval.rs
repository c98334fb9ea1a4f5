//! Built-in minimal evaluator.
//!
//! Covers exactly the surface the scheduler depends on: literals, capability
//! calls, `.field` / `[index]` access, comparison and boolean operators, and
//! `{{ ... }}` interpolation spans. Mustache sections are preserved verbatim
//! for downstream template glue.

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::app_error::{AppCode, AppError};
use crate::expr::capability::{Capabilities, ItemField, StorageTarget};
use crate::expr::{ExprKind, Expression};

/// Truthiness used by skip conditions, preflight checks, `onError.when`, and
/// `apiResponse.success`: `false`, `null`, `0`, `""`, and empty arrays/objects
/// are falsy; everything else is truthy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// True when the text parses as a single expression whose root is not a bare literal.
pub(crate) fn parses_as_direct(s: &str) -> bool {
    match Parser::parse_full(s) {
        Ok(ast) => !matches!(ast, Ast::Str(_) | Ast::Num(_) | Ast::Bool(_) | Ast::Null),
        Err(_) => false,
    }
}

/// True when the text opens with a capability call (`get(`, `output(`, ...),
/// even if the rest is malformed. Such text is Direct so that evaluation
/// reports the parse error instead of silently treating it as literal prose.
pub(crate) fn looks_like_call(s: &str) -> bool {
    let t = s.trim_start_matches(['!', '(', ' ']);
    const CAPS: [&str; 9] = [
        "get", "set", "file", "info", "input", "output", "item", "session", "env",
    ];
    CAPS.iter()
        .any(|c| t.strip_prefix(c).map(|rest| rest.trim_start().starts_with('(')) == Some(true))
}

/// Evaluates expressions against a [`Capabilities`] implementation.
///
/// Stateless; the per-request state lives behind the capability set.
#[derive(Debug, Default, Clone, Copy)]
pub struct Evaluator;

impl Evaluator {
    /// Evaluates one expression according to its [`ExprKind`].
    ///
    /// Literals evaluate to their own text, interpolated text to the text with
    /// `{{ ... }}` spans replaced, mustache text to itself (preserved), and
    /// direct expressions to their value.
    pub async fn eval(
        &self,
        expr: &Expression,
        caps: &dyn Capabilities,
    ) -> Result<Value, AppError> {
        match expr.kind() {
            ExprKind::Literal | ExprKind::Mustache => {
                Ok(Value::String(expr.as_str().to_string()))
            }
            ExprKind::Interpolated => {
                let s = interpolate(expr.as_str(), caps).await?;
                Ok(Value::String(s))
            }
            ExprKind::Direct => {
                let ast = Parser::parse_full(expr.as_str())
                    .map_err(|msg| expr_error(expr.as_str(), msg))?;
                eval_ast(&ast, caps)
                    .await
                    .map_err(|e| attach_source(e, expr.as_str()))
            }
        }
    }

    /// Evaluates an expression and reduces it to truthiness.
    pub async fn eval_truthy(
        &self,
        expr: &Expression,
        caps: &dyn Capabilities,
    ) -> Result<bool, AppError> {
        // A literal is its own text; "false"/"" stay falsy via the string rules.
        let v = match expr.kind() {
            ExprKind::Literal => match expr.as_str().trim() {
                "true" => Value::Bool(true),
                "false" | "" => Value::Bool(false),
                other => Value::String(other.to_string()),
            },
            _ => self.eval(expr, caps).await?,
        };
        Ok(truthy(&v))
    }
}

/// Replaces every `{{ expr }}` span in `text` with the stringified value of the
/// inner expression. Strings render bare; other values render as JSON.
pub async fn interpolate(text: &str, caps: &dyn Capabilities) -> Result<String, AppError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(expr_error(text, "unterminated '{{' span".to_string()));
        };
        let inner = &after[..end];
        let ast =
            Parser::parse_full(inner).map_err(|msg| expr_error(inner, msg))?;
        let value = eval_ast(&ast, caps)
            .await
            .map_err(|e| attach_source(e, inner))?;
        out.push_str(&render(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn expr_error(source: &str, message: String) -> AppError {
    AppError::new(AppCode::ExpressionError, message).with_details("expr", source.to_string())
}

fn attach_source(e: AppError, source: &str) -> AppError {
    if e.detail("expr").is_some() {
        e
    } else {
        e.with_details("expr", source.to_string())
    }
}

// ---------------------------------------------------------------------------
// Syntax
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Call { name: String, args: Vec<Ast> },
    Field(Box<Ast>, String),
    Index(Box<Ast>, Box<Ast>),
    Not(Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Punct(&'static str),
}

fn tokenize(s: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                let quote = c;
                let mut out = String::new();
                i += 1;
                loop {
                    if i >= chars.len() {
                        return Err(format!("unterminated string starting with {}", quote));
                    }
                    let ch = chars[i];
                    if ch == quote {
                        i += 1;
                        break;
                    }
                    if ch == '\\' && i + 1 < chars.len() {
                        i += 1;
                        out.push(chars[i]);
                    } else {
                        out.push(ch);
                    }
                    i += 1;
                }
                tokens.push(Token::Str(out));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| format!("bad number {}", text))?;
                tokens.push(Token::Num(n));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Punct("=="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Punct("!="));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Punct("!"));
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Punct("<="));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Punct("<"));
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Punct(">="));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Punct(">"));
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Punct("&&"));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Punct("||"));
                i += 2;
            }
            '(' | ')' | '[' | ']' | ',' | '.' => {
                let p = match c {
                    '(' => "(",
                    ')' => ")",
                    '[' => "[",
                    ']' => "]",
                    ',' => ",",
                    _ => ".",
                };
                tokens.push(Token::Punct(p));
                i += 1;
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parses the whole input as one expression; trailing tokens are an error.
    fn parse_full(s: &str) -> Result<Ast, String> {
        let mut p = Parser {
            tokens: tokenize(s)?,
            pos: 0,
        };
        if p.tokens.is_empty() {
            return Err("empty expression".to_string());
        }
        let ast = p.parse_or()?;
        if p.pos != p.tokens.len() {
            return Err("trailing input after expression".to_string());
        }
        Ok(ast)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(q)) if *q == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            let right = self.parse_and()?;
            left = Ast::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_cmp()?;
        while self.eat_punct("&&") {
            let right = self.parse_cmp()?;
            left = Ast::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Ast, String> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Punct("==")) => BinOp::Eq,
            Some(Token::Punct("!=")) => BinOp::Ne,
            Some(Token::Punct("<")) => BinOp::Lt,
            Some(Token::Punct("<=")) => BinOp::Le,
            Some(Token::Punct(">")) => BinOp::Gt,
            Some(Token::Punct(">=")) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_unary()?;
        Ok(Ast::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_unary(&mut self) -> Result<Ast, String> {
        if self.eat_punct("!") {
            let inner = self.parse_unary()?;
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Ast, String> {
        let mut base = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                match self.peek().cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        base = Ast::Field(Box::new(base), name);
                    }
                    _ => return Err("expected field name after '.'".to_string()),
                }
            } else if self.eat_punct("[") {
                let idx = self.parse_or()?;
                if !self.eat_punct("]") {
                    return Err("expected ']'".to_string());
                }
                base = Ast::Index(Box::new(base), Box::new(idx));
            } else {
                return Ok(base);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Ast, String> {
        match self.peek().cloned() {
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Ast::Str(s))
            }
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(Ast::Num(n))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "true" => return Ok(Ast::Bool(true)),
                    "false" => return Ok(Ast::Bool(false)),
                    "null" => return Ok(Ast::Null),
                    _ => {}
                }
                if !self.eat_punct("(") {
                    return Err(format!("bare identifier '{}'", name));
                }
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.parse_or()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        if !self.eat_punct(",") {
                            return Err("expected ',' or ')'".to_string());
                        }
                    }
                }
                Ok(Ast::Call { name, args })
            }
            Some(Token::Punct("(")) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if !self.eat_punct(")") {
                    return Err("expected ')'".to_string());
                }
                Ok(inner)
            }
            other => Err(format!("unexpected token {:?}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval_ast<'a>(
    ast: &'a Ast,
    caps: &'a dyn Capabilities,
) -> BoxFuture<'a, Result<Value, AppError>> {
    Box::pin(async move {
        match ast {
            Ast::Str(s) => Ok(Value::String(s.clone())),
            Ast::Num(n) => Ok(json_number(*n)),
            Ast::Bool(b) => Ok(Value::Bool(*b)),
            Ast::Null => Ok(Value::Null),
            Ast::Not(inner) => {
                let v = eval_ast(inner, caps).await?;
                Ok(Value::Bool(!truthy(&v)))
            }
            Ast::Field(base, name) => {
                let v = eval_ast(base, caps).await?;
                Ok(v.get(name).cloned().unwrap_or(Value::Null))
            }
            Ast::Index(base, idx) => {
                let v = eval_ast(base, caps).await?;
                let i = eval_ast(idx, caps).await?;
                let picked = match (&v, &i) {
                    (Value::Array(a), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|u| a.get(u as usize))
                        .cloned(),
                    (Value::Object(o), Value::String(k)) => o.get(k).cloned(),
                    _ => None,
                };
                Ok(picked.unwrap_or(Value::Null))
            }
            Ast::Binary(op, l, r) => eval_binary(*op, l, r, caps).await,
            Ast::Call { name, args } => eval_call(name, args, caps).await,
        }
    })
}

async fn eval_binary(
    op: BinOp,
    l: &Ast,
    r: &Ast,
    caps: &dyn Capabilities,
) -> Result<Value, AppError> {
    match op {
        BinOp::And => {
            let lv = eval_ast(l, caps).await?;
            if !truthy(&lv) {
                return Ok(Value::Bool(false));
            }
            let rv = eval_ast(r, caps).await?;
            Ok(Value::Bool(truthy(&rv)))
        }
        BinOp::Or => {
            let lv = eval_ast(l, caps).await?;
            if truthy(&lv) {
                return Ok(Value::Bool(true));
            }
            let rv = eval_ast(r, caps).await?;
            Ok(Value::Bool(truthy(&rv)))
        }
        _ => {
            let lv = eval_ast(l, caps).await?;
            let rv = eval_ast(r, caps).await?;
            let out = match op {
                BinOp::Eq => values_equal(&lv, &rv),
                BinOp::Ne => !values_equal(&lv, &rv),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let ord = compare(&lv, &rv).ok_or_else(|| {
                        AppError::new(
                            AppCode::ExpressionError,
                            format!("cannot order {} against {}", type_name(&lv), type_name(&rv)),
                        )
                    })?;
                    match op {
                        BinOp::Lt => ord.is_lt(),
                        BinOp::Le => ord.is_le(),
                        BinOp::Gt => ord.is_gt(),
                        _ => ord.is_ge(),
                    }
                }
                BinOp::And | BinOp::Or => unreachable!(),
            };
            Ok(Value::Bool(out))
        }
    }
}

async fn eval_call(
    name: &str,
    args: &[Ast],
    caps: &dyn Capabilities,
) -> Result<Value, AppError> {
    // Arguments evaluate left to right before dispatch.
    let mut values = Vec::with_capacity(args.len());
    for a in args {
        values.push(eval_ast(a, caps).await?);
    }
    let arg_str = |i: usize| -> Option<String> {
        values.get(i).map(|v| match v {
            Value::String(s) => s.clone(),
            other => render(other),
        })
    };
    match name {
        "get" => {
            let key = require_arg(name, arg_str(0))?;
            caps.get(&key, arg_str(1).as_deref()).await
        }
        "set" => {
            let key = require_arg(name, arg_str(0))?;
            let value = values.get(1).cloned().unwrap_or(Value::Null);
            let target = arg_str(2)
                .map(|s| StorageTarget::from_name(&s))
                .unwrap_or_default();
            caps.set(&key, value, target).await?;
            Ok(Value::Null)
        }
        "file" => {
            let pattern = require_arg(name, arg_str(0))?;
            caps.file(&pattern, arg_str(1).as_deref()).await
        }
        "info" => {
            let field = require_arg(name, arg_str(0))?;
            caps.info(&field).await
        }
        "input" => {
            let key = require_arg(name, arg_str(0))?;
            caps.input(&key, arg_str(1).as_deref()).await
        }
        "output" => {
            let id = require_arg(name, arg_str(0))?;
            caps.output(&id).await
        }
        "item" => {
            let which = arg_str(0)
                .map(|s| ItemField::from_name(&s))
                .unwrap_or_default();
            caps.item(which).await
        }
        "session" => caps.session().await,
        "env" => {
            let key = require_arg(name, arg_str(0))?;
            caps.env(&key).await
        }
        other => Err(AppError::new(
            AppCode::ExpressionError,
            format!("unknown function '{}'", other),
        )),
    }
}

fn require_arg(func: &str, arg: Option<String>) -> Result<String, AppError> {
    arg.ok_or_else(|| {
        AppError::new(
            AppCode::ExpressionError,
            format!("'{}' requires an argument", func),
        )
    })
}

fn json_number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Equality with numeric coercion: `1 == 1.0` holds; other types compare structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            x.partial_cmp(&y)
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
