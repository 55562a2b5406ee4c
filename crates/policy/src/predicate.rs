//! Row predicates.
//!
//! A predicate is the boolean expression of a `USING (...)` or
//! `WITH CHECK (...)` clause. Expressions are parsed once, when the policy is
//! built, and compiled into a small [`Node`] tree that is evaluated per row
//! with SQL three-valued logic: only a definite `true` passes, `NULL` and
//! `false` do not.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value as SqlValue};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use storage::Row;

use crate::{Error, Principal, Result};

/// Signature of a predicate implemented in Rust.
pub type NativePredicate =
    dyn Fn(&Row, &Principal) -> std::result::Result<bool, String> + Send + Sync;

/// A compiled row predicate. Cloning is cheap.
#[derive(Clone)]
pub struct Predicate {
    source: Arc<str>,
    body: Body,
}

#[derive(Clone)]
enum Body {
    Expr(Arc<Node>),
    Native(Arc<NativePredicate>),
}

impl Predicate {
    /// Parse and compile a SQL boolean expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidPredicate {
            expr: expr.to_string(),
            reason,
        };

        let dialect = PostgreSqlDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(expr)
            .map_err(|e| invalid(e.to_string()))?;
        let ast = parser.parse_expr().map_err(|e| invalid(e.to_string()))?;

        let trailing = parser.next_token();
        if trailing.token != Token::EOF {
            return Err(invalid(format!("unexpected trailing input '{}'", trailing.token)));
        }

        let node = compile(&ast).map_err(invalid)?;
        Ok(Self {
            source: Arc::from(expr.trim()),
            body: Body::Expr(Arc::new(node)),
        })
    }

    /// The always-true predicate, `USING (true)`.
    pub fn always() -> Self {
        Self {
            source: Arc::from("true"),
            body: Body::Expr(Arc::new(Node::Literal(Value::Bool(true)))),
        }
    }

    /// The always-false predicate.
    pub fn never() -> Self {
        Self {
            source: Arc::from("false"),
            body: Body::Expr(Arc::new(Node::Literal(Value::Bool(false)))),
        }
    }

    /// Wrap a Rust closure as a predicate. `label` is what listings show.
    pub fn from_fn<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Row, &Principal) -> std::result::Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            source: Arc::from(label.into()),
            body: Body::Native(Arc::new(f)),
        }
    }

    /// The expression text (or the label of a native predicate).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Columns the expression reads. Native predicates report none.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        if let Body::Expr(node) = &self.body {
            node.collect_columns(&mut columns);
        }
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    /// Evaluate against a row on behalf of `principal`.
    ///
    /// `Ok(false)` covers both `false` and `NULL`. `Err` means the predicate
    /// itself is broken for this input and must not be read as a decision.
    pub fn evaluate(&self, row: &Row, principal: &Principal) -> std::result::Result<bool, String> {
        match &self.body {
            Body::Expr(node) => match node.eval(row, principal)? {
                Value::Bool(b) => Ok(b),
                Value::Null => Ok(false),
                other => Err(format!("predicate yielded non-boolean value {other}")),
            },
            Body::Native(f) => f(row, principal),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.source).finish()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiled expression tree. `Value::Null` stands for SQL `NULL`.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Column(String),
    Principal,
    Not(Box<Node>),
    Binary {
        op: BinOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    IsNull {
        node: Box<Node>,
        negated: bool,
    },
    IsBool {
        node: Box<Node>,
        value: bool,
        negated: bool,
    },
    InList {
        node: Box<Node>,
        list: Vec<Node>,
        negated: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

fn compile(expr: &Expr) -> std::result::Result<Node, String> {
    match expr {
        Expr::Identifier(ident) => Ok(Node::Column(ident.value.clone())),
        // `authentication.user_id` names the column of the row under test.
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| Node::Column(ident.value.clone()))
            .ok_or_else(|| "empty identifier".to_string()),
        Expr::Value(value) => literal(value).map(Node::Literal),
        Expr::Nested(inner) => compile(inner),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => Ok(Node::Not(Box::new(compile(expr)?))),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match compile(expr)? {
            Node::Literal(Value::Number(n)) => negate(&n).map(Node::Literal),
            _ => Err(format!("unary minus is only supported on numbers: `{expr}`")),
        },
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::And => BinOp::And,
                BinaryOperator::Or => BinOp::Or,
                BinaryOperator::Eq => BinOp::Eq,
                BinaryOperator::NotEq => BinOp::NotEq,
                BinaryOperator::Lt => BinOp::Lt,
                BinaryOperator::LtEq => BinOp::LtEq,
                BinaryOperator::Gt => BinOp::Gt,
                BinaryOperator::GtEq => BinOp::GtEq,
                other => return Err(format!("unsupported operator `{other}`")),
            };
            Ok(Node::Binary {
                op,
                left: Box::new(compile(left)?),
                right: Box::new(compile(right)?),
            })
        }
        Expr::IsNull(inner) => is_null(inner, false),
        Expr::IsNotNull(inner) => is_null(inner, true),
        Expr::IsTrue(inner) => is_bool(inner, true, false),
        Expr::IsNotTrue(inner) => is_bool(inner, true, true),
        Expr::IsFalse(inner) => is_bool(inner, false, false),
        Expr::IsNotFalse(inner) => is_bool(inner, false, true),
        Expr::InList {
            expr,
            list,
            negated,
        } => Ok(Node::InList {
            node: Box::new(compile(expr)?),
            list: list.iter().map(compile).collect::<std::result::Result<_, _>>()?,
            negated: *negated,
        }),
        Expr::Function(function) => {
            let name = function.name.to_string().to_ascii_lowercase();
            match name.as_str() {
                "current_principal" | "current_user" | "auth.uid" => Ok(Node::Principal),
                _ => Err(format!("unsupported function `{name}`")),
            }
        }
        other => Err(format!("unsupported expression `{other}`")),
    }
}

fn is_null(inner: &Expr, negated: bool) -> std::result::Result<Node, String> {
    Ok(Node::IsNull {
        node: Box::new(compile(inner)?),
        negated,
    })
}

fn is_bool(inner: &Expr, value: bool, negated: bool) -> std::result::Result<Node, String> {
    Ok(Node::IsBool {
        node: Box::new(compile(inner)?),
        value,
        negated,
    })
}

fn literal(value: &SqlValue) -> std::result::Result<Value, String> {
    match value {
        SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
        SqlValue::Null => Ok(Value::Null),
        SqlValue::SingleQuotedString(s) => Ok(Value::String(s.clone())),
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                return Ok(Value::Number(i.into()));
            }
            n.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("invalid number literal `{n}`"))
        }
        other => Err(format!("unsupported literal `{other}`")),
    }
}

fn negate(n: &Number) -> std::result::Result<Value, String> {
    if let Some(i) = n.as_i64().and_then(i64::checked_neg) {
        return Ok(Value::Number(i.into()));
    }
    n.as_f64()
        .and_then(|f| Number::from_f64(-f))
        .map(Value::Number)
        .ok_or_else(|| format!("cannot negate {n}"))
}

impl Node {
    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Node::Column(name) => out.push(name),
            Node::Literal(_) | Node::Principal => {}
            Node::Not(node) | Node::IsNull { node, .. } | Node::IsBool { node, .. } => {
                node.collect_columns(out)
            }
            Node::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Node::InList { node, list, .. } => {
                node.collect_columns(out);
                for item in list {
                    item.collect_columns(out);
                }
            }
        }
    }

    fn eval(&self, row: &Row, principal: &Principal) -> std::result::Result<Value, String> {
        match self {
            Node::Literal(value) => Ok(value.clone()),
            // A column the row does not carry reads as NULL.
            Node::Column(name) => Ok(row.get(name).cloned().unwrap_or(Value::Null)),
            Node::Principal => Ok(Value::String(principal.as_str().to_string())),
            Node::Not(node) => Ok(match truth(&node.eval(row, principal)?)? {
                Some(b) => Value::Bool(!b),
                None => Value::Null,
            }),
            Node::Binary { op, left, right } => {
                let left = left.eval(row, principal)?;
                let right = right.eval(row, principal)?;
                binary(*op, &left, &right)
            }
            Node::IsNull { node, negated } => {
                Ok(Value::Bool(node.eval(row, principal)?.is_null() != *negated))
            }
            Node::IsBool {
                node,
                value,
                negated,
            } => {
                let matches = truth(&node.eval(row, principal)?)? == Some(*value);
                Ok(Value::Bool(matches != *negated))
            }
            Node::InList {
                node,
                list,
                negated,
            } => {
                let needle = node.eval(row, principal)?;
                let mut saw_null = needle.is_null();
                let mut found = false;
                for item in list {
                    let item = item.eval(row, principal)?;
                    match compare(&needle, &item)? {
                        Some(Ordering::Equal) => found = true,
                        Some(_) => {}
                        None => saw_null = true,
                    }
                }
                Ok(match (found, saw_null) {
                    (true, _) => Value::Bool(!*negated),
                    (false, true) => Value::Null,
                    (false, false) => Value::Bool(*negated),
                })
            }
        }
    }
}

/// SQL truth value of a boolean-typed operand.
fn truth(value: &Value) -> std::result::Result<Option<bool>, String> {
    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(format!("expected a boolean, found {other}")),
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> std::result::Result<Value, String> {
    match op {
        BinOp::And => {
            let (l, r) = (truth(left)?, truth(right)?);
            Ok(match (l, r) {
                (Some(false), _) | (_, Some(false)) => Value::Bool(false),
                (Some(true), Some(true)) => Value::Bool(true),
                _ => Value::Null,
            })
        }
        BinOp::Or => {
            let (l, r) = (truth(left)?, truth(right)?);
            Ok(match (l, r) {
                (Some(true), _) | (_, Some(true)) => Value::Bool(true),
                (Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            })
        }
        _ => {
            let Some(ordering) = compare(left, right)? else {
                return Ok(Value::Null);
            };
            let result = match op {
                BinOp::Eq => ordering == Ordering::Equal,
                BinOp::NotEq => ordering != Ordering::Equal,
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::LtEq => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                BinOp::GtEq => ordering != Ordering::Less,
                BinOp::And | BinOp::Or => unreachable!("logical operators handled above"),
            };
            Ok(Value::Bool(result))
        }
    }
}

/// Order two scalar values. `None` when either side is NULL.
fn compare(left: &Value, right: &Value) -> std::result::Result<Option<Ordering>, String> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(None),
        (Value::String(l), Value::String(r)) => Ok(Some(l.cmp(r))),
        (Value::Bool(l), Value::Bool(r)) => Ok(Some(l.cmp(r))),
        (Value::Number(l), Value::Number(r)) => {
            if let (Some(l), Some(r)) = (l.as_i64(), r.as_i64()) {
                return Ok(Some(l.cmp(&r)));
            }
            let (l, r) = (l.as_f64(), r.as_f64());
            match (l, r) {
                (Some(l), Some(r)) => l
                    .partial_cmp(&r)
                    .map(Some)
                    .ok_or_else(|| "cannot order NaN".to_string()),
                _ => Err("number out of range".to_string()),
            }
        }
        (l, r) => Err(format!("cannot compare {} with {}", type_name(l), type_name(r))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
