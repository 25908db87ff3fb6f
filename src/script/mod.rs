//! Restricted expression language for row filters and derived columns.
//!
//! Scripts see exactly one object, the row variable `r`, plus the functions in
//! the capability table ([`FUNCTIONS`]). There are no loops, no I/O and no way
//! to reach anything outside the current row, so every evaluation terminates.
//!
//! ```text
//! filter:   r.au >= 0.3 && r.domain != "waste"
//! derived:  let eq = r.au + 0.012 * (r.ag ?? 0)
//!           r.aueq = round(eq, 3)
//!           if r.aueq > 1 { r.class = "high" } else { r.class = "low" }
//!           category("class")
//! ```
//!
//! Compilation resolves every field name to a slot in the pass's
//! [`RowLayout`](crate::row::RowLayout), so evaluation never hashes names.

mod builtins;
mod interp;
mod lexer;
mod parser;

use crate::row::RowLayout;
use crate::schema::ColumnType;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub use builtins::FUNCTIONS;

/// Name of the implicit row variable.
pub const ROW_VARIABLE: &str = "r";

/// A script is rejected before the pass reads any row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct CompileError {
    pub message: String,
    pub offset: usize,
}

impl CompileError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// Evaluation of one row failed; the pass carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RuntimeError(pub String);

/// A field value as seen by scripts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Num(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numbers as-is, numeric text parsed; everything else is not a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Text(t) => t.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(t) => !t.is_empty(),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Text(t) => write!(f, "{t}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Lit(Value),
    Field(usize),
    Local(usize),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(&'static builtins::Builtin, Vec<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    SetLocal(usize, Expr),
    SetField(usize, Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    Eval(Expr),
}

/// A compiled boolean row predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    expr: Expr,
}

impl Filter {
    pub fn compile(src: &str, layout: &mut RowLayout) -> Result<Self, CompileError> {
        let mut p = parser::Parser::new(src, layout)?;
        let expr = p.filter()?;
        Ok(Self { expr })
    }

    /// `Ok(true)` admits the row.
    pub fn eval(&self, row: &[Value]) -> Result<bool, RuntimeError> {
        Ok(interp::eval(&self.expr, row, &[])?.truthy())
    }
}

/// A compiled derived-column script.
#[derive(Debug, Clone)]
pub struct Script {
    body: Vec<Stmt>,
    locals: usize,
    assigned: Vec<usize>,
    hints: Vec<(String, ColumnType)>,
}

impl Script {
    pub fn compile(src: &str, layout: &mut RowLayout) -> Result<Self, CompileError> {
        let mut p = parser::Parser::new(src, layout)?;
        let body = p.program()?;
        let out = p.finish();
        Ok(Self {
            body,
            locals: out.locals,
            assigned: out.assigned,
            hints: out.hints,
        })
    }

    /// Run against one row. On error, fields written before the failure keep
    /// their values.
    pub fn run(&self, row: &mut [Value]) -> Result<(), RuntimeError> {
        let mut locals = vec![Value::Null; self.locals];
        interp::exec(&self.body, row, &mut locals)
    }

    /// Slots this script may write, in first-assignment order.
    pub fn assigned(&self) -> &[usize] {
        &self.assigned
    }

    /// Types registered with `numeric("…")` / `category("…")`.
    pub fn hints(&self) -> &[(String, ColumnType)] {
        &self.hints
    }
}
