//! Syntax tree and type vocabulary for filter expressions.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;

/// Variables bound for every item during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    Id,
    FolderParentId,
    Name,
    Username,
    Uri,
    Password,
    Description,
    CreatedTimestamp,
    ModifiedTimestamp,
}

impl Variable {
    /// Every variable in schema order
    pub const ALL: [Variable; 9] = [
        Variable::Id,
        Variable::FolderParentId,
        Variable::Name,
        Variable::Username,
        Variable::Uri,
        Variable::Password,
        Variable::Description,
        Variable::CreatedTimestamp,
        Variable::ModifiedTimestamp,
    ];

    /// The identifier used in expression text
    pub fn name(self) -> &'static str {
        match self {
            Variable::Id => "ID",
            Variable::FolderParentId => "FolderParentID",
            Variable::Name => "Name",
            Variable::Username => "Username",
            Variable::Uri => "URI",
            Variable::Password => "Password",
            Variable::Description => "Description",
            Variable::CreatedTimestamp => "CreatedTimestamp",
            Variable::ModifiedTimestamp => "ModifiedTimestamp",
        }
    }

    /// Looks up a variable by its exact, case-sensitive name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|variable| variable.name() == name)
    }

    /// True for variables only populated by secret decryption
    pub fn is_secret(self) -> bool {
        matches!(self, Variable::Password | Variable::Description)
    }

    pub(crate) fn ty(self) -> Type {
        match self {
            Variable::CreatedTimestamp | Variable::ModifiedTimestamp => Type::Timestamp,
            _ => Type::String,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static type of a sub-expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Type {
    Bool,
    Int,
    String,
    Timestamp,
    List(Box<Type>),
    /// Element type of an empty list literal
    Any,
}

impl Type {
    /// True when a value of `self` may stand where `other` is expected
    pub(crate) fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Any, _) | (_, Type::Any) => true,
            (Type::List(a), Type::List(b)) => a.accepts(b),
            _ => self == other,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => f.write_str("bool"),
            Type::Int => f.write_str("int"),
            Type::String => f.write_str("string"),
            Type::Timestamp => f.write_str("timestamp"),
            Type::List(element) => write!(f, "list({})", element),
            Type::Any => f.write_str("dyn"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Bool(bool),
    Int(i64),
    Str(String),
    Timestamp(DateTime<Utc>),
}

impl Literal {
    pub(crate) fn ty(&self) -> Type {
        match self {
            Literal::Bool(_) => Type::Bool,
            Literal::Int(_) => Type::Int,
            Literal::Str(_) => Type::String,
            Literal::Timestamp(_) => Type::Timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
        };
        f.write_str(symbol)
    }
}

/// Built-in functions. Receiver-style calls store the receiver as the
/// first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Contains,
    StartsWith,
    EndsWith,
    LowerAscii,
    UpperAscii,
    Size,
    Timestamp,
}

impl Function {
    pub(crate) fn method(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(Function::Contains),
            "startsWith" => Some(Function::StartsWith),
            "endsWith" => Some(Function::EndsWith),
            "lowerAscii" => Some(Function::LowerAscii),
            "upperAscii" => Some(Function::UpperAscii),
            "size" => Some(Function::Size),
            _ => None,
        }
    }

    pub(crate) fn global(name: &str) -> Option<Self> {
        match name {
            "size" => Some(Function::Size),
            "timestamp" => Some(Function::Timestamp),
            _ => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Function::Contains => "contains",
            Function::StartsWith => "startsWith",
            Function::EndsWith => "endsWith",
            Function::LowerAscii => "lowerAscii",
            Function::UpperAscii => "upperAscii",
            Function::Size => "size",
            Function::Timestamp => "timestamp",
        }
    }
}

/// Right-hand side of `matches`.
#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    /// Literal pattern compiled while parsing
    Compiled(Regex),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    Var(Variable),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
    Matches(Box<Expr>, Pattern),
}

impl Expr {
    /// Calls `visit` for every variable reference in the tree.
    pub(crate) fn for_each_variable(&self, visit: &mut impl FnMut(Variable)) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(variable) => visit(*variable),
            Expr::List(items) | Expr::Call(_, items) => {
                for item in items {
                    item.for_each_variable(visit);
                }
            }
            Expr::Unary(_, operand) => operand.for_each_variable(visit),
            Expr::Binary(_, left, right) => {
                left.for_each_variable(visit);
                right.for_each_variable(visit);
            }
            Expr::Matches(target, pattern) => {
                target.for_each_variable(visit);
                if let Pattern::Dynamic(pattern) = pattern {
                    pattern.for_each_variable(visit);
                }
            }
        }
    }
}
