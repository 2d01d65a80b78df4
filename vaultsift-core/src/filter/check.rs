//! Static type checking of resolved expressions.

use super::ast::{BinaryOp, Expr, Function, Pattern, Type, UnaryOp};
use crate::Result;
use crate::error::SiftError;

/// Checks that `expr` is well typed and evaluates to a boolean.
pub(crate) fn check_predicate(expr: &Expr) -> Result<()> {
    match type_of(expr)? {
        Type::Bool => Ok(()),
        other => Err(SiftError::filter_type(format!(
            "expression must evaluate to bool, found {}",
            other
        ))),
    }
}

fn mismatch(context: impl std::fmt::Display, expected: &str, found: &Type) -> SiftError {
    SiftError::filter_type(format!(
        "{} expects {}, found {}",
        context, expected, found
    ))
}

pub(crate) fn type_of(expr: &Expr) -> Result<Type> {
    match expr {
        Expr::Literal(literal) => Ok(literal.ty()),
        Expr::Var(variable) => Ok(variable.ty()),
        Expr::List(items) => {
            let mut element = Type::Any;
            for item in items {
                let ty = type_of(item)?;
                if element == Type::Any {
                    element = ty;
                } else if !element.accepts(&ty) {
                    return Err(SiftError::filter_type(format!(
                        "list elements must share one type, found {} and {}",
                        element, ty
                    )));
                }
            }
            Ok(Type::List(Box::new(element)))
        }
        Expr::Unary(UnaryOp::Not, operand) => match type_of(operand)? {
            Type::Bool => Ok(Type::Bool),
            other => Err(mismatch("'!'", "bool", &other)),
        },
        Expr::Unary(UnaryOp::Neg, operand) => match type_of(operand)? {
            Type::Int => Ok(Type::Int),
            other => Err(mismatch("'-'", "int", &other)),
        },
        Expr::Binary(op, left, right) => binary_type(*op, left, right),
        Expr::Call(function, args) => call_type(*function, args),
        Expr::Matches(target, pattern) => {
            let target = type_of(target)?;
            if target != Type::String {
                return Err(mismatch("'matches'", "a string receiver", &target));
            }
            if let Pattern::Dynamic(pattern) = pattern {
                let pattern = type_of(pattern)?;
                if pattern != Type::String {
                    return Err(mismatch("'matches'", "a string pattern", &pattern));
                }
            }
            Ok(Type::Bool)
        }
    }
}

fn binary_type(op: BinaryOp, left: &Expr, right: &Expr) -> Result<Type> {
    let left = type_of(left)?;
    let right = type_of(right)?;
    let context = format!("'{}'", op);

    match op {
        BinaryOp::And | BinaryOp::Or => {
            for operand in [&left, &right] {
                if *operand != Type::Bool {
                    return Err(mismatch(&context, "bool operands", operand));
                }
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            if !left.accepts(&right) {
                return Err(SiftError::filter_type(format!(
                    "cannot compare {} with {} using {}",
                    left, right, context
                )));
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordered = matches!(left, Type::Int | Type::String | Type::Timestamp);
            if !ordered || left != right {
                return Err(SiftError::filter_type(format!(
                    "cannot order {} against {} using {}",
                    left, right, context
                )));
            }
        }
        BinaryOp::In => match &right {
            Type::List(element) if element.accepts(&left) => {}
            other => {
                return Err(mismatch(&context, &format!("list({})", left), other));
            }
        },
    }

    Ok(Type::Bool)
}

fn call_type(function: Function, args: &[Expr]) -> Result<Type> {
    let types = args.iter().map(type_of).collect::<Result<Vec<_>>>()?;
    let context = format!("'{}'", function.name());

    let arity = |expected: usize| -> Result<()> {
        if types.len() == expected {
            Ok(())
        } else {
            Err(SiftError::filter_type(format!(
                "{} expects {} argument(s), found {}",
                context,
                expected,
                types.len()
            )))
        }
    };

    match function {
        Function::Contains | Function::StartsWith | Function::EndsWith => {
            arity(2)?;
            for ty in &types {
                if *ty != Type::String {
                    return Err(mismatch(&context, "string arguments", ty));
                }
            }
            Ok(Type::Bool)
        }
        Function::LowerAscii | Function::UpperAscii => {
            arity(1)?;
            if types[0] != Type::String {
                return Err(mismatch(&context, "a string receiver", &types[0]));
            }
            Ok(Type::String)
        }
        Function::Size => {
            arity(1)?;
            match &types[0] {
                Type::String | Type::List(_) => Ok(Type::Int),
                other => Err(mismatch(&context, "a string or list", other)),
            }
        }
        Function::Timestamp => {
            arity(1)?;
            if types[0] != Type::String {
                return Err(mismatch(&context, "a string", &types[0]));
            }
            Ok(Type::Timestamp)
        }
    }
}
