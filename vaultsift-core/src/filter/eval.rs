//! Evaluation of checked expressions against a decrypted item.
//!
//! Evaluation only borrows the item. String values point into the item's
//! fields whenever possible so secret material is not copied around.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::borrow::Cow;
use std::cmp::Ordering;

use super::ast::{BinaryOp, Expr, Function, Literal, Pattern, UnaryOp, Variable};
use super::parser::parse_timestamp;
use crate::Result;
use crate::error::SiftError;
use crate::models::DecryptedItem;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value<'a> {
    Bool(bool),
    Int(i64),
    Str(Cow<'a, str>),
    Timestamp(DateTime<Utc>),
    List(Vec<Value<'a>>),
}

impl Value<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
        }
    }
}

fn unexpected(expected: &str, found: &Value<'_>) -> SiftError {
    SiftError::filter_evaluation(format!("expected {}, found {}", expected, found.kind()))
}

/// Describes a dynamic pattern failure without quoting the pattern, which
/// may be a decrypted secret.
fn dynamic_regex_error(error: regex::Error) -> SiftError {
    let message = match error {
        regex::Error::Syntax(_) => "invalid regular expression in dynamic pattern",
        regex::Error::CompiledTooBig(_) => "dynamic pattern exceeds the regex size limit",
        _ => "dynamic pattern could not be compiled",
    };
    SiftError::filter_evaluation(message)
}

fn bind<'a>(variable: Variable, item: &'a DecryptedItem) -> Value<'a> {
    match variable {
        Variable::Id => Value::Str(Cow::Borrowed(item.id())),
        Variable::FolderParentId => Value::Str(Cow::Borrowed(item.folder_parent_id())),
        Variable::Name => Value::Str(Cow::Borrowed(item.name())),
        Variable::Username => Value::Str(Cow::Borrowed(item.username())),
        Variable::Uri => Value::Str(Cow::Borrowed(item.uri())),
        Variable::Password => Value::Str(Cow::Borrowed(item.password())),
        Variable::Description => Value::Str(Cow::Borrowed(item.description())),
        Variable::CreatedTimestamp => Value::Timestamp(item.created()),
        Variable::ModifiedTimestamp => Value::Timestamp(item.modified()),
    }
}

fn literal(literal: &Literal) -> Value<'_> {
    match literal {
        Literal::Bool(value) => Value::Bool(*value),
        Literal::Int(value) => Value::Int(*value),
        Literal::Str(value) => Value::Str(Cow::Borrowed(value)),
        Literal::Timestamp(value) => Value::Timestamp(*value),
    }
}

/// Evaluates `expr` as a predicate over `item`.
pub(crate) fn evaluate_predicate(expr: &Expr, item: &DecryptedItem) -> Result<bool> {
    truthy(evaluate(expr, item)?)
}

fn truthy(value: Value<'_>) -> Result<bool> {
    match value {
        Value::Bool(value) => Ok(value),
        other => Err(unexpected("bool", &other)),
    }
}

fn string(value: Value<'_>) -> Result<Cow<'_, str>> {
    match value {
        Value::Str(value) => Ok(value),
        other => Err(unexpected("string", &other)),
    }
}

pub(crate) fn evaluate<'a>(expr: &'a Expr, item: &'a DecryptedItem) -> Result<Value<'a>> {
    match expr {
        Expr::Literal(value) => Ok(literal(value)),
        Expr::Var(variable) => Ok(bind(*variable, item)),
        Expr::List(items) => items
            .iter()
            .map(|element| evaluate(element, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!truthy(evaluate(operand, item)?)?)),
        Expr::Unary(UnaryOp::Neg, operand) => match evaluate(operand, item)? {
            Value::Int(value) => value
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| SiftError::filter_evaluation("integer overflow in negation")),
            other => Err(unexpected("int", &other)),
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            if !truthy(evaluate(left, item)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(evaluate(right, item)?)?))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if truthy(evaluate(left, item)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(evaluate(right, item)?)?))
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, item)?;
            let right = evaluate(right, item)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
        Expr::Call(function, args) => call(*function, args, item),
        Expr::Matches(target, pattern) => {
            let target = string(evaluate(target, item)?)?;
            let matched = match pattern {
                Pattern::Compiled(regex) => regex.is_match(&target),
                Pattern::Dynamic(pattern) => {
                    let pattern = string(evaluate(pattern, item)?)?;
                    let regex = Regex::new(&pattern).map_err(dynamic_regex_error)?;
                    regex.is_match(&target)
                }
            };
            Ok(Value::Bool(matched))
        }
    }
}

fn compare(op: BinaryOp, left: &Value<'_>, right: &Value<'_>) -> Result<bool> {
    match op {
        BinaryOp::Eq => Ok(left == right),
        BinaryOp::Ne => Ok(left != right),
        BinaryOp::In => match right {
            Value::List(elements) => Ok(elements.contains(left)),
            other => Err(unexpected("list", other)),
        },
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
                _ => {
                    return Err(SiftError::filter_evaluation(format!(
                        "cannot order {} against {}",
                        left.kind(),
                        right.kind()
                    )));
                }
            };
            Ok(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        BinaryOp::And | BinaryOp::Or => {
            Ok(truthy(left.clone())? && truthy(right.clone())?)
        }
    }
}

fn call<'a>(function: Function, args: &'a [Expr], item: &'a DecryptedItem) -> Result<Value<'a>> {
    let mut values = args
        .iter()
        .map(|arg| evaluate(arg, item))
        .collect::<Result<Vec<_>>>()?
        .into_iter();
    let mut next = || {
        values.next().ok_or_else(|| {
            SiftError::filter_evaluation(format!("missing argument to '{}'", function.name()))
        })
    };

    match function {
        Function::Contains | Function::StartsWith | Function::EndsWith => {
            let receiver = string(next()?)?;
            let needle = string(next()?)?;
            let result = match function {
                Function::Contains => receiver.contains(needle.as_ref()),
                Function::StartsWith => receiver.starts_with(needle.as_ref()),
                _ => receiver.ends_with(needle.as_ref()),
            };
            Ok(Value::Bool(result))
        }
        Function::LowerAscii => Ok(Value::Str(Cow::Owned(
            string(next()?)?.to_ascii_lowercase(),
        ))),
        Function::UpperAscii => Ok(Value::Str(Cow::Owned(
            string(next()?)?.to_ascii_uppercase(),
        ))),
        Function::Size => {
            let size = match next()? {
                Value::Str(value) => value.chars().count(),
                Value::List(elements) => elements.len(),
                other => return Err(unexpected("string or list", &other)),
            };
            i64::try_from(size)
                .map(Value::Int)
                .map_err(|_| SiftError::filter_evaluation("size exceeds integer range"))
        }
        Function::Timestamp => {
            let text = string(next()?)?;
            // The argument may be a decrypted field, so the message must not
            // quote it.
            parse_timestamp(&text).map(Value::Timestamp).map_err(|_| {
                SiftError::filter_evaluation("invalid timestamp in dynamic argument")
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use crate::models::{DecryptedFields, Record};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn item() -> DecryptedItem {
        let mut record = Record::new("res-1", "type-1");
        record.folder_parent_id = "folder-9".to_string();
        record.created = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        record.modified = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        let fields = DecryptedFields::new(
            "Mail Server",
            "admin",
            "https://mail.example.com",
            "hunter22",
            "primary relay",
        );
        DecryptedItem::decrypted(0, Arc::new(record), fields)
    }

    fn eval(source: &str) -> Result<bool> {
        evaluate_predicate(&parse(source)?, &item())
    }

    #[test]
    fn test_string_operations() {
        assert!(eval("Name == 'Mail Server'").unwrap());
        assert!(eval("Name != 'mail server'").unwrap());
        assert!(eval("Name.lowerAscii() == 'mail server'").unwrap());
        assert!(eval("Username.upperAscii() == 'ADMIN'").unwrap());
        assert!(eval("URI.startsWith('https://') && URI.endsWith('.com')").unwrap());
        assert!(eval("Description.contains('relay')").unwrap());
        assert!(!eval("Password.contains('letmein')").unwrap());
        assert!(eval("'a' < 'b' && Name >= 'Mail'").unwrap());
    }

    #[test]
    fn test_identifiers_bind_record_fields() {
        assert!(eval("ID == 'res-1' && FolderParentID == 'folder-9'").unwrap());
    }

    #[test]
    fn test_size_and_arithmetic() {
        assert!(eval("size(Password) == 8").unwrap());
        assert!(eval("Password.size() > 6").unwrap());
        assert!(eval("size(['a', 'b', 'c']) == 3").unwrap());
        assert!(eval("-3 < 0").unwrap());
    }

    #[test]
    fn test_size_counts_characters() {
        let record = Record::new("r", "t");
        let fields = DecryptedFields::new("café", "", "", "", "");
        let item = DecryptedItem::decrypted(0, Arc::new(record), fields);
        let expr = parse("size(Name) == 4").unwrap();
        assert!(evaluate_predicate(&expr, &item).unwrap());
    }

    #[test]
    fn test_membership() {
        assert!(eval("Username in ['root', 'admin']").unwrap());
        assert!(!eval("Username in []").unwrap());
        assert!(eval("!(Name in ['x'])").unwrap());
    }

    #[test]
    fn test_timestamps() {
        assert!(eval("CreatedTimestamp < timestamp('2024-01-01T00:00:00Z')").unwrap());
        assert!(eval("ModifiedTimestamp > CreatedTimestamp").unwrap());
        assert!(eval("CreatedTimestamp == timestamp('2023-06-01T14:00:00+02:00')").unwrap());
    }

    #[test]
    fn test_regex_matching() {
        assert!(eval(r"URI.matches('^https://[a-z]+\\.example\\.com$')").unwrap());
        assert!(!eval("Name.matches('^server')").unwrap());
        assert!(eval("Username.matches(Username)").unwrap());
    }

    #[test]
    fn test_dynamic_invalid_regex_fails_at_evaluation() {
        let record = Record::new("r", "t");
        let fields = DecryptedFields::new("(", "", "", "", "");
        let item = DecryptedItem::decrypted(0, Arc::new(record), fields);

        let expr = parse("URI.matches(Name)").unwrap();
        let err = evaluate_predicate(&expr, &item).unwrap_err();
        assert!(matches!(err, SiftError::FilterEvaluation { .. }));
    }

    #[test]
    fn test_dynamic_failures_do_not_quote_secrets() {
        let record = Record::new("r", "t");
        let fields = DecryptedFields::new("n", "u", "x", "hunter2(secret", "vault-key 2024");
        let item = DecryptedItem::decrypted(0, Arc::new(record), fields);

        let err = evaluate_predicate(&parse("Name.matches(Password)").unwrap(), &item).unwrap_err();
        let message = err.to_string();
        assert_eq!(
            message,
            "Evaluating filter: invalid regular expression in dynamic pattern"
        );
        assert!(!message.contains("hunter2"));

        let expr = parse("timestamp(Description) < CreatedTimestamp").unwrap();
        let message = evaluate_predicate(&expr, &item).unwrap_err().to_string();
        assert_eq!(message, "Evaluating filter: invalid timestamp in dynamic argument");
        assert!(!message.contains("vault-key"));
    }

    #[test]
    fn test_short_circuit_skips_failing_operand() {
        // the right-hand sides would fail if evaluated
        assert!(!eval("false && timestamp(Name) < CreatedTimestamp").unwrap());
        assert!(eval("true || timestamp(Name) < CreatedTimestamp").unwrap());
        assert!(eval("false || timestamp(Name) < CreatedTimestamp").is_err());
    }
}
