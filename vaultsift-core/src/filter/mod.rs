//! Boolean filter expressions over decrypted items.
//!
//! Expressions use a small CEL-style language: string, integer, boolean
//! and list literals, the comparison and logical operators, `in`, and a
//! handful of string and timestamp functions. Every identifier must be one
//! of the schema variables in [`Variable`].
//!
//! Compilation parses, resolves names and type-checks the expression once.
//! A compiled [`FilterExpression`] can then be evaluated against any
//! number of items without side effects.
//!
//! # Example
//! ```rust
//! use vaultsift_core::filter::{FilterExpression, references_fields};
//!
//! let expr = FilterExpression::compile("Name.startsWith('db') && Password != ''")?;
//! assert!(expr.references_any(&["Password"]));
//! assert!(!references_fields("URI.contains('corp')", &["Password", "Description"])?);
//! # Ok::<(), vaultsift_core::SiftError>(())
//! ```

mod ast;
mod check;
mod eval;
mod lexer;
mod parser;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub use ast::Variable;

use crate::Result;
use crate::error::SiftError;
use crate::models::DecryptedItem;

/// A compiled, reusable predicate over the variable schema.
#[derive(Debug, Clone)]
pub struct FilterExpression {
    source: String,
    expr: ast::Expr,
    variables: BTreeSet<Variable>,
}

impl FilterExpression {
    /// Parses and type-checks `source`.
    ///
    /// # Errors
    /// Returns `SiftError::FilterParse` for malformed text,
    /// `SiftError::UnknownVariable` for identifiers outside the schema and
    /// `SiftError::FilterType` when the expression is ill typed or not
    /// boolean.
    pub fn compile(source: &str) -> Result<Self> {
        let expr = parser::parse(source)?;
        check::check_predicate(&expr)?;

        let mut variables = BTreeSet::new();
        expr.for_each_variable(&mut |variable| {
            variables.insert(variable);
        });

        tracing::debug!(
            "Compiled filter referencing {} variable(s)",
            variables.len()
        );

        Ok(Self {
            source: source.to_string(),
            expr,
            variables,
        })
    }

    /// The expression text this filter was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variables referenced anywhere in the expression
    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.variables.iter().copied()
    }

    pub fn references(&self, variable: Variable) -> bool {
        self.variables.contains(&variable)
    }

    /// Returns true if any of `names` is referenced. Names outside the
    /// schema are never referenced.
    pub fn references_any(&self, names: &[&str]) -> bool {
        names
            .iter()
            .filter_map(|name| Variable::from_name(name))
            .any(|variable| self.references(variable))
    }

    /// True if evaluation needs decrypted secret fields
    pub fn needs_secrets(&self) -> bool {
        self.variables.iter().any(|variable| variable.is_secret())
    }

    /// Evaluates the predicate for one item.
    ///
    /// # Errors
    /// Returns `SiftError::FilterEvaluation` if a dynamic regex or timestamp
    /// argument is invalid for this item.
    pub fn evaluate(&self, item: &DecryptedItem) -> Result<bool> {
        eval::evaluate_predicate(&self.expr, item)
    }

    /// Keeps the items the predicate accepts, preserving input order.
    ///
    /// # Errors
    /// Returns `SiftError::NoMatch` when nothing is accepted, or the first
    /// evaluation error.
    pub fn apply(&self, items: Vec<DecryptedItem>) -> Result<Vec<DecryptedItem>> {
        let total = items.len();
        let mut matched = Vec::new();
        for item in items {
            if self.evaluate(&item)? {
                matched.push(item);
            }
        }

        tracing::debug!("Filter matched {} of {} item(s)", matched.len(), total);

        if matched.is_empty() {
            return Err(SiftError::no_match(&self.source));
        }
        Ok(matched)
    }
}

impl FromStr for FilterExpression {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_blank(expression_text: &str) -> bool {
    expression_text.trim().is_empty()
}

/// Filters `items` with `expression_text`.
///
/// A blank expression returns `items` unchanged without compiling anything.
///
/// # Errors
/// Compile errors are returned before any item is evaluated; a valid
/// expression that accepts nothing yields `SiftError::NoMatch`.
pub fn filter(items: Vec<DecryptedItem>, expression_text: &str) -> Result<Vec<DecryptedItem>> {
    if is_blank(expression_text) {
        return Ok(items);
    }
    FilterExpression::compile(expression_text)?.apply(items)
}

/// Statically checks whether `expression_text` references any of
/// `field_names`, without evaluating it. A blank expression references
/// nothing.
///
/// # Errors
/// Returns the compile error if the expression is invalid.
pub fn references_fields(expression_text: &str, field_names: &[&str]) -> Result<bool> {
    if is_blank(expression_text) {
        return Ok(false);
    }
    Ok(FilterExpression::compile(expression_text)?.references_any(field_names))
}
