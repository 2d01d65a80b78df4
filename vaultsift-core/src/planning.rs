//! Output column selection and secret-requirement planning.
//!
//! Decrypting secrets is the expensive part of a run, so callers decide
//! before fetching whether any selected column or the filter needs the
//! password or description.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Result;
use crate::error::SiftError;
use crate::filter::{FilterExpression, Variable, references_fields};

/// Field names only populated by secret decryption
pub const SECRET_FIELDS: &[&str] = &["Password", "Description"];

/// A displayable field of a decrypted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    #[serde(rename = "ID")]
    Id,
    #[serde(rename = "FolderParentID")]
    FolderParentId,
    Name,
    Username,
    #[serde(rename = "URI")]
    Uri,
    Password,
    Description,
    CreatedTimestamp,
    ModifiedTimestamp,
}

/// Columns shown when none are requested
pub const DEFAULT_COLUMNS: &[Column] = &[
    Column::Id,
    Column::FolderParentId,
    Column::Name,
    Column::Username,
    Column::Uri,
];

impl Column {
    pub const ALL: [Column; 9] = [
        Column::Id,
        Column::FolderParentId,
        Column::Name,
        Column::Username,
        Column::Uri,
        Column::Password,
        Column::Description,
        Column::CreatedTimestamp,
        Column::ModifiedTimestamp,
    ];

    /// The filter variable carrying the same field
    pub fn variable(self) -> Variable {
        match self {
            Column::Id => Variable::Id,
            Column::FolderParentId => Variable::FolderParentId,
            Column::Name => Variable::Name,
            Column::Username => Variable::Username,
            Column::Uri => Variable::Uri,
            Column::Password => Variable::Password,
            Column::Description => Variable::Description,
            Column::CreatedTimestamp => Variable::CreatedTimestamp,
            Column::ModifiedTimestamp => Variable::ModifiedTimestamp,
        }
    }

    /// Display name, identical to the filter variable name
    pub fn name(self) -> &'static str {
        self.variable().name()
    }

    /// Key used for this column in JSON output
    pub fn json_key(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::FolderParentId => "folder_parent_id",
            Column::Name => "name",
            Column::Username => "username",
            Column::Uri => "uri",
            Column::Password => "password",
            Column::Description => "description",
            Column::CreatedTimestamp => "created_timestamp",
            Column::ModifiedTimestamp => "modified_timestamp",
        }
    }

    pub fn is_secret(self) -> bool {
        self.variable().is_secret()
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = SiftError;

    /// Parses a column name case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SiftError::configuration(format!("Unknown Column: {}", s)))
    }
}

/// Parses requested column names, keeping their order.
///
/// # Errors
/// Returns a configuration error for an empty list or an unknown name.
pub fn parse_columns<I, S>(names: I) -> Result<Vec<Column>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let columns = names
        .into_iter()
        .map(|name| name.as_ref().parse())
        .collect::<Result<Vec<Column>>>()?;

    if columns.is_empty() {
        return Err(SiftError::configuration(
            "You need to specify at least one column to return",
        ));
    }
    Ok(columns)
}

/// Returns true when a run must decrypt secrets: a selected column is
/// secret, or the filter references a secret field.
///
/// # Errors
/// Returns the filter's compile error.
pub fn requires_secrets(columns: &[Column], filter_text: &str) -> Result<bool> {
    if columns.iter().any(|column| column.is_secret()) {
        return Ok(true);
    }
    references_fields(filter_text, SECRET_FIELDS)
}

/// Everything decided about a listing before any record is fetched.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub columns: Vec<Column>,
    /// Compiled filter, `None` for a blank expression
    pub filter: Option<FilterExpression>,
    pub want_secret: bool,
}

impl QueryPlan {
    /// Builds a plan, compiling the filter exactly once.
    ///
    /// # Errors
    /// Returns column or filter compile errors.
    pub fn new<I, S>(column_names: I, filter_text: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = parse_columns(column_names)?;
        let filter = if filter_text.trim().is_empty() {
            None
        } else {
            Some(FilterExpression::compile(filter_text)?)
        };

        let want_secret = columns.iter().any(|column| column.is_secret())
            || filter.as_ref().is_some_and(FilterExpression::needs_secrets);

        tracing::debug!(
            "Planned {} column(s), secrets {}",
            columns.len(),
            if want_secret { "required" } else { "not required" }
        );

        Ok(Self {
            columns,
            filter,
            want_secret,
        })
    }

    /// Plan with the default columns
    pub fn with_default_columns(filter_text: &str) -> Result<Self> {
        Self::new(DEFAULT_COLUMNS.iter().map(|column| column.name()), filter_text)
    }
}
