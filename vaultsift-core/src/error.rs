//! Error types with secret-value sanitization.
//!
//! Errors produced by the pipeline may describe which record or type failed,
//! but never carry decrypted passwords or descriptions in their messages.

use thiserror::Error;

/// Boxed lower-level cause attached to an error variant.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for vaultsift operations.
///
/// # Security
/// Messages are built from identifiers, type labels and static context only.
/// Decrypted field values are never interpolated into error output.
#[derive(Debug, Error)]
pub enum SiftError {
    /// Resolving a record's type identifier failed
    #[error("Get ResourceType {type_id}: {source}")]
    TypeResolution {
        type_id: String,
        #[source]
        source: BoxError,
    },

    /// The decryption capability rejected or failed on a record
    #[error("Decryption failed: {context}")]
    Decryption {
        context: String,
        #[source]
        source: BoxError,
    },

    /// The record's type has no known decryption strategy
    #[error("Unsupported resource type: {type_label}")]
    UnsupportedType { type_label: String },

    /// A secret was required but the record carries none
    #[error("Record {record_id} has no secret to decrypt")]
    MissingSecret { record_id: String },

    /// A fatal per-item failure, tagged with the record it came from
    #[error("Get Resource {record_id}: {source}")]
    Item {
        record_id: String,
        #[source]
        source: Box<SiftError>,
    },

    /// The pipeline run was cancelled before every item completed
    #[error("Pipeline run cancelled")]
    Cancelled,

    /// Worker results could not be placed back into submission order
    #[error("Reassembly failed: {message}")]
    Reassembly { message: String },

    /// The filter expression is not syntactically valid
    #[error("Parsing filter: {message} at offset {offset}")]
    FilterParse { message: String, offset: usize },

    /// The filter expression references a variable outside the schema
    #[error("Parsing filter: undeclared reference to '{name}'")]
    UnknownVariable { name: String },

    /// The filter expression is well formed but ill typed
    #[error("Parsing filter: {message}")]
    FilterType { message: String },

    /// Evaluating a compiled filter failed for an item
    #[error("Evaluating filter: {message}")]
    FilterEvaluation { message: String },

    /// A valid filter matched no items
    #[error("No such Resources found with filter {expression}!")]
    NoMatch { expression: String },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results with SiftError
pub type Result<T> = std::result::Result<T, SiftError>;

impl SiftError {
    /// Creates a type resolution error for `type_id`
    pub fn type_resolution<E>(type_id: impl Into<String>, error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::TypeResolution {
            type_id: type_id.into(),
            source: error.into(),
        }
    }

    /// Creates a decryption error with context
    pub fn decryption_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Decryption {
            context: context.into(),
            source: error.into(),
        }
    }

    /// Creates the distinguished unsupported-type error
    pub fn unsupported_type(type_label: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_label: type_label.into(),
        }
    }

    /// Creates a missing-secret error
    pub fn missing_secret(record_id: impl Into<String>) -> Self {
        Self::MissingSecret {
            record_id: record_id.into(),
        }
    }

    /// Wraps a per-item failure with the record it belongs to
    pub fn item(record_id: impl Into<String>, error: SiftError) -> Self {
        Self::Item {
            record_id: record_id.into(),
            source: Box::new(error),
        }
    }

    /// Creates a reassembly error
    pub fn reassembly(message: impl Into<String>) -> Self {
        Self::Reassembly {
            message: message.into(),
        }
    }

    /// Creates a filter parse error at a byte offset
    pub fn filter_parse(message: impl Into<String>, offset: usize) -> Self {
        Self::FilterParse {
            message: message.into(),
            offset,
        }
    }

    /// Creates a filter type error
    pub fn filter_type(message: impl Into<String>) -> Self {
        Self::FilterType {
            message: message.into(),
        }
    }

    /// Creates a filter evaluation error
    pub fn filter_evaluation(message: impl Into<String>) -> Self {
        Self::FilterEvaluation {
            message: message.into(),
        }
    }

    /// Creates the distinguished no-match error
    pub fn no_match(expression: impl Into<String>) -> Self {
        Self::NoMatch {
            expression: expression.into(),
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true for the tolerated unsupported-type failure.
    ///
    /// Looks through `Item` wrappers so callers can classify an error
    /// regardless of how many layers have added context.
    pub fn is_unsupported_type(&self) -> bool {
        match self {
            Self::UnsupportedType { .. } => true,
            Self::Item { source, .. } => source.is_unsupported_type(),
            _ => false,
        }
    }

    /// Returns true when a filter matched nothing
    pub fn is_no_match(&self) -> bool {
        matches!(self, Self::NoMatch { .. })
    }

    /// Returns true when the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Item { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Returns true for compile-time filter errors
    pub fn is_filter_compile_error(&self) -> bool {
        matches!(
            self,
            Self::FilterParse { .. } | Self::UnknownVariable { .. } | Self::FilterType { .. }
        )
    }
}
