//! Core decrypt-and-filter pipeline for vaultsift.
//!
//! This crate takes a batch of encrypted password-manager records, decrypts
//! them on a bounded pool of workers, restores submission order, tolerates
//! records of unsupported types, and selects a subset with a compiled
//! filter expression.
//!
//! # Security Guarantees
//! - No cryptography is performed here; decryption is delegated to a
//!   caller-supplied [`DecryptionCapability`]
//! - Decrypted passwords and descriptions are zeroized on drop and never
//!   appear in logs, `Debug` output or error messages
//! - Nothing decrypted outlives a pipeline run; only type resolutions are
//!   cached across runs
//!
//! # Architecture
//! - [`classifier`]: single-flight memoization of record type lookups
//! - [`pipeline`]: worker pool, ordered reassembly and the owning [`Session`]
//! - [`filter`]: expression compiler and evaluator
//! - [`planning`]: column selection and the decision to fetch secrets

pub mod capability;
pub mod classifier;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod planning;
pub mod search;

// Re-export commonly used types
pub use capability::DecryptionCapability;
pub use classifier::{TypeClassifier, TypeResolver};
pub use config::{PipelineConfig, UnsupportedTypePolicy};
pub use error::{Result, SiftError};
pub use filter::{FilterExpression, Variable, filter, references_fields};
pub use models::{
    DecryptedFields, DecryptedItem, FailureTally, Record, ResolvedType, Secret,
};
pub use pipeline::{PipelineOutput, Session};
pub use planning::{Column, DEFAULT_COLUMNS, QueryPlan, parse_columns, requires_secrets};
pub use search::quick_search;
