//! Core data models for the decrypt-and-filter pipeline.
//!
//! `Record` is the caller-owned input; `DecryptedItem` is the per-run output.
//! Decrypted secret material is held in `Zeroizing` containers so it is wiped
//! when the items of a run are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::error::SiftError;

/// Slug prefix of resource types whose metadata is encrypted.
pub const ENCRYPTED_METADATA_PREFIX: &str = "v5-";

/// Label used when a type cannot be re-resolved for reporting.
pub const UNKNOWN_TYPE_LABEL: &str = "unknown";

/// Resource type slugs with a known secret decryption strategy.
pub const SUPPORTED_TYPE_SLUGS: &[&str] = &[
    "password-string",
    "password-and-description",
    "totp",
    "password-description-totp",
    "v5-default",
    "v5-password-string",
    "v5-default-with-totp",
    "v5-totp-standalone",
];

/// Opaque encrypted secret payload attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub data: String,
}

impl Secret {
    /// Creates a secret from its encrypted payload
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    /// True when the payload is empty (requested but absent)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A stored credential entry as fetched from the server.
///
/// Legacy types carry their metadata inline in plaintext; encrypted-metadata
/// types carry it in `metadata` and leave the inline fields empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub folder_parent_id: String,
    pub resource_type_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
    /// Encrypted metadata blob for encrypted-metadata types
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Record {
    /// Creates a record with empty plaintext fields and no secrets.
    pub fn new(id: impl Into<String>, resource_type_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            folder_parent_id: String::new(),
            resource_type_id: resource_type_id.into(),
            name: String::new(),
            username: String::new(),
            uri: String::new(),
            description: String::new(),
            metadata: None,
            secrets: Vec::new(),
            created: now,
            modified: now,
        }
    }

    /// Returns true if at least one secret payload is attached
    pub fn has_secret(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// Returns the first associated secret, if any
    pub fn first_secret(&self) -> Option<&Secret> {
        self.secrets.first()
    }
}

/// Cached classification of a resource type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedType {
    pub type_id: String,
    pub slug: String,
    /// Metadata must be decrypted rather than read inline
    pub metadata_encrypted: bool,
    /// Secret decryption has a known strategy for this type
    pub secret_supported: bool,
}

impl ResolvedType {
    /// Classifies a type from the slug reported by the server.
    pub fn from_slug(type_id: impl Into<String>, slug: impl Into<String>) -> Self {
        let slug = slug.into();
        Self {
            type_id: type_id.into(),
            metadata_encrypted: slug.starts_with(ENCRYPTED_METADATA_PREFIX),
            secret_supported: SUPPORTED_TYPE_SLUGS.contains(&slug.as_str()),
            slug,
        }
    }

    /// Legacy types expose plaintext metadata inline on the record.
    pub fn is_legacy(&self) -> bool {
        !self.metadata_encrypted
    }
}

/// Decrypted (or passed-through) fields of a record.
#[derive(Clone, Default)]
pub struct DecryptedFields {
    pub name: String,
    pub username: String,
    pub uri: String,
    pub password: Zeroizing<String>,
    pub description: Zeroizing<String>,
}

impl DecryptedFields {
    /// Builds fields from plain strings, moving secrets into zeroizing storage.
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        uri: impl Into<String>,
        password: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            uri: uri.into(),
            password: Zeroizing::new(password.into()),
            description: Zeroizing::new(description.into()),
        }
    }

    /// Copies a legacy record's inline plaintext; the password stays empty.
    pub fn from_plaintext(record: &Record) -> Self {
        Self::new(
            record.name.clone(),
            record.username.clone(),
            record.uri.clone(),
            String::new(),
            record.description.clone(),
        )
    }
}

impl std::fmt::Debug for DecryptedFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedFields")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("uri", &self.uri)
            .field("password", &"****")
            .field("description", &"****")
            .finish()
    }
}

/// Output unit of a pipeline run.
///
/// Created once by a worker and never mutated afterwards. Items that survive
/// reassembly always have `failure == None`.
#[derive(Debug)]
pub struct DecryptedItem {
    /// Submission index used to restore dispatch order
    pub index: usize,
    pub record: Arc<Record>,
    pub fields: DecryptedFields,
    pub failure: Option<SiftError>,
}

impl DecryptedItem {
    /// Creates a successful item
    pub fn decrypted(index: usize, record: Arc<Record>, fields: DecryptedFields) -> Self {
        Self {
            index,
            record,
            fields,
            failure: None,
        }
    }

    /// Creates a failed item
    pub fn failed(index: usize, record: Arc<Record>, failure: SiftError) -> Self {
        Self {
            index,
            record,
            fields: DecryptedFields::default(),
            failure: Some(failure),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn folder_parent_id(&self) -> &str {
        &self.record.folder_parent_id
    }

    pub fn name(&self) -> &str {
        &self.fields.name
    }

    pub fn username(&self) -> &str {
        &self.fields.username
    }

    pub fn uri(&self) -> &str {
        &self.fields.uri
    }

    pub fn password(&self) -> &str {
        &self.fields.password
    }

    pub fn description(&self) -> &str {
        &self.fields.description
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.record.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.record.modified
    }
}

/// Count of records skipped per type label because decryption is unsupported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureTally {
    skipped: BTreeMap<String, usize>,
}

impl FailureTally {
    /// Creates an empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one skipped record under `type_label`
    pub fn record(&mut self, type_label: impl Into<String>) {
        let count = self.skipped.entry(type_label.into()).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Number of skipped records for `type_label`
    pub fn get(&self, type_label: &str) -> usize {
        self.skipped.get(type_label).copied().unwrap_or(0)
    }

    /// Total skipped records across all labels
    pub fn total(&self) -> usize {
        self.skipped
            .values()
            .fold(0usize, |total, count| total.saturating_add(*count))
    }

    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Iterates `(label, count)` pairs in label order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.skipped.iter().map(|(label, count)| (label.as_str(), *count))
    }

    /// Human readable summary, one header line then one line per label.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.skipped.len().saturating_add(1));
        lines.push(format!(
            "{} resource(s) skipped due to unsupported types:",
            self.total()
        ));
        lines.extend(
            self.iter()
                .map(|(label, count)| format!("  - {}: {}", label, count)),
        );
        lines
    }

    /// Emits the summary on the diagnostic stream. No-op when empty.
    pub fn log_summary(&self) {
        if self.is_empty() {
            return;
        }
        for line in self.summary_lines() {
            tracing::warn!("{}", line);
        }
    }
}
