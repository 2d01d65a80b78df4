//! Offline vault export format.
//!
//! An export is a JSON document holding the Argon2id parameters, the
//! resource type table and the records themselves. Encrypted-metadata
//! (`v5-*`) records carry their name, username, URI and description in a
//! sealed `metadata` payload; legacy records carry them inline. Every
//! secret is a sealed payload.
//!
//! [`ExportVault`] is the unlocked view of an export and serves both
//! collaborators the pipeline consumes: type lookups and per-record
//! decryption.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use vaultsift_core::models::ENCRYPTED_METADATA_PREFIX;
use vaultsift_core::{
    DecryptedFields, DecryptionCapability, Record, ResolvedType, Result, Secret, SiftError,
    TypeResolver,
};

use crate::sealed::{KdfParams, SealingKey};

/// Current export format version.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Types whose secret payload is the bare password rather than a JSON object.
const RAW_PASSWORD_SLUGS: &[&str] = &["password-string", "v5-password-string"];

/// One row of the export's resource type table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypeEntry {
    pub id: String,
    pub slug: String,
}

/// On-disk representation of a vault export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFile {
    pub format_version: u32,
    pub kdf: KdfParams,
    pub resource_types: Vec<ResourceTypeEntry>,
    pub resources: Vec<Record>,
}

/// Plaintext of a sealed metadata payload.
#[derive(Debug, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct MetadataPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    description: String,
}

/// Plaintext of a sealed JSON secret payload.
#[derive(Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SecretPayload {
    #[serde(default)]
    password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl ExportFile {
    /// Reads and parses an export from disk.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read, a serialization
    /// error if it is not a valid export, or a configuration error for an
    /// unsupported format version.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SiftError::Io {
                context: format!("Failed to read export {}", path.display()),
                source: e,
            })?;

        let export: Self = serde_json::from_str(&contents).map_err(|e| SiftError::Serialization {
            context: format!("Failed to parse export {}", path.display()),
            source: e,
        })?;

        if export.format_version != EXPORT_FORMAT_VERSION {
            return Err(SiftError::configuration(format!(
                "Unsupported export format version {} (expected {})",
                export.format_version, EXPORT_FORMAT_VERSION
            )));
        }

        tracing::debug!(
            "Loaded export {} ({} resources, {} resource types)",
            path.display(),
            export.resources.len(),
            export.resource_types.len()
        );

        Ok(export)
    }

    /// Writes the export to disk as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns a serialization or I/O error.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| SiftError::Serialization {
            context: "Failed to serialize export".to_string(),
            source: e,
        })?;

        tokio::fs::write(path, json)
            .await
            .map_err(|e| SiftError::Io {
                context: format!("Failed to write export {}", path.display()),
                source: e,
            })?;
        Ok(())
    }

    /// Derives the export key from `password` and returns the unlocked vault.
    ///
    /// # Errors
    /// Returns a configuration error if the KDF parameters are invalid.
    /// A wrong password is only detected when the first payload is opened.
    pub fn unlock(&self, password: &str) -> Result<ExportVault> {
        if self.kdf.is_weak() {
            tracing::warn!(
                "Export uses Argon2id parameters below the recommended strength \
                 (memory {} KiB, time {}, parallelism {})",
                self.kdf.memory_cost,
                self.kdf.time_cost,
                self.kdf.parallelism
            );
        }

        let key = SealingKey::derive(password, &self.kdf)?;
        let types = self
            .resource_types
            .iter()
            .map(|entry| (entry.id.clone(), entry.slug.clone()))
            .collect();

        Ok(ExportVault { types, key })
    }
}

/// An export whose key has been derived.
#[derive(Debug)]
pub struct ExportVault {
    types: HashMap<String, String>,
    key: SealingKey,
}

impl ExportVault {
    fn open_metadata(&self, record: &Record) -> Result<DecryptedFields> {
        let sealed = record.metadata.as_deref().ok_or_else(|| {
            SiftError::decryption_failed(
                "metadata",
                format!("record {} has no encrypted metadata", record.id),
            )
        })?;

        let plaintext = self.key.open(sealed, "metadata")?;
        let mut payload: MetadataPayload =
            serde_json::from_slice(&plaintext).map_err(|e| SiftError::Serialization {
                context: format!("Failed to parse metadata of record {}", record.id),
                source: e,
            })?;

        Ok(DecryptedFields {
            name: std::mem::take(&mut payload.name),
            username: std::mem::take(&mut payload.username),
            uri: std::mem::take(&mut payload.uri),
            password: Zeroizing::default(),
            description: Zeroizing::new(std::mem::take(&mut payload.description)),
        })
    }

    fn open_secret(
        &self,
        record: &Record,
        secret: &Secret,
        slug: &str,
        fields: &mut DecryptedFields,
    ) -> Result<()> {
        if secret.is_empty() {
            return Err(SiftError::missing_secret(&record.id));
        }

        let plaintext = self.key.open(&secret.data, "secret")?;

        if RAW_PASSWORD_SLUGS.contains(&slug) {
            let password = std::str::from_utf8(&plaintext)
                .map_err(|e| SiftError::decryption_failed("secret", e))?;
            fields.password = Zeroizing::new(password.to_string());
            return Ok(());
        }

        let mut payload: SecretPayload =
            serde_json::from_slice(&plaintext).map_err(|e| SiftError::Serialization {
                context: format!("Failed to parse secret of record {}", record.id),
                source: e,
            })?;

        fields.password = Zeroizing::new(std::mem::take(&mut payload.password));
        if let Some(description) = payload.description.take() {
            fields.description = Zeroizing::new(description);
        }
        Ok(())
    }
}

#[async_trait]
impl TypeResolver for ExportVault {
    async fn lookup(&self, type_id: &str) -> Result<String> {
        self.types.get(type_id).cloned().ok_or_else(|| {
            SiftError::type_resolution(type_id, "resource type not present in export")
        })
    }
}

#[async_trait]
impl DecryptionCapability for ExportVault {
    async fn decrypt(
        &self,
        record: &Record,
        secret: &Secret,
        resolved: &ResolvedType,
        want_secret: bool,
    ) -> Result<DecryptedFields> {
        if !resolved.secret_supported {
            return Err(SiftError::unsupported_type(&resolved.slug));
        }

        let mut fields = if resolved.metadata_encrypted {
            self.open_metadata(record)?
        } else {
            DecryptedFields::from_plaintext(record)
        };

        if want_secret {
            self.open_secret(record, secret, &resolved.slug, &mut fields)?;
        }

        Ok(fields)
    }
}

/// Plaintext description of one entry to add to a new export.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub id: String,
    pub folder_parent_id: String,
    pub resource_type_id: String,
    pub name: String,
    pub username: String,
    pub uri: String,
    pub description: String,
    /// Sealed into the entry's secret; `None` leaves the entry without one
    pub password: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Assembles a sealed export from plaintext entries.
///
/// # Example
/// ```rust,no_run
/// use vaultsift::export::{ExportBuilder, NewEntry};
/// use vaultsift::sealed::KdfParams;
///
/// # fn main() -> vaultsift_core::Result<()> {
/// let mut builder = ExportBuilder::new("export password", KdfParams::new())?;
/// builder.resource_type("type-1", "v5-default");
/// builder.add(NewEntry {
///     id: "res-1".into(),
///     resource_type_id: "type-1".into(),
///     name: "GitLab".into(),
///     password: Some("hunter2".into()),
///     ..NewEntry::default()
/// })?;
/// let export = builder.finish();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ExportBuilder {
    kdf: KdfParams,
    key: SealingKey,
    resource_types: Vec<ResourceTypeEntry>,
    resources: Vec<Record>,
}

impl ExportBuilder {
    /// Derives the sealing key for a new export.
    ///
    /// # Errors
    /// Returns a configuration error if the KDF parameters are invalid.
    pub fn new(password: &str, kdf: KdfParams) -> Result<Self> {
        let key = SealingKey::derive(password, &kdf)?;
        Ok(Self {
            kdf,
            key,
            resource_types: Vec::new(),
            resources: Vec::new(),
        })
    }

    /// Registers a resource type.
    pub fn resource_type(&mut self, id: impl Into<String>, slug: impl Into<String>) -> &mut Self {
        self.resource_types.push(ResourceTypeEntry {
            id: id.into(),
            slug: slug.into(),
        });
        self
    }

    fn slug_of(&self, type_id: &str) -> Option<&str> {
        self.resource_types
            .iter()
            .find(|entry| entry.id == type_id)
            .map(|entry| entry.slug.as_str())
    }

    /// Seals and appends an entry.
    ///
    /// # Errors
    /// Returns a configuration error if the entry's type was not
    /// registered, or an error if sealing fails.
    pub fn add(&mut self, entry: NewEntry) -> Result<&mut Self> {
        let slug = self
            .slug_of(&entry.resource_type_id)
            .ok_or_else(|| {
                SiftError::configuration(format!(
                    "Unknown resource type {} for entry {}",
                    entry.resource_type_id, entry.id
                ))
            })?
            .to_string();

        let mut record = Record::new(&entry.id, &entry.resource_type_id);
        record.folder_parent_id = entry.folder_parent_id.clone();
        record.created = entry.created;
        record.modified = entry.modified;

        let encrypted_metadata = slug.starts_with(ENCRYPTED_METADATA_PREFIX);
        let description_in_secret = !encrypted_metadata && slug != "password-string";

        if encrypted_metadata {
            let payload = MetadataPayload {
                name: entry.name.clone(),
                username: entry.username.clone(),
                uri: entry.uri.clone(),
                description: entry.description.clone(),
            };
            let json = Zeroizing::new(serde_json::to_vec(&payload).map_err(|e| {
                SiftError::Serialization {
                    context: format!("Failed to serialize metadata of entry {}", entry.id),
                    source: e,
                }
            })?);
            record.metadata = Some(self.key.seal(&json)?);
        } else {
            record.name = entry.name.clone();
            record.username = entry.username.clone();
            record.uri = entry.uri.clone();
            if !description_in_secret {
                record.description = entry.description.clone();
            }
        }

        if let Some(password) = &entry.password {
            let plaintext = if RAW_PASSWORD_SLUGS.contains(&slug.as_str()) {
                Zeroizing::new(password.as_bytes().to_vec())
            } else {
                let payload = SecretPayload {
                    password: password.clone(),
                    description: description_in_secret.then(|| entry.description.clone()),
                };
                Zeroizing::new(serde_json::to_vec(&payload).map_err(|e| {
                    SiftError::Serialization {
                        context: format!("Failed to serialize secret of entry {}", entry.id),
                        source: e,
                    }
                })?)
            };
            record.secrets.push(Secret::new(self.key.seal(&plaintext)?));
        }

        self.resources.push(record);
        Ok(self)
    }

    /// Returns the finished export.
    pub fn finish(self) -> ExportFile {
        ExportFile {
            format_version: EXPORT_FORMAT_VERSION,
            kdf: self.kdf,
            resource_types: self.resource_types,
            resources: self.resources,
        }
    }
}
