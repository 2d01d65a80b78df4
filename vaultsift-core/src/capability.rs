//! The decryption capability consumed by the worker pool.
//!
//! The pipeline never performs cryptography itself. Whoever owns the
//! authenticated session (private key, session keys, passphrase) implements
//! this trait and the pool invokes it once per record that cannot take the
//! plaintext fast path.

use async_trait::async_trait;

use crate::Result;
use crate::models::{DecryptedFields, Record, ResolvedType, Secret};

/// Decrypts a record's metadata and, optionally, its secret.
///
/// # Contract
/// - `secret` is the record's first secret, or an empty secret when the
///   record has none. If `want_secret` is true, an empty secret must be
///   rejected with an error; the pool does not special-case it.
/// - Types with no known strategy must fail with
///   `SiftError::UnsupportedType` so the reassembler can tolerate them.
/// - Returned password/description are only populated when `want_secret`
///   is true (descriptions of encrypted-metadata types come from metadata).
///
/// # Object Safety
/// The trait is object-safe and used as `Arc<dyn DecryptionCapability>`.
#[async_trait]
pub trait DecryptionCapability: Send + Sync {
    /// Decrypts one record
    async fn decrypt(
        &self,
        record: &Record,
        secret: &Secret,
        resolved: &ResolvedType,
        want_secret: bool,
    ) -> Result<DecryptedFields>;
}
