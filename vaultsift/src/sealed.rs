//! AES-GCM sealing with Argon2id key derivation for vault exports.
//!
//! An export is protected by one password. The key is derived once per
//! export with Argon2id and every metadata or secret payload is sealed
//! separately with a fresh random nonce.
//!
//! # Sealed payload format
//! `base64(nonce || ciphertext || tag)` with a 96-bit nonce and a 128-bit
//! authentication tag.
//!
//! # Security Guarantees
//! - AES-GCM-256 authenticated encryption, random nonce per payload
//! - Key material is zeroed on drop and redacted from `Debug`
//! - Opened plaintext is returned in a zeroizing buffer

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, rand_core::RngCore},
};
use argon2::{Argon2, Params, Version};
use base64::{Engine, engine::general_purpose::STANDARD};
use password_hash::{PasswordHasher, SaltString};
use serde::{Deserialize, Serialize};
use vaultsift_core::{Result, SiftError};
use zeroize::Zeroizing;

/// AES-GCM nonce size: 96 bits (NIST SP 800-38D §8.2.1)
const AES_GCM_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size: 128 bits
const AES_GCM_TAG_SIZE: usize = 16;

/// Shortest sealed payload: a nonce and a tag around empty ciphertext
const MIN_SEALED_SIZE: usize = AES_GCM_NONCE_SIZE + AES_GCM_TAG_SIZE;

/// AES-256 key size
const AES_KEY_SIZE: usize = 32;

/// Argon2id salt size: 128 bits (RFC 9106 §4)
const ARGON2_SALT_SIZE: usize = 16;

/// Recommended Argon2id memory cost for new exports: 64 MiB
const ARGON2_MEMORY_COST: u32 = 65536;

/// Recommended Argon2id time cost for new exports
const ARGON2_TIME_COST: u32 = 3;

/// Recommended Argon2id parallelism for new exports
const ARGON2_PARALLELISM: u32 = 4;

/// Argon2id parameters stored in an export header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Random salt, at least 16 bytes
    pub salt: Vec<u8>,
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    pub parallelism: u32,
    /// Argon2 version, always "1.3"
    pub version: String,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new()
    }
}

impl KdfParams {
    /// Recommended parameters with a fresh random salt.
    pub fn new() -> Self {
        Self::with_costs(ARGON2_MEMORY_COST, ARGON2_TIME_COST, ARGON2_PARALLELISM)
    }

    /// Parameters with explicit costs and a fresh random salt.
    pub fn with_costs(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        let mut salt = vec![0u8; ARGON2_SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        Self {
            salt,
            memory_cost,
            time_cost,
            parallelism,
            version: "1.3".to_string(),
        }
    }

    /// True when the costs are below the recommended values.
    pub fn is_weak(&self) -> bool {
        self.memory_cost < ARGON2_MEMORY_COST
            || self.time_cost < ARGON2_TIME_COST
            || self.parallelism < 1
    }

    /// Validates that the parameters are usable.
    ///
    /// # Errors
    /// Returns a configuration error for a short salt, an unknown version or
    /// costs Argon2 rejects.
    pub fn validate(&self) -> Result<()> {
        if self.salt.len() < ARGON2_SALT_SIZE {
            return Err(SiftError::configuration(format!(
                "Salt must be at least {} bytes",
                ARGON2_SALT_SIZE
            )));
        }
        if self.version != "1.3" {
            return Err(SiftError::configuration(format!(
                "Unsupported Argon2 version: {}",
                self.version
            )));
        }
        if self.time_cost < 1 {
            return Err(SiftError::configuration(
                "Time cost must be at least 1 iteration",
            ));
        }
        if self.parallelism < 1 {
            return Err(SiftError::configuration("Parallelism must be at least 1"));
        }
        if self.parallelism > Params::MAX_P_COST {
            return Err(SiftError::configuration(format!(
                "Parallelism must be at most {}",
                Params::MAX_P_COST
            )));
        }
        let min_memory = self.parallelism.checked_mul(8).ok_or_else(|| {
            SiftError::configuration(format!("Parallelism {} is out of range", self.parallelism))
        })?;
        if self.memory_cost < min_memory {
            return Err(SiftError::configuration(format!(
                "Memory cost must be at least {} KiB for parallelism {}",
                min_memory, self.parallelism
            )));
        }
        Ok(())
    }
}

/// An AES-256 key derived from the export password.
pub struct SealingKey {
    key: Zeroizing<[u8; AES_KEY_SIZE]>,
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(****)")
    }
}

impl SealingKey {
    /// Derives the key from `password` with Argon2id.
    ///
    /// # Errors
    /// Returns a configuration error if the parameters are invalid or the
    /// derivation fails.
    pub fn derive(password: &str, kdf_params: &KdfParams) -> Result<Self> {
        kdf_params.validate()?;

        let params = Params::new(
            kdf_params.memory_cost,
            kdf_params.time_cost,
            kdf_params.parallelism,
            Some(AES_KEY_SIZE),
        )
        .map_err(|e| SiftError::configuration(format!("Invalid Argon2 parameters: {}", e)))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let salt_string = SaltString::encode_b64(&kdf_params.salt)
            .map_err(|e| SiftError::configuration(format!("Invalid salt: {}", e)))?;

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt_string)
            .map_err(|e| SiftError::configuration(format!("Key derivation failed: {}", e)))?;

        let hash_bytes = password_hash
            .hash
            .ok_or_else(|| SiftError::configuration("Key derivation produced no output"))?;

        if hash_bytes.as_bytes().len() != AES_KEY_SIZE {
            return Err(SiftError::configuration(format!(
                "Key derivation produced incorrect key length: expected {}, got {}",
                AES_KEY_SIZE,
                hash_bytes.as_bytes().len()
            )));
        }

        let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
        key.copy_from_slice(hash_bytes.as_bytes());

        Ok(Self { key })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.key))
    }

    /// Seals `plaintext` into a base64 payload.
    ///
    /// # Errors
    /// Returns a configuration error if encryption fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|e| SiftError::configuration(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(AES_GCM_NONCE_SIZE.saturating_add(ciphertext.len()));
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Opens a payload produced by [`SealingKey::seal`].
    ///
    /// `context` names the payload in error messages ("metadata", "secret").
    ///
    /// # Errors
    /// Returns `SiftError::Decryption` if the payload is malformed, was
    /// sealed with another key or has been tampered with.
    pub fn open(&self, sealed: &str, context: &str) -> Result<Zeroizing<Vec<u8>>> {
        let raw = STANDARD
            .decode(sealed.trim())
            .map_err(|e| SiftError::decryption_failed(context, e))?;

        if raw.len() < MIN_SEALED_SIZE {
            return Err(SiftError::decryption_failed(
                context,
                format!(
                    "sealed payload too short: {} bytes, need at least {}",
                    raw.len(),
                    MIN_SEALED_SIZE
                ),
            ));
        }

        let (nonce, ciphertext) = raw.split_at(AES_GCM_NONCE_SIZE);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| {
                SiftError::decryption_failed(
                    context,
                    format!("wrong password or corrupted data: {}", e),
                )
            })?;

        Ok(Zeroizing::new(plaintext))
    }
}
