//! Secret entries stored inside a vault.
//!
//! Each entry holds its plaintext name, the AES-GCM nonce, the raw
//! `ciphertext || gcm_tag` bytes, and creation/update timestamps.  Names
//! are never encrypted so a vault can be listed without decrypting.

use chrono::{DateTime, Utc};

use crate::crypto::encryption::NONCE_LEN;
use crate::errors::{EnvVaultError, Result};

/// Longest secret name accepted, in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// A single encrypted secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    /// The name of the secret (e.g. "DATABASE_URL").
    pub name: String,

    /// Fresh random nonce used for this ciphertext.
    pub nonce: [u8; NONCE_LEN],

    /// `ciphertext || gcm_tag`.
    pub ciphertext: Vec<u8>,

    /// When this secret was first created.
    pub created_at: DateTime<Utc>,

    /// When this secret was last updated.
    pub updated_at: DateTime<Utc>,
}

impl SecretEntry {
    pub fn metadata(&self) -> SecretMetadata {
        SecretMetadata {
            name: self.name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight metadata about a secret (no ciphertext).
///
/// Returned by `VaultStore::list_metadata` so callers can display
/// secret names and timestamps without touching any ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current time truncated to the millisecond precision stored on disk,
/// so in-memory and reloaded timestamps compare equal.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Validate that a secret name is safe.
///
/// Allowed: ASCII letters, digits, underscores, hyphens, periods.
/// Must be non-empty and at most 256 characters.  Names are
/// case-sensitive.
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EnvVaultError::InvalidSecretName(
            "secret name cannot be empty".into(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EnvVaultError::InvalidSecretName(format!(
            "secret name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(EnvVaultError::InvalidSecretName(format!(
            "'{name}' contains invalid characters; only ASCII letters, digits, underscores, hyphens, and periods are allowed"
        )));
    }
    Ok(())
}
