//! Key derivation helpers using HKDF-SHA256.
//!
//! From a single master key we derive:
//! - A unique **per-secret** encryption key for each (vault, secret name).
//! - A dedicated **integrity** key for the whole-file HMAC tag.
//!
//! Every purpose has its own versioned label, and the vault salt is part
//! of every `info` string, so two vaults never share derived keys even
//! when the password and secret names are identical:
//!
//! ```text
//! secret:    info = "envvault-secret-v1:"    || salt || ":" || name
//! integrity: info = "envvault-integrity-v1:" || salt
//! ```

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{EnvVaultError, Result};

/// Length of the master key and of every derived key (256 bits).
pub const KEY_LEN: usize = 32;

const SECRET_LABEL: &[u8] = b"envvault-secret-v1:";
const INTEGRITY_LABEL: &[u8] = b"envvault-integrity-v1:";

/// The Argon2id output.  Lives only in memory and is wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Derive the encryption key for `secret_name` in the vault salted with `salt`.
    pub fn derive_secret_key(&self, salt: &[u8], secret_name: &str) -> Result<DerivedKey> {
        derive_secret_key(&self.bytes, salt, secret_name)
    }

    /// Derive the integrity-tag key for the vault salted with `salt`.
    pub fn derive_integrity_key(&self, salt: &[u8]) -> Result<DerivedKey> {
        derive_integrity_key(&self.bytes, salt)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// A 32-byte key derived from the master key for one purpose.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        super::encryption::constant_time_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for DerivedKey {}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derive a per-secret encryption key from raw master key bytes.
pub fn derive_secret_key(
    master_key: &[u8],
    salt: &[u8],
    secret_name: &str,
) -> Result<DerivedKey> {
    let mut info = Vec::with_capacity(SECRET_LABEL.len() + salt.len() + 1 + secret_name.len());
    info.extend_from_slice(SECRET_LABEL);
    info.extend_from_slice(salt);
    info.push(b':');
    info.extend_from_slice(secret_name.as_bytes());
    hkdf_derive(master_key, &info)
}

/// Derive the integrity-tag key from raw master key bytes.
pub fn derive_integrity_key(master_key: &[u8], salt: &[u8]) -> Result<DerivedKey> {
    let mut info = Vec::with_capacity(INTEGRITY_LABEL.len() + salt.len());
    info.extend_from_slice(INTEGRITY_LABEL);
    info.extend_from_slice(salt);
    hkdf_derive(master_key, &info)
}

/// Run HKDF-SHA256 expand with the given `info`.
///
/// The extract step runs with no salt: the master key already has full
/// entropy because it came out of Argon2id.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<DerivedKey> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| EnvVaultError::KeyDerivation(format!("HKDF expand failed: {e}")))?;

    let key = DerivedKey { bytes: okm };
    okm.zeroize();
    Ok(key)
}
