//! AES-256-GCM authenticated encryption and the whole-file integrity tag.
//!
//! Each call to `encrypt_secret` generates a fresh random 12-byte nonce
//! from the OS CSPRNG.  The nonce is returned separately so the vault
//! codec can store it as its own field next to `ciphertext || gcm_tag`.
//!
//! The integrity tag is `HMAC-SHA256(integrity_key, header || secrets)`
//! over the exact encoded byte ranges of a vault file.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::keys::DerivedKey;
use crate::errors::{EnvVaultError, Result};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of the AES-256-GCM authentication tag in bytes.
pub const GCM_TAG_LEN: usize = 16;

/// Size of the whole-file integrity tag (HMAC-SHA256).
pub const INTEGRITY_TAG_LEN: usize = 32;

/// Encrypt `plaintext` under a per-secret key.
///
/// Returns `(nonce, ciphertext || gcm_tag)`.
pub fn encrypt_secret(key: &DerivedKey, plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| EnvVaultError::Encryption(format!("invalid key length: {e}")))?;

    let generated = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&generated, plaintext)
        .map_err(|e| EnvVaultError::Encryption(format!("encryption error: {e}")))?;

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&generated);
    Ok((nonce, ciphertext))
}

/// Decrypt a value produced by `encrypt_secret`.
///
/// Any failure (wrong key, flipped bit, truncated tag) is reported as
/// `Authentication`; nothing of a failed decryption is returned.
pub fn decrypt_secret(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < GCM_TAG_LEN {
        return Err(EnvVaultError::Authentication);
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| EnvVaultError::Authentication)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EnvVaultError::Authentication)?;

    Ok(Zeroizing::new(plaintext))
}

/// Compute the whole-file integrity tag over the encoded header and
/// secrets regions.
pub fn compute_integrity_tag(
    key: &DerivedKey,
    header_bytes: &[u8],
    secrets_bytes: &[u8],
) -> Result<[u8; INTEGRITY_TAG_LEN]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| EnvVaultError::Encryption(format!("invalid HMAC key: {e}")))?;

    mac.update(header_bytes);
    mac.update(secrets_bytes);

    let mut tag = [0u8; INTEGRITY_TAG_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Recompute the integrity tag and compare it with `expected` in
/// constant time.
pub fn verify_integrity_tag(
    key: &DerivedKey,
    header_bytes: &[u8],
    secrets_bytes: &[u8],
    expected: &[u8],
) -> Result<()> {
    let actual = compute_integrity_tag(key, header_bytes, secrets_bytes)?;
    if constant_time_eq(&actual, expected) {
        Ok(())
    } else {
        Err(EnvVaultError::Authentication)
    }
}

/// Compare two byte strings without an early exit on the first mismatch.
///
/// Lengths are treated as public: slices of different length compare
/// unequal immediately.
pub fn constant_time_eq(expected: &[u8], actual: &[u8]) -> bool {
    expected.ct_eq(actual).into()
}
