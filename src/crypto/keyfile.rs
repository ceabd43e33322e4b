//! Keyfile-based second factor.
//!
//! A keyfile is a 32-byte random file.  When a vault is sealed with a
//! keyfile, both the password and the keyfile are required to derive the
//! master key.
//!
//! The combination is: `HMAC-SHA256(keyfile_bytes, password_bytes)`.
//! This combined value is then fed into Argon2id as the "password".
//!
//! The vault header only stores `base64(SHA-256(keyfile))`, which lets
//! `unlock` reject the wrong keyfile before paying for Argon2id.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::TryRngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::encryption::constant_time_eq;
use crate::errors::{EnvVaultError, Result};

/// Expected length of a keyfile in bytes (256 bits).
pub const KEYFILE_LEN: usize = 32;

/// Generate a new random keyfile and write it to `path`.
///
/// The file is written with restrictive permissions (owner-only read).
/// Returns the raw keyfile bytes so the caller can use them immediately.
pub fn generate_keyfile(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    if path.exists() {
        return Err(EnvVaultError::Keyfile(format!(
            "keyfile already exists at {}",
            path.display()
        )));
    }

    let mut keyfile = Zeroizing::new(vec![0u8; KEYFILE_LEN]);
    OsRng
        .try_fill_bytes(&mut keyfile)
        .map_err(|e| EnvVaultError::Randomness(e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                EnvVaultError::Keyfile(format!("cannot create keyfile directory: {e}"))
            })?;
        }
    }

    fs::write(path, keyfile.as_slice())
        .map_err(|e| EnvVaultError::Keyfile(format!("failed to write keyfile: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms).map_err(|e| {
            EnvVaultError::Keyfile(format!("failed to set keyfile permissions: {e}"))
        })?;
    }

    Ok(keyfile)
}

/// Load a keyfile from disk and validate its length.
pub fn load_keyfile(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    if !path.exists() {
        return Err(EnvVaultError::Keyfile(format!(
            "keyfile not found at {}",
            path.display()
        )));
    }

    let data = Zeroizing::new(
        fs::read(path)
            .map_err(|e| EnvVaultError::Keyfile(format!("failed to read keyfile: {e}")))?,
    );

    if data.len() != KEYFILE_LEN {
        return Err(EnvVaultError::Keyfile(format!(
            "keyfile must be exactly {} bytes, got {}",
            KEYFILE_LEN,
            data.len()
        )));
    }

    Ok(data)
}

/// Combine a password and keyfile into a single effective password.
pub fn combine_password_keyfile(
    password: &[u8],
    keyfile_bytes: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(keyfile_bytes)
        .map_err(|e| EnvVaultError::Keyfile(format!("HMAC init failed: {e}")))?;

    mac.update(password);

    Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
}

/// SHA-256 of the keyfile, base64-encoded for the vault header.
pub fn hash_keyfile(keyfile_bytes: &[u8]) -> String {
    BASE64.encode(Sha256::digest(keyfile_bytes))
}

/// Verify that a keyfile matches the hash stored in the header.
pub fn verify_keyfile_hash(keyfile_bytes: &[u8], expected_hash: &str) -> Result<()> {
    let actual_hash = hash_keyfile(keyfile_bytes);

    if constant_time_eq(actual_hash.as_bytes(), expected_hash.as_bytes()) {
        Ok(())
    } else {
        Err(EnvVaultError::KeyfileMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generate_and_load_keyfile_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.keyfile");

        let generated = generate_keyfile(&path).unwrap();
        assert_eq!(generated.len(), KEYFILE_LEN);

        let loaded = load_keyfile(&path).unwrap();
        assert_eq!(*generated, *loaded);
    }

    #[test]
    fn generate_keyfile_fails_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.keyfile");

        generate_keyfile(&path).unwrap();
        assert!(generate_keyfile(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn generated_keyfile_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("test.keyfile");
        generate_keyfile(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn load_keyfile_fails_if_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.keyfile");
        assert!(load_keyfile(&path).is_err());
    }

    #[test]
    fn load_keyfile_fails_on_wrong_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.keyfile");
        fs::write(&path, [0u8; 16]).unwrap();
        assert!(matches!(load_keyfile(&path), Err(EnvVaultError::Keyfile(_))));
    }

    #[test]
    fn combine_password_keyfile_is_deterministic() {
        let keyfile = [0xABu8; 32];
        let first = combine_password_keyfile(b"my-password", &keyfile).unwrap();
        let second = combine_password_keyfile(b"my-password", &keyfile).unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn combine_differs_with_different_inputs() {
        let a = combine_password_keyfile(b"password1", &[0xABu8; 32]).unwrap();
        let b = combine_password_keyfile(b"password1", &[0xCDu8; 32]).unwrap();
        let c = combine_password_keyfile(b"password2", &[0xABu8; 32]).unwrap();
        assert_ne!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn verify_keyfile_hash_accepts_correct_keyfile() {
        let keyfile = [0x42u8; 32];
        let hash = hash_keyfile(&keyfile);
        assert!(verify_keyfile_hash(&keyfile, &hash).is_ok());
    }

    #[test]
    fn verify_keyfile_hash_rejects_wrong_keyfile() {
        let hash = hash_keyfile(&[0x42u8; 32]);
        let result = verify_keyfile_hash(&[0x43u8; 32], &hash);
        assert!(matches!(result, Err(EnvVaultError::KeyfileMismatch)));
    }
}
