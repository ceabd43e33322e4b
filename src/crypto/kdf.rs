//! Password-based key derivation using Argon2id.
//!
//! Argon2id is a memory-hard KDF that protects against brute-force and
//! GPU-based attacks.  Parameters are configurable via `Argon2Params`
//! (loaded from `.envvault.toml` or sensible defaults) and are stored in
//! every vault header, so a vault always re-opens with the parameters it
//! was sealed with.
//!
//! When a keyfile is in play it is folded into the password *before* the
//! memory-hard step: `Argon2id(HMAC-SHA256(keyfile, password), salt)`.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::TryRngCore;
use zeroize::Zeroizing;

use super::keyfile;
use super::keys::{MasterKey, KEY_LEN};
use crate::errors::{EnvVaultError, Result};

/// Length of the salt in bytes (256 bits).
pub const SALT_LEN: usize = 32;

/// Minimum safe memory cost in KiB (8 MB).
pub const MIN_MEMORY_KIB: u32 = 8_192;

/// Configurable Argon2id parameters.
///
/// These map 1:1 to the fields in `Settings` and to the `kdf_*` keys of
/// the vault header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory cost in KiB (default: 65 536 = 64 MB).
    pub memory_kib: u32,
    /// Number of iterations (default: 3).
    pub iterations: u32,
    /// Parallelism lanes (default: 4).
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl Argon2Params {
    /// Reject parameters that would make the KDF dangerously cheap.
    pub fn validate(&self) -> Result<()> {
        if self.memory_kib < MIN_MEMORY_KIB {
            return Err(EnvVaultError::KeyDerivation(format!(
                "Argon2 memory_kib must be at least {MIN_MEMORY_KIB} (got {})",
                self.memory_kib
            )));
        }
        if self.iterations < 1 {
            return Err(EnvVaultError::KeyDerivation(
                "Argon2 iterations must be at least 1".into(),
            ));
        }
        if self.parallelism < 1 {
            return Err(EnvVaultError::KeyDerivation(
                "Argon2 parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How a vault is unlocked: a password alone, or a password plus keyfile.
#[derive(Clone, Copy)]
pub enum Auth<'a> {
    Password(&'a [u8]),
    PasswordAndKeyfile { password: &'a [u8], keyfile: &'a [u8] },
}

impl<'a> Auth<'a> {
    /// Build an `Auth` from a password and an optional keyfile.
    pub fn new(password: &'a [u8], keyfile: Option<&'a [u8]>) -> Self {
        match keyfile {
            Some(keyfile) => Self::PasswordAndKeyfile { password, keyfile },
            None => Self::Password(password),
        }
    }

    pub fn password(&self) -> &'a [u8] {
        match *self {
            Self::Password(password) | Self::PasswordAndKeyfile { password, .. } => password,
        }
    }

    pub fn keyfile(&self) -> Option<&'a [u8]> {
        match *self {
            Self::Password(_) => None,
            Self::PasswordAndKeyfile { keyfile, .. } => Some(keyfile),
        }
    }

    /// The bytes actually fed to Argon2id.
    fn effective_password(&self) -> Result<Zeroizing<Vec<u8>>> {
        match *self {
            Self::Password(password) => Ok(Zeroizing::new(password.to_vec())),
            Self::PasswordAndKeyfile { password, keyfile } => {
                keyfile::combine_password_keyfile(password, keyfile)
            }
        }
    }
}

impl fmt::Debug for Auth<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Auth::Password(..)"),
            Self::PasswordAndKeyfile { .. } => f.write_str("Auth::PasswordAndKeyfile(..)"),
        }
    }
}

/// Derive the master key for `auth` with explicit Argon2id parameters.
///
/// The same auth + salt + params will always produce the same key.
pub fn derive_master_key(
    auth: &Auth<'_>,
    salt: &[u8],
    argon2_params: &Argon2Params,
) -> Result<MasterKey> {
    let effective_password = auth.effective_password()?;
    let bytes = derive_raw(&effective_password, salt, argon2_params)?;
    Ok(MasterKey::new(*bytes))
}

/// Run Argon2id over already-combined password material.
fn derive_raw(
    password: &[u8],
    salt: &[u8],
    argon2_params: &Argon2Params,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    argon2_params.validate()?;

    let params = Params::new(
        argon2_params.memory_kib,
        argon2_params.iterations,
        argon2_params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| EnvVaultError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password, salt, &mut key[..])
        .map_err(|e| EnvVaultError::KeyDerivation(format!("Argon2id hashing failed: {e}")))?;

    Ok(key)
}

/// Generate a random 32-byte salt from the operating system's CSPRNG.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| EnvVaultError::Randomness(e.to_string()))?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Argon2Params = Argon2Params {
        memory_kib: MIN_MEMORY_KIB,
        iterations: 1,
        parallelism: 1,
    };

    #[test]
    fn rejects_weak_memory_cost() {
        let params = Argon2Params {
            memory_kib: 1024,
            ..FAST
        };
        let salt = [0u8; SALT_LEN];
        let err = derive_master_key(&Auth::Password(b"pw"), &salt, &params).unwrap_err();
        assert!(matches!(err, EnvVaultError::KeyDerivation(_)));
    }

    #[test]
    fn rejects_zero_iterations_and_lanes() {
        assert!(Argon2Params { iterations: 0, ..FAST }.validate().is_err());
        assert!(Argon2Params { parallelism: 0, ..FAST }.validate().is_err());
        assert!(FAST.validate().is_ok());
    }

    #[test]
    fn keyfile_changes_the_master_key() {
        let salt = generate_salt().unwrap();
        let keyfile = [0x5Au8; 32];

        let plain = derive_master_key(&Auth::Password(b"pw"), &salt, &FAST).unwrap();
        let combined = derive_master_key(
            &Auth::PasswordAndKeyfile {
                password: b"pw",
                keyfile: &keyfile,
            },
            &salt,
            &FAST,
        )
        .unwrap();

        assert_ne!(plain.as_bytes(), combined.as_bytes());
    }

    #[test]
    fn auth_new_picks_variant() {
        assert!(Auth::new(b"pw", None).keyfile().is_none());
        let kf = [1u8; 32];
        let auth = Auth::new(b"pw", Some(&kf[..]));
        assert_eq!(auth.keyfile(), Some(&kf[..]));
        assert_eq!(auth.password(), b"pw");
    }

    #[test]
    fn auth_debug_hides_material() {
        let rendered = format!("{:?}", Auth::Password(b"hunter2"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn salts_are_random() {
        assert_ne!(generate_salt().unwrap(), generate_salt().unwrap());
    }
}
