//! Cryptographic primitives for EnvVault.
//!
//! This module provides:
//! - AES-256-GCM secret encryption and the HMAC integrity tag (`encryption`)
//! - Argon2id password-based key derivation and the `Auth` factors (`kdf`)
//! - Keyfile generation, loading and hashing (`keyfile`)
//! - HKDF-based per-secret and integrity key derivation (`keys`)

pub mod encryption;
pub mod kdf;
pub mod keyfile;
pub mod keys;

pub use encryption::{
    compute_integrity_tag, constant_time_eq, decrypt_secret, encrypt_secret,
    verify_integrity_tag,
};
pub use kdf::{derive_master_key, generate_salt, Argon2Params, Auth};
pub use keyfile::{generate_keyfile, hash_keyfile, load_keyfile};
pub use keys::{derive_integrity_key, derive_secret_key, DerivedKey, MasterKey};
