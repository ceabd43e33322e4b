use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in the EnvVault engine.
///
/// Messages never include secret values, key material, or the reason a
/// cryptographic check failed.
#[derive(Debug, Error)]
pub enum EnvVaultError {
    // --- Format errors ---
    #[error("Invalid vault format: {0}")]
    Format(String),

    #[error("Unsupported vault version {found} (this build understands up to {supported})")]
    UnsupportedVersion { found: u8, supported: u8 },

    #[error("Vault data truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    // --- Authentication errors ---
    /// Wrong password, wrong keyfile, or a tampered file. Deliberately
    /// indistinguishable.
    #[error("Authentication failed: wrong password or corrupted vault")]
    Authentication,

    #[error("Keyfile does not match this vault")]
    KeyfileMismatch,

    #[error("This vault requires a keyfile")]
    KeyfileRequired,

    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Random number generator failed: {0}")]
    Randomness(String),

    // --- Vault errors ---
    #[error("Vault not found at {0}")]
    VaultNotFound(PathBuf),

    #[error("Vault already exists at {0}")]
    VaultAlreadyExists(PathBuf),

    #[error("Secret '{0}' not found")]
    SecretNotFound(String),

    #[error("Invalid secret name: {0}")]
    InvalidSecretName(String),

    #[error("Vault is locked; unlock it first")]
    VaultLocked,

    #[error("Vault is closed; open it again to continue")]
    VaultClosed,

    #[error("Vault is already unlocked")]
    AlreadyUnlocked,

    // --- Environment errors ---
    #[error("Environment '{0}' not found; no vault file exists")]
    EnvironmentNotFound(String),

    #[error("Environment '{0}' already exists")]
    Duplicate(String),

    #[error("Invalid environment name: {0}")]
    InvalidEnvironmentName(String),

    // --- Keyfile errors ---
    #[error("Keyfile error: {0}")]
    Keyfile(String),

    // --- Collaborator errors ---
    #[error("Credential store error: {0}")]
    Credential(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    Config(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience type alias for EnvVault results.
pub type Result<T> = std::result::Result<T, EnvVaultError>;
