//! Vault module: encrypted secret storage.
//!
//! This module provides:
//! - `SecretEntry` and `SecretMetadata` types (`secret`)
//! - Binary vault file format with an HMAC integrity tag (`format`)
//! - Atomic write-then-rename persistence (`persist`)
//! - High-level `VaultStore` with the lock/unlock lifecycle (`store`)

pub mod format;
pub mod persist;
pub mod secret;
pub mod store;

// Re-export the most commonly used items.
pub use format::{FormatFlags, VaultHeader};
pub use secret::{validate_secret_name, SecretEntry, SecretMetadata};
pub use store::{VaultState, VaultStore};
