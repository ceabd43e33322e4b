//! Password caching through an external credential store.
//!
//! The engine never talks to an OS keyring directly.  Hosts plug one in
//! by implementing `CredentialStore`; entries are keyed by vault path so
//! different relative paths to the same vault resolve to the same entry.
//!
//! `resolve_password` asks the store first and only falls back to the
//! caller's prompt when nothing is cached.  Storing a password is always
//! the caller's decision.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use zeroize::Zeroizing;

use crate::errors::{EnvVaultError, Result};

/// Build a credential entry key from a vault path.
///
/// Uses the canonical path when the file exists.
pub fn entry_key(vault_path: &Path) -> String {
    let resolved = vault_path
        .canonicalize()
        .unwrap_or_else(|_| vault_path.to_path_buf());
    format!("vault:{}", resolved.display())
}

/// A secure place to cache vault passwords (Keychain, Credential
/// Manager, Secret Service, ...).
pub trait CredentialStore: Send + Sync {
    /// Store a password for a specific vault.
    fn store(&self, vault_path: &Path, password: &str) -> Result<()>;

    /// Retrieve a password for a specific vault.
    ///
    /// Returns `None` if no password is stored (rather than an error).
    fn retrieve(&self, vault_path: &Path) -> Result<Option<Zeroizing<String>>>;

    /// Delete a stored password.  Deleting a missing entry succeeds.
    fn delete(&self, vault_path: &Path) -> Result<()>;
}

/// Process-local credential store.  Nothing outlives the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Zeroizing<String>>>> {
        self.entries
            .lock()
            .map_err(|_| EnvVaultError::Credential("credential store lock poisoned".into()))
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("MemoryCredentialStore")
            .field("entries", &count)
            .finish()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store(&self, vault_path: &Path, password: &str) -> Result<()> {
        self.entries()?
            .insert(entry_key(vault_path), Zeroizing::new(password.to_string()));
        Ok(())
    }

    fn retrieve(&self, vault_path: &Path) -> Result<Option<Zeroizing<String>>> {
        Ok(self.entries()?.get(&entry_key(vault_path)).cloned())
    }

    fn delete(&self, vault_path: &Path) -> Result<()> {
        self.entries()?.remove(&entry_key(vault_path));
        Ok(())
    }
}

/// Get the password for `vault_path`: from `store` if it has one cached,
/// otherwise from `prompt`.
///
/// A failing store is logged and treated as "nothing cached" so the
/// user can still type the password.
pub fn resolve_password<F>(
    store: Option<&dyn CredentialStore>,
    vault_path: &Path,
    prompt: F,
) -> Result<Zeroizing<String>>
where
    F: FnOnce() -> Result<Zeroizing<String>>,
{
    if let Some(store) = store {
        match store.retrieve(vault_path) {
            Ok(Some(password)) => {
                tracing::debug!(path = %vault_path.display(), "password taken from credential store");
                return Ok(password);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    path = %vault_path.display(),
                    error = %err,
                    "credential store unavailable; prompting"
                );
            }
        }
    }
    prompt()
}
