//! Compare the secrets of two unlocked vaults.
//!
//! Names are partitioned into four sorted groups: only in A, only in B,
//! in both with different values, and in both with identical values.
//! Values are compared as decrypted plaintext (ciphertexts always differ
//! because every encryption uses a fresh nonce) and the comparison is
//! constant-time.

use std::collections::{BTreeMap, BTreeSet};

use zeroize::Zeroizing;

use crate::crypto::encryption::constant_time_eq;
use crate::errors::Result;
use crate::vault::VaultStore;

/// Plaintext values for one name present in both vaults.
#[derive(Debug)]
pub struct ValuePair {
    pub a: Zeroizing<Vec<u8>>,
    pub b: Zeroizing<Vec<u8>>,
}

/// Outcome of comparing two vaults.
#[derive(Debug, Default)]
pub struct VaultDiff {
    pub only_in_a: Vec<String>,
    pub only_in_b: Vec<String>,
    pub differing: Vec<String>,
    pub identical: Vec<String>,
    /// Plaintext pairs for `differing` and `identical` names; only filled
    /// when values were requested.
    pub values: Option<BTreeMap<String, ValuePair>>,
}

impl VaultDiff {
    /// True when both vaults hold exactly the same names and values.
    pub fn is_empty(&self) -> bool {
        self.only_in_a.is_empty() && self.only_in_b.is_empty() && self.differing.is_empty()
    }
}

/// Compare vault `a` against vault `b`.  Both must be unlocked.
///
/// With `show_values = false` only names are returned.
pub fn diff(a: &VaultStore, b: &VaultStore, show_values: bool) -> Result<VaultDiff> {
    let a_values = a.export_plaintext()?;
    let b_values = b.export_plaintext()?;

    let a_names: BTreeSet<&String> = a_values.keys().collect();
    let b_names: BTreeSet<&String> = b_values.keys().collect();

    let only_in_a: Vec<String> = a_names
        .difference(&b_names)
        .map(|k| (*k).clone())
        .collect();
    let only_in_b: Vec<String> = b_names
        .difference(&a_names)
        .map(|k| (*k).clone())
        .collect();

    let mut differing = Vec::new();
    let mut identical = Vec::new();
    let mut values = show_values.then(BTreeMap::new);

    for name in a_names.intersection(&b_names) {
        let a_value = &a_values[*name];
        let b_value = &b_values[*name];

        if constant_time_eq(a_value, b_value) {
            identical.push((*name).clone());
        } else {
            differing.push((*name).clone());
        }

        if let Some(values) = values.as_mut() {
            values.insert(
                (*name).clone(),
                ValuePair {
                    a: a_value.clone(),
                    b: b_value.clone(),
                },
            );
        }
    }

    tracing::debug!(
        a = a.environment(),
        b = b.environment(),
        only_in_a = only_in_a.len(),
        only_in_b = only_in_b.len(),
        differing = differing.len(),
        identical = identical.len(),
        "vaults compared"
    );

    Ok(VaultDiff {
        only_in_a,
        only_in_b,
        differing,
        identical,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::{Argon2Params, Auth};
    use crate::errors::EnvVaultError;
    use tempfile::TempDir;

    const FAST: Argon2Params = Argon2Params {
        memory_kib: 8_192,
        iterations: 1,
        parallelism: 1,
    };

    fn vault(dir: &TempDir, env: &str, secrets: &[(&str, &str)]) -> VaultStore {
        let path = dir.path().join(format!("{env}.vault"));
        let mut store = VaultStore::create(&path, env, &Auth::Password(b"pw"), &FAST).unwrap();
        store.import_plaintext(secrets.iter().copied()).unwrap();
        store.commit().unwrap();
        store
    }

    #[test]
    fn partitions_names() {
        let dir = TempDir::new().unwrap();
        let a = vault(&dir, "a", &[("SAME", "1"), ("CHANGED", "x"), ("ONLY_A", "a")]);
        let b = vault(&dir, "b", &[("SAME", "1"), ("CHANGED", "y"), ("ONLY_B", "b")]);

        let d = diff(&a, &b, false).unwrap();
        assert_eq!(d.only_in_a, vec!["ONLY_A"]);
        assert_eq!(d.only_in_b, vec!["ONLY_B"]);
        assert_eq!(d.differing, vec!["CHANGED"]);
        assert_eq!(d.identical, vec!["SAME"]);
        assert!(d.values.is_none());
        assert!(!d.is_empty());
    }

    #[test]
    fn show_values_returns_plaintext_pairs() {
        let dir = TempDir::new().unwrap();
        let a = vault(&dir, "a", &[("K", "old"), ("SAME", "s")]);
        let b = vault(&dir, "b", &[("K", "new"), ("SAME", "s")]);

        let d = diff(&a, &b, true).unwrap();
        let values = d.values.unwrap();
        assert_eq!(values["K"].a.as_slice(), b"old");
        assert_eq!(values["K"].b.as_slice(), b"new");
        assert_eq!(values["SAME"].a.as_slice(), b"s");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn same_vault_is_identical() {
        let dir = TempDir::new().unwrap();
        let a = vault(&dir, "a", &[("X", "1"), ("Y", "2")]);

        let d = diff(&a, &a, false).unwrap();
        assert!(d.is_empty());
        assert_eq!(d.identical, vec!["X", "Y"]);
    }

    #[test]
    fn locked_vault_cannot_be_compared() {
        let dir = TempDir::new().unwrap();
        let a = vault(&dir, "a", &[("X", "1")]);
        let locked = VaultStore::load(a.path()).unwrap();
        assert!(matches!(diff(&a, &locked, false), Err(EnvVaultError::VaultLocked)));
    }
}
