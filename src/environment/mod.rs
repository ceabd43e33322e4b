//! Named environments.
//!
//! Each environment (dev, staging, prod, ...) is one `<name>.vault` file
//! inside the project's vault directory.  `EnvironmentManager` maps
//! names to paths and implements create, clone, list and delete on top
//! of `VaultStore`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::audit::{self, AuditEvent, OperationKind, SharedSink};
use crate::config::Settings;
use crate::crypto::kdf::{Argon2Params, Auth};
use crate::errors::{EnvVaultError, Result};
use crate::vault::{validate_secret_name, VaultStore};

/// File extension of vault files.
pub const VAULT_EXTENSION: &str = "vault";

/// Longest environment name accepted.
pub const MAX_ENV_NAME_LEN: usize = 64;

/// Information about a vault environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInfo {
    pub name: String,
    pub size: u64,
}

/// Manages the set of vault files in one vault directory.
pub struct EnvironmentManager {
    vault_dir: PathBuf,
    argon2_params: Argon2Params,
    sink: Option<SharedSink>,
}

impl EnvironmentManager {
    /// A manager for `vault_dir` using default Argon2 parameters for new
    /// vaults.
    pub fn new(vault_dir: impl Into<PathBuf>) -> Self {
        Self {
            vault_dir: vault_dir.into(),
            argon2_params: Argon2Params::default(),
            sink: None,
        }
    }

    /// A manager for the vault directory and parameters configured in
    /// `settings`.
    pub fn from_settings(project_dir: &Path, settings: &Settings) -> Result<Self> {
        Ok(Self::new(settings.vault_dir(project_dir))
            .with_argon2_params(settings.argon2_params()?))
    }

    /// Argon2 parameters for vaults this manager creates.
    pub fn with_argon2_params(mut self, params: Argon2Params) -> Self {
        self.argon2_params = params;
        self
    }

    /// Attach an audit sink to the manager and every vault it opens.
    pub fn with_audit_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn vault_dir(&self) -> &Path {
        &self.vault_dir
    }

    pub fn argon2_params(&self) -> &Argon2Params {
        &self.argon2_params
    }

    /// Path of the vault file for `env`.
    pub fn vault_path(&self, env: &str) -> Result<PathBuf> {
        validate_env_name(env)?;
        Ok(self.vault_dir.join(format!("{env}.{VAULT_EXTENSION}")))
    }

    pub fn exists(&self, env: &str) -> Result<bool> {
        Ok(self.vault_path(env)?.is_file())
    }

    /// Every `*.vault` file in the vault directory, sorted by name.
    ///
    /// A vault directory that does not exist yet has no environments.
    /// Files whose stem is not a valid environment name are skipped.
    pub fn list(&self) -> Result<Vec<EnvironmentInfo>> {
        let entries = match fs::read_dir(&self.vault_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut envs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == VAULT_EXTENSION) {
                if let Some(stem) = path.file_stem() {
                    let name = stem.to_string_lossy().to_string();
                    if validate_env_name(&name).is_err() {
                        tracing::debug!(
                            path = %path.display(),
                            "skipping vault file with an invalid environment name"
                        );
                        continue;
                    }
                    let size = entry.metadata()?.len();
                    envs.push(EnvironmentInfo { name, size });
                }
            }
        }

        envs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(envs)
    }

    /// Create an empty vault for `env`.
    pub fn create(&self, env: &str, auth: &Auth<'_>) -> Result<VaultStore> {
        self.create_seeded(env, auth, std::iter::empty::<(&str, &[u8])>())
    }

    /// Create a vault for `env` pre-filled with `seed` (e.g. an imported
    /// `.env` file).  Seed names are validated before anything is
    /// written.
    pub fn create_seeded<I, K, V>(&self, env: &str, auth: &Auth<'_>, seed: I) -> Result<VaultStore>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let path = self.vault_path(env)?;
        if path.exists() {
            return Err(EnvVaultError::Duplicate(env.to_string()));
        }

        let seed: Vec<(K, V)> = seed.into_iter().collect();
        for (name, _) in &seed {
            validate_secret_name(name.as_ref())?;
        }

        self.ensure_vault_dir()?;
        let mut store = VaultStore::create_with_sink(
            &path,
            env,
            auth,
            &self.argon2_params,
            self.sink.clone(),
        )
        .map_err(|e| duplicate_if_exists(e, env))?;

        if !seed.is_empty() {
            store.import_plaintext(seed)?;
            store.commit()?;
        }
        Ok(store)
    }

    /// Read `env` without unlocking it.
    pub fn load(&self, env: &str) -> Result<VaultStore> {
        let path = self.existing_path(env)?;
        let store = VaultStore::load(&path)?;
        Ok(self.attach_sink(store))
    }

    /// Open and unlock `env`.
    pub fn open(&self, env: &str, auth: &Auth<'_>) -> Result<VaultStore> {
        let mut store = self.load(env)?;
        store.unlock(auth)?;
        Ok(store)
    }

    /// Copy every secret of `source` into a new environment `target`.
    ///
    /// The copy always gets its own salt, so no derived key is shared
    /// between the two vaults.  The target is keyed with this manager's
    /// Argon2 parameters.  With `new_auth = None` the target is unlocked
    /// with the same credentials as the source.  Fails with `Duplicate`
    /// if `target` already exists.
    pub fn clone(
        &self,
        source: &str,
        target: &str,
        source_auth: &Auth<'_>,
        new_auth: Option<&Auth<'_>>,
    ) -> Result<VaultStore> {
        let target_path = self.vault_path(target)?;
        if target_path.exists() {
            return Err(EnvVaultError::Duplicate(target.to_string()));
        }

        let mut source_store = self.open(source, source_auth)?;
        let target_store = source_store
            .copy_to(
                &target_path,
                target,
                new_auth.unwrap_or(source_auth),
                &self.argon2_params,
            )
            .map_err(|e| duplicate_if_exists(e, target))?;
        source_store.close();

        tracing::info!(
            source,
            target,
            secrets = target_store.len(),
            "environment cloned"
        );
        audit::emit_all(
            self.sink.as_ref(),
            [AuditEvent::success(OperationKind::Clone, target)
                .with_detail(format!("{} secrets from {source}", target_store.len()))],
        );

        Ok(target_store)
    }

    /// Remove the vault file for `env`.
    ///
    /// Confirmation is the caller's job; this deletes unconditionally.
    pub fn delete(&self, env: &str) -> Result<()> {
        let path = self.existing_path(env)?;
        fs::remove_file(&path)?;

        tracing::info!(env, path = %path.display(), "environment deleted");
        audit::emit_all(
            self.sink.as_ref(),
            [AuditEvent::success(OperationKind::EnvDelete, env)],
        );
        Ok(())
    }

    fn existing_path(&self, env: &str) -> Result<PathBuf> {
        let path = self.vault_path(env)?;
        if !path.is_file() {
            return Err(EnvVaultError::EnvironmentNotFound(env.to_string()));
        }
        Ok(path)
    }

    fn attach_sink(&self, store: VaultStore) -> VaultStore {
        match &self.sink {
            Some(sink) => store.with_audit_sink(sink.clone()),
            None => store,
        }
    }

    /// Create the vault directory, owner-only on Unix.
    fn ensure_vault_dir(&self) -> Result<()> {
        if self.vault_dir.is_dir() {
            return Ok(());
        }

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.vault_dir)?;
        Ok(())
    }
}

impl std::fmt::Debug for EnvironmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentManager")
            .field("vault_dir", &self.vault_dir)
            .field("argon2_params", &self.argon2_params)
            .field("audit_sink", &self.sink.is_some())
            .finish()
    }
}

fn duplicate_if_exists(err: EnvVaultError, env: &str) -> EnvVaultError {
    match err {
        EnvVaultError::VaultAlreadyExists(_) => EnvVaultError::Duplicate(env.to_string()),
        other => other,
    }
}

/// Validate that an environment name is safe and sensible.
///
/// Allowed: lowercase ASCII letters, digits, and hyphens.  Must be 1-64
/// characters and must not start or end with a hyphen.
pub fn validate_env_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EnvVaultError::InvalidEnvironmentName(
            "environment name cannot be empty".into(),
        ));
    }

    if name.len() > MAX_ENV_NAME_LEN {
        return Err(EnvVaultError::InvalidEnvironmentName(format!(
            "environment name cannot exceed {MAX_ENV_NAME_LEN} characters"
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(EnvVaultError::InvalidEnvironmentName(format!(
            "'{name}' is invalid; only lowercase letters, digits, and hyphens are allowed"
        )));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(EnvVaultError::InvalidEnvironmentName(format!(
            "'{name}' cannot start or end with a hyphen"
        )));
    }

    Ok(())
}
