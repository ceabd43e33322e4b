//! High-level vault operations.
//!
//! `VaultStore` wraps the binary format layer, the crypto layer and the
//! persistence layer so the rest of an application can work with simple
//! method calls like `store.set("DB_URL", "postgres://...")`.
//!
//! A store moves through three states:
//!
//! ```text
//! Locked ──unlock──▶ Unlocked ──close──▶ Closed
//! ```
//!
//! - **Locked**: the file has been read and parsed; names are listable
//!   but no key has been derived.
//! - **Unlocked**: the master key and integrity key are resident, and
//!   per-secret keys are derived on first use and cached.
//! - **Closed**: every key has been wiped.  Terminal for this handle.
//!
//! Mutations change memory only and mark the store dirty; `commit`
//! writes them atomically.  Audit events for a mutation are delivered
//! only once the commit that made it durable has succeeded.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use zeroize::{Zeroize, Zeroizing};

use crate::audit::{self, AuditEvent, OperationKind, SharedSink};
use crate::crypto::encryption::{
    compute_integrity_tag, decrypt_secret, encrypt_secret, verify_integrity_tag, INTEGRITY_TAG_LEN,
};
use crate::crypto::kdf::{derive_master_key, generate_salt, Argon2Params, Auth};
use crate::crypto::keyfile;
use crate::crypto::keys::{DerivedKey, MasterKey};
use crate::errors::{EnvVaultError, Result};

use super::format::{self, VaultHeader};
use super::persist::{self, CommitMode};
use super::secret::{self, validate_secret_name, SecretEntry, SecretMetadata};

/// The lifecycle state of a `VaultStore`, as reported by `VaultStore::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Locked,
    Unlocked,
    Closed,
}

/// Tag-covered bytes exactly as read from disk, kept until unlock.
struct OnDisk {
    header_bytes: Vec<u8>,
    secrets_bytes: Vec<u8>,
    tag: [u8; INTEGRITY_TAG_LEN],
}

/// Key material held while a vault is unlocked.  Every key is wiped
/// when the session is dropped.
///
/// Cached keys are boxed so the map never moves key bytes when it grows.
struct Session {
    master_key: MasterKey,
    integrity_key: DerivedKey,
    key_cache: RefCell<HashMap<String, Box<DerivedKey>>>,
}

enum State {
    Locked(OnDisk),
    Unlocked(Session),
    Closed,
}

/// Result of re-encrypting a vault under a fresh salt.
struct Rekeyed {
    header: VaultHeader,
    entries: Vec<SecretEntry>,
    session: Session,
    bytes: Vec<u8>,
}

/// The main vault handle.  Create one with `VaultStore::create`, or
/// `VaultStore::load` + `unlock` (or `VaultStore::open` for both).
pub struct VaultStore {
    /// Path to the `.vault` file on disk.
    path: PathBuf,

    /// Format version the file was read with.
    version: u8,

    /// Header metadata (KDF parameters, salt, environment, timestamps).
    header: VaultHeader,

    /// Encrypted secrets in insertion order.
    entries: Vec<SecretEntry>,

    state: State,

    /// Whether memory holds changes that are not on disk yet.
    dirty: bool,

    /// Events for uncommitted mutations.
    pending: Vec<AuditEvent>,

    sink: Option<SharedSink>,
}

impl VaultStore {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a brand-new vault file at `path` and return it unlocked.
    ///
    /// Generates a random salt, derives the master key from `auth`, and
    /// writes an empty vault to disk.  Fails with `VaultAlreadyExists`
    /// if a file is already there.
    pub fn create(
        path: &Path,
        environment: &str,
        auth: &Auth<'_>,
        argon2_params: &Argon2Params,
    ) -> Result<Self> {
        Self::create_with_sink(path, environment, auth, argon2_params, None)
    }

    /// Like `create`, but attaches an audit sink before the first commit
    /// so the creation itself is recorded.
    pub fn create_with_sink(
        path: &Path,
        environment: &str,
        auth: &Auth<'_>,
        argon2_params: &Argon2Params,
        sink: Option<SharedSink>,
    ) -> Result<Self> {
        if path.exists() {
            return Err(EnvVaultError::VaultAlreadyExists(path.to_path_buf()));
        }
        argon2_params.validate()?;

        let salt = generate_salt()?;
        let master_key = derive_master_key(auth, &salt, argon2_params)?;
        let header = VaultHeader::new(
            environment,
            &salt,
            argon2_params,
            auth.keyfile().map(keyfile::hash_keyfile),
            secret::now(),
        );
        let session = Session::new(master_key, &salt)?;

        let bytes = seal(&header, &[], &session.integrity_key)?;
        persist::commit(path, &bytes, CommitMode::CreateNew)?;

        tracing::info!(path = %path.display(), env = environment, "vault created");
        audit::emit_all(
            sink.as_ref(),
            [AuditEvent::success(OperationKind::Create, environment)],
        );

        Ok(Self {
            path: path.to_path_buf(),
            version: format::CURRENT_VERSION,
            header,
            entries: Vec::new(),
            state: State::Unlocked(session),
            dirty: false,
            pending: Vec::new(),
            sink,
        })
    }

    /// Read and parse a vault file without unlocking it.
    ///
    /// Framing problems (magic, version, header length) are reported as
    /// such.  Anything wrong inside the tag-covered regions is reported
    /// as `Authentication`, exactly like a tampered file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = persist::read(path)?;
        let frame = format::split_frame(&data)?;

        let header = format::parse_header(frame.header_bytes)
            .map_err(|e| unreadable_region(path, "header", &e))?;
        let entries = format::parse_secrets(frame.secrets_bytes)
            .map_err(|e| unreadable_region(path, "secrets", &e))?;

        let mut tag = [0u8; INTEGRITY_TAG_LEN];
        tag.copy_from_slice(frame.tag);

        tracing::debug!(
            path = %path.display(),
            version = frame.version,
            secrets = entries.len(),
            "vault loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            version: frame.version,
            header,
            entries,
            state: State::Locked(OnDisk {
                header_bytes: frame.header_bytes.to_vec(),
                secrets_bytes: frame.secrets_bytes.to_vec(),
                tag,
            }),
            dirty: false,
            pending: Vec::new(),
            sink: None,
        })
    }

    /// Load and unlock in one step.
    pub fn open(path: &Path, auth: &Auth<'_>) -> Result<Self> {
        let mut store = Self::load(path)?;
        store.unlock(auth)?;
        Ok(store)
    }

    /// Attach an audit sink for subsequent commits.
    pub fn with_audit_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Derive the master key and verify the integrity tag.
    ///
    /// The keyfile is checked against the header hash before the
    /// expensive KDF runs.  The header's stored Argon2 parameters are
    /// always used, whatever the current configuration says.  On failure
    /// the store stays locked.
    pub fn unlock(&mut self, auth: &Auth<'_>) -> Result<()> {
        // 1. Only a locked store holds the raw bytes needed to verify.
        let on_disk = match &self.state {
            State::Locked(on_disk) => on_disk,
            State::Unlocked(_) => return Err(EnvVaultError::AlreadyUnlocked),
            State::Closed => return Err(EnvVaultError::VaultClosed),
        };

        // 2. Validate keyfile requirement.
        match (&self.header.keyfile_hash, auth.keyfile()) {
            (Some(expected), Some(kf)) => keyfile::verify_keyfile_hash(kf, expected)?,
            (Some(_), None) => return Err(EnvVaultError::KeyfileRequired),
            (None, Some(_)) => return Err(EnvVaultError::KeyfileMismatch),
            (None, None) => {}
        }

        // 3. Derive the master key using the stored Argon2 params.
        let master_key =
            derive_master_key(auth, &self.header.salt, &self.header.argon2_params())?;
        let session = Session::new(master_key, &self.header.salt)?;

        // 4. Verify the HMAC over the original bytes from disk.
        verify_integrity_tag(
            &session.integrity_key,
            &on_disk.header_bytes,
            &on_disk.secrets_bytes,
            &on_disk.tag,
        )?;

        // 5. Keep the keys; the raw bytes are no longer needed.
        self.state = State::Unlocked(session);
        tracing::debug!(path = %self.path.display(), env = %self.header.environment, "vault unlocked");
        Ok(())
    }

    /// Wipe all resident key material.  Uncommitted changes are dropped.
    ///
    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if matches!(self.state, State::Closed) {
            return;
        }
        if self.dirty {
            tracing::debug!(path = %self.path.display(), "closing vault with uncommitted changes");
        }
        self.state = State::Closed;
        self.pending.clear();
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), "vault closed");
    }

    pub fn state(&self) -> VaultState {
        match self.state {
            State::Locked(_) => VaultState::Locked,
            State::Unlocked(_) => VaultState::Unlocked,
            State::Closed => VaultState::Closed,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(self.state, State::Unlocked(_))
    }

    /// Whether there are changes that `commit` would write.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ------------------------------------------------------------------
    // Secret operations
    // ------------------------------------------------------------------

    /// Secret names in insertion order.  Works in every state.
    pub fn list(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Names and timestamps in insertion order, without decrypting.
    pub fn list_metadata(&self) -> Vec<SecretMetadata> {
        self.entries.iter().map(SecretEntry::metadata).collect()
    }

    /// Metadata-only check; no decryption is performed.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decrypt and return the value of a secret.
    pub fn get(&self, name: &str) -> Result<Zeroizing<Vec<u8>>> {
        let session = self.session()?;
        let entry = self
            .position(name)
            .map(|i| &self.entries[i])
            .ok_or_else(|| EnvVaultError::SecretNotFound(name.to_string()))?;

        let key = self.secret_key(session, name)?;
        decrypt_secret(&key, &entry.nonce, &entry.ciphertext)
    }

    /// `get` for values that are UTF-8 text.
    pub fn get_string(&self, name: &str) -> Result<Zeroizing<String>> {
        let mut bytes = self.get(name)?;
        let owned = std::mem::take(&mut *bytes);
        String::from_utf8(owned).map(Zeroizing::new).map_err(|e| {
            let mut bad_bytes = e.into_bytes();
            bad_bytes.zeroize();
            EnvVaultError::Serialization(format!("secret '{name}' is not valid UTF-8"))
        })
    }

    /// Add or overwrite a secret.
    ///
    /// Every call encrypts under a fresh nonce, even for an unchanged
    /// value.  An overwrite keeps the entry's position and `created_at`.
    pub fn set(&mut self, name: &str, value: impl AsRef<[u8]>) -> Result<()> {
        self.set_entry(name, value.as_ref())?;
        let event = self.event(OperationKind::Set).with_secret(name);
        self.pending.push(event);
        Ok(())
    }

    /// Remove a secret.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let session = self.session()?;
        let index = self
            .position(name)
            .ok_or_else(|| EnvVaultError::SecretNotFound(name.to_string()))?;
        session.key_cache.borrow_mut().remove(name);

        self.entries.remove(index);
        self.dirty = true;
        let event = self.event(OperationKind::Delete).with_secret(name);
        self.pending.push(event);
        Ok(())
    }

    /// Decrypt every secret into a name -> value map.
    pub fn export_plaintext(&self) -> Result<BTreeMap<String, Zeroizing<Vec<u8>>>> {
        self.session()?;
        self.entries
            .iter()
            .map(|e| Ok((e.name.clone(), self.get(&e.name)?)))
            .collect()
    }

    /// Set every name -> value pair.  All names are validated before
    /// anything changes.  Returns how many secrets were written.
    pub fn import_plaintext<I, K, V>(&mut self, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        self.session()?;
        let values: Vec<(K, V)> = values.into_iter().collect();
        for (name, _) in &values {
            validate_secret_name(name.as_ref())?;
        }

        for (name, value) in &values {
            self.set_entry(name.as_ref(), value.as_ref())?;
        }

        if !values.is_empty() {
            let event = self
                .event(OperationKind::Import)
                .with_detail(format!("{} secrets", values.len()));
            self.pending.push(event);
        }
        Ok(values.len())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Atomically write pending changes to disk.  A clean store is left
    /// untouched.
    ///
    /// If the write fails, the queued events are reported as failed and
    /// kept, so a later successful commit still delivers them.
    pub fn commit(&mut self) -> Result<()> {
        let session = self.session()?;
        if !self.dirty {
            return Ok(());
        }

        // 1. Encode header and secrets, then append the integrity tag.
        let bytes = seal(&self.header, &self.entries, &session.integrity_key)?;

        // 2. Write atomically.  Pending events stay queued for a retry.
        if let Err(err) = persist::commit(&self.path, &bytes, CommitMode::Replace) {
            self.report_failure(self.pending.iter().cloned(), &err);
            return Err(err);
        }

        // 3. Mark clean and deliver the queued events.
        self.dirty = false;
        tracing::info!(
            path = %self.path.display(),
            env = %self.header.environment,
            secrets = self.entries.len(),
            "vault committed"
        );
        self.flush_events();
        Ok(())
    }

    /// Re-encrypt everything under a new password (and keyfile).
    ///
    /// A new salt is generated, so every derived key changes.  Pass
    /// `Some(params)` to also change the Argon2 parameters; otherwise the
    /// current ones are kept.  The new vault is committed before this
    /// handle switches over, so on any failure both the file on disk and
    /// this handle still hold the old state, and a failed `Rotate` event
    /// is reported.  Uncommitted changes are committed along with the
    /// rotation.
    pub fn rotate_master_key(
        &mut self,
        new_auth: &Auth<'_>,
        argon2_params: Option<&Argon2Params>,
    ) -> Result<()> {
        let params = argon2_params
            .copied()
            .unwrap_or_else(|| self.header.argon2_params());
        let committed = self
            .rekey(
                new_auth,
                &params,
                &self.header.environment,
                self.header.created_at,
            )
            .and_then(|rekeyed| {
                persist::commit(&self.path, &rekeyed.bytes, CommitMode::Replace)?;
                Ok(rekeyed)
            });
        let rekeyed = match committed {
            Ok(rekeyed) => rekeyed,
            Err(err) => {
                self.report_failure([self.event(OperationKind::Rotate)], &err);
                return Err(err);
            }
        };

        self.header = rekeyed.header;
        self.entries = rekeyed.entries;
        self.state = State::Unlocked(rekeyed.session);
        self.dirty = false;

        tracing::info!(
            path = %self.path.display(),
            env = %self.header.environment,
            secrets = self.entries.len(),
            "master key rotated"
        );
        let event = self.event(OperationKind::Rotate);
        self.pending.push(event);
        self.flush_events();
        Ok(())
    }

    /// Write a copy of this vault to a new file under a fresh salt.
    ///
    /// Secrets are re-encrypted for the copy with keys derived from
    /// `auth` (which may be this vault's own credentials) under
    /// `argon2_params`.  Fails if `path` already exists.
    pub fn copy_to(
        &self,
        path: &Path,
        environment: &str,
        auth: &Auth<'_>,
        argon2_params: &Argon2Params,
    ) -> Result<VaultStore> {
        let rekeyed = self.rekey(auth, argon2_params, environment, secret::now())?;

        persist::commit(path, &rekeyed.bytes, CommitMode::CreateNew)?;

        Ok(Self {
            path: path.to_path_buf(),
            version: format::CURRENT_VERSION,
            header: rekeyed.header,
            entries: rekeyed.entries,
            state: State::Unlocked(rekeyed.session),
            dirty: false,
            pending: Vec::new(),
            sink: self.sink.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Returns the path to the vault file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the environment name recorded in the header (e.g. "dev").
    pub fn environment(&self) -> &str {
        &self.header.environment
    }

    /// Returns the vault header, e.g. to inspect stored Argon2 params.
    pub fn header(&self) -> &VaultHeader {
        &self.header
    }

    /// Returns the binary format version the file was read with.
    pub fn format_version(&self) -> u8 {
        self.version
    }

    /// Returns the vault creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.header.created_at
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn session(&self) -> Result<&Session> {
        match &self.state {
            State::Unlocked(session) => Ok(session),
            State::Locked(_) => Err(EnvVaultError::VaultLocked),
            State::Closed => Err(EnvVaultError::VaultClosed),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Per-secret key for `name`, derived on first use and then cached.
    fn secret_key(&self, session: &Session, name: &str) -> Result<DerivedKey> {
        if let Some(key) = session.key_cache.borrow().get(name) {
            return Ok(DerivedKey::clone(key));
        }
        tracing::debug!(secret = name, "deriving per-secret key");
        let key = session
            .master_key
            .derive_secret_key(&self.header.salt, name)?;
        session
            .key_cache
            .borrow_mut()
            .insert(name.to_string(), Box::new(key.clone()));
        Ok(key)
    }

    /// Encrypt and insert or overwrite one entry, without queuing an event.
    fn set_entry(&mut self, name: &str, value: &[u8]) -> Result<()> {
        validate_secret_name(name)?;
        let session = self.session()?;
        let key = self.secret_key(session, name)?;
        let (nonce, ciphertext) = encrypt_secret(&key, value)?;
        let now = secret::now();

        match self.position(name) {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.nonce = nonce;
                entry.ciphertext = ciphertext;
                entry.updated_at = now;
            }
            None => self.entries.push(SecretEntry {
                name: name.to_string(),
                nonce,
                ciphertext,
                created_at: now,
                updated_at: now,
            }),
        }

        self.dirty = true;
        Ok(())
    }

    /// Decrypt every entry and re-encrypt it under a new salt and master
    /// key, producing sealed file bytes.  Touches nothing on disk.
    fn rekey(
        &self,
        auth: &Auth<'_>,
        params: &Argon2Params,
        environment: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Rekeyed> {
        let session = self.session()?;
        params.validate()?;

        // 1. Fresh salt and master key, so no derived key survives.
        let salt = generate_salt()?;
        let master_key = derive_master_key(auth, &salt, params)?;

        // 2. Build the new header (store the params so unlock uses the same).
        let header = VaultHeader::new(
            environment,
            &salt,
            params,
            auth.keyfile().map(keyfile::hash_keyfile),
            created_at,
        );
        let new_session = Session::new(master_key, &salt)?;

        // 3. Decrypt each secret with its old key and re-encrypt it with
        //    the new one.  Timestamps are preserved.
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let old_key = self.secret_key(session, &entry.name)?;
            let plaintext = decrypt_secret(&old_key, &entry.nonce, &entry.ciphertext)?;

            let new_key = new_session
                .master_key
                .derive_secret_key(&salt, &entry.name)?;
            let (nonce, ciphertext) = encrypt_secret(&new_key, &plaintext)?;
            new_session
                .key_cache
                .borrow_mut()
                .insert(entry.name.clone(), Box::new(new_key));

            entries.push(SecretEntry {
                name: entry.name.clone(),
                nonce,
                ciphertext,
                created_at: entry.created_at,
                updated_at: entry.updated_at,
            });
        }

        // 4. Seal in memory; the caller decides where it lands.
        let bytes = seal(&header, &entries, &new_session.integrity_key)?;
        Ok(Rekeyed {
            header,
            entries,
            session: new_session,
            bytes,
        })
    }

    fn event(&self, kind: OperationKind) -> AuditEvent {
        AuditEvent::success(kind, &self.header.environment)
    }

    fn flush_events(&mut self) {
        let events = std::mem::take(&mut self.pending);
        audit::emit_all(self.sink.as_ref(), events);
    }

    /// Deliver `events` marked as failed by `err`.
    fn report_failure(&self, events: impl IntoIterator<Item = AuditEvent>, err: &EnvVaultError) {
        tracing::warn!(
            path = %self.path.display(),
            env = %self.header.environment,
            error = %err,
            "vault write failed"
        );
        let reason = err.to_string();
        audit::emit_all(
            self.sink.as_ref(),
            events.into_iter().map(|event| event.failed(&reason)),
        );
    }
}

impl Session {
    fn new(master_key: MasterKey, salt: &[u8]) -> Result<Self> {
        let integrity_key = master_key.derive_integrity_key(salt)?;
        Ok(Self {
            master_key,
            integrity_key,
            key_cache: RefCell::new(HashMap::new()),
        })
    }
}

impl fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultStore")
            .field("path", &self.path)
            .field("environment", &self.header.environment)
            .field("state", &self.state())
            .field("secrets", &self.entries.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Encode header + secrets and append the integrity tag.
fn seal(header: &VaultHeader, entries: &[SecretEntry], integrity_key: &DerivedKey) -> Result<Vec<u8>> {
    let encoded = format::encode(header, entries)?;
    let tag = compute_integrity_tag(integrity_key, &encoded.header_bytes, &encoded.secrets_bytes)?;
    encoded.seal(&tag)
}

/// Content inside the tag-covered regions that cannot be parsed is
/// indistinguishable from tampering to callers.
fn unreadable_region(path: &Path, region: &str, err: &EnvVaultError) -> EnvVaultError {
    tracing::debug!(path = %path.display(), region, error = %err, "vault region failed to parse");
    EnvVaultError::Authentication
}
