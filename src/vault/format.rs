//! Binary vault file format.
//!
//! A `.vault` file has this layout (all lengths big-endian):
//!
//! ```text
//! [EVLT: 4 bytes][version: 1 byte][header_len: 4 bytes][header JSON][secrets block][HMAC-SHA256: 32 bytes]
//! ```
//!
//! - **Magic** (`EVLT`): identifies the file as an EnvVault vault.
//! - **Version**: format version (currently `1`).
//! - **Header length**: where the header JSON ends and the secrets block begins.
//! - **Header JSON**: serialized `VaultHeader`; unknown keys are rejected.
//! - **Secrets block**: binary records, so ciphertext is stored as raw bytes:
//!
//! ```text
//! [entry_count: u32]
//! per entry:
//!   [name_len: u16][name]
//!   [created_at: i64 ms][updated_at: i64 ms]
//!   [nonce: 12 bytes]
//!   [ciphertext_len: u32][ciphertext || gcm_tag]
//! ```
//!
//! - **Integrity tag**: HMAC-SHA256 over exactly the header and secrets
//!   byte ranges.
//!
//! Every declared length is checked against the bytes that remain before
//! anything is interpreted.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::secret::SecretEntry;
use crate::crypto::encryption::{INTEGRITY_TAG_LEN, NONCE_LEN};
use crate::crypto::kdf::{Argon2Params, SALT_LEN};
use crate::errors::{EnvVaultError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every vault file.
pub const MAGIC: &[u8; 4] = b"EVLT";

/// Highest binary format version this build reads and the one it writes.
pub const CURRENT_VERSION: u8 = 1;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
pub const PREFIX_LEN: usize = 9;

bitflags! {
    /// Feature bits recorded in the header's `format_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatFlags: u32 {
        /// A keyfile is combined with the password; `keyfile_hash` is present.
        const KEYFILE = 1;
    }
}

// ---------------------------------------------------------------------------
// VaultHeader
// ---------------------------------------------------------------------------

/// Structured metadata stored at the beginning of a vault file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultHeader {
    /// Argon2id memory cost in KiB.
    pub kdf_memory_kib: u32,

    /// Argon2id iteration count.
    pub kdf_iterations: u32,

    /// Argon2id lanes.
    pub kdf_parallelism: u32,

    /// The salt used for Argon2id and for HKDF labels (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    /// SHA-256 hash of the keyfile (base64), if the vault requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile_hash: Option<String>,

    /// Raw `FormatFlags` bits.
    pub format_flags: u32,

    /// Environment name the vault was created for (e.g. "dev").
    pub environment: String,

    /// When this vault was first created.
    pub created_at: DateTime<Utc>,
}

impl VaultHeader {
    /// Build a header for a freshly salted vault.
    pub fn new(
        environment: &str,
        salt: &[u8],
        params: &Argon2Params,
        keyfile_hash: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let flags = if keyfile_hash.is_some() {
            FormatFlags::KEYFILE
        } else {
            FormatFlags::empty()
        };
        Self {
            kdf_memory_kib: params.memory_kib,
            kdf_iterations: params.iterations,
            kdf_parallelism: params.parallelism,
            salt: salt.to_vec(),
            keyfile_hash,
            format_flags: flags.bits(),
            environment: environment.to_string(),
            created_at,
        }
    }

    /// The Argon2id parameters this vault was sealed with.
    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }

    /// Decode `format_flags`, rejecting bits this build does not know.
    pub fn flags(&self) -> Result<FormatFlags> {
        FormatFlags::from_bits(self.format_flags).ok_or_else(|| {
            EnvVaultError::Format(format!("unknown format flags {:#x}", self.format_flags))
        })
    }

    /// Whether unlocking needs a keyfile.
    pub fn requires_keyfile(&self) -> bool {
        self.keyfile_hash.is_some()
    }

    /// Check the cross-field invariants of a decoded header.
    pub fn validate(&self) -> Result<()> {
        if self.salt.len() != SALT_LEN {
            return Err(EnvVaultError::Format(format!(
                "salt must be {SALT_LEN} bytes, got {}",
                self.salt.len()
            )));
        }
        let flags = self.flags()?;
        if flags.contains(FormatFlags::KEYFILE) != self.keyfile_hash.is_some() {
            return Err(EnvVaultError::Format(
                "keyfile flag and keyfile_hash disagree".into(),
            ));
        }
        self.argon2_params()
            .validate()
            .map_err(|e| EnvVaultError::Format(format!("header KDF parameters: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// The two tag-covered regions of a vault, ready to be sealed.
#[derive(Debug, Clone)]
pub struct EncodedVault {
    pub header_bytes: Vec<u8>,
    pub secrets_bytes: Vec<u8>,
}

impl EncodedVault {
    /// Assemble the final file bytes with the given integrity tag.
    pub fn seal(self, tag: &[u8; INTEGRITY_TAG_LEN]) -> Result<Vec<u8>> {
        let header_len = u32::try_from(self.header_bytes.len()).map_err(|_| {
            EnvVaultError::Serialization(format!(
                "header length {} exceeds u32::MAX",
                self.header_bytes.len()
            ))
        })?;

        let total =
            PREFIX_LEN + self.header_bytes.len() + self.secrets_bytes.len() + INTEGRITY_TAG_LEN;
        let mut buf = Vec::with_capacity(total);

        buf.extend_from_slice(MAGIC);
        buf.push(CURRENT_VERSION);
        buf.extend_from_slice(&header_len.to_be_bytes());
        buf.extend_from_slice(&self.header_bytes);
        buf.extend_from_slice(&self.secrets_bytes);
        buf.extend_from_slice(tag);

        Ok(buf)
    }
}

/// Encode a header and an ordered list of secrets into their regions.
pub fn encode(header: &VaultHeader, secrets: &[SecretEntry]) -> Result<EncodedVault> {
    let header_bytes = serde_json::to_vec(header)
        .map_err(|e| EnvVaultError::Serialization(format!("header: {e}")))?;
    let secrets_bytes = encode_secrets(secrets)?;
    Ok(EncodedVault {
        header_bytes,
        secrets_bytes,
    })
}

/// Encode the secrets block.
pub fn encode_secrets(secrets: &[SecretEntry]) -> Result<Vec<u8>> {
    let count = u32::try_from(secrets.len())
        .map_err(|_| EnvVaultError::Serialization("too many secrets".into()))?;

    let mut buf = Vec::new();
    buf.extend_from_slice(&count.to_be_bytes());

    for entry in secrets {
        let name_len = u16::try_from(entry.name.len()).map_err(|_| {
            EnvVaultError::Serialization(format!("secret name '{}' is too long", entry.name))
        })?;
        let ct_len = u32::try_from(entry.ciphertext.len()).map_err(|_| {
            EnvVaultError::Serialization(format!("secret '{}' is too large", entry.name))
        })?;

        buf.extend_from_slice(&name_len.to_be_bytes());
        buf.extend_from_slice(entry.name.as_bytes());
        buf.extend_from_slice(&entry.created_at.timestamp_millis().to_be_bytes());
        buf.extend_from_slice(&entry.updated_at.timestamp_millis().to_be_bytes());
        buf.extend_from_slice(&entry.nonce);
        buf.extend_from_slice(&ct_len.to_be_bytes());
        buf.extend_from_slice(&entry.ciphertext);
    }

    Ok(buf)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// The framed regions of a vault file, not yet interpreted.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub version: u8,
    pub header_bytes: &'a [u8],
    pub secrets_bytes: &'a [u8],
    pub tag: &'a [u8],
}

/// A fully decoded vault file.
///
/// Keeps the original region bytes so the integrity tag can be verified
/// over exactly what was on disk, with no re-serialization.
#[derive(Debug, Clone)]
pub struct DecodedVault {
    pub header: VaultHeader,
    pub secrets: Vec<SecretEntry>,
    pub header_bytes: Vec<u8>,
    pub secrets_bytes: Vec<u8>,
    pub tag: [u8; INTEGRITY_TAG_LEN],
}

/// Split raw file bytes into header, secrets and trailer regions.
///
/// Fails with `Format` on a bad magic, `UnsupportedVersion` on a newer
/// version, and `Truncated` when the declared header length does not fit.
pub fn split_frame(data: &[u8]) -> Result<Frame<'_>> {
    let mut reader = Reader::new(data);

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(EnvVaultError::Format("missing EVLT magic bytes".into()));
    }

    let version = reader.u8()?;
    if version == 0 {
        return Err(EnvVaultError::Format("version 0 is not a valid version".into()));
    }
    if version > CURRENT_VERSION {
        return Err(EnvVaultError::UnsupportedVersion {
            found: version,
            supported: CURRENT_VERSION,
        });
    }

    let header_len = usize::try_from(reader.u32()?).map_err(|_| {
        EnvVaultError::Format("header length exceeds platform address space".into())
    })?;

    let needed = header_len.saturating_add(INTEGRITY_TAG_LEN);
    if needed > reader.remaining() {
        return Err(EnvVaultError::Truncated {
            needed,
            available: reader.remaining(),
        });
    }

    let header_bytes = reader.take(header_len)?;
    let secrets_len = reader.remaining() - INTEGRITY_TAG_LEN;
    let secrets_bytes = reader.take(secrets_len)?;
    let tag = reader.take(INTEGRITY_TAG_LEN)?;

    Ok(Frame {
        version,
        header_bytes,
        secrets_bytes,
        tag,
    })
}

/// Parse and validate the header JSON.
pub fn parse_header(bytes: &[u8]) -> Result<VaultHeader> {
    let header: VaultHeader = serde_json::from_slice(bytes)
        .map_err(|e| EnvVaultError::Format(format!("header JSON: {e}")))?;
    header.validate()?;
    Ok(header)
}

/// Parse the binary secrets block.
pub fn parse_secrets(bytes: &[u8]) -> Result<Vec<SecretEntry>> {
    let mut reader = Reader::new(bytes);
    let count = reader.u32()?;

    // Capacity is bounded by what the block could possibly hold, not by
    // the declared count.
    let mut secrets = Vec::with_capacity((count as usize).min(bytes.len() / MIN_ENTRY_LEN));
    let mut seen = HashSet::new();

    for _ in 0..count {
        let name_len = usize::from(reader.u16()?);
        let name = std::str::from_utf8(reader.take(name_len)?)
            .map_err(|_| EnvVaultError::Format("secret name is not valid UTF-8".into()))?
            .to_string();
        if name.is_empty() {
            return Err(EnvVaultError::Format("empty secret name".into()));
        }

        let created_at = reader.timestamp()?;
        let updated_at = reader.timestamp()?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(reader.take(NONCE_LEN)?);

        let ct_len = usize::try_from(reader.u32()?)
            .map_err(|_| EnvVaultError::Format("ciphertext length overflow".into()))?;
        let ciphertext = reader.take(ct_len)?.to_vec();

        if !seen.insert(name.clone()) {
            return Err(EnvVaultError::Format(format!("duplicate secret name '{name}'")));
        }

        secrets.push(SecretEntry {
            name,
            nonce,
            ciphertext,
            created_at,
            updated_at,
        });
    }

    if reader.remaining() != 0 {
        return Err(EnvVaultError::Format(format!(
            "{} trailing bytes after secrets block",
            reader.remaining()
        )));
    }

    Ok(secrets)
}

/// Decode a complete vault file.
pub fn decode(data: &[u8]) -> Result<DecodedVault> {
    let frame = split_frame(data)?;
    let header = parse_header(frame.header_bytes)?;
    let secrets = parse_secrets(frame.secrets_bytes)?;

    let mut tag = [0u8; INTEGRITY_TAG_LEN];
    tag.copy_from_slice(frame.tag);

    Ok(DecodedVault {
        header,
        secrets,
        header_bytes: frame.header_bytes.to_vec(),
        secrets_bytes: frame.secrets_bytes.to_vec(),
        tag,
    })
}

/// Smallest possible encoded entry: name_len + 1-byte name + two
/// timestamps + nonce + ciphertext_len.
const MIN_ENTRY_LEN: usize = 2 + 1 + 8 + 8 + NONCE_LEN + 4;

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(EnvVaultError::Truncated {
                needed: n,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn timestamp(&mut self) -> Result<DateTime<Utc>> {
        let millis = i64::from_be_bytes(self.array()?);
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| EnvVaultError::Format(format!("timestamp {millis} out of range")))
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::secret::now;

    fn header(keyfile_hash: Option<String>) -> VaultHeader {
        let params = Argon2Params {
            memory_kib: 8_192,
            iterations: 1,
            parallelism: 1,
        };
        VaultHeader::new("dev", &[7u8; SALT_LEN], &params, keyfile_hash, now())
    }

    fn entry(name: &str, ct: &[u8]) -> SecretEntry {
        let t = now();
        SecretEntry {
            name: name.to_string(),
            nonce: [9u8; NONCE_LEN],
            ciphertext: ct.to_vec(),
            created_at: t,
            updated_at: t,
        }
    }

    fn sealed_with(h: &VaultHeader, secrets: &[SecretEntry]) -> Vec<u8> {
        encode(h, secrets)
            .unwrap()
            .seal(&[0xEE; INTEGRITY_TAG_LEN])
            .unwrap()
    }

    fn sealed(secrets: &[SecretEntry]) -> Vec<u8> {
        sealed_with(&header(None), secrets)
    }

    #[test]
    fn encode_decode_preserves_order_and_bytes() {
        let h = header(None);
        let secrets = vec![entry("B", b"\x00\xffraw"), entry("A", b"")];
        let decoded = decode(&sealed_with(&h, &secrets)).unwrap();

        assert_eq!(decoded.header, h);
        assert_eq!(decoded.secrets, secrets);
        assert_eq!(decoded.tag, [0xEE; INTEGRITY_TAG_LEN]);
    }

    #[test]
    fn header_length_is_big_endian() {
        let bytes = sealed(&[]);
        let declared = u32::from_be_bytes(bytes[5..9].try_into().unwrap()) as usize;
        let frame = split_frame(&bytes).unwrap();
        assert_eq!(declared, frame.header_bytes.len());
        assert_eq!(frame.secrets_bytes, &0u32.to_be_bytes());
    }

    #[test]
    fn wrong_magic_is_a_format_error() {
        let mut bytes = sealed(&[]);
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(EnvVaultError::Format(_))));
    }

    #[test]
    fn newer_version_is_unsupported() {
        let mut bytes = sealed(&[]);
        bytes[4] = CURRENT_VERSION + 1;
        assert!(matches!(
            decode(&bytes),
            Err(EnvVaultError::UnsupportedVersion { found: 2, supported: 1 })
        ));
    }

    #[test]
    fn oversized_header_length_is_truncated() {
        let mut bytes = sealed(&[]);
        bytes[5..9].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(decode(&bytes), Err(EnvVaultError::Truncated { .. })));
    }

    #[test]
    fn short_input_is_truncated() {
        assert!(matches!(decode(b""), Err(EnvVaultError::Truncated { .. })));
        assert!(matches!(decode(b"EVLT\x01"), Err(EnvVaultError::Truncated { .. })));
    }

    #[test]
    fn oversized_ciphertext_length_is_truncated() {
        let mut block = encode_secrets(&[entry("A", b"xyz")]).unwrap();
        let len_at = block.len() - 3 - 4;
        block[len_at..len_at + 4].copy_from_slice(&1000u32.to_be_bytes());
        assert!(matches!(parse_secrets(&block), Err(EnvVaultError::Truncated { .. })));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut block = encode_secrets(&[entry("A", b"xyz")]).unwrap();
        block.push(0);
        assert!(matches!(parse_secrets(&block), Err(EnvVaultError::Format(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let block = encode_secrets(&[entry("A", b"1"), entry("A", b"2")]).unwrap();
        assert!(matches!(parse_secrets(&block), Err(EnvVaultError::Format(_))));
    }

    #[test]
    fn unknown_header_keys_are_rejected() {
        let mut value = serde_json::to_value(header(None)).unwrap();
        value["surprise"] = serde_json::json!(true);
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(parse_header(&bytes), Err(EnvVaultError::Format(_))));
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        let mut h = header(None);
        h.format_flags = 0x80;
        assert!(h.validate().is_err());
    }

    #[test]
    fn keyfile_flag_must_match_hash() {
        let with_hash = header(Some("aGFzaA==".into()));
        assert!(with_hash.validate().is_ok());
        assert!(with_hash.requires_keyfile());

        let mut inconsistent = with_hash;
        inconsistent.format_flags = 0;
        assert!(inconsistent.validate().is_err());
    }

    #[test]
    fn weak_header_params_are_a_format_error() {
        let mut h = header(None);
        h.kdf_memory_kib = 16;
        assert!(matches!(h.validate(), Err(EnvVaultError::Format(_))));
    }
}
