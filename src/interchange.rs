//! Plaintext interchange formats for import and export.
//!
//! The vault engine itself only deals in name -> bytes maps
//! (`VaultStore::import_plaintext` / `export_plaintext`).  This module
//! converts those maps to and from `.env` text and JSON objects.
//!
//! Rendered output contains secret values and is returned in a
//! `Zeroizing` buffer.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;

use zeroize::Zeroizing;

use crate::errors::{EnvVaultError, Result};

/// A supported interchange format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Env,
    Json,
}

impl Format {
    /// Detect the format from a file extension.  Anything that is not
    /// `.json` is treated as `.env`.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Env,
        }
    }

    /// Look a format up by name (`env` or `json`).
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "env" => Ok(Self::Env),
            "json" => Ok(Self::Json),
            other => Err(EnvVaultError::Serialization(format!(
                "unknown format '{other}'; use 'env' or 'json'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a single `.env` line into a (key, value) pair.
///
/// Returns `None` for blank lines, comments, and lines without `=`.
/// Handles: `export` prefix, double/single quotes, values with `=`.
/// Escapes (`\"`, `\\`, `\n`) are only interpreted inside double quotes.
pub fn parse_env_line(line: &str) -> Option<(&str, String)> {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);

    // Split on the first '=' to get KEY and VALUE.
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return None;
    }

    let value = if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        unescape_double_quoted(inner)
    } else if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        inner.to_string()
    } else {
        value.to_string()
    };

    Some((key, value))
}

fn unescape_double_quoted(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse `.env` text into a name -> value map.  Later lines win.
pub fn parse_env(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(parse_env_line)
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Parse a JSON object into a name -> value map.
///
/// Non-string values are stored as their JSON representation.
pub fn parse_json(content: &str) -> Result<BTreeMap<String, String>> {
    let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(content)
        .map_err(|e| EnvVaultError::Serialization(format!("invalid JSON: {e}")))?;

    Ok(map
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

/// Parse `content` in the given format.
pub fn parse(format: Format, content: &str) -> Result<BTreeMap<String, String>> {
    match format {
        Format::Env => Ok(parse_env(content)),
        Format::Json => parse_json(content),
    }
}

/// Read and parse a file, detecting its format from the extension.
pub fn parse_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = Zeroizing::new(fs::read_to_string(path)?);
    parse(Format::detect(path), &content)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render name -> value pairs as `.env` content, one per line.
///
/// Values that are empty or contain spaces, `#`, quotes, newlines or `$`
/// are double-quoted with `\`, `"` and newlines escaped.
pub fn to_env<I, K, V>(values: I) -> Result<Zeroizing<String>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    let mut out = Zeroizing::new(String::new());
    for (key, value) in values {
        let key = key.as_ref();
        let value = utf8_value(key, value.as_ref())?;

        if needs_quotes(value) {
            let escaped = Zeroizing::new(
                value
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n"),
            );
            let _ = writeln!(out, "{key}=\"{}\"", escaped.as_str());
        } else {
            let _ = writeln!(out, "{key}={value}");
        }
    }
    Ok(out)
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, ' ' | '#' | '"' | '\'' | '\n' | '$' | '\\'))
}

/// Render name -> value pairs as a pretty-printed JSON object.
pub fn to_json<I, K, V>(values: I) -> Result<Zeroizing<String>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    let pairs: Vec<(K, V)> = values.into_iter().collect();
    let mut map = BTreeMap::new();
    for (key, value) in &pairs {
        map.insert(key.as_ref(), utf8_value(key.as_ref(), value.as_ref())?);
    }

    serde_json::to_string_pretty(&map)
        .map(Zeroizing::new)
        .map_err(|e| EnvVaultError::Serialization(format!("JSON export: {e}")))
}

/// Render in the given format.
pub fn render<I, K, V>(format: Format, values: I) -> Result<Zeroizing<String>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    match format {
        Format::Env => to_env(values),
        Format::Json => to_json(values),
    }
}

fn utf8_value<'a>(key: &str, value: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(value).map_err(|_| {
        EnvVaultError::Serialization(format!("secret '{key}' is not valid UTF-8 text"))
    })
}
