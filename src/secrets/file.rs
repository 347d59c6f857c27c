//! Local file secrets backend.
//!
//! The whole file is loaded into memory at construction. Every mutation
//! rewrites the complete file: the in-memory map is changed, re-serialized,
//! optionally encrypted, written to a temporary file with owner-only
//! permissions and renamed over the original. A failed write leaves both the
//! file and the in-memory map unchanged.
//!
//! Supported formats:
//!
//! - **json**: a flat object; non-string values are kept as their JSON text
//! - **yaml**: a flat mapping; compound values are kept as JSON text
//! - **properties**: `key=value` lines, `#` and `//` comments, optional quotes

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::instrument;

use super::encryption::FileCipher;
use super::error::{Result, SecretsError};
use super::provider::SecretProvider;
use super::types::{SecretMetadata, SecretString};
use crate::config::{FileFormat, FileSettings};

/// File-backed secrets provider.
pub struct FileProvider {
    path: PathBuf,
    format: FileFormat,
    cipher: Option<FileCipher>,
    secrets: RwLock<BTreeMap<String, String>>,
}

impl FileProvider {
    /// Load the secrets file described by `settings`.
    ///
    /// A missing file starts an empty store; it is created on the first write.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::Configuration`] if encryption is enabled without a usable key
    /// - [`SecretsError::Encryption`] if the file cannot be decrypted
    /// - [`SecretsError::Serialization`] if the file cannot be parsed
    pub async fn new(settings: FileSettings) -> Result<Self> {
        let cipher = match (settings.encrypted, &settings.key_path) {
            (true, Some(key_path)) => Some(FileCipher::from_key_file(key_path)?),
            (true, None) => {
                return Err(SecretsError::configuration(
                    "file.key_path is required when file.encrypted is true",
                ))
            }
            (false, _) => None,
        };

        let secrets = match tokio::fs::read(&settings.path).await {
            Ok(raw) => {
                let plaintext = match &cipher {
                    Some(cipher) => cipher.decrypt(&raw)?,
                    None => raw,
                };
                let text = String::from_utf8(plaintext).map_err(|_| {
                    SecretsError::serialization(format!(
                        "Secrets file {} is not valid UTF-8",
                        settings.path.display()
                    ))
                })?;
                parse_contents(settings.format, &text)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %settings.path.display(),
                    "Secrets file does not exist, starting with an empty store"
                );
                BTreeMap::new()
            }
            Err(e) => return Err(SecretsError::Io(e)),
        };

        tracing::info!(
            path = %settings.path.display(),
            format = ?settings.format,
            encrypted = cipher.is_some(),
            count = secrets.len(),
            "Loaded secrets file"
        );

        Ok(Self {
            path: settings.path,
            format: settings.format,
            cipher,
            secrets: RwLock::new(secrets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole store. Any failure is reported as `Unavailable`.
    async fn persist(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        self.write_store(secrets).await.map_err(|e| {
            SecretsError::unavailable(format!("Failed to write secrets file {}: {}", self.path.display(), e))
        })
    }

    async fn write_store(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        let rendered = render_contents(self.format, secrets)?;
        let bytes = match &self.cipher {
            Some(cipher) => cipher.encrypt(rendered.as_bytes())?,
            None => rendered.into_bytes(),
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "secrets".to_string());
        let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

        if let Err(e) = write_private(&tmp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(SecretsError::Io(e));
        }

        Ok(())
    }
}

async fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

#[async_trait]
impl SecretProvider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get_secret(&self, key: &str) -> Result<SecretString> {
        self.secrets
            .read()
            .await
            .get(key)
            .map(|value| SecretString::new(value.clone()))
            .ok_or_else(|| SecretsError::not_found(key))
    }

    #[instrument(skip(self, value, _metadata), fields(path = %self.path.display()))]
    async fn set_secret(&self, key: &str, value: &str, _metadata: &SecretMetadata) -> Result<()> {
        let mut secrets = self.secrets.write().await;
        let previous = secrets.insert(key.to_string(), value.to_string());

        if let Err(e) = self.persist(&secrets).await {
            match previous {
                Some(old) => secrets.insert(key.to_string(), old),
                None => secrets.remove(key),
            };
            tracing::error!(error = %e, key = %key, "Failed to write secrets file");
            return Err(e);
        }

        tracing::debug!(key = %key, "Stored secret in file");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn delete_secret(&self, key: &str) -> Result<()> {
        let mut secrets = self.secrets.write().await;
        let previous = secrets.remove(key).ok_or_else(|| SecretsError::not_found(key))?;

        if let Err(e) = self.persist(&secrets).await {
            secrets.insert(key.to_string(), previous);
            tracing::error!(error = %e, key = %key, "Failed to write secrets file");
            return Err(e);
        }

        Ok(())
    }

    async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.secrets.read().await.keys().filter(|key| key.starts_with(prefix)).cloned().collect())
    }

    async fn health_check(&self) -> Result<()> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Not written yet; healthy as long as it can be created.
                let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
                match parent {
                    Some(dir) if !dir.exists() => Err(SecretsError::unavailable(format!(
                        "Secrets file directory {} does not exist",
                        dir.display()
                    ))),
                    _ => Ok(()),
                }
            }
            Err(e) => Err(SecretsError::unavailable(format!(
                "Cannot access secrets file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl std::fmt::Debug for FileProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProvider")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("encrypted", &self.cipher.is_some())
            .finish()
    }
}

/// Parse file contents into a flat key/value map.
pub fn parse_contents(format: FileFormat, text: &str) -> Result<BTreeMap<String, String>> {
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    match format {
        FileFormat::Json => parse_json(text),
        FileFormat::Yaml => parse_yaml(text),
        FileFormat::Properties => Ok(parse_properties(text)),
    }
}

/// Serialize a flat key/value map in the given format.
pub fn render_contents(format: FileFormat, secrets: &BTreeMap<String, String>) -> Result<String> {
    match format {
        FileFormat::Json => {
            let mut out = serde_json::to_string_pretty(secrets)?;
            out.push('\n');
            Ok(out)
        }
        FileFormat::Yaml => Ok(serde_yaml::to_string(secrets)?),
        FileFormat::Properties => Ok(render_properties(secrets)),
    }
}

fn parse_json(text: &str) -> Result<BTreeMap<String, String>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let serde_json::Value::Object(object) = value else {
        return Err(SecretsError::serialization("JSON secrets file must contain an object"));
    };

    Ok(object
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

fn parse_yaml(text: &str) -> Result<BTreeMap<String, String>> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    let mapping = match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Ok(BTreeMap::new()),
        _ => return Err(SecretsError::serialization("YAML secrets file must contain a mapping")),
    };

    let mut secrets = BTreeMap::new();
    for (key, value) in mapping {
        let key = yaml_scalar(&key).ok_or_else(|| {
            SecretsError::serialization("YAML secrets file keys must be scalars")
        })?;
        let value = match yaml_scalar(&value) {
            Some(scalar) => scalar,
            None if value.is_null() => String::new(),
            None => serde_json::to_string(&value)?,
        };
        secrets.insert(key, value);
    }
    Ok(secrets)
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut secrets = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let Some((raw_key, raw_value)) = split_unescaped(line) else {
            continue;
        };

        let key = unescape(trim_key(raw_key));
        if key.is_empty() {
            continue;
        }
        secrets.insert(key, unescape(strip_quotes(raw_value.trim())));
    }

    secrets
}

/// Split at the first `=` that is not escaped with a backslash.
fn split_unescaped(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '=' if !escaped => return Some((&line[..idx], &line[idx + 1..])),
            _ => escaped = false,
        }
    }
    None
}

/// Trim surrounding whitespace, keeping a trailing whitespace character that is escaped.
fn trim_key(raw: &str) -> &str {
    let raw = raw.trim_start();
    let trimmed = raw.trim_end();
    let backslashes = trimmed.chars().rev().take_while(|c| *c == '\\').count();
    if backslashes % 2 == 0 {
        return trimmed;
    }
    let escaped_len = raw[trimmed.len()..].chars().next().map_or(0, char::len_utf8);
    &raw[..trimmed.len() + escaped_len]
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Escape a value, or a key when `key` is set.
///
/// Keys additionally escape `=`, a leading `#` or `/` (which would read as a
/// comment) and leading or trailing whitespace (which the parser trims).
fn escape(raw: &str, key: bool) -> String {
    let last = raw.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(raw.len() + 2);
    for (idx, ch) in raw.chars().enumerate() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' if key => out.push_str("\\="),
            '#' | '/' if key && idx == 0 => {
                out.push('\\');
                out.push(ch);
            }
            c if key && c.is_whitespace() && (idx == 0 || idx == last) => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

fn render_properties(secrets: &BTreeMap<String, String>) -> String {
    let mut out = format!(
        "# Secrets file managed by secret-broker\n# Updated: {}\n\n",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );

    for (key, value) in secrets {
        let escaped = escape(value, false);
        let needs_quotes = escaped != escaped.trim()
            || escaped.starts_with('"')
            || escaped.starts_with('\'');
        if needs_quotes {
            out.push_str(&format!("{}=\"{}\"\n", escape(key, true), escaped));
        } else {
            out.push_str(&format!("{}={}\n", escape(key, true), escaped));
        }
    }

    out
}
