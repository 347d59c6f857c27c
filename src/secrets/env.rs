//! Environment variable secrets backend implementation.
//!
//! The simplest provider: each key maps to one process environment variable.
//! It is the default for local development and the usual last-resort fallback
//! in production.
//!
//! # Usage
//!
//! With `prefix = "APP_"` the key `DB_PASSWORD` is read from `APP_DB_PASSWORD`:
//!
//! ```bash
//! export APP_DB_PASSWORD="s3cr3t"
//! ```
//!
//! Unless `case_sensitive` is set, variable names are upper-cased on write and
//! matched ignoring ASCII case on read. Explicit entries in `mapping` win over
//! the prefix rule.
//!
//! # Security Warning
//!
//! Environment variables are visible to anything that can inspect the process
//! and have no access control or audit trail. Writes only affect the current
//! process.

use async_trait::async_trait;
use std::env;

use super::error::{Result, SecretsError};
use super::provider::SecretProvider;
use super::types::{SecretMetadata, SecretString};
use crate::config::EnvironmentSettings;

/// Environment variable secrets backend.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentProvider {
    settings: EnvironmentSettings,
}

impl EnvironmentProvider {
    pub fn new(settings: EnvironmentSettings) -> Self {
        Self { settings }
    }

    /// Convenience constructor for a prefix-only configuration.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::new(EnvironmentSettings { prefix: prefix.into(), ..EnvironmentSettings::default() })
    }

    /// Converts a secret key to the environment variable name.
    ///
    /// ```rust,ignore
    /// let provider = EnvironmentProvider::with_prefix("APP_");
    /// assert_eq!(provider.env_var_name("db_password"), "APP_DB_PASSWORD");
    /// ```
    pub fn env_var_name(&self, key: &str) -> String {
        if let Some(mapped) = self.settings.mapping.get(key) {
            return mapped.clone();
        }

        let name = format!("{}{}", self.settings.prefix, key);
        if self.settings.case_sensitive {
            name
        } else {
            name.to_uppercase()
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if let Ok(value) = env::var(name) {
            return Some(value);
        }

        if self.settings.case_sensitive {
            return None;
        }

        env::vars().find(|(candidate, _)| candidate.eq_ignore_ascii_case(name)).map(|(_, value)| value)
    }

    fn strip_configured_prefix<'a>(&self, name: &'a str) -> Option<&'a str> {
        let prefix = &self.settings.prefix;
        if self.settings.case_sensitive {
            return name.strip_prefix(prefix.as_str());
        }

        let head = name.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix).then(|| &name[prefix.len()..])
    }

    fn matches_prefix(&self, key: &str, prefix: &str) -> bool {
        if self.settings.case_sensitive {
            key.starts_with(prefix)
        } else {
            key.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        }
    }
}

#[async_trait]
impl SecretProvider for EnvironmentProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn get_secret(&self, key: &str) -> Result<SecretString> {
        let name = self.env_var_name(key);

        match self.lookup(&name) {
            Some(value) if !value.is_empty() => Ok(SecretString::new(value)),
            _ => {
                tracing::debug!(key = %key, env_var = %name, "Secret not found in environment");
                Err(SecretsError::not_found(key))
            }
        }
    }

    async fn set_secret(&self, key: &str, value: &str, _metadata: &SecretMetadata) -> Result<()> {
        let name = self.env_var_name(key);
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            return Err(SecretsError::permission_denied(format!(
                "'{}' cannot be used as an environment variable name",
                name
            )));
        }

        env::set_var(&name, value);
        tracing::debug!(key = %key, env_var = %name, "Stored secret in process environment");
        Ok(())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        let name = self.env_var_name(key);
        if env::var_os(&name).is_none() {
            return Err(SecretsError::not_found(key));
        }

        env::remove_var(&name);
        Ok(())
    }

    async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = env::vars()
            .filter_map(|(name, _)| self.strip_configured_prefix(&name).map(str::to_string))
            .filter(|key| !key.is_empty() && self.matches_prefix(key, prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
