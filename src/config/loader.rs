//! Layered configuration loading.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults ([`SecretsConfig::default`])
//! 2. an optional file (`.json`, `.yaml`/`.yml` or `.toml`)
//! 3. environment variables such as `SECRETS__VAULT__ADDRESS` or
//!    `SECRETS__FALLBACKS=environment,file`
//!
//! After loading, the configuration is validated. In production mode a
//! failure is returned to the caller; in development mode it is logged and the
//! defaults are used instead.

use std::path::{Path, PathBuf};

use super::settings::{RuntimeMode, SecretsConfig};
use crate::secrets::error::{Result, SecretsError};

/// Default prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "SECRETS";

/// Builder for loading [`SecretsConfig`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
    mode: Option<RuntimeMode>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self { file: None, env_prefix: DEFAULT_ENV_PREFIX.to_string(), mode: None }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this file on top of the defaults. The file must exist.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Use `prefix` instead of `SECRETS` for environment overrides.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Force the validation policy regardless of the loaded `mode` field.
    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Load without validating.
    pub fn load_unvalidated(&self) -> Result<SecretsConfig> {
        let mut builder = config::Config::builder();

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(SecretsError::configuration(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("fallbacks")
                .try_parsing(true),
        );

        let mut loaded: SecretsConfig = builder.build()?.try_deserialize()?;
        if let Some(mode) = self.mode {
            loaded.mode = mode;
        }
        Ok(loaded)
    }

    /// Load and validate, applying the production / development policy.
    pub fn load(&self) -> Result<SecretsConfig> {
        let (mode, result) = match self.load_unvalidated() {
            Ok(loaded) => (loaded.mode, loaded.validate().map(|_| loaded)),
            Err(e) => (self.mode.unwrap_or_default(), Err(e)),
        };

        match (result, mode) {
            (Ok(loaded), _) => {
                tracing::debug!(
                    provider = %loaded.provider,
                    fallbacks = ?loaded.fallbacks,
                    cache_enabled = loaded.cache.enabled,
                    "Loaded secrets configuration"
                );
                Ok(loaded)
            }
            (Err(e), RuntimeMode::Production) => {
                tracing::error!(error = %e, "Invalid secrets configuration");
                Err(e)
            }
            (Err(e), RuntimeMode::Development) => {
                tracing::warn!(
                    error = %e,
                    "Invalid secrets configuration in development mode, continuing with defaults"
                );
                Ok(SecretsConfig { mode: RuntimeMode::Development, ..SecretsConfig::default() })
            }
        }
    }
}
