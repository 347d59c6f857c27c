//! Secret manager: cache, primary provider and fallback chain.
//!
//! Reads go cache → primary → fallbacks in declared order, and the first
//! success is written back to the cache. Writes, deletes and rotations only
//! ever touch the primary and invalidate the cached entry before returning.
//!
//! # Example
//!
//! ```rust,ignore
//! use secret_broker::config::ConfigLoader;
//! use secret_broker::secrets::SecretManager;
//!
//! let config = ConfigLoader::new().with_file("secrets.yaml").load()?;
//! let manager = SecretManager::from_config(&config).await?;
//!
//! let password = manager.get_secret("db_password").await?;
//! manager.close().await?;
//! ```

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::cache::{CacheStats, SecretCache};
use super::error::{Result, SecretsError};
use super::factory::create_provider;
use super::provider::SecretProvider;
use super::types::{SecretMetadata, SecretString};
use crate::config::SecretsConfig;

/// Entry point for services that need secrets.
pub struct SecretManager {
    primary: Arc<dyn SecretProvider>,
    fallbacks: Vec<Arc<dyn SecretProvider>>,
    cache: Option<SecretCache>,
}

impl SecretManager {
    pub fn new(
        primary: Arc<dyn SecretProvider>,
        fallbacks: Vec<Arc<dyn SecretProvider>>,
        cache: Option<SecretCache>,
    ) -> Self {
        Self { primary, fallbacks, cache }
    }

    /// Build the provider chain and cache described by `config`.
    ///
    /// A primary that fails to build is an error. A fallback that fails to
    /// build is skipped with a warning.
    pub async fn from_config(config: &SecretsConfig) -> Result<Self> {
        let primary = create_provider(config.provider, config).await?;

        let mut fallbacks = Vec::with_capacity(config.fallbacks.len());
        for kind in &config.fallbacks {
            match create_provider(*kind, config).await {
                Ok(provider) => fallbacks.push(provider),
                Err(e) => warn!(provider = %kind, error = %e, "Skipping fallback provider that failed to initialize"),
            }
        }

        let cache = config
            .cache
            .enabled
            .then(|| SecretCache::new(config.cache.ttl, config.cache.max_entries));

        info!(
            primary = primary.name(),
            fallbacks = ?fallbacks.iter().map(|p| p.name()).collect::<Vec<_>>(),
            cache_enabled = cache.is_some(),
            "Secret manager initialized"
        );

        Ok(Self::new(primary, fallbacks, cache))
    }

    pub fn primary(&self) -> &Arc<dyn SecretProvider> {
        &self.primary
    }

    pub fn fallbacks(&self) -> &[Arc<dyn SecretProvider>] {
        &self.fallbacks
    }

    /// Resolve `key` through the cache and the provider chain.
    ///
    /// Individual provider failures are logged and the next provider is
    /// tried. Only when every provider has failed does the call fail, with
    /// [`SecretsError::Unavailable`] carrying the last provider's error.
    #[instrument(skip(self))]
    pub async fn get_secret(&self, key: &str) -> Result<SecretString> {
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get(key).await {
                debug!(key = %key, "Secret served from cache");
                return Ok(value);
            }
        }

        let mut last_error: Option<SecretsError> = None;

        for provider in std::iter::once(&self.primary).chain(self.fallbacks.iter()) {
            match provider.get_secret(key).await {
                Ok(value) => {
                    if let Some(cache) = &self.cache {
                        cache.set(key, value.clone()).await;
                    }
                    debug!(key = %key, provider = provider.name(), "Secret resolved");
                    return Ok(value);
                }
                Err(e) => {
                    if e.is_recoverable() {
                        debug!(key = %key, provider = provider.name(), error = %e, "Provider could not serve secret");
                    } else {
                        warn!(key = %key, provider = provider.name(), error = %e, "Provider failed to serve secret");
                    }
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.map(|e| e.to_string()).unwrap_or_default();
        error!(key = %key, last_error = %last, "All secret providers failed");
        Err(SecretsError::unavailable(format!("all providers failed for '{}': {}", key, last)))
    }

    /// [`get_secret`](Self::get_secret) bounded by one deadline for the whole chain.
    ///
    /// The budget is not split between providers: a slow primary can use all
    /// of it before any fallback runs.
    pub async fn get_secret_within(&self, key: &str, deadline: Duration) -> Result<SecretString> {
        tokio::time::timeout(deadline, self.get_secret(key)).await.unwrap_or_else(|_| {
            warn!(key = %key, deadline = ?deadline, "Secret lookup timed out");
            Err(SecretsError::unavailable(format!("lookup of '{}' timed out after {:?}", key, deadline)))
        })
    }

    /// Resolve each key independently. Keys that fail are left out.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn get_secrets(&self, keys: &[String]) -> Result<HashMap<String, SecretString>> {
        let mut found = HashMap::with_capacity(keys.len());

        for key in keys {
            match self.get_secret(key).await {
                Ok(value) => {
                    found.insert(key.clone(), value);
                }
                Err(e) => warn!(key = %key, error = %e, "Omitting secret from batch"),
            }
        }

        Ok(found)
    }

    #[instrument(skip(self, value, metadata))]
    pub async fn set_secret(&self, key: &str, value: &str, metadata: &SecretMetadata) -> Result<()> {
        self.primary.set_secret(key, value, metadata).await?;
        self.invalidate(key).await;
        info!(key = %key, provider = self.primary.name(), "Secret stored");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_secret(&self, key: &str) -> Result<()> {
        self.primary.delete_secret(key).await?;
        self.invalidate(key).await;
        info!(key = %key, provider = self.primary.name(), "Secret deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn rotate_secret(&self, key: &str) -> Result<SecretString> {
        let value = self.primary.rotate_secret(key).await?;
        self.invalidate(key).await;
        info!(key = %key, provider = self.primary.name(), "Secret rotated");
        Ok(value)
    }

    pub async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
        self.primary.list_secrets(prefix).await
    }

    /// Health of the primary provider. Fallbacks are not probed.
    pub async fn health_check(&self) -> Result<()> {
        self.primary.health_check().await
    }

    /// Drop every cached value.
    pub async fn refresh_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
            debug!("Secret cache cleared");
        }
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    /// Close every provider concurrently and return the first error in chain order.
    pub async fn close(&self) -> Result<()> {
        let providers: Vec<_> = std::iter::once(&self.primary).chain(self.fallbacks.iter()).collect();
        let results = join_all(providers.iter().map(|provider| provider.close())).await;

        let mut first_error = None;
        for (provider, result) in providers.iter().zip(results) {
            if let Err(e) = result {
                warn!(provider = provider.name(), error = %e, "Failed to close provider");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn invalidate(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.delete(key).await;
        }
    }
}
