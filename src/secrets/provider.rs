//! The capability contract every secrets backend implements.

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;

use super::error::Result;
use super::types::{rotation_metadata, SecretMetadata, SecretString};

/// Length of generated secret values.
///
/// 43 characters drawn uniformly from the 62 alphanumerics carry just over
/// 256 bits (32 bytes) of entropy.
pub const GENERATED_SECRET_LEN: usize = 43;

/// Generate a fixed-length, alphanumeric, cryptographically random secret value.
pub fn generate_secret_value() -> SecretString {
    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect();
    SecretString::new(value)
}

/// Trait for secrets backends.
///
/// Provides a uniform interface over Vault, AWS Secrets Manager, SSM Parameter
/// Store, Kubernetes Secrets, process environment variables and local files.
/// Implementations are shared behind `Arc<dyn SecretProvider>` and must be
/// safe for concurrent use without external locking.
///
/// # Security Considerations
///
/// - Implementations MUST NOT log secret values
/// - Values are returned as [`SecretString`] so they stay redacted in logs
///
/// # Cancellation
///
/// Every method is an ordinary future: dropping it cancels the in-flight
/// backend call. Deadlines are applied by the caller (for example with
/// `tokio::time::timeout`).
///
/// # Example Implementation
///
/// ```rust,ignore
/// use secret_broker::secrets::{Result, SecretMetadata, SecretProvider, SecretString};
/// use async_trait::async_trait;
///
/// struct StaticProvider;
///
/// #[async_trait]
/// impl SecretProvider for StaticProvider {
///     fn name(&self) -> &'static str { "static" }
///
///     async fn get_secret(&self, key: &str) -> Result<SecretString> {
///         Ok(SecretString::new(format!("value-for-{key}")))
///     }
///
///     // set_secret, delete_secret, list_secrets, health_check ...
/// }
/// ```
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Provider kind identifier used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Retrieve a secret value by key.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::NotFound`](super::SecretsError::NotFound) if the key is absent
    /// - [`SecretsError::Unavailable`](super::SecretsError::Unavailable) if the backend
    ///   cannot be reached
    async fn get_secret(&self, key: &str) -> Result<SecretString>;

    /// Retrieve several secrets, best effort.
    ///
    /// Keys that fail individually are omitted from the result and logged; the
    /// call only returns an error when the provider cannot serve the batch at all.
    async fn get_secrets(&self, keys: &[String]) -> Result<HashMap<String, SecretString>> {
        let mut found = HashMap::with_capacity(keys.len());
        let mut failures = 0usize;

        for key in keys {
            match self.get_secret(key).await {
                Ok(value) => {
                    found.insert(key.clone(), value);
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(provider = self.name(), key = %key, error = %e, "Failed to fetch secret in batch");
                }
            }
        }

        if failures > 0 {
            tracing::warn!(
                provider = self.name(),
                requested = keys.len(),
                failed = failures,
                "Batch fetch returned partial results"
            );
        }

        Ok(found)
    }

    /// Store or update a secret value together with free-form metadata.
    ///
    /// # Security
    ///
    /// The value MUST NOT be logged or included in error messages.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::Unavailable`](super::SecretsError::Unavailable)
    /// - [`SecretsError::PermissionDenied`](super::SecretsError::PermissionDenied)
    async fn set_secret(&self, key: &str, value: &str, metadata: &SecretMetadata) -> Result<()>;

    /// Delete a secret.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::NotFound`](super::SecretsError::NotFound)
    /// - [`SecretsError::Unavailable`](super::SecretsError::Unavailable)
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// List keys starting with `prefix`. An empty prefix lists everything.
    async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>>;

    /// Replace a secret with a freshly generated random value.
    ///
    /// The new value is written with a normal [`set_secret`](Self::set_secret)
    /// call tagged with rotation metadata, and returned to the caller.
    async fn rotate_secret(&self, key: &str) -> Result<SecretString> {
        let new_value = generate_secret_value();
        let metadata = rotation_metadata(Utc::now());

        self.set_secret(key, new_value.expose_secret(), &metadata).await?;

        tracing::info!(provider = self.name(), key = %key, "Rotated secret");
        Ok(new_value)
    }

    /// Cheap read-only probe of the backend.
    async fn health_check(&self) -> Result<()>;

    /// Release held resources. Backends with stateless clients keep the default.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::mock::MockProvider;
    use crate::secrets::types::{ROTATED_AT, ROTATED_BY};

    #[test]
    fn test_generated_value_shape() {
        let value = generate_secret_value();
        assert_eq!(value.len(), GENERATED_SECRET_LEN);
        assert!(value.expose_secret().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_values_differ() {
        assert_ne!(generate_secret_value(), generate_secret_value());
    }

    #[tokio::test]
    async fn test_default_rotate_writes_metadata() {
        let provider = MockProvider::new();
        provider.insert("api_key", "old");

        let new_value = provider.rotate_secret("api_key").await.unwrap();

        assert_ne!(new_value, "old");
        assert_eq!(provider.get_secret("api_key").await.unwrap(), new_value);

        let metadata = provider.metadata("api_key").unwrap();
        assert!(metadata.contains_key(ROTATED_AT));
        assert_eq!(metadata.get(ROTATED_BY).map(String::as_str), Some("secret-broker"));
    }

    #[tokio::test]
    async fn test_default_get_secrets_omits_missing_keys() {
        let provider = MockProvider::new();
        provider.insert("a", "1");
        provider.insert("b", "2");

        let keys = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let found = provider.get_secrets(&keys).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], "1");
        assert_eq!(found["b"], "2");
        assert!(!found.contains_key("missing"));
    }
}
