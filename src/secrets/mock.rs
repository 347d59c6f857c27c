//! In-memory provider for tests.
//!
//! Behaves like a well-formed backend: values and metadata live in a map,
//! health can be toggled, and reads can be forced to fail so fallback chains
//! can be exercised without a real backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::error::{Result, SecretsError};
use super::provider::SecretProvider;
use super::types::{SecretMetadata, SecretString};

#[derive(Default)]
struct MockEntry {
    value: String,
    metadata: SecretMetadata,
}

/// In-memory [`SecretProvider`] with switchable failure modes.
#[derive(Default)]
pub struct MockProvider {
    entries: RwLock<HashMap<String, MockEntry>>,
    unhealthy: AtomicBool,
    fail_reads: AtomicBool,
    get_calls: AtomicUsize,
    closed: AtomicBool,
    fail_close: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose reads always fail with `Unavailable`.
    pub fn failing() -> Self {
        let provider = Self::default();
        provider.set_fail_reads(true);
        provider
    }

    /// Seed a value without going through `set_secret`.
    pub fn insert(&self, key: &str, value: &str) {
        self.write_entries()
            .insert(key.to_string(), MockEntry { value: value.to_string(), ..Default::default() });
    }

    /// Metadata last written for `key`.
    pub fn metadata(&self, key: &str) -> Option<SecretMetadata> {
        self.read_entries().get(key).map(|entry| entry.metadata.clone())
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Number of `get_secret` calls served so far, failed ones included.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, MockEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, MockEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SecretProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_secret(&self, key: &str) -> Result<SecretString> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SecretsError::unavailable("mock provider configured to fail"));
        }

        self.read_entries()
            .get(key)
            .map(|entry| SecretString::new(entry.value.clone()))
            .ok_or_else(|| SecretsError::not_found(key))
    }

    async fn set_secret(&self, key: &str, value: &str, metadata: &SecretMetadata) -> Result<()> {
        self.write_entries().insert(
            key.to_string(),
            MockEntry { value: value.to_string(), metadata: metadata.clone() },
        );
        Ok(())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.write_entries().remove(key).map(|_| ()).ok_or_else(|| SecretsError::not_found(key))
    }

    async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> =
            self.read_entries().keys().filter(|key| key.starts_with(prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn health_check(&self) -> Result<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(SecretsError::unavailable("mock provider is unhealthy"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(SecretsError::unavailable("mock provider failed to close"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_crud() {
        let provider = MockProvider::new();
        provider.set_secret("app/db", "pw", &SecretMetadata::new()).await.unwrap();
        provider.insert("app/api", "key");
        provider.insert("other", "x");

        assert_eq!(provider.get_secret("app/db").await.unwrap(), "pw");
        assert_eq!(provider.list_secrets("app/").await.unwrap(), vec!["app/api", "app/db"]);

        provider.delete_secret("app/db").await.unwrap();
        assert!(provider.get_secret("app/db").await.unwrap_err().is_not_found());
        assert!(provider.delete_secret("app/db").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mock_failure_switches() {
        let provider = MockProvider::failing();
        provider.insert("k", "v");

        let err = provider.get_secret("k").await.unwrap_err();
        assert!(matches!(err, SecretsError::Unavailable { .. }));
        assert_eq!(provider.get_calls(), 1);

        provider.set_healthy(false);
        assert!(provider.health_check().await.is_err());
        provider.set_healthy(true);
        assert!(provider.health_check().await.is_ok());
    }
}
