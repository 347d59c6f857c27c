//! Common test utilities for all integration tests.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use async_trait::async_trait;
use secret_broker::secrets::{Result, SecretMetadata, SecretProvider, SecretString, SecretsError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Serializes tests that modify process environment variables.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write `contents` to `name` inside `dir` and return the path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Provider that answers every read after a fixed delay.
pub struct SlowProvider {
    pub delay: Duration,
    pub value: String,
}

#[async_trait]
impl SecretProvider for SlowProvider {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn get_secret(&self, _key: &str) -> Result<SecretString> {
        tokio::time::sleep(self.delay).await;
        Ok(SecretString::new(self.value.clone()))
    }

    async fn set_secret(&self, _key: &str, _value: &str, _metadata: &SecretMetadata) -> Result<()> {
        Err(SecretsError::permission_denied("read-only test provider"))
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        Err(SecretsError::not_found(key))
    }

    async fn list_secrets(&self, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
