//! Secrets management abstraction for secure configuration.
//!
//! Services read sensitive configuration (database passwords, signing keys,
//! API credentials) through a [`SecretManager`], which fronts one primary
//! [`SecretProvider`], an ordered list of fallback providers and an optional
//! TTL [`SecretCache`].
//!
//! # Supported Backends
//!
//! - **HashiCorp Vault**: KV v1 and v2, token or dynamic login ([`vault`])
//! - **AWS Secrets Manager** and **SSM Parameter Store** (`aws` feature)
//! - **Kubernetes Secrets** (`kubernetes` feature)
//! - **Environment Variables**: development default and last-resort fallback
//! - **Local files**: JSON, YAML or properties, optionally AES-256-GCM encrypted
//!
//! # Composable Architecture Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use secret_broker::secrets::{EnvironmentProvider, SecretCache, SecretManager, VaultProvider};
//!
//! let vault = Arc::new(VaultProvider::new(vault_settings).await?);
//! let env = Arc::new(EnvironmentProvider::with_prefix("APP_"));
//! let manager = SecretManager::new(vault, vec![env], Some(SecretCache::new(Duration::from_secs(300), 1000)));
//!
//! let password = manager.get_secret("db_password").await?;
//! ```

pub mod aws;
pub mod cache;
pub mod encryption;
pub mod env;
pub mod error;
pub mod factory;
pub mod file;
pub mod kubernetes;
pub mod manager;
pub mod mock;
pub mod provider;
pub mod types;
pub mod vault;
pub mod vault_auth;

pub use cache::{CacheStats, SecretCache};
pub use encryption::FileCipher;
pub use env::EnvironmentProvider;
pub use error::{Result, SecretsError};
pub use factory::{build_provider, create_provider};
pub use file::FileProvider;
pub use manager::SecretManager;
pub use mock::MockProvider;
pub use provider::{generate_secret_value, SecretProvider, GENERATED_SECRET_LEN};
pub use types::{rotation_metadata, SecretMetadata, SecretString};
pub use vault::{KvVersion, VaultProvider};
pub use vault_auth::{AuthState, TokenSource};

#[cfg(feature = "aws")]
pub use aws::{AwsSecretsManagerProvider, ParameterStoreProvider};
#[cfg(feature = "kubernetes")]
pub use kubernetes::KubernetesProvider;
