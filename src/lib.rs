//! # secret-broker
//!
//! A provider-agnostic broker that retrieves, stores, lists and rotates
//! sensitive configuration values on behalf of backend services.
//!
//! ## Architecture
//!
//! ```text
//! caller → SecretManager → SecretCache (fast path)
//!                        → primary provider
//!                        → fallback providers, in order
//! ```
//!
//! Providers implement [`secrets::SecretProvider`]: HashiCorp Vault, AWS
//! Secrets Manager and SSM Parameter Store (`aws` feature), Kubernetes Secrets
//! (`kubernetes` feature), process environment variables and local files.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use secret_broker::config::ConfigLoader;
//! use secret_broker::secrets::SecretManager;
//!
//! #[tokio::main]
//! async fn main() -> secret_broker::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     let manager = SecretManager::from_config(&config).await?;
//!     let password = manager.get_secret("db_password").await?;
//!     assert!(!password.is_empty());
//!     manager.close().await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod observability;
pub mod secrets;

pub use config::SecretsConfig;
pub use secrets::{Result, SecretManager, SecretsError};

