//! # Configuration Management
//!
//! Typed broker configuration ([`settings`]) and the layered file plus
//! environment loader ([`loader`]).

pub mod loader;
pub mod settings;

pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use settings::{
    AwsSettings, CacheSettings, EnvironmentSettings, FileFormat, FileSettings, KubernetesSettings,
    LoggingSettings, ProviderKind, ProviderSettings, RuntimeMode, SecretsConfig, VaultAuthMethod,
    VaultAuthSettings, VaultSettings, VaultTlsSettings,
};
