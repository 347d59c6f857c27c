//! # Configuration Settings
//!
//! Defines the configuration structure for the secret broker: which provider
//! is primary, which providers back it up, cache behaviour, and one block per
//! provider kind.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::secrets::error::{Result, SecretsError};
use crate::secrets::types::SecretString;

/// The six supported provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// HashiCorp Vault KV engine
    Vault,
    /// AWS Secrets Manager
    #[serde(alias = "aws")]
    AwsSecrets,
    /// AWS Systems Manager Parameter Store
    #[serde(alias = "ssm")]
    AwsSsm,
    /// A Kubernetes `Secret` object
    #[serde(alias = "k8s")]
    Kubernetes,
    /// Process environment variables
    #[serde(alias = "env")]
    Environment,
    /// Local (optionally encrypted) file
    File,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Vault,
        ProviderKind::AwsSecrets,
        ProviderKind::AwsSsm,
        ProviderKind::Kubernetes,
        ProviderKind::Environment,
        ProviderKind::File,
    ];

    /// Config identifier of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vault => "vault",
            Self::AwsSecrets => "aws-secrets",
            Self::AwsSsm => "aws-ssm",
            Self::Kubernetes => "kubernetes",
            Self::Environment => "environment",
            Self::File => "file",
        }
    }

    /// Name of the configuration block this kind reads.
    pub fn config_block(&self) -> &'static str {
        match self {
            Self::Vault => "vault",
            Self::AwsSecrets | Self::AwsSsm => "aws",
            Self::Kubernetes => "kubernetes",
            Self::Environment => "environment",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vault" => Ok(Self::Vault),
            "aws-secrets" | "aws" => Ok(Self::AwsSecrets),
            "aws-ssm" | "ssm" => Ok(Self::AwsSsm),
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "environment" | "env" => Ok(Self::Environment),
            "file" => Ok(Self::File),
            other => Err(SecretsError::configuration(format!(
                "Unknown provider type '{}'. Valid types: vault, aws-secrets, aws-ssm, kubernetes, environment, file",
                other
            ))),
        }
    }
}

/// How configuration validation failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Validation failures are logged and defaults are used.
    #[serde(alias = "dev")]
    Development,
    /// Validation failures abort startup.
    #[default]
    #[serde(alias = "prod")]
    Production,
}

/// Main broker configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecretsConfig {
    /// Primary provider
    pub provider: ProviderKind,

    /// Providers consulted in order when the primary fails a read
    pub fallbacks: Vec<ProviderKind>,

    /// Validation policy
    #[serde(alias = "environment_mode")]
    pub mode: RuntimeMode,

    #[validate(nested)]
    pub cache: CacheSettings,

    #[validate(nested)]
    pub vault: Option<VaultSettings>,

    #[validate(nested)]
    pub aws: Option<AwsSettings>,

    #[validate(nested)]
    pub kubernetes: Option<KubernetesSettings>,

    #[validate(nested)]
    pub environment: EnvironmentSettings,

    pub file: Option<FileSettings>,

    #[validate(nested)]
    pub logging: LoggingSettings,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Environment,
            fallbacks: Vec::new(),
            mode: RuntimeMode::default(),
            cache: CacheSettings::default(),
            vault: None,
            aws: None,
            kubernetes: None,
            environment: EnvironmentSettings::default(),
            file: None,
            logging: LoggingSettings::default(),
        }
    }
}

impl SecretsConfig {
    /// Local development: environment variables first, `./secrets.json` behind them.
    pub fn development() -> Self {
        Self {
            provider: ProviderKind::Environment,
            fallbacks: vec![ProviderKind::File],
            mode: RuntimeMode::Development,
            cache: CacheSettings { ttl: Duration::from_secs(60), ..CacheSettings::default() },
            file: Some(FileSettings::default()),
            logging: LoggingSettings { level: "debug".to_string(), json: false },
            ..Self::default()
        }
    }

    /// Production: Vault with Kubernetes service-account login, environment as last resort.
    pub fn production() -> Self {
        let mut auth_parameters = HashMap::new();
        auth_parameters.insert("role".to_string(), SecretString::new("app"));

        Self {
            provider: ProviderKind::Vault,
            fallbacks: vec![ProviderKind::Environment],
            mode: RuntimeMode::Production,
            cache: CacheSettings::default(),
            vault: Some(VaultSettings {
                address: "https://vault.vault.svc.cluster.local:8200".to_string(),
                auth: Some(VaultAuthSettings {
                    method: VaultAuthMethod::Kubernetes,
                    mount_path: None,
                    parameters: auth_parameters,
                }),
                tls: VaultTlsSettings { enabled: true, ..VaultTlsSettings::default() },
                ..VaultSettings::default()
            }),
            logging: LoggingSettings { level: "info".to_string(), json: true },
            ..Self::default()
        }
    }

    /// In-cluster Kubernetes Secret with environment fallback.
    pub fn kubernetes() -> Self {
        Self {
            provider: ProviderKind::Kubernetes,
            fallbacks: vec![ProviderKind::Environment],
            kubernetes: Some(KubernetesSettings::default()),
            ..Self::default()
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;
        self.validate_custom()
    }

    /// Cross-field checks the validator derive cannot express.
    fn validate_custom(&self) -> Result<()> {
        self.cache.validate_custom()?;

        for kind in self.referenced_kinds() {
            self.provider_settings(kind)?.validate_for(kind)?;
        }

        if self.fallbacks.contains(&self.provider) {
            tracing::warn!(
                provider = %self.provider,
                "Primary provider is also listed as a fallback; the fallback entry only repeats the primary read"
            );
        }

        Ok(())
    }

    /// Primary followed by the fallbacks, in order.
    pub fn referenced_kinds(&self) -> Vec<ProviderKind> {
        std::iter::once(self.provider).chain(self.fallbacks.iter().copied()).collect()
    }

    /// The configuration slice for `kind`.
    ///
    /// # Errors
    ///
    /// [`SecretsError::Configuration`] when the block for `kind` is absent.
    pub fn provider_settings(&self, kind: ProviderKind) -> Result<ProviderSettings> {
        let missing = || {
            SecretsError::configuration(format!(
                "Provider '{}' is selected but the '{}' configuration block is missing",
                kind,
                kind.config_block()
            ))
        };

        Ok(match kind {
            ProviderKind::Vault => ProviderSettings::Vault(self.vault.clone().ok_or_else(missing)?),
            ProviderKind::AwsSecrets => {
                ProviderSettings::AwsSecrets(self.aws.clone().ok_or_else(missing)?)
            }
            ProviderKind::AwsSsm => ProviderSettings::AwsSsm(self.aws.clone().ok_or_else(missing)?),
            ProviderKind::Kubernetes => {
                ProviderSettings::Kubernetes(self.kubernetes.clone().ok_or_else(missing)?)
            }
            ProviderKind::Environment => ProviderSettings::Environment(self.environment.clone()),
            ProviderKind::File => ProviderSettings::File(self.file.clone().ok_or_else(missing)?),
        })
    }
}

/// Configuration for one provider, tagged by kind.
#[derive(Debug, Clone)]
pub enum ProviderSettings {
    Vault(VaultSettings),
    AwsSecrets(AwsSettings),
    AwsSsm(AwsSettings),
    Kubernetes(KubernetesSettings),
    Environment(EnvironmentSettings),
    File(FileSettings),
}

impl ProviderSettings {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Vault(_) => ProviderKind::Vault,
            Self::AwsSecrets(_) => ProviderKind::AwsSecrets,
            Self::AwsSsm(_) => ProviderKind::AwsSsm,
            Self::Kubernetes(_) => ProviderKind::Kubernetes,
            Self::Environment(_) => ProviderKind::Environment,
            Self::File(_) => ProviderKind::File,
        }
    }

    fn validate_for(&self, kind: ProviderKind) -> Result<()> {
        let invalid = |message: String| SecretsError::configuration(format!("{}: {}", kind, message));

        match self {
            Self::Vault(vault) => {
                if vault.address.trim().is_empty() {
                    return Err(invalid("vault.address is required".to_string()));
                }
                url::Url::parse(&vault.address)
                    .map_err(|e| invalid(format!("vault.address is not a valid URL: {}", e)))?;
                if vault.mount_path.trim_matches('/').is_empty() {
                    return Err(invalid("vault.mount_path is required".to_string()));
                }
                if let Some(ca_cert) = &vault.tls.ca_cert {
                    if !ca_cert.exists() {
                        return Err(invalid(format!(
                            "vault.tls.ca_cert {} does not exist",
                            ca_cert.display()
                        )));
                    }
                }
            }
            Self::AwsSecrets(aws) => {
                if aws.region.trim().is_empty() {
                    return Err(invalid("aws.region is required".to_string()));
                }
            }
            Self::AwsSsm(aws) => {
                if aws.region.trim().is_empty() {
                    return Err(invalid("aws.region is required".to_string()));
                }
                if !aws.ssm_path.starts_with('/') {
                    return Err(invalid("aws.ssm_path must start with '/'".to_string()));
                }
            }
            Self::Kubernetes(k8s) => {
                if k8s.namespace.trim().is_empty() {
                    return Err(invalid("kubernetes.namespace is required".to_string()));
                }
                if k8s.secret_name.trim().is_empty() {
                    return Err(invalid("kubernetes.secret_name is required".to_string()));
                }
            }
            Self::Environment(_) => {}
            Self::File(file) => {
                if file.path.as_os_str().is_empty() {
                    return Err(invalid("file.path is required".to_string()));
                }
                if file.encrypted && file.key_path.is_none() {
                    return Err(invalid("file.key_path is required when file.encrypted is true".to_string()));
                }
            }
        }

        Ok(())
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,

    /// Entry lifetime, e.g. `"5m"` or `"30s"`
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    #[validate(range(min = 1, message = "Cache max_entries must be at least 1"))]
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true, ttl: Duration::from_secs(300), max_entries: 1000 }
    }
}

impl CacheSettings {
    fn validate_custom(&self) -> Result<()> {
        if self.enabled && self.ttl < Duration::from_millis(1) {
            return Err(SecretsError::configuration("Cache ttl must be at least 1ms"));
        }
        Ok(())
    }
}

/// Vault auth methods that exchange credentials for a client token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultAuthMethod {
    Kubernetes,
    #[serde(alias = "cloud-iam", alias = "iam")]
    Aws,
    Userpass,
    Ldap,
    #[serde(alias = "oauth-token")]
    Github,
    Approle,
}

impl VaultAuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kubernetes => "kubernetes",
            Self::Aws => "aws",
            Self::Userpass => "userpass",
            Self::Ldap => "ldap",
            Self::Github => "github",
            Self::Approle => "approle",
        }
    }

    /// Mount path used when the config does not name one.
    pub fn default_mount_path(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for VaultAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dynamic Vault login configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultAuthSettings {
    pub method: VaultAuthMethod,

    /// Auth mount path; defaults to the method name
    #[serde(default)]
    pub mount_path: Option<String>,

    /// Method-specific credentials (role, role_id, secret_id, username, password, token, ...)
    #[serde(default)]
    pub parameters: HashMap<String, SecretString>,
}

impl VaultAuthSettings {
    pub fn mount_path(&self) -> &str {
        self.mount_path
            .as_deref()
            .map(|path| path.trim_matches('/'))
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| self.method.default_mount_path())
    }
}

/// TLS options for the Vault connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultTlsSettings {
    pub enabled: bool,
    /// PEM bundle used to verify the server
    pub ca_cert: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

/// Configuration for the Vault provider.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VaultSettings {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    #[validate(length(min = 1, message = "Vault address cannot be empty"))]
    pub address: String,

    /// KV mount path (default: "secret")
    #[validate(length(min = 1, message = "Vault mount_path cannot be empty"))]
    pub mount_path: String,

    /// KV engine version; detected from the mount when unset
    #[validate(range(min = 1, max = 2, message = "Vault kv_version must be 1 or 2"))]
    pub kv_version: Option<u8>,

    /// Vault namespace (Enterprise)
    pub namespace: Option<String>,

    /// Static client token
    pub token: Option<SecretString>,

    /// File holding a client token
    pub token_path: Option<PathBuf>,

    pub auth: Option<VaultAuthSettings>,

    pub tls: VaultTlsSettings,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            address: "http://localhost:8200".to_string(),
            mount_path: "secret".to_string(),
            kv_version: None,
            namespace: None,
            token: None,
            token_path: None,
            auth: None,
            tls: VaultTlsSettings::default(),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Configuration shared by the AWS Secrets Manager and Parameter Store providers.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AwsSettings {
    #[validate(length(min = 1, message = "AWS region cannot be empty"))]
    pub region: String,

    /// Role assumed before calling AWS
    pub role_arn: Option<String>,

    /// Parameter Store base path
    pub ssm_path: String,

    /// Custom endpoint (LocalStack and similar)
    pub endpoint_url: Option<String>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            role_arn: None,
            ssm_path: "/app/secrets".to_string(),
            endpoint_url: None,
        }
    }
}

/// Configuration for the Kubernetes provider.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KubernetesSettings {
    #[validate(length(min = 1, message = "Kubernetes namespace cannot be empty"))]
    pub namespace: String,

    /// Name of the `Secret` object holding all keys
    #[validate(length(min = 1, message = "Kubernetes secret_name cannot be empty"))]
    pub secret_name: String,

    /// Use the in-cluster service account instead of a kubeconfig
    pub in_cluster: bool,

    /// Explicit kubeconfig path when not running in-cluster
    pub kubeconfig: Option<PathBuf>,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            secret_name: "app-secrets".to_string(),
            in_cluster: true,
            kubeconfig: None,
        }
    }
}

/// Configuration for the environment-variable provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Prepended to every key, e.g. `APP_`
    pub prefix: String,

    /// Match variable names exactly instead of ignoring ASCII case
    pub case_sensitive: bool,

    /// Explicit key to variable name overrides
    pub mapping: HashMap<String, String>,
}

/// Serialization format of the secrets file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    #[serde(alias = "structured")]
    Json,
    #[serde(alias = "yml", alias = "hierarchical")]
    Yaml,
    #[serde(alias = "env", alias = "line-oriented")]
    Properties,
}

/// Configuration for the file provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub path: PathBuf,
    pub format: FileFormat,
    /// Encrypt the file with the key at `key_path`
    pub encrypted: bool,
    pub key_path: Option<PathBuf>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./secrets.json"),
            format: FileFormat::Json,
            encrypted: false,
            key_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Enable JSON structured logging
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SecretsConfig::default();
        assert_eq!(config.provider, ProviderKind::Environment);
        assert!(config.fallbacks.is_empty());
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.max_entries, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(SecretsConfig::development().validate().is_ok());
        assert!(SecretsConfig::production().validate().is_ok());
        assert!(SecretsConfig::kubernetes().validate().is_ok());
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("vault".parse::<ProviderKind>().unwrap(), ProviderKind::Vault);
        assert_eq!("AWS-SSM".parse::<ProviderKind>().unwrap(), ProviderKind::AwsSsm);
        assert_eq!("env".parse::<ProviderKind>().unwrap(), ProviderKind::Environment);
        assert!("consul".parse::<ProviderKind>().is_err());

        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_provider_kind_serde_identifiers() {
        let kinds: Vec<ProviderKind> =
            serde_json::from_str(r#"["vault","aws-secrets","aws-ssm","kubernetes","environment","file"]"#)
                .unwrap();
        assert_eq!(kinds, ProviderKind::ALL.to_vec());
        assert!(serde_json::from_str::<ProviderKind>(r#""consul""#).is_err());
    }

    #[test]
    fn test_missing_block_for_primary_is_rejected() {
        let config = SecretsConfig { provider: ProviderKind::Vault, ..SecretsConfig::default() };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SecretsError::Configuration { .. }));
        assert!(err.to_string().contains("'vault' configuration block is missing"));
    }

    #[test]
    fn test_missing_block_for_fallback_is_rejected() {
        let config = SecretsConfig { fallbacks: vec![ProviderKind::File], ..SecretsConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encrypted_file_requires_key_path() {
        let config = SecretsConfig {
            provider: ProviderKind::File,
            file: Some(FileSettings { encrypted: true, ..FileSettings::default() }),
            ..SecretsConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("key_path"));
    }

    #[test]
    fn test_ssm_path_must_be_absolute() {
        let config = SecretsConfig {
            provider: ProviderKind::AwsSsm,
            aws: Some(AwsSettings { ssm_path: "app/secrets".to_string(), ..AwsSettings::default() }),
            ..SecretsConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SecretsConfig { provider: ProviderKind::AwsSecrets, ..config };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vault_validation() {
        let mut config = SecretsConfig {
            provider: ProviderKind::Vault,
            vault: Some(VaultSettings { address: "not a url".to_string(), ..VaultSettings::default() }),
            ..SecretsConfig::default()
        };
        assert!(config.validate().is_err());

        config.vault = Some(VaultSettings { kv_version: Some(3), ..VaultSettings::default() });
        assert!(config.validate().is_err());

        config.vault = Some(VaultSettings { kv_version: Some(1), ..VaultSettings::default() });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_validation() {
        let config = SecretsConfig {
            cache: CacheSettings { max_entries: 0, ..CacheSettings::default() },
            ..SecretsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_method_aliases_and_mount_defaults() {
        let auth: VaultAuthSettings =
            serde_json::from_str(r#"{"method":"cloud-iam","parameters":{"role":"web"}}"#).unwrap();
        assert_eq!(auth.method, VaultAuthMethod::Aws);
        assert_eq!(auth.mount_path(), "aws");

        let auth: VaultAuthSettings =
            serde_json::from_str(r#"{"method":"oauth-token","mount_path":"/gh/"}"#).unwrap();
        assert_eq!(auth.method, VaultAuthMethod::Github);
        assert_eq!(auth.mount_path(), "gh");
    }

    #[test]
    fn test_file_format_aliases() {
        let formats: Vec<FileFormat> =
            serde_json::from_str(r#"["structured","hierarchical","line-oriented","yml","env"]"#).unwrap();
        assert_eq!(
            formats,
            vec![
                FileFormat::Json,
                FileFormat::Yaml,
                FileFormat::Properties,
                FileFormat::Yaml,
                FileFormat::Properties
            ]
        );
    }

    #[test]
    fn test_auth_parameters_are_redacted_in_debug() {
        let config = SecretsConfig::production();
        let debug = format!("{:?}", config.vault.unwrap().auth.unwrap());
        assert!(debug.contains("[REDACTED]"));
    }
}
