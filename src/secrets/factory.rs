//! Provider construction from configuration.

use std::sync::Arc;
use tracing::debug;

use super::env::EnvironmentProvider;
use super::error::{Result, SecretsError};
use super::file::FileProvider;
use super::provider::SecretProvider;
use super::vault::VaultProvider;
use crate::config::{ProviderKind, ProviderSettings, SecretsConfig};

/// Build the provider for `kind` from its configuration block.
///
/// # Errors
///
/// - [`SecretsError::Configuration`] when the block is missing or the kind was
///   compiled out (`aws` and `kubernetes` cargo features)
/// - any construction error of the provider itself, such as
///   [`SecretsError::Authentication`] for Vault
pub async fn create_provider(kind: ProviderKind, config: &SecretsConfig) -> Result<Arc<dyn SecretProvider>> {
    let settings = config.provider_settings(kind)?;
    debug!(provider = %kind, "Creating secrets provider");
    build_provider(settings).await
}

/// Build a provider from an already selected configuration block.
pub async fn build_provider(settings: ProviderSettings) -> Result<Arc<dyn SecretProvider>> {
    let provider: Arc<dyn SecretProvider> = match settings {
        ProviderSettings::Vault(vault) => Arc::new(VaultProvider::new(vault).await?),

        #[cfg(feature = "aws")]
        ProviderSettings::AwsSecrets(aws) => Arc::new(super::aws::AwsSecretsManagerProvider::new(aws).await?),
        #[cfg(feature = "aws")]
        ProviderSettings::AwsSsm(aws) => Arc::new(super::aws::ParameterStoreProvider::new(aws).await?),
        #[cfg(not(feature = "aws"))]
        ProviderSettings::AwsSecrets(_) => return Err(feature_disabled(ProviderKind::AwsSecrets, "aws")),
        #[cfg(not(feature = "aws"))]
        ProviderSettings::AwsSsm(_) => return Err(feature_disabled(ProviderKind::AwsSsm, "aws")),

        #[cfg(feature = "kubernetes")]
        ProviderSettings::Kubernetes(k8s) => Arc::new(super::kubernetes::KubernetesProvider::new(k8s).await?),
        #[cfg(not(feature = "kubernetes"))]
        ProviderSettings::Kubernetes(_) => return Err(feature_disabled(ProviderKind::Kubernetes, "kubernetes")),

        ProviderSettings::Environment(env) => Arc::new(EnvironmentProvider::new(env)),
        ProviderSettings::File(file) => Arc::new(FileProvider::new(file).await?),
    };

    Ok(provider)
}

#[cfg(not(all(feature = "aws", feature = "kubernetes")))]
fn feature_disabled(kind: ProviderKind, feature: &str) -> SecretsError {
    SecretsError::configuration(format!(
        "Provider '{}' requires secret-broker to be built with the '{}' feature",
        kind, feature
    ))
}
