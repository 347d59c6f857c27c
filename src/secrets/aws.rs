//! AWS Secrets Manager and SSM Parameter Store backends.
//!
//! Both providers share one SDK configuration loader: the region comes from
//! settings, `endpoint_url` redirects calls to a local emulator such as
//! LocalStack, and `role_arn` switches credentials to an STS assumed role.
//!
//! Parameter Store keys are nodes below a base path. With the default base
//! `/app/secrets`, the key `db/password` is the parameter
//! `/app/secrets/db/password`. All values are written as `SecureString`.
//!
//! The SDK clients are only compiled with the `aws` feature. Path handling and
//! error classification are always available.

use super::error::SecretsError;

/// Maximum names per `GetParameters` call.
pub const SSM_GET_PARAMETERS_LIMIT: usize = 10;

/// Metadata key used as the secret description instead of a tag.
pub const DESCRIPTION_METADATA_KEY: &str = "description";

/// Maps caller keys to Parameter Store names below a base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterPath {
    base: String,
}

impl ParameterPath {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self { base: base.trim_end_matches('/').to_string() }
    }

    /// Parameter name for `key`.
    pub fn full_path(&self, key: &str) -> String {
        format!("{}/{}", self.base, key.trim_start_matches('/'))
    }

    /// Caller key for a parameter name, `None` when it is outside the base path.
    pub fn relative_key(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix(self.base.as_str())?;
        let key = rest.strip_prefix('/')?;
        (!key.is_empty()).then(|| key.to_string())
    }

    /// Hierarchy node to walk when listing keys starting with `prefix`.
    pub fn list_root(&self, prefix: &str) -> String {
        let prefix = prefix.trim_start_matches('/');
        match prefix.rfind('/') {
            Some(idx) => self.full_path(prefix[..idx].trim_end_matches('/')),
            None if self.base.is_empty() => "/".to_string(),
            None => self.base.clone(),
        }
    }
}

/// Classify an AWS error code the way the fallback chain expects.
pub fn classify_error_code(key: &str, code: Option<&str>, detail: &str) -> SecretsError {
    match code {
        Some("ResourceNotFoundException" | "ParameterNotFound" | "ParameterVersionNotFound") => {
            SecretsError::not_found(key)
        }
        Some(code) if code.starts_with("AccessDenied") || code == "UnauthorizedOperation" => {
            SecretsError::permission_denied(format!("AWS denied access to '{}': {}", key, detail))
        }
        _ => SecretsError::unavailable(format!("AWS request for '{}' failed: {}", key, detail)),
    }
}

#[cfg(feature = "aws")]
pub use sdk::{AwsSecretsManagerProvider, ParameterStoreProvider};

#[cfg(feature = "aws")]
mod sdk {
    use async_trait::async_trait;
    use aws_config::{BehaviorVersion, Region, SdkConfig};
    use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata};
    use aws_sdk_secretsmanager::types::Tag;
    use aws_sdk_ssm::types::ParameterType;
    use std::collections::HashMap;
    use tracing::{debug, info, instrument, warn};

    use super::{classify_error_code, ParameterPath, DESCRIPTION_METADATA_KEY, SSM_GET_PARAMETERS_LIMIT};
    use crate::config::AwsSettings;
    use crate::secrets::error::{Result, SecretsError};
    use crate::secrets::provider::SecretProvider;
    use crate::secrets::types::{SecretMetadata, SecretString};

    const SESSION_NAME: &str = "secret-broker";

    async fn load_sdk_config(settings: &AwsSettings) -> Result<SdkConfig> {
        if settings.region.trim().is_empty() {
            return Err(SecretsError::configuration("AWS region cannot be empty"));
        }

        let region = Region::new(settings.region.clone());
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region.clone());

        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        if let Some(role_arn) = &settings.role_arn {
            let assumed = aws_config::sts::AssumeRoleProvider::builder(role_arn)
                .session_name(SESSION_NAME)
                .region(region)
                .build()
                .await;
            loader = loader.credentials_provider(assumed);
        }

        Ok(loader.load().await)
    }

    fn map_sdk_error<E>(key: &str, err: E) -> SecretsError
    where
        E: ProvideErrorMetadata + std::error::Error,
    {
        let code = err.code().map(str::to_string);
        classify_error_code(key, code.as_deref(), &DisplayErrorContext(&err).to_string())
    }

    /// AWS Secrets Manager backend. Each key is a secret name holding a string value.
    pub struct AwsSecretsManagerProvider {
        client: aws_sdk_secretsmanager::Client,
    }

    impl AwsSecretsManagerProvider {
        pub async fn new(settings: AwsSettings) -> Result<Self> {
            let sdk_config = load_sdk_config(&settings).await?;
            let client = aws_sdk_secretsmanager::Client::new(&sdk_config);

            info!(
                region = %settings.region,
                endpoint = ?settings.endpoint_url,
                assume_role = settings.role_arn.is_some(),
                "Initialized AWS Secrets Manager provider"
            );

            Ok(Self { client })
        }

        async fn create(&self, key: &str, value: &str, metadata: &SecretMetadata) -> Result<()> {
            let tags: Vec<Tag> = metadata
                .iter()
                .filter(|(name, _)| name.as_str() != DESCRIPTION_METADATA_KEY)
                .map(|(name, value)| Tag::builder().key(name).value(value).build())
                .collect();

            self.client
                .create_secret()
                .name(key)
                .secret_string(value)
                .set_description(metadata.get(DESCRIPTION_METADATA_KEY).cloned())
                .set_tags(if tags.is_empty() { None } else { Some(tags) })
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e))?;

            debug!(key = %key, "Created secret in AWS Secrets Manager");
            Ok(())
        }
    }

    #[async_trait]
    impl SecretProvider for AwsSecretsManagerProvider {
        fn name(&self) -> &'static str {
            "aws-secrets"
        }

        #[instrument(skip(self), fields(provider = "aws-secrets"))]
        async fn get_secret(&self, key: &str) -> Result<SecretString> {
            let output = self
                .client
                .get_secret_value()
                .secret_id(key)
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e))?;

            output
                .secret_string()
                .map(SecretString::new)
                .ok_or_else(|| SecretsError::unavailable(format!("Secret '{}' has no string value", key)))
        }

        #[instrument(skip(self, value, metadata), fields(provider = "aws-secrets"))]
        async fn set_secret(&self, key: &str, value: &str, metadata: &SecretMetadata) -> Result<()> {
            let result = self.client.put_secret_value().secret_id(key).secret_string(value).send().await;

            match result {
                Ok(_) => {
                    debug!(key = %key, "Updated secret in AWS Secrets Manager");
                    Ok(())
                }
                Err(e) if e.code() == Some("ResourceNotFoundException") => self.create(key, value, metadata).await,
                Err(e) => Err(map_sdk_error(key, e)),
            }
        }

        #[instrument(skip(self), fields(provider = "aws-secrets"))]
        async fn delete_secret(&self, key: &str) -> Result<()> {
            self.client
                .delete_secret()
                .secret_id(key)
                .force_delete_without_recovery(true)
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e))?;
            Ok(())
        }

        #[instrument(skip(self), fields(provider = "aws-secrets"))]
        async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
            let mut keys = Vec::new();
            let mut next_token: Option<String> = None;

            loop {
                let output = self
                    .client
                    .list_secrets()
                    .max_results(100)
                    .set_next_token(next_token.take())
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(prefix, e))?;

                keys.extend(
                    output
                        .secret_list()
                        .iter()
                        .filter_map(|entry| entry.name())
                        .filter(|name| name.starts_with(prefix))
                        .map(str::to_string),
                );

                match output.next_token() {
                    Some(token) => next_token = Some(token.to_string()),
                    None => break,
                }
            }

            keys.sort();
            Ok(keys)
        }

        async fn health_check(&self) -> Result<()> {
            self.client
                .list_secrets()
                .max_results(1)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| SecretsError::unavailable(format!(
                    "AWS Secrets Manager health check failed: {}",
                    DisplayErrorContext(&e)
                )))
        }
    }

    /// SSM Parameter Store backend rooted at a base path.
    pub struct ParameterStoreProvider {
        client: aws_sdk_ssm::Client,
        paths: ParameterPath,
    }

    impl ParameterStoreProvider {
        pub async fn new(settings: AwsSettings) -> Result<Self> {
            let sdk_config = load_sdk_config(&settings).await?;
            let client = aws_sdk_ssm::Client::new(&sdk_config);

            info!(
                region = %settings.region,
                ssm_path = %settings.ssm_path,
                endpoint = ?settings.endpoint_url,
                "Initialized SSM Parameter Store provider"
            );

            Ok(Self { client, paths: ParameterPath::new(settings.ssm_path) })
        }
    }

    #[async_trait]
    impl SecretProvider for ParameterStoreProvider {
        fn name(&self) -> &'static str {
            "aws-ssm"
        }

        #[instrument(skip(self), fields(provider = "aws-ssm"))]
        async fn get_secret(&self, key: &str) -> Result<SecretString> {
            let output = self
                .client
                .get_parameter()
                .name(self.paths.full_path(key))
                .with_decryption(true)
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e))?;

            output
                .parameter()
                .and_then(|parameter| parameter.value())
                .map(SecretString::new)
                .ok_or_else(|| SecretsError::not_found(key))
        }

        #[instrument(skip(self, keys), fields(provider = "aws-ssm", count = keys.len()))]
        async fn get_secrets(&self, keys: &[String]) -> Result<HashMap<String, SecretString>> {
            let names: Vec<String> = keys.iter().map(|key| self.paths.full_path(key)).collect();
            let mut found = HashMap::with_capacity(keys.len());

            for batch in names.chunks(SSM_GET_PARAMETERS_LIMIT) {
                let output = match self
                    .client
                    .get_parameters()
                    .set_names(Some(batch.to_vec()))
                    .with_decryption(true)
                    .send()
                    .await
                {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(batch_size = batch.len(), error = %DisplayErrorContext(&e), "Parameter batch failed");
                        continue;
                    }
                };

                for parameter in output.parameters() {
                    let (Some(name), Some(value)) = (parameter.name(), parameter.value()) else {
                        continue;
                    };
                    if let Some(key) = self.paths.relative_key(name) {
                        found.insert(key, SecretString::new(value));
                    }
                }

                if !output.invalid_parameters().is_empty() {
                    warn!(missing = ?output.invalid_parameters(), "Parameters not found");
                }
            }

            if found.len() < keys.len() {
                warn!(requested = keys.len(), found = found.len(), "Some parameters could not be retrieved");
            }
            Ok(found)
        }

        #[instrument(skip(self, value, metadata), fields(provider = "aws-ssm"))]
        async fn set_secret(&self, key: &str, value: &str, metadata: &SecretMetadata) -> Result<()> {
            if metadata.keys().any(|name| name != DESCRIPTION_METADATA_KEY) {
                debug!(key = %key, "Parameter Store keeps only the description metadata on overwrite");
            }

            self.client
                .put_parameter()
                .name(self.paths.full_path(key))
                .value(value)
                .r#type(ParameterType::SecureString)
                .overwrite(true)
                .set_description(metadata.get(DESCRIPTION_METADATA_KEY).cloned())
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e))?;
            Ok(())
        }

        #[instrument(skip(self), fields(provider = "aws-ssm"))]
        async fn delete_secret(&self, key: &str) -> Result<()> {
            self.client
                .delete_parameter()
                .name(self.paths.full_path(key))
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e))?;
            Ok(())
        }

        #[instrument(skip(self), fields(provider = "aws-ssm"))]
        async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
            let root = self.paths.list_root(prefix);
            let wanted = prefix.trim_start_matches('/');
            let mut keys = Vec::new();
            let mut next_token: Option<String> = None;

            loop {
                let output = self
                    .client
                    .get_parameters_by_path()
                    .path(&root)
                    .recursive(true)
                    .with_decryption(false)
                    .set_next_token(next_token.take())
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(prefix, e))?;

                keys.extend(
                    output
                        .parameters()
                        .iter()
                        .filter_map(|parameter| parameter.name())
                        .filter_map(|name| self.paths.relative_key(name))
                        .filter(|key| key.starts_with(wanted)),
                );

                match output.next_token() {
                    Some(token) => next_token = Some(token.to_string()),
                    None => break,
                }
            }

            keys.sort();
            Ok(keys)
        }

        async fn health_check(&self) -> Result<()> {
            self.client
                .describe_parameters()
                .max_results(1)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| SecretsError::unavailable(format!(
                    "Parameter Store health check failed: {}",
                    DisplayErrorContext(&e)
                )))
        }
    }
}
