//! Kubernetes Secrets backend.
//!
//! All keys live in the `data` map of one named `Secret` object in a single
//! namespace. Metadata for a key is kept in the object's annotations as
//! `secret-broker/<key>.<name>`, each part encoded by [`encode_annotation_part`].
//!
//! Writes are read-modify-replace against the object's `resourceVersion`, so
//! two concurrent writers cannot silently overwrite each other: the loser gets
//! a conflict, reported as `Unavailable`.

use std::collections::BTreeMap;

/// Annotation prefix for per-key metadata.
pub const ANNOTATION_PREFIX: &str = "secret-broker/";

/// Annotation name holding metadata `name` for `key`.
///
/// Both parts go through [`encode_annotation_part`], which never emits `.`,
/// so distinct `(key, name)` pairs always map to distinct annotations and
/// `annotation_key(key, "")` is a prefix of exactly that key's annotations.
pub fn annotation_key(key: &str, name: &str) -> String {
    format!("{}{}.{}", ANNOTATION_PREFIX, encode_annotation_part(key), encode_annotation_part(name))
}

/// ASCII letters, digits and `-` pass through; every other byte becomes `_xx`.
pub fn encode_annotation_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

/// Data keys starting with `prefix`, sorted.
pub fn matching_keys<V>(data: &BTreeMap<String, V>, prefix: &str) -> Vec<String> {
    data.keys().filter(|key| key.starts_with(prefix)).cloned().collect()
}

#[cfg(feature = "kubernetes")]
pub use client::KubernetesProvider;

#[cfg(feature = "kubernetes")]
mod client {
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use kube::api::PostParams;
    use kube::config::{KubeConfigOptions, Kubeconfig};
    use kube::{Api, Client};
    use std::collections::BTreeMap;
    use tracing::{debug, info, instrument};

    use super::{annotation_key, matching_keys};
    use crate::config::KubernetesSettings;
    use crate::secrets::error::{Result, SecretsError};
    use crate::secrets::provider::SecretProvider;
    use crate::secrets::types::{SecretMetadata, SecretString};

    /// Kubernetes Secrets backend over a single `Secret` object.
    pub struct KubernetesProvider {
        api: Api<Secret>,
        namespace: String,
        secret_name: String,
    }

    impl KubernetesProvider {
        pub async fn new(settings: KubernetesSettings) -> Result<Self> {
            let client = build_client(&settings).await?;
            let api: Api<Secret> = Api::namespaced(client, &settings.namespace);

            info!(
                namespace = %settings.namespace,
                secret_name = %settings.secret_name,
                in_cluster = settings.in_cluster,
                "Initialized Kubernetes Secrets provider"
            );

            Ok(Self { api, namespace: settings.namespace, secret_name: settings.secret_name })
        }

        async fn fetch(&self) -> Result<Option<Secret>> {
            self.api.get_opt(&self.secret_name).await.map_err(|e| self.map_error(&self.secret_name, e))
        }

        fn map_error(&self, key: &str, err: kube::Error) -> SecretsError {
            match err {
                kube::Error::Api(response) if response.code == 404 => SecretsError::not_found(key),
                kube::Error::Api(response) if response.code == 403 => SecretsError::permission_denied(format!(
                    "Kubernetes denied access to secret {}/{}: {}",
                    self.namespace, self.secret_name, response.message
                )),
                other => SecretsError::unavailable(format!(
                    "Kubernetes request for {}/{} failed: {}",
                    self.namespace, self.secret_name, other
                )),
            }
        }

        fn empty_secret(&self) -> Secret {
            Secret {
                metadata: ObjectMeta {
                    name: Some(self.secret_name.clone()),
                    namespace: Some(self.namespace.clone()),
                    ..Default::default()
                },
                type_: Some("Opaque".to_string()),
                ..Default::default()
            }
        }
    }

    async fn build_client(settings: &KubernetesSettings) -> Result<Client> {
        let config = if let Some(path) = &settings.kubeconfig {
            let contents = tokio::fs::read_to_string(path).await?;
            let kubeconfig = Kubeconfig::from_yaml(&contents).map_err(|e| {
                SecretsError::configuration(format!("Failed to parse kubeconfig {}: {}", path.display(), e))
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| SecretsError::configuration(format!("Failed to load kubeconfig: {}", e)))?
        } else if settings.in_cluster {
            kube::Config::incluster()
                .map_err(|e| SecretsError::configuration(format!("In-cluster configuration unavailable: {}", e)))?
        } else {
            return Client::try_default()
                .await
                .map_err(|e| SecretsError::configuration(format!("Failed to create Kubernetes client: {}", e)));
        };

        Client::try_from(config)
            .map_err(|e| SecretsError::configuration(format!("Failed to create Kubernetes client: {}", e)))
    }

    #[async_trait]
    impl SecretProvider for KubernetesProvider {
        fn name(&self) -> &'static str {
            "kubernetes"
        }

        #[instrument(skip(self), fields(provider = "kubernetes"))]
        async fn get_secret(&self, key: &str) -> Result<SecretString> {
            let secret = self.fetch().await?.ok_or_else(|| SecretsError::not_found(key))?;

            let bytes = secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .ok_or_else(|| SecretsError::not_found(key))?;

            String::from_utf8(bytes.0.clone())
                .map(SecretString::new)
                .map_err(|_| SecretsError::serialization(format!("Secret key '{}' is not valid UTF-8", key)))
        }

        #[instrument(skip(self, value, metadata), fields(provider = "kubernetes"))]
        async fn set_secret(&self, key: &str, value: &str, metadata: &SecretMetadata) -> Result<()> {
            let existing = self.fetch().await?;
            let exists = existing.is_some();
            let mut secret = existing.unwrap_or_else(|| self.empty_secret());

            secret
                .data
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), ByteString(value.as_bytes().to_vec()));

            if !metadata.is_empty() {
                let annotations = secret.metadata.annotations.get_or_insert_with(BTreeMap::new);
                for (name, meta_value) in metadata {
                    annotations.insert(annotation_key(key, name), meta_value.clone());
                }
            }

            let params = PostParams::default();
            let result = if exists {
                self.api.replace(&self.secret_name, &params, &secret).await
            } else {
                self.api.create(&params, &secret).await
            };
            result.map_err(|e| self.map_error(key, e))?;

            debug!(key = %key, created = !exists, "Stored secret in Kubernetes");
            Ok(())
        }

        #[instrument(skip(self), fields(provider = "kubernetes"))]
        async fn delete_secret(&self, key: &str) -> Result<()> {
            let mut secret = self.fetch().await?.ok_or_else(|| SecretsError::not_found(key))?;

            let removed = secret.data.as_mut().and_then(|data| data.remove(key));
            if removed.is_none() {
                return Err(SecretsError::not_found(key));
            }

            if let Some(annotations) = secret.metadata.annotations.as_mut() {
                let own = annotation_key(key, "");
                annotations.retain(|name, _| !name.starts_with(&own));
            }

            self.api
                .replace(&self.secret_name, &PostParams::default(), &secret)
                .await
                .map_err(|e| self.map_error(key, e))?;
            Ok(())
        }

        #[instrument(skip(self), fields(provider = "kubernetes"))]
        async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .fetch()
                .await?
                .and_then(|secret| secret.data)
                .map(|data| matching_keys(&data, prefix))
                .unwrap_or_default())
        }

        async fn health_check(&self) -> Result<()> {
            self.api.get(&self.secret_name).await.map(|_| ()).map_err(|e| {
                SecretsError::unavailable(format!(
                    "Kubernetes secret {}/{} is not readable: {}",
                    self.namespace, self.secret_name, e
                ))
            })
        }
    }
}
