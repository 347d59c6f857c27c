//! HashiCorp Vault secrets backend implementation.
//!
//! Secrets live in a KV secrets engine. Each key is stored as a small JSON
//! object whose `value` field holds the secret and whose remaining fields hold
//! caller metadata:
//!
//! ```json
//! { "value": "s3cr3t", "owner": "payments" }
//! ```
//!
//! Both engine versions are supported. With v2, reads and writes go through
//! `<mount>/data/<key>`, listing through `<mount>/metadata/<prefix>`, and a
//! delete removes every version. With v1 all calls address `<mount>/<key>`
//! directly. The version is taken from `kv_version` when configured and
//! otherwise detected once at construction from the mount's options.
//!
//! Authentication happens before the client is built; see
//! [`vault_auth`](super::vault_auth) for the token precedence rules.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, instrument, warn};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::{kv1, kv2};

use super::error::{Result, SecretsError};
use super::provider::SecretProvider;
use super::types::{SecretMetadata, SecretString};
use super::vault_auth::{AuthState, VaultAuthenticator};
use crate::config::VaultSettings;

/// Field holding the secret inside a stored payload.
pub const VALUE_FIELD: &str = "value";

/// KV secrets engine version of the configured mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvVersion {
    V1,
    V2,
}

impl KvVersion {
    pub fn from_number(version: u8) -> Result<Self> {
        match version {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(SecretsError::configuration(format!(
                "Unsupported Vault KV version {}, expected 1 or 2",
                other
            ))),
        }
    }

    /// API path used to read and write `key`.
    pub fn data_path(&self, mount: &str, key: &str) -> String {
        let mount = mount.trim_matches('/');
        let key = key.trim_start_matches('/');
        match self {
            Self::V1 => format!("{}/{}", mount, key),
            Self::V2 => format!("{}/data/{}", mount, key),
        }
    }

    /// API path used to list keys below `prefix`.
    pub fn list_path(&self, mount: &str, prefix: &str) -> String {
        let mount = mount.trim_matches('/');
        let prefix = prefix.trim_start_matches('/');
        match self {
            Self::V1 => format!("{}/{}", mount, prefix),
            Self::V2 => format!("{}/metadata/{}", mount, prefix),
        }
    }
}

impl fmt::Display for KvVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

/// HashiCorp Vault secrets backend.
///
/// # Thread Safety
///
/// The underlying `VaultClient` is a stateless HTTP client, so the provider is
/// `Send + Sync` and shared across tasks without locking.
///
/// # Example
///
/// ```rust,ignore
/// let settings = VaultSettings {
///     address: "https://vault.internal:8200".into(),
///     token: Some("hvs.example".into()),
///     ..VaultSettings::default()
/// };
/// let provider = VaultProvider::new(settings).await?;
/// provider.set_secret("db_password", "s3cr3t", &SecretMetadata::new()).await?;
/// ```
pub struct VaultProvider {
    client: VaultClient,
    mount_path: String,
    engine: KvVersion,
    auth_state: AuthState,
}

impl VaultProvider {
    /// Authenticate, build the client and resolve the KV engine version.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::Authentication`] if no token can be obtained
    /// - [`SecretsError::Configuration`] if the client settings are invalid
    pub async fn new(settings: VaultSettings) -> Result<Self> {
        if settings.address.trim().is_empty() {
            return Err(SecretsError::configuration("Vault address cannot be empty"));
        }

        let http = build_http_client(&settings)?;

        let mut authenticator = VaultAuthenticator::new(&settings, &http);
        let token = authenticator.authenticate().await?;
        let auth_state = authenticator.state();

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&settings.address);
        settings_builder.token(token.expose_secret());
        settings_builder.timeout(settings.request_timeout);
        settings_builder.verify(!settings.tls.insecure_skip_verify);

        if let Some(namespace) = &settings.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }
        if let Some(ca_cert) = &settings.tls.ca_cert {
            settings_builder.ca_certs(vec![ca_cert.to_string_lossy().into_owned()]);
        }

        let client_settings = settings_builder.build().map_err(|e| {
            SecretsError::configuration(format!("Invalid Vault configuration: {}", e))
        })?;

        let client = VaultClient::new(client_settings).map_err(|e| {
            SecretsError::configuration(format!("Failed to create Vault client: {}", e))
        })?;

        let engine = match settings.kv_version {
            Some(version) => KvVersion::from_number(version)?,
            None => detect_kv_version(&http, &settings, &token).await,
        };

        info!(
            address = %settings.address,
            mount_path = %settings.mount_path,
            engine = %engine,
            auth_state = ?auth_state,
            "Initialized Vault provider"
        );

        Ok(Self { client, mount_path: settings.mount_path.trim_matches('/').to_string(), engine, auth_state })
    }

    pub fn engine(&self) -> KvVersion {
        self.engine
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state
    }

    async fn read_payload(&self, key: &str) -> Result<HashMap<String, Value>> {
        let result = match self.engine {
            KvVersion::V2 => kv2::read::<HashMap<String, Value>>(&self.client, &self.mount_path, key).await,
            KvVersion::V1 => kv1::get::<HashMap<String, Value>>(&self.client, &self.mount_path, key).await,
        };
        result.map_err(|e| map_client_error(key, e))
    }
}

#[async_trait]
impl SecretProvider for VaultProvider {
    fn name(&self) -> &'static str {
        "vault"
    }

    #[instrument(skip(self), fields(provider = "vault"))]
    async fn get_secret(&self, key: &str) -> Result<SecretString> {
        let payload = self.read_payload(key).await?;
        extract_value(key, &payload).ok_or_else(|| {
            debug!(
                key = %key,
                path = %self.engine.data_path(&self.mount_path, key),
                "Vault payload has neither a 'value' field nor a field named after the key"
            );
            SecretsError::not_found(key)
        })
    }

    #[instrument(skip(self, value, metadata), fields(provider = "vault"))]
    async fn set_secret(&self, key: &str, value: &str, metadata: &SecretMetadata) -> Result<()> {
        let payload = build_payload(value, metadata);

        let result = match self.engine {
            KvVersion::V2 => kv2::set(&self.client, &self.mount_path, key, &payload).await.map(|_| ()),
            KvVersion::V1 => {
                let fields: HashMap<&str, &str> =
                    payload.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                kv1::set(&self.client, &self.mount_path, key, &fields).await
            }
        };

        result.map_err(|e| map_client_error(key, e))?;
        debug!(key = %key, path = %self.engine.data_path(&self.mount_path, key), "Stored secret in Vault");
        Ok(())
    }

    #[instrument(skip(self), fields(provider = "vault"))]
    async fn delete_secret(&self, key: &str) -> Result<()> {
        // Vault acknowledges deletes of absent paths, so existence is checked first.
        let result = match self.engine {
            KvVersion::V2 => match kv2::read_metadata(&self.client, &self.mount_path, key).await {
                Ok(_) => kv2::delete_metadata(&self.client, &self.mount_path, key).await,
                Err(e) => Err(e),
            },
            KvVersion::V1 => match kv1::get::<HashMap<String, Value>>(&self.client, &self.mount_path, key).await {
                Ok(_) => kv1::delete(&self.client, &self.mount_path, key).await,
                Err(e) => Err(e),
            },
        };

        result.map_err(|e| map_client_error(key, e))?;
        debug!(key = %key, "Deleted secret from Vault");
        Ok(())
    }

    #[instrument(skip(self), fields(provider = "vault"))]
    async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
        let (directory, partial) = split_list_prefix(prefix);

        let result = match self.engine {
            KvVersion::V2 => kv2::list(&self.client, &self.mount_path, directory).await,
            KvVersion::V1 => kv1::list(&self.client, &self.mount_path, directory).await.map(|r| r.data.keys),
        };

        let names = match result {
            Ok(names) => names,
            Err(ClientError::APIError { code: 404, .. }) => {
                debug!(path = %self.engine.list_path(&self.mount_path, directory), "Nothing to list");
                return Ok(Vec::new());
            }
            Err(e) => return Err(map_client_error(prefix, e)),
        };

        let mut keys: Vec<String> = names
            .into_iter()
            .filter(|name| name.starts_with(partial))
            .map(|name| format!("{}{}", directory, name))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn health_check(&self) -> Result<()> {
        let health = vaultrs::sys::health(&self.client)
            .await
            .map_err(|e| SecretsError::unavailable(format!("Vault health check failed: {}", e)))?;

        if !health.initialized {
            return Err(SecretsError::unavailable("Vault is not initialized"));
        }
        if health.sealed {
            return Err(SecretsError::unavailable("Vault is sealed"));
        }
        Ok(())
    }
}

/// HTTP client used for login and mount introspection, honouring the TLS block.
pub(crate) fn build_http_client(settings: &VaultSettings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    if let Some(timeout) = settings.request_timeout {
        builder = builder.timeout(timeout);
    }
    if settings.tls.insecure_skip_verify {
        warn!(address = %settings.address, "TLS certificate verification disabled for Vault");
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = &settings.tls.ca_cert {
        let pem = std::fs::read(path).map_err(|e| {
            SecretsError::configuration(format!("Failed to read Vault CA certificate {}: {}", path.display(), e))
        })?;
        let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| {
            SecretsError::configuration(format!("Invalid Vault CA certificate {}: {}", path.display(), e))
        })?;
        builder = builder.add_root_certificate(certificate);
    }

    builder
        .build()
        .map_err(|e| SecretsError::configuration(format!("Failed to build Vault HTTP client: {}", e)))
}

/// Ask Vault which KV version backs the mount; assume v2 when the call fails.
pub(crate) async fn detect_kv_version(
    http: &reqwest::Client,
    settings: &VaultSettings,
    token: &SecretString,
) -> KvVersion {
    match fetch_mount_options(http, settings, token).await {
        Ok(Some(engine)) => engine,
        Ok(None) => {
            warn!(mount_path = %settings.mount_path, "Mount is not a KV engine, assuming KV v2");
            KvVersion::V2
        }
        Err(e) => {
            warn!(mount_path = %settings.mount_path, error = %e, "KV version detection failed, assuming KV v2");
            KvVersion::V2
        }
    }
}

async fn fetch_mount_options(
    http: &reqwest::Client,
    settings: &VaultSettings,
    token: &SecretString,
) -> Result<Option<KvVersion>> {
    let url = format!(
        "{}/v1/sys/internal/ui/mounts/{}",
        settings.address.trim_end_matches('/'),
        settings.mount_path.trim_matches('/')
    );

    let mut request = http.get(&url).header("X-Vault-Token", token.expose_secret());
    if let Some(namespace) = &settings.namespace {
        request = request.header("X-Vault-Namespace", namespace);
    }

    let response = request
        .send()
        .await
        .map_err(|e| SecretsError::unavailable(format!("mount introspection failed: {}", e)))?;
    if !response.status().is_success() {
        return Err(SecretsError::unavailable(format!(
            "mount introspection returned {}",
            response.status()
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| SecretsError::unavailable(format!("mount introspection body: {}", e)))?;
    Ok(kv_version_from_mount(&body))
}

/// Engine version from a `sys/internal/ui/mounts/<mount>` response body.
pub fn kv_version_from_mount(body: &Value) -> Option<KvVersion> {
    let data = body.get("data").unwrap_or(body);

    let version = data.pointer("/options/version").and_then(|v| match v {
        Value::String(s) => s.parse::<u8>().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        _ => None,
    });

    match version {
        Some(2) => Some(KvVersion::V2),
        Some(_) => Some(KvVersion::V1),
        None if data.get("type").and_then(Value::as_str) == Some("kv") => Some(KvVersion::V1),
        None => None,
    }
}

/// Payload written for a secret: metadata fields plus `value`.
pub fn build_payload(value: &str, metadata: &SecretMetadata) -> HashMap<String, String> {
    let mut payload: HashMap<String, String> =
        metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    payload.insert(VALUE_FIELD.to_string(), value.to_string());
    payload
}

/// Secret value from a stored payload: `value`, else a field named like the key.
pub fn extract_value(key: &str, payload: &HashMap<String, Value>) -> Option<SecretString> {
    let field = payload.get(VALUE_FIELD).or_else(|| payload.get(key))?;
    match field {
        Value::String(s) => Some(SecretString::new(s.as_str())),
        Value::Null => None,
        other => Some(SecretString::new(other.to_string())),
    }
}

/// Split a list prefix into the directory Vault can list and the partial name to filter by.
fn split_list_prefix(prefix: &str) -> (&str, &str) {
    let prefix = prefix.trim_start_matches('/');
    match prefix.rfind('/') {
        Some(idx) => prefix.split_at(idx + 1),
        None => ("", prefix),
    }
}

fn map_client_error(key: &str, err: ClientError) -> SecretsError {
    match err {
        ClientError::APIError { code: 404, .. } => SecretsError::not_found(key),
        ClientError::APIError { code: 403, errors } => SecretsError::permission_denied(format!(
            "Vault denied access to '{}': {}",
            key,
            errors.join("; ")
        )),
        other => {
            warn!(key = %key, error = %other, "Vault request failed");
            SecretsError::unavailable(format!("Vault request for '{}' failed: {}", key, other))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths_per_engine() {
        assert_eq!(KvVersion::V2.data_path("secret", "db/password"), "secret/data/db/password");
        assert_eq!(KvVersion::V1.data_path("/kv/", "/db/password"), "kv/db/password");
        assert_eq!(KvVersion::V2.list_path("secret", "db/"), "secret/metadata/db/");
        assert_eq!(KvVersion::V1.list_path("kv", "db/"), "kv/db/");
    }

    #[test]
    fn test_kv_version_from_number() {
        assert_eq!(KvVersion::from_number(1).unwrap(), KvVersion::V1);
        assert_eq!(KvVersion::from_number(2).unwrap(), KvVersion::V2);
        assert!(matches!(KvVersion::from_number(3), Err(SecretsError::Configuration { .. })));
    }

    #[test]
    fn test_kv_version_from_mount_body() {
        let v2 = json!({"data": {"type": "kv", "options": {"version": "2"}, "path": "secret/"}});
        assert_eq!(kv_version_from_mount(&v2), Some(KvVersion::V2));

        let v1 = json!({"data": {"type": "kv", "options": null, "path": "kv/"}});
        assert_eq!(kv_version_from_mount(&v1), Some(KvVersion::V1));

        let explicit_v1 = json!({"data": {"type": "kv", "options": {"version": "1"}}});
        assert_eq!(kv_version_from_mount(&explicit_v1), Some(KvVersion::V1));

        let other = json!({"data": {"type": "transit"}});
        assert_eq!(kv_version_from_mount(&other), None);
    }

    #[test]
    fn test_payload_keeps_value_over_metadata() {
        let mut metadata = SecretMetadata::new();
        metadata.insert("owner".to_string(), "payments".to_string());
        metadata.insert(VALUE_FIELD.to_string(), "ignored".to_string());

        let payload = build_payload("s3cr3t", &metadata);
        assert_eq!(payload[VALUE_FIELD], "s3cr3t");
        assert_eq!(payload["owner"], "payments");
    }

    #[test]
    fn test_extract_value() {
        let payload: HashMap<String, Value> =
            serde_json::from_value(json!({"value": "v", "db_password": "other"})).unwrap();
        assert_eq!(extract_value("db_password", &payload).unwrap(), "v");

        let payload: HashMap<String, Value> =
            serde_json::from_value(json!({"db_password": "named"})).unwrap();
        assert_eq!(extract_value("db_password", &payload).unwrap(), "named");

        let payload: HashMap<String, Value> = serde_json::from_value(json!({"port": 5432})).unwrap();
        assert_eq!(extract_value("port", &payload).unwrap(), "5432");

        let payload: HashMap<String, Value> = serde_json::from_value(json!({"owner": "x"})).unwrap();
        assert!(extract_value("db_password", &payload).is_none());
    }

    #[test]
    fn test_split_list_prefix() {
        assert_eq!(split_list_prefix(""), ("", ""));
        assert_eq!(split_list_prefix("db_"), ("", "db_"));
        assert_eq!(split_list_prefix("app/db_"), ("app/", "db_"));
        assert_eq!(split_list_prefix("/app/"), ("app/", ""));
    }

    #[test]
    fn test_error_mapping() {
        let not_found = map_client_error("k", ClientError::APIError { code: 404, errors: vec![] });
        assert!(not_found.is_not_found());

        let denied = map_client_error(
            "k",
            ClientError::APIError { code: 403, errors: vec!["permission denied".to_string()] },
        );
        assert!(matches!(denied, SecretsError::PermissionDenied { .. }));

        let other = map_client_error("k", ClientError::APIError { code: 500, errors: vec![] });
        assert!(matches!(other, SecretsError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_address_rejected() {
        let settings = VaultSettings { address: String::new(), ..VaultSettings::default() };
        assert!(matches!(
            VaultProvider::new(settings).await,
            Err(SecretsError::Configuration { .. })
        ));
    }
}
