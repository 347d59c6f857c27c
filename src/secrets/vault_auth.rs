//! Vault login state machine.
//!
//! A Vault provider starts [`AuthState::Unauthenticated`] and must reach
//! [`AuthState::Authenticated`] before it is usable. The token source is chosen
//! in this order:
//!
//! 1. a static `token` from configuration
//! 2. a token read from `token_path`
//! 3. a dynamic auth method (`kubernetes`, `aws`, `userpass`, `ldap`,
//!    `github`, `approle`), which passes through
//!    [`AuthState::Authenticating`] while it posts credentials to
//!    `auth/<mount>/login`
//! 4. the `VAULT_TOKEN` environment variable
//!
//! Any failure along the chosen path is reported as
//! [`SecretsError::Authentication`] and aborts provider construction.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::error::{Result, SecretsError};
use super::types::SecretString;
use crate::config::{VaultAuthMethod, VaultAuthSettings, VaultSettings};

/// Service account token mounted into every pod.
pub const DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Ambient token variable consulted last.
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

const PROVIDER: &str = "vault";

/// Where the session token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Static,
    TokenFile,
    Method(VaultAuthMethod),
    Environment,
}

/// Authentication progress of a Vault provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating(VaultAuthMethod),
    Authenticated(TokenSource),
}

/// A prepared login call: path relative to `/v1/` and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRequest {
    pub path: String,
    pub body: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: Option<LoginAuth>,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

/// Drives the authentication state machine for one provider construction.
pub struct VaultAuthenticator<'a> {
    settings: &'a VaultSettings,
    http: &'a reqwest::Client,
    state: AuthState,
}

impl<'a> VaultAuthenticator<'a> {
    pub fn new(settings: &'a VaultSettings, http: &'a reqwest::Client) -> Self {
        Self { settings, http, state: AuthState::Unauthenticated }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Obtain a session token following the precedence rules.
    pub async fn authenticate(&mut self) -> Result<SecretString> {
        if let Some(token) = self.settings.token.as_ref().filter(|t| !t.is_empty()) {
            self.transition(AuthState::Authenticated(TokenSource::Static));
            return Ok(token.clone());
        }

        if let Some(path) = &self.settings.token_path {
            let token = read_token_file(path).await?;
            self.transition(AuthState::Authenticated(TokenSource::TokenFile));
            return Ok(token);
        }

        if let Some(auth) = &self.settings.auth {
            self.transition(AuthState::Authenticating(auth.method));
            return match self.login(auth).await {
                Ok(token) => {
                    self.transition(AuthState::Authenticated(TokenSource::Method(auth.method)));
                    info!(method = %auth.method, mount = %auth.mount_path(), "Authenticated with Vault");
                    Ok(token)
                }
                Err(e) => {
                    self.transition(AuthState::Unauthenticated);
                    Err(e)
                }
            };
        }

        match std::env::var(VAULT_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => {
                self.transition(AuthState::Authenticated(TokenSource::Environment));
                Ok(SecretString::new(token.trim()))
            }
            _ => Err(SecretsError::authentication(
                PROVIDER,
                "no token, token_path or auth method configured and VAULT_TOKEN is not set",
            )),
        }
    }

    fn transition(&mut self, next: AuthState) {
        debug!(from = ?self.state, to = ?next, "Vault auth state transition");
        self.state = next;
    }

    async fn login(&self, auth: &VaultAuthSettings) -> Result<SecretString> {
        let mut parameters = auth.parameters.clone();

        if auth.method == VaultAuthMethod::Kubernetes && !parameters.contains_key("jwt") {
            let token_path = parameters
                .get("token_path")
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH.to_string());
            let jwt = read_token_file(Path::new(&token_path)).await?;
            parameters.insert("jwt".to_string(), jwt);
        }

        let request = login_request(auth.method, auth.mount_path(), &parameters)?;
        let url = format!("{}/v1/{}", self.settings.address.trim_end_matches('/'), request.path);

        let mut call = self.http.post(&url).json(&request.body);
        if let Some(namespace) = &self.settings.namespace {
            call = call.header("X-Vault-Namespace", namespace);
        }

        let response = call.send().await.map_err(|e| {
            SecretsError::authentication(PROVIDER, format!("{} login request failed: {}", auth.method, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let errors = response.json::<VaultErrors>().await.unwrap_or_default();
            return Err(SecretsError::authentication(
                PROVIDER,
                format!("{} login rejected ({}): {}", auth.method, status, errors.errors.join("; ")),
            ));
        }

        let body: LoginResponse = response.json().await.map_err(|e| {
            SecretsError::authentication(PROVIDER, format!("{} login returned an invalid body: {}", auth.method, e))
        })?;

        body.auth
            .map(|auth| auth.client_token)
            .filter(|token| !token.is_empty())
            .map(SecretString::new)
            .ok_or_else(|| {
                SecretsError::authentication(PROVIDER, format!("{} login response has no client token", auth.method))
            })
    }
}

/// Build the login call for `method` from its parameters.
///
/// | method | path | body |
/// |---|---|---|
/// | kubernetes | `auth/<mount>/login` | `role`, `jwt` |
/// | aws | `auth/<mount>/login` | `role`, any `iam_*` parameter |
/// | userpass, ldap | `auth/<mount>/login/<username>` | `password` |
/// | github | `auth/<mount>/login` | `token` |
/// | approle | `auth/<mount>/login` | `role_id`, `secret_id` |
pub fn login_request(
    method: VaultAuthMethod,
    mount: &str,
    parameters: &HashMap<String, SecretString>,
) -> Result<LoginRequest> {
    let require = |name: &str| -> Result<String> {
        parameters
            .get(name)
            .map(|value| value.expose_secret().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SecretsError::authentication(
                    PROVIDER,
                    format!("{} auth requires the '{}' parameter", method, name),
                )
            })
    };

    let mount = mount.trim_matches('/');
    let mut body = Map::new();

    let path = match method {
        VaultAuthMethod::Kubernetes => {
            body.insert("role".to_string(), Value::String(require("role")?));
            body.insert("jwt".to_string(), Value::String(require("jwt")?));
            format!("auth/{}/login", mount)
        }
        VaultAuthMethod::Aws => {
            body.insert("role".to_string(), Value::String(require("role")?));
            for (name, value) in parameters.iter().filter(|(name, _)| name.starts_with("iam_")) {
                body.insert(name.clone(), Value::String(value.expose_secret().to_string()));
            }
            format!("auth/{}/login", mount)
        }
        VaultAuthMethod::Userpass | VaultAuthMethod::Ldap => {
            let username = require("username")?;
            body.insert("password".to_string(), Value::String(require("password")?));
            format!("auth/{}/login/{}", mount, username)
        }
        VaultAuthMethod::Github => {
            body.insert("token".to_string(), Value::String(require("token")?));
            format!("auth/{}/login", mount)
        }
        VaultAuthMethod::Approle => {
            body.insert("role_id".to_string(), Value::String(require("role_id")?));
            body.insert("secret_id".to_string(), Value::String(require("secret_id")?));
            format!("auth/{}/login", mount)
        }
    };

    Ok(LoginRequest { path, body })
}

async fn read_token_file(path: &Path) -> Result<SecretString> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        SecretsError::authentication(PROVIDER, format!("failed to read token file {}: {}", path.display(), e))
    })?;

    let token = contents.trim();
    if token.is_empty() {
        return Err(SecretsError::authentication(
            PROVIDER,
            format!("token file {} is empty", path.display()),
        ));
    }
    Ok(SecretString::new(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, SecretString> {
        pairs.iter().map(|(k, v)| (k.to_string(), SecretString::new(*v))).collect()
    }

    #[test]
    fn test_approle_request() {
        let request = login_request(
            VaultAuthMethod::Approle,
            "approle",
            &params(&[("role_id", "r-1"), ("secret_id", "s-1")]),
        )
        .unwrap();

        assert_eq!(request.path, "auth/approle/login");
        assert_eq!(request.body["role_id"], "r-1");
        assert_eq!(request.body["secret_id"], "s-1");
    }

    #[test]
    fn test_userpass_and_ldap_put_username_in_path() {
        for method in [VaultAuthMethod::Userpass, VaultAuthMethod::Ldap] {
            let request = login_request(
                method,
                method.default_mount_path(),
                &params(&[("username", "alice"), ("password", "pw")]),
            )
            .unwrap();

            assert_eq!(request.path, format!("auth/{}/login/alice", method));
            assert_eq!(request.body.len(), 1);
            assert_eq!(request.body["password"], "pw");
        }
    }

    #[test]
    fn test_aws_passes_iam_parameters() {
        let request = login_request(
            VaultAuthMethod::Aws,
            "aws",
            &params(&[("role", "web"), ("iam_request_url", "aHR0cHM="), ("unrelated", "x")]),
        )
        .unwrap();

        assert_eq!(request.body["role"], "web");
        assert_eq!(request.body["iam_request_url"], "aHR0cHM=");
        assert!(!request.body.contains_key("unrelated"));
    }

    #[test]
    fn test_missing_parameter_is_authentication_error() {
        let err = login_request(VaultAuthMethod::Github, "github", &HashMap::new()).unwrap_err();
        assert!(matches!(err, SecretsError::Authentication { .. }));
        assert!(err.to_string().contains("'token'"));

        let err = login_request(VaultAuthMethod::Kubernetes, "kubernetes", &params(&[("role", "app")]))
            .unwrap_err();
        assert!(err.to_string().contains("'jwt'"));
    }

    #[tokio::test]
    async fn test_static_token_wins() {
        let settings = VaultSettings {
            token: Some(SecretString::new("root")),
            token_path: Some("/nonexistent/token".into()),
            ..VaultSettings::default()
        };
        let http = reqwest::Client::new();
        let mut authenticator = VaultAuthenticator::new(&settings, &http);

        assert_eq!(authenticator.authenticate().await.unwrap(), "root");
        assert_eq!(authenticator.state(), AuthState::Authenticated(TokenSource::Static));
    }

    #[tokio::test]
    async fn test_token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "hvs.file-token\n").unwrap();

        let settings = VaultSettings { token_path: Some(path), ..VaultSettings::default() };
        let http = reqwest::Client::new();
        let mut authenticator = VaultAuthenticator::new(&settings, &http);

        assert_eq!(authenticator.authenticate().await.unwrap(), "hvs.file-token");
        assert_eq!(authenticator.state(), AuthState::Authenticated(TokenSource::TokenFile));
    }

    #[tokio::test]
    async fn test_empty_token_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  \n").unwrap();

        let settings = VaultSettings { token_path: Some(path), ..VaultSettings::default() };
        let http = reqwest::Client::new();
        let err = VaultAuthenticator::new(&settings, &http).authenticate().await.unwrap_err();

        assert!(matches!(err, SecretsError::Authentication { .. }));
    }
}
