//! Vault login and KV engine detection against a mock Vault server.

mod common;

use secret_broker::config::{VaultAuthMethod, VaultAuthSettings, VaultSettings};
use secret_broker::secrets::{AuthState, KvVersion, SecretString, SecretsError, TokenSource, VaultProvider};
use serde_json::json;
use std::collections::HashMap;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::env_lock;

fn auth(method: VaultAuthMethod, params: &[(&str, &str)]) -> VaultAuthSettings {
    VaultAuthSettings {
        method,
        mount_path: None,
        parameters: params
            .iter()
            .map(|(name, value)| (name.to_string(), SecretString::new(*value)))
            .collect::<HashMap<_, _>>(),
    }
}

fn settings(server: &MockServer, auth: Option<VaultAuthSettings>) -> VaultSettings {
    VaultSettings { address: server.uri(), auth, ..VaultSettings::default() }
}

fn login_ok(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "auth": { "client_token": token, "lease_duration": 3600, "renewable": true }
    }))
}

async fn mount_version(server: &MockServer, version: &str) {
    Mock::given(method("GET"))
        .and(path("/v1/sys/internal/ui/mounts/secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "type": "kv", "path": "secret/", "options": { "version": version } }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn approle_login_and_detects_kv_v1() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .and(body_json(json!({ "role_id": "role-123", "secret_id": "secret-456" })))
        .respond_with(login_ok("s.approle"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/internal/ui/mounts/secret"))
        .and(header("X-Vault-Token", "s.approle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "type": "kv", "options": { "version": "1" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = VaultProvider::new(settings(
        &server,
        Some(auth(VaultAuthMethod::Approle, &[("role_id", "role-123"), ("secret_id", "secret-456")])),
    ))
    .await
    .unwrap();

    assert_eq!(provider.engine(), KvVersion::V1);
    assert_eq!(provider.auth_state(), AuthState::Authenticated(TokenSource::Method(VaultAuthMethod::Approle)));
}

#[tokio::test]
async fn userpass_login_uses_custom_mount() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/corp-users/login/alice"))
        .and(body_json(json!({ "password": "hunter2" })))
        .respond_with(login_ok("s.userpass"))
        .expect(1)
        .mount(&server)
        .await;
    mount_version(&server, "2").await;

    let mut userpass = auth(VaultAuthMethod::Userpass, &[("username", "alice"), ("password", "hunter2")]);
    userpass.mount_path = Some("/corp-users/".to_string());

    let provider = VaultProvider::new(settings(&server, Some(userpass))).await.unwrap();
    assert_eq!(provider.engine(), KvVersion::V2);
}

#[tokio::test]
async fn kubernetes_login_reads_service_account_token() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let jwt_path = common::write_file(dir.path(), "token", "eyJhbGciOi.jwt.sig\n");

    Mock::given(method("POST"))
        .and(path("/v1/auth/kubernetes/login"))
        .and(body_json(json!({ "role": "app", "jwt": "eyJhbGciOi.jwt.sig" })))
        .respond_with(login_ok("s.k8s"))
        .expect(1)
        .mount(&server)
        .await;
    mount_version(&server, "2").await;

    let k8s = auth(
        VaultAuthMethod::Kubernetes,
        &[("role", "app"), ("token_path", jwt_path.to_str().unwrap())],
    );
    let provider = VaultProvider::new(settings(&server, Some(k8s))).await.unwrap();

    assert_eq!(provider.auth_state(), AuthState::Authenticated(TokenSource::Method(VaultAuthMethod::Kubernetes)));
}

#[tokio::test]
async fn rejected_login_reports_vault_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "errors": ["invalid role or secret ID"] })))
        .mount(&server)
        .await;

    let err = VaultProvider::new(settings(
        &server,
        Some(auth(VaultAuthMethod::Approle, &[("role_id", "r"), ("secret_id", "bad")])),
    ))
    .await
    .err()
    .unwrap();

    assert!(matches!(err, SecretsError::Authentication { .. }));
    assert!(err.to_string().contains("invalid role or secret ID"));
}

#[tokio::test]
async fn login_without_client_token_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/github/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "auth": null })))
        .mount(&server)
        .await;

    let err = VaultProvider::new(settings(&server, Some(auth(VaultAuthMethod::Github, &[("token", "ghp_x")]))))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, SecretsError::Authentication { .. }));
}

#[tokio::test]
async fn static_token_skips_login_and_sends_namespace() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/internal/ui/mounts/secret"))
        .and(header("X-Vault-Token", "s.static"))
        .and(header("X-Vault-Namespace", "team-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "options": { "version": "2" } } })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = VaultProvider::new(VaultSettings {
        token: Some(SecretString::new("s.static")),
        namespace: Some("team-a".to_string()),
        // login must not be attempted when a static token is present
        auth: Some(auth(VaultAuthMethod::Approle, &[])),
        ..settings(&server, None)
    })
    .await
    .unwrap();

    assert_eq!(provider.auth_state(), AuthState::Authenticated(TokenSource::Static));
}

#[tokio::test]
async fn failed_introspection_assumes_kv_v2() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/internal/ui/mounts/secret"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "errors": ["permission denied"] })))
        .mount(&server)
        .await;

    let provider = VaultProvider::new(VaultSettings {
        token: Some(SecretString::new("s.limited")),
        ..settings(&server, None)
    })
    .await
    .unwrap();

    assert_eq!(provider.engine(), KvVersion::V2);
}

#[tokio::test]
async fn configured_kv_version_skips_introspection() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/internal/ui/mounts/secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = VaultProvider::new(VaultSettings {
        token: Some(SecretString::new("s.static")),
        kv_version: Some(1),
        ..settings(&server, None)
    })
    .await
    .unwrap();

    assert_eq!(provider.engine(), KvVersion::V1);
}

#[tokio::test]
async fn vault_token_environment_is_last_resort() {
    let _guard = env_lock();
    let server = MockServer::start().await;
    mount_version(&server, "2").await;

    std::env::set_var("VAULT_TOKEN", "s.from-env");
    let result = VaultProvider::new(settings(&server, None)).await;
    std::env::remove_var("VAULT_TOKEN");

    assert_eq!(result.unwrap().auth_state(), AuthState::Authenticated(TokenSource::Environment));

    let err = VaultProvider::new(settings(&server, None)).await.err().unwrap();
    assert!(matches!(err, SecretsError::Authentication { .. }));
}
