//! Error types for secrets management operations.

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur during secrets management operations.
///
/// Only [`SecretsError::NotFound`] and [`SecretsError::Unavailable`] are
/// recoverable: they are the expected reasons for a read to fall through to
/// the next provider in the fallback chain. Writes surface every variant.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Invalid or missing configuration. Always fatal at startup.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Login against a secrets backend failed.
    #[error("Authentication failed for {provider}: {message}")]
    Authentication { provider: String, message: String },

    /// Secret not found in the backend.
    #[error("Secret not found: {key}")]
    NotFound { key: String },

    /// Backend unreachable or returned an unexpected failure.
    #[error("Secrets backend unavailable: {message}")]
    Unavailable { message: String },

    /// The backend rejected the operation.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Encryption or decryption of a local secrets file failed.
    #[error("Encryption error: {message}")]
    Encryption { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SecretsError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an authentication error.
    pub fn authentication(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication { provider: provider.into(), message: message.into() }
    }

    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }

    /// Create a permission denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied { message: message.into() }
    }

    /// Create an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption { message: message.into() }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Whether the fallback chain should try the next provider after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Unavailable { .. })
    }

    /// Whether this error means the key does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for SecretsError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for SecretsError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for SecretsError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<config::ConfigError> for SecretsError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SecretsError::not_found("db_password");
        assert!(matches!(err, SecretsError::NotFound { .. }));
        assert_eq!(err.to_string(), "Secret not found: db_password");

        let err = SecretsError::authentication("vault", "permission denied");
        assert_eq!(err.to_string(), "Authentication failed for vault: permission denied");

        let err = SecretsError::configuration("provider is required");
        assert!(matches!(err, SecretsError::Configuration { .. }));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(SecretsError::not_found("k").is_recoverable());
        assert!(SecretsError::unavailable("timeout").is_recoverable());
        assert!(!SecretsError::permission_denied("write rejected").is_recoverable());
        assert!(!SecretsError::configuration("bad").is_recoverable());
        assert!(!SecretsError::authentication("vault", "bad").is_recoverable());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: SecretsError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, SecretsError::Serialization { .. }));
    }
}
