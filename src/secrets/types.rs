//! Value types shared by every provider.
//!
//! Secret values travel through the broker as [`SecretString`], which keeps them
//! out of logs, debug output and serialized structures, and wipes the backing
//! memory on drop. Free-form metadata attached on write is a plain string map.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Free-form string metadata stored next to a secret (description, rotation stamp, ...).
pub type SecretMetadata = HashMap<String, String>;

/// Metadata key carrying the RFC 3339 timestamp of the last rotation.
pub const ROTATED_AT: &str = "rotated_at";

/// Metadata key naming the component that performed the rotation.
pub const ROTATED_BY: &str = "rotated_by";

/// Value written under [`ROTATED_BY`].
pub const ROTATION_AGENT: &str = "secret-broker";

/// Build the metadata attached to a freshly rotated secret.
pub fn rotation_metadata(at: DateTime<Utc>) -> SecretMetadata {
    let mut metadata = SecretMetadata::new();
    metadata.insert(ROTATED_AT.to_string(), at.to_rfc3339_opts(SecondsFormat::Secs, true));
    metadata.insert(ROTATED_BY.to_string(), ROTATION_AGENT.to_string());
    metadata
}

/// A secret value that never shows up in `Debug`, `Display` or serialized output.
///
/// Deserialization accepts real values so the type can be used in config
/// structs; serialization always emits `"[REDACTED]"`. Use
/// [`SecretString::expose_secret`] at the point where the raw value is needed.
///
/// ```rust,ignore
/// let secret = SecretString::new("hunter2");
/// assert_eq!(format!("{secret:?}"), "SecretString([REDACTED])");
/// assert_eq!(secret.expose_secret(), "hunter2");
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the raw value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Take the raw value out; the emptied wrapper is still zeroed on drop.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl PartialEq<str> for SecretString {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for SecretString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
