//! AES-256-GCM encryption for on-disk secret files
//!
//! The key lives in a separate key file holding a base64-encoded 32-byte key
//! (raw 32-byte files are accepted as well). Encrypted files are stored as a
//! single base64 line:
//!
//! ```text
//! base64( nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! A fresh random nonce is drawn for every write.

use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::path::Path;
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

use super::error::{Result, SecretsError};

/// Size of AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

const KEY_SIZE: usize = 32;

/// Single-use nonce sequence for AES-GCM
struct SingleNonce(Option<[u8; NONCE_SIZE]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Symmetric cipher used by the file provider.
pub struct FileCipher {
    key: Zeroizing<[u8; KEY_SIZE]>,
    rng: SystemRandom,
}

impl FileCipher {
    /// Build a cipher from raw key bytes.
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != KEY_SIZE {
            return Err(SecretsError::configuration(format!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(key_bytes);
        Ok(Self { key, rng: SystemRandom::new() })
    }

    /// Load the key from `path`.
    pub fn from_key_file(path: &Path) -> Result<Self> {
        let contents = Zeroizing::new(std::fs::read(path).map_err(|e| {
            SecretsError::configuration(format!(
                "Failed to read encryption key file {}: {}",
                path.display(),
                e
            ))
        })?);

        if contents.len() == KEY_SIZE {
            return Self::new(&contents);
        }

        let text = std::str::from_utf8(&contents).map_err(|_| {
            SecretsError::configuration(format!(
                "Encryption key file {} is neither base64 nor a raw 32-byte key",
                path.display()
            ))
        })?;
        let decoded = Zeroizing::new(
            base64::engine::general_purpose::STANDARD.decode(text.trim()).map_err(|e| {
                SecretsError::configuration(format!(
                    "Invalid base64 in encryption key file {}: {}",
                    path.display(),
                    e
                ))
            })?,
        );

        debug!(key_path = %path.display(), "Loaded file encryption key");
        Self::new(&decoded)
    }

    /// Generate a new random key, base64 encoded, suitable for a key file.
    pub fn generate_key() -> Result<String> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        SystemRandom::new()
            .fill(&mut key[..])
            .map_err(|_| SecretsError::encryption("Failed to generate random key"))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(&key[..]))
    }

    /// Encrypt `plaintext` into the base64 on-disk representation.
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            SecretsError::encryption("Failed to generate random nonce")
        })?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key[..])
            .map_err(|_| SecretsError::encryption("Failed to create encryption key"))?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce(Some(nonce_bytes)));

        let mut sealed = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
        sealed.extend_from_slice(&nonce_bytes);
        let mut body = plaintext.to_vec();
        sealing_key.seal_in_place_append_tag(Aad::empty(), &mut body).map_err(|_| {
            error!("Encryption failed");
            SecretsError::encryption("Failed to encrypt secrets file")
        })?;
        sealed.extend_from_slice(&body);

        let mut encoded = base64::engine::general_purpose::STANDARD.encode(&sealed).into_bytes();
        encoded.push(b'\n');
        Ok(encoded)
    }

    /// Decrypt the base64 on-disk representation.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(data)
            .map_err(|_| SecretsError::encryption("Encrypted secrets file is not valid base64 text"))?;
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .map_err(|e| SecretsError::encryption(format!("Invalid base64 in secrets file: {}", e)))?;

        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SecretsError::encryption(
                "Encrypted secrets file too short (missing nonce or authentication tag)",
            ));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.key[..])
            .map_err(|_| SecretsError::encryption("Failed to create decryption key"))?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce(Some(nonce_bytes)));

        let mut buffer = ciphertext.to_vec();
        let plaintext = opening_key.open_in_place(Aad::empty(), &mut buffer).map_err(|_| {
            error!("Decryption failed - wrong key or tampered file");
            SecretsError::encryption("Failed to decrypt secrets file (wrong key or corrupted data)")
        })?;

        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for FileCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCipher").field("key", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> FileCipher {
        FileCipher::new(&[0x42u8; 32]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt(br#"{"db_password":"s3cr3t"}"#).unwrap();

        assert!(!String::from_utf8_lossy(&sealed).contains("s3cr3t"));
        assert_eq!(cipher.decrypt(&sealed).unwrap(), br#"{"db_password":"s3cr3t"}"#);
    }

    #[test]
    fn test_nonce_is_fresh_per_write() {
        let cipher = test_cipher();
        assert_ne!(cipher.encrypt(b"same").unwrap(), cipher.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = test_cipher().encrypt(b"payload").unwrap();
        let other = FileCipher::new(&[0x24u8; 32]).unwrap();

        assert!(matches!(other.decrypt(&sealed), Err(SecretsError::Encryption { .. })));
    }

    #[test]
    fn test_tampered_data_fails() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt(b"payload").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(std::str::from_utf8(&sealed).unwrap().trim())
            .unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);

        assert!(cipher.decrypt(tampered.as_bytes()).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(FileCipher::new(&[0u8; 16]), Err(SecretsError::Configuration { .. })));
    }

    #[test]
    fn test_key_file_base64_and_raw() {
        let dir = tempfile::tempdir().unwrap();

        let b64_path = dir.path().join("key.b64");
        std::fs::write(&b64_path, format!("{}\n", FileCipher::generate_key().unwrap())).unwrap();
        let cipher = FileCipher::from_key_file(&b64_path).unwrap();
        let sealed = cipher.encrypt(b"x").unwrap();
        assert_eq!(FileCipher::from_key_file(&b64_path).unwrap().decrypt(&sealed).unwrap(), b"x");

        let raw_path = dir.path().join("key.raw");
        std::fs::write(&raw_path, [7u8; 32]).unwrap();
        assert!(FileCipher::from_key_file(&raw_path).is_ok());

        assert!(FileCipher::from_key_file(&dir.path().join("missing")).is_err());
    }
}
