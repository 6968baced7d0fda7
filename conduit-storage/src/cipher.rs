//! Credential encryption at rest (AES-256-GCM-SIV)
//!
//! Ciphertext layout is `ciphertext || nonce`. The key lives in a
//! [`SecretBox`] held only by the credential store, never by the
//! caller-facing execution path.

use aes_gcm_siv::{
    aead::{generic_array::GenericArray, Aead},
    Aes256GcmSiv, KeyInit, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use conduit_core::{ConfigError, StorageError};
use rand::Rng;
use secrecy::{ExposeSecret, SecretBox};
use serde::{de::DeserializeOwned, Serialize};

/// Size of the key.
pub const KEY_SIZE: usize = 32;

/// Size of the nonce.
const NONCE_SIZE: usize = 12;

pub struct CredentialCipher {
    key: SecretBox<[u8; KEY_SIZE]>,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CredentialCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: SecretBox::new(Box::new(key)),
        }
    }

    /// Parse a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, ConfigError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ConfigError::InvalidValue {
                field: "credential_key".to_string(),
                value: "[REDACTED]".to_string(),
                reason: format!("not base64: {}", e),
            })?;
        let key: [u8; KEY_SIZE] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "credential_key".to_string(),
                    value: "[REDACTED]".to_string(),
                    reason: format!("expected {} bytes, got {}", KEY_SIZE, bytes.len()),
                })?;
        Ok(Self::new(key))
    }

    /// Random key. Data sealed with it is lost on restart.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill(&mut key);
        Self::new(key)
    }

    fn cipher(&self) -> Aes256GcmSiv {
        Aes256GcmSiv::new(GenericArray::from_slice(self.key.expose_secret()))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rng().fill(&mut bytes);

        let nonce = Nonce::from_slice(&bytes);
        let mut ciphertext =
            self.cipher()
                .encrypt(nonce, plaintext)
                .map_err(|_| StorageError::Encryption {
                    reason: "fail to encrypt the plaintext".to_string(),
                })?;
        ciphertext.extend_from_slice(&bytes);
        Ok(ciphertext)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        if data.len() <= NONCE_SIZE {
            return Err(StorageError::Decryption {
                reason: "invalid data length".to_string(),
            });
        }
        let (ciphertext, bytes) = data.split_at(data.len() - NONCE_SIZE);
        let nonce = GenericArray::from_slice(bytes);
        self.cipher()
            .decrypt(nonce, ciphertext)
            .map_err(|_| StorageError::Decryption {
                reason: "fail to decrypt the ciphertext".to_string(),
            })
    }

    /// Serialize then encrypt.
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, StorageError> {
        let plaintext = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            reason: e.to_string(),
        })?;
        self.encrypt(&plaintext)
    }

    /// Decrypt then deserialize.
    pub fn open<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, StorageError> {
        let plaintext = self.decrypt(data)?;
        serde_json::from_slice(&plaintext).map_err(|e| StorageError::Serialization {
            reason: e.to_string(),
        })
    }
}
