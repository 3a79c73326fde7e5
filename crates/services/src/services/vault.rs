//! Symmetric encryption of secrets at rest.
//!
//! The vault encrypts opaque strings with AES-256-GCM under a single
//! process-wide key configured at startup. It has no knowledge of what it is
//! encrypting; aggregator access tokens are simply its most sensitive
//! consumer. Ciphertext layout is `base64(nonce || ciphertext || tag)` with a
//! fresh 12-byte nonce per call, so equal plaintexts produce different
//! ciphertexts.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{
    Engine,
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE},
};
use thiserror::Error;

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Key length in raw bytes.
const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    Encrypt,
    /// Corrupted ciphertext or wrong key. Deliberately carries no detail:
    /// decryption fails closed and never returns partial plaintext.
    #[error("decryption failed: ciphertext corrupted or encryption key changed")]
    Decrypt,
}

/// Validated key material for the vault.
///
/// Constructed once at startup; an invalid key is a fatal configuration
/// error there, never deferred to the first encrypt/decrypt call.
#[derive(Clone)]
pub struct VaultKey([u8; KEY_SIZE]);

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_tuple("VaultKey").field(&"[REDACTED]").finish()
    }
}

impl VaultKey {
    /// Parse configured key material.
    ///
    /// Accepts either exactly 32 raw bytes or a base64 encoding (standard or
    /// URL-safe alphabet) of 32 bytes.
    pub fn parse(material: &str) -> Result<Self, EncryptionError> {
        let bytes = material.as_bytes();
        if bytes.len() == KEY_SIZE {
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(bytes);
            return Ok(Self(key));
        }

        let decoded = BASE64
            .decode(material)
            .or_else(|_| URL_SAFE.decode(material))
            .map_err(|_| {
                EncryptionError::InvalidKey(
                    "expected 32 raw bytes or base64-encoded 32 bytes".to_string(),
                )
            })?;

        let key: [u8; KEY_SIZE] = decoded.try_into().map_err(|_| {
            EncryptionError::InvalidKey("decoded key is not 32 bytes".to_string())
        })?;
        Ok(Self(key))
    }

    /// Generate a fresh base64-encoded key (for provisioning, not used at
    /// runtime).
    pub fn generate() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        BASE64.encode(key)
    }
}

/// Encrypts and decrypts secrets with the process-wide vault key.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    pub fn new(key: &VaultKey) -> Self {
        Self {
            cipher: Aes256Gcm::new_from_slice(&key.0).expect("key length validated by VaultKey"),
        }
    }

    /// Encrypt a plaintext string. The empty string passes through unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| EncryptionError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(&out))
    }

    /// Decrypt a string produced by [`encrypt`]. The empty string passes
    /// through unchanged.
    ///
    /// [`encrypt`]: CredentialVault::encrypt
    pub fn decrypt(&self, encoded: &str) -> Result<String, EncryptionError> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let encrypted = BASE64.decode(encoded).map_err(|_| EncryptionError::Decrypt)?;
        if encrypted.len() <= NONCE_SIZE {
            return Err(EncryptionError::Decrypt);
        }

        let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &encrypted[NONCE_SIZE..])
            .map_err(|_| EncryptionError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| EncryptionError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::new(&VaultKey::parse("0123456789abcdef0123456789abcdef").unwrap())
    }

    #[test]
    fn round_trip() {
        let vault = test_vault();
        let ciphertext = vault.encrypt("access-sandbox-token-123").unwrap();
        assert_ne!(ciphertext, "access-sandbox-token-123");
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), "access-sandbox-token-123");
    }

    #[test]
    fn round_trip_long_input() {
        let vault = test_vault();
        let plaintext = "x".repeat(64 * 1024);
        let ciphertext = vault.encrypt(&plaintext).unwrap();
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn empty_string_is_passthrough() {
        let vault = test_vault();
        assert_eq!(vault.encrypt("").unwrap(), "");
        assert_eq!(vault.decrypt("").unwrap(), "");
    }

    #[test]
    fn encryption_is_non_deterministic() {
        let vault = test_vault();
        let a = vault.encrypt("same plaintext").unwrap();
        let b = vault.encrypt("same plaintext").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a).unwrap(), vault.decrypt(&b).unwrap());
    }

    #[test]
    fn corrupted_ciphertext_fails_closed() {
        let vault = test_vault();
        let ciphertext = vault.encrypt("secret").unwrap();

        let mut raw = BASE64.decode(&ciphertext).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(&raw);

        assert!(matches!(
            vault.decrypt(&tampered),
            Err(EncryptionError::Decrypt)
        ));
    }

    #[test]
    fn truncated_and_garbage_ciphertext_fail() {
        let vault = test_vault();
        assert!(matches!(
            vault.decrypt("AAAA"),
            Err(EncryptionError::Decrypt)
        ));
        assert!(matches!(
            vault.decrypt("not base64 at all!!"),
            Err(EncryptionError::Decrypt)
        ));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let vault = test_vault();
        let other = CredentialVault::new(
            &VaultKey::parse("fedcba9876543210fedcba9876543210").unwrap(),
        );
        let ciphertext = vault.encrypt("secret").unwrap();
        assert!(matches!(
            other.decrypt(&ciphertext),
            Err(EncryptionError::Decrypt)
        ));
    }

    #[test]
    fn key_accepts_raw_and_base64() {
        assert!(VaultKey::parse("0123456789abcdef0123456789abcdef").is_ok());
        assert!(VaultKey::parse(&BASE64.encode([7u8; 32])).is_ok());
        assert!(VaultKey::parse(&VaultKey::generate()).is_ok());
    }

    #[test]
    fn key_rejects_bad_material() {
        assert!(matches!(
            VaultKey::parse("too short"),
            Err(EncryptionError::InvalidKey(_))
        ));
        // Valid base64, wrong decoded length.
        assert!(matches!(
            VaultKey::parse(&BASE64.encode([7u8; 16])),
            Err(EncryptionError::InvalidKey(_))
        ));
    }
}
