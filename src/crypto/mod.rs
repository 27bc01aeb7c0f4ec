//! Credential-at-rest encryption: an AEAD cipher over the private key hex
//! string, keyed from `TS_ENCRYPTION_KEY` (32-byte, URL-safe base64). The
//! key is passed in at construction of whatever component needs it — never
//! read from a process-wide singleton.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must decode to 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("key is not valid URL-safe base64: {0}")]
    InvalidKeyEncoding(#[from] base64::DecodeError),
    #[error("ciphertext is not valid base64: {0}")]
    InvalidCiphertextEncoding(base64::DecodeError),
    #[error("ciphertext too short to contain a nonce")]
    CiphertextTooShort,
    #[error("decryption failed — wrong key or corrupted ciphertext")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
}

const NONCE_LEN: usize = 12;

/// Authenticated symmetric cipher over credential plaintext. Holds the
/// decoded 32-byte key; constructed once per component that needs to
/// encrypt or decrypt, not shared through a global.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(encryption_key_b64: &str) -> Result<Self, CryptoError> {
        let key_bytes = URL_SAFE.decode(encryption_key_b64)?;
        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(key_bytes.len()));
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| CryptoError::InvalidKeyLength(key_bytes.len()))?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext`, prepending a fresh random nonce to the
    /// ciphertext and base64-encoding the result for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(out))
    }

    /// Decrypts a value produced by [`Self::encrypt`]. Returns the original
    /// plaintext bit-exact, or an error if the key or ciphertext is wrong.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let raw = URL_SAFE.decode(encoded).map_err(CryptoError::InvalidCiphertextEncoding)?;
        if raw.len() < NONCE_LEN {
            return Err(CryptoError::CiphertextTooShort);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }

    /// Generates a fresh base64-encoded 32-byte key, for operator setup.
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        URL_SAFE.encode(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_recovers_plaintext() {
        let key = CredentialCipher::generate_key();
        let cipher = CredentialCipher::new(&key).unwrap();
        let plaintext = "0xdeadbeef private key hex";
        let ciphertext = cipher.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let cipher_a = CredentialCipher::new(&CredentialCipher::generate_key()).unwrap();
        let cipher_b = CredentialCipher::new(&CredentialCipher::generate_key()).unwrap();
        let ciphertext = cipher_a.encrypt("secret").unwrap();
        assert!(cipher_b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn invalid_key_length_is_rejected() {
        let short_key = URL_SAFE.encode([0u8; 16]);
        assert!(matches!(CredentialCipher::new(&short_key), Err(CryptoError::InvalidKeyLength(16))));
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let cipher = CredentialCipher::new(&CredentialCipher::generate_key()).unwrap();
        let a = cipher.encrypt("same plaintext").unwrap();
        let b = cipher.encrypt("same plaintext").unwrap();
        assert_ne!(a, b);
    }
}
