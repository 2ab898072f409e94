//! AES-256-GCM field encryption
//!
//! Every credential field is encrypted independently with a fresh random
//! 96-bit nonce and carried in the textual format
//! `v1:<nonce_base64>:<ciphertext_base64>`. The GCM authentication tag
//! rides inside the ciphertext, so tampering is detected at decrypt time.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::VaultError;

/// Format prefix written in front of every encrypted field
const FORMAT_PREFIX: &str = "v1";

/// Nonce length recommended for GCM (96 bits)
const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for individual credential fields
///
/// The key is zeroized when the cipher is dropped.
#[derive(ZeroizeOnDrop)]
pub struct FieldCipher {
    #[zeroize(skip)]
    cipher: Aes256Gcm,
    key: [u8; 32],
}

impl FieldCipher {
    /// Creates a cipher from a 256-bit key
    pub fn new(key: [u8; 32]) -> Result<Self, VaultError> {
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| VaultError::InvalidKey("not a 256-bit key".to_string()))?;

        Ok(Self { cipher, key })
    }

    /// Generates a fresh random 256-bit key
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypts a field value into the `v1:<nonce>:<ciphertext>` format
    pub fn encrypt_field(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailed)?;

        Ok(format!(
            "{}:{}:{}",
            FORMAT_PREFIX,
            BASE64.encode(nonce_bytes),
            BASE64.encode(&ciphertext)
        ))
    }

    /// Decrypts a field value from the `v1:<nonce>:<ciphertext>` format
    ///
    /// Fails on an unknown prefix, malformed base64, a wrong-size nonce,
    /// or an authentication tag mismatch.
    pub fn decrypt_field(&self, encrypted: &str) -> Result<String, VaultError> {
        let parts: Vec<&str> = encrypted.split(':').collect();
        if parts.len() != 3 || parts[0] != FORMAT_PREFIX {
            return Err(VaultError::InvalidFormat);
        }

        let nonce_bytes = BASE64
            .decode(parts[1])
            .map_err(|_| VaultError::InvalidFormat)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(VaultError::InvalidFormat);
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(parts[2])
            .map_err(|_| VaultError::InvalidFormat)?;

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| VaultError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::DecryptionFailed)
    }

    #[cfg(test)]
    pub(crate) fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FieldCipher {
        FieldCipher::new(FieldCipher::generate_key()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = cipher();

        let encrypted = cipher.encrypt_field("nurse@clinic.example").unwrap();
        let decrypted = cipher.decrypt_field(&encrypted).unwrap();

        assert_eq!(decrypted, "nurse@clinic.example");
    }

    #[test]
    fn test_output_format() {
        let cipher = cipher();

        let encrypted = cipher.encrypt_field("secret").unwrap();
        assert!(encrypted.starts_with("v1:"));
        assert_eq!(encrypted.split(':').count(), 3);
    }

    #[test]
    fn test_same_plaintext_different_ciphertexts() {
        let cipher = cipher();

        let first = cipher.encrypt_field("same value").unwrap();
        let second = cipher.encrypt_field("same value").unwrap();

        // Fresh nonce per encryption.
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt_field(&first).unwrap(), "same value");
        assert_eq!(cipher.decrypt_field(&second).unwrap(), "same value");
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = cipher();

        let mut encrypted = cipher.encrypt_field("authenticated").unwrap();
        encrypted.push('A');

        assert!(matches!(
            cipher.decrypt_field(&encrypted),
            Err(VaultError::DecryptionFailed) | Err(VaultError::InvalidFormat)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypting = cipher();
        let other = cipher();

        let encrypted = encrypting.encrypt_field("secret").unwrap();
        assert!(matches!(
            other.decrypt_field(&encrypted),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_invalid_formats_rejected() {
        let cipher = cipher();

        for garbage in [
            "",
            "plaintext",
            "v1:onlytwo",
            "v2:AAAA:BBBB",
            "v1:not base64!:BBBB",
            "v1:AAAA:not base64!",
            // Valid base64, wrong nonce size.
            "v1:QUJD:QUJDREVGRw==",
        ] {
            assert!(
                matches!(cipher.decrypt_field(garbage), Err(VaultError::InvalidFormat)),
                "expected InvalidFormat for {garbage:?}"
            );
        }
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cipher = cipher();

        let encrypted = cipher.encrypt_field("").unwrap();
        assert_eq!(cipher.decrypt_field(&encrypted).unwrap(), "");
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(FieldCipher::generate_key(), FieldCipher::generate_key());
    }

    #[test]
    fn test_key_is_stored() {
        let key = FieldCipher::generate_key();
        let cipher = FieldCipher::new(key).unwrap();
        assert_eq!(cipher.key_bytes(), &key);
    }
}
