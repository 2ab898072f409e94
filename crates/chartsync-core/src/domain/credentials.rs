//! Cached credential pair for offline login
//!
//! The vault stores at most one credential pair; a new login overwrites the
//! previous one. Both fields are ciphertext by the time they reach the
//! domain layer. The pair never leaves the device.

use serde::{Deserialize, Serialize};

/// The singleton encrypted credential slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Email, encrypted independently of the password
    encrypted_email: String,
    /// Password, encrypted independently of the email
    encrypted_password: String,
}

impl StoredCredential {
    /// Creates a credential slot from two already-encrypted fields
    pub fn new(encrypted_email: impl Into<String>, encrypted_password: impl Into<String>) -> Self {
        Self {
            encrypted_email: encrypted_email.into(),
            encrypted_password: encrypted_password.into(),
        }
    }

    /// Returns the encrypted email field
    pub fn encrypted_email(&self) -> &str {
        &self.encrypted_email
    }

    /// Returns the encrypted password field
    pub fn encrypted_password(&self) -> &str {
        &self.encrypted_password
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_both_ciphertexts() {
        let cred = StoredCredential::new("v1:aaa:bbb", "v1:ccc:ddd");
        assert_eq!(cred.encrypted_email(), "v1:aaa:bbb");
        assert_eq!(cred.encrypted_password(), "v1:ccc:ddd");
    }

    #[test]
    fn serialization_roundtrip() {
        let cred = StoredCredential::new("e", "p");
        let json = serde_json::to_string(&cred).unwrap();
        let back: StoredCredential = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cred);
    }
}
