//! Credential vault over the shared record store
//!
//! Both execution contexts open the same vault: the foreground client to
//! save and read the login, the background agent to read it when it pushes
//! batches on the user's behalf.

use std::sync::Arc;

use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

use chartsync_core::domain::StoredCredential;
use chartsync_core::ports::RecordStore;

use crate::cipher::FieldCipher;
use crate::{keystore, VaultError};

/// Decrypted login material handed to callers
///
/// Zeroized on drop so plaintext credentials do not linger in freed memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Read/write surface for the encrypted credential slot
pub struct CredentialVault {
    store: Arc<dyn RecordStore>,
    cipher: FieldCipher,
}

impl CredentialVault {
    /// Creates a vault with an explicit cipher
    ///
    /// Production callers use [`CredentialVault::open`]; tests inject a
    /// known key here to stay off the system keyring.
    pub fn new(store: Arc<dyn RecordStore>, cipher: FieldCipher) -> Self {
        Self { store, cipher }
    }

    /// Opens the vault with the per-installation key from the system keyring
    pub fn open(store: Arc<dyn RecordStore>, keyring_service: &str) -> Result<Self, VaultError> {
        let key = keystore::vault_key(keyring_service)?;
        Ok(Self::new(store, FieldCipher::new(key)?))
    }

    /// Encrypts and saves the login credentials
    ///
    /// Each field is encrypted independently with its own nonce. A failure
    /// here is a real error the user must hear about.
    pub async fn save_credentials(&self, email: &str, password: &str) -> Result<(), VaultError> {
        let credential = StoredCredential::new(
            self.cipher.encrypt_field(email)?,
            self.cipher.encrypt_field(password)?,
        );
        self.store.save_credential(&credential).await?;

        tracing::debug!("Saved encrypted credentials");
        Ok(())
    }

    /// Returns the decrypted credentials, or None when absent or unreadable
    ///
    /// Unreadable covers a missing or rotated vault key, a ciphertext in a
    /// foreign format, and a failed authentication tag. Every one of those
    /// logs a warning and reads as "not logged in"; none of them is an
    /// error the caller has to handle.
    pub async fn stored_credentials(&self) -> anyhow::Result<Option<Credentials>> {
        let Some(credential) = self.store.get_credential().await? else {
            return Ok(None);
        };

        let email = match self.cipher.decrypt_field(credential.encrypted_email()) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    field = "email",
                    error = %e,
                    "Stored credential is unreadable; treating as absent"
                );
                return Ok(None);
            }
        };

        let password = match self.cipher.decrypt_field(credential.encrypted_password()) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    field = "password",
                    error = %e,
                    "Stored credential is unreadable; treating as absent"
                );
                return Ok(None);
            }
        };

        Ok(Some(Credentials { email, password }))
    }

    /// Returns true when a credential row exists, without decrypting it
    pub async fn has_credentials(&self) -> anyhow::Result<bool> {
        Ok(self.store.get_credential().await?.is_some())
    }

    /// Removes the stored credentials
    pub async fn clear_credentials(&self) -> anyhow::Result<()> {
        self.store.clear_credential().await
    }
}

#[cfg(test)]
mod tests {
    use chartsync_store::MemoryRecordStore;

    use super::*;

    fn vault_with_store() -> (CredentialVault, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        let cipher = FieldCipher::new(FieldCipher::generate_key()).unwrap();
        (
            CredentialVault::new(store.clone(), cipher),
            store,
        )
    }

    #[tokio::test]
    async fn test_save_and_read_credentials() {
        let (vault, _store) = vault_with_store();

        vault
            .save_credentials("nurse@clinic.example", "hunter2")
            .await
            .unwrap();

        let credentials = vault.stored_credentials().await.unwrap().unwrap();
        assert_eq!(credentials.email, "nurse@clinic.example");
        assert_eq!(credentials.password, "hunter2");
    }

    #[tokio::test]
    async fn test_stored_form_is_encrypted() {
        let (vault, store) = vault_with_store();

        vault
            .save_credentials("nurse@clinic.example", "hunter2")
            .await
            .unwrap();

        let raw = store.get_credential().await.unwrap().unwrap();
        assert!(raw.encrypted_email().starts_with("v1:"));
        assert!(raw.encrypted_password().starts_with("v1:"));
        assert!(!raw.encrypted_email().contains("nurse@clinic.example"));
        assert!(!raw.encrypted_password().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_no_credentials_reads_as_none() {
        let (vault, _store) = vault_with_store();
        assert!(vault.stored_credentials().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_key_reads_as_none() {
        let store = Arc::new(MemoryRecordStore::new());
        let writing = CredentialVault::new(
            store.clone(),
            FieldCipher::new(FieldCipher::generate_key()).unwrap(),
        );
        writing
            .save_credentials("nurse@clinic.example", "hunter2")
            .await
            .unwrap();

        // A vault opened with a different key, as after a keyring wipe.
        let reading = CredentialVault::new(
            store,
            FieldCipher::new(FieldCipher::generate_key()).unwrap(),
        );
        assert!(reading.stored_credentials().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbled_ciphertext_reads_as_none() {
        let (vault, store) = vault_with_store();

        store
            .save_credential(&StoredCredential::new("not encrypted", "also not"))
            .await
            .unwrap();

        assert!(vault.stored_credentials().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_login() {
        let (vault, _store) = vault_with_store();

        vault
            .save_credentials("old@clinic.example", "old-pass")
            .await
            .unwrap();
        vault
            .save_credentials("new@clinic.example", "new-pass")
            .await
            .unwrap();

        let credentials = vault.stored_credentials().await.unwrap().unwrap();
        assert_eq!(credentials.email, "new@clinic.example");
        assert_eq!(credentials.password, "new-pass");
    }

    #[tokio::test]
    async fn test_clear_credentials() {
        let (vault, _store) = vault_with_store();

        vault
            .save_credentials("nurse@clinic.example", "hunter2")
            .await
            .unwrap();
        vault.clear_credentials().await.unwrap();

        assert!(!vault.has_credentials().await.unwrap());
        assert!(vault.stored_credentials().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_has_credentials_does_not_need_valid_key() {
        let (vault, store) = vault_with_store();

        store
            .save_credential(&StoredCredential::new("garbage", "garbage"))
            .await
            .unwrap();

        // Row exists even though it cannot be decrypted.
        assert!(vault.has_credentials().await.unwrap());
    }
}
