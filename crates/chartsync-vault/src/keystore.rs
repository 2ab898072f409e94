//! Per-installation vault key management
//!
//! The key that encrypts credential fields is random, generated on first
//! use, and never leaves this machine. It is filed in the OS credential
//! store (Secret Service on Linux, via the `keyring` crate) under the
//! configured service name, so wiping the keyring renders the stored
//! credentials unreadable, which downstream code treats as "not logged in".

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, info};

use crate::cipher::FieldCipher;
use crate::VaultError;

/// Keyring username under which the vault key is filed
const KEY_NAME: &str = "vault-key";

/// Loads the per-installation vault key, generating it on first use
pub fn vault_key(service: &str) -> Result<[u8; 32], VaultError> {
    let entry = keyring::Entry::new(service, KEY_NAME)
        .map_err(|e| VaultError::Keystore(format!("Failed to create keyring entry: {e}")))?;

    match entry.get_password() {
        Ok(encoded) => {
            debug!(service = %service, "Loaded vault key from keyring");
            decode_key(&encoded)
        }
        Err(keyring::Error::NoEntry) => {
            let key = FieldCipher::generate_key();
            entry
                .set_password(&BASE64.encode(key))
                .map_err(|e| VaultError::Keystore(format!("Failed to store vault key: {e}")))?;
            info!(service = %service, "Generated new vault key");
            Ok(key)
        }
        Err(e) => Err(VaultError::Keystore(format!(
            "Failed to read vault key: {e}"
        ))),
    }
}

/// Decodes base64 key material into a 256-bit key
fn decode_key(encoded: &str) -> Result<[u8; 32], VaultError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| VaultError::InvalidKey(format!("not base64: {e}")))?;

    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| VaultError::InvalidKey(format!("expected 32 bytes, got {len}")))
}
