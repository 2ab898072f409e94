//! ChartSync Vault - Credential encryption at rest
//!
//! Login credentials live in the shared local store so the background agent
//! can reach them, but they are never written in the clear. This crate
//! provides:
//!
//! - [`FieldCipher`] - AES-256-GCM encryption of individual fields
//! - [`vault_key`] - Per-installation key management via the system keyring
//! - [`CredentialVault`] - The credential read/write surface over a
//!   [`chartsync_core::ports::RecordStore`]
//!
//! ## Failure posture
//!
//! Writing credentials reports errors; a failed login save is something the
//! user must hear about. Reading is deliberately lenient: a missing key, a
//! garbled ciphertext, or a failed authentication tag all come back as
//! `Ok(None)` with a warning log, and the user simply logs in again. A
//! stored credential is a convenience cache, not a source of truth.

pub mod cipher;
pub mod keystore;
pub mod vault;

pub use cipher::FieldCipher;
pub use keystore::vault_key;
pub use vault::{CredentialVault, Credentials};

/// Errors that can occur during vault operations
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The system keyring rejected or failed the operation
    #[error("Keystore unavailable: {0}")]
    Keystore(String),

    /// Key material exists but is not a valid 256-bit key
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Encrypting a field failed
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Decrypting a field failed (bad key or tampered ciphertext)
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Ciphertext is not in the `v1:<nonce>:<ciphertext>` format
    #[error("Invalid ciphertext format")]
    InvalidFormat,

    /// The underlying record store failed
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
