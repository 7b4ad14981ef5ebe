//! At-rest secret storage for Murmur.
//!
//! Small secrets (the transcription API key, the authentication record) are
//! kept in per-record files under the application data directory. Each record
//! is encrypted either through the platform secret capability (OS keychain
//! backed) or, when that is unavailable, with a key derived from stable
//! machine identifiers. The envelope carries a method tag so a record is only
//! ever decrypted by the path that produced it.
//!
//! Reads are fail-closed: a missing, corrupt or undecryptable record is
//! reported as "not present", never as an error the caller has to handle.

mod cipher;
mod derived;
mod platform;
mod store;

pub use platform::{KeyringCipher, PlatformCipher};
pub use store::{SecretMethod, SecretStatus, SecretStore};

use thiserror::Error;

/// Errors surfaced by [`SecretStore`] write paths.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// Record ids are restricted to a filename-safe alphabet.
    #[error("invalid secret id: {0}")]
    InvalidId(String),

    /// Both encryption paths failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The record file could not be written or removed.
    #[error("failed to write secret record: {0}")]
    StorageWriteFailed(String),
}
