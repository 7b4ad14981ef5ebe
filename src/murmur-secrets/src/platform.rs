//! Platform secret-encryption capability.
//!
//! The store consumes this as a seam so the host application can hand in
//! whatever the platform provides; the production implementation keeps a
//! per-install random master key in the OS keychain:
//! - Windows: Credential Manager
//! - macOS: Keychain
//! - Linux: Secret Service (gnome-keyring, kwallet)

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroizing;

use crate::cipher::{self, IV_SIZE, KEY_SIZE};

/// Platform-native encryption for small blobs, tied to the current
/// user/machine. Implementations must be deterministic about availability:
/// when `is_available` returns `true`, `encrypt`/`decrypt` are expected to
/// work against the same backing key for the life of the installation.
pub trait PlatformCipher: Send + Sync {
    /// Whether the capability can be used right now.
    fn is_available(&self) -> bool;

    /// Encrypt `plaintext` into an opaque blob.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob produced by `encrypt`.
    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

const MASTER_KEY_ACCOUNT: &str = "secret-master-key";

/// [`PlatformCipher`] backed by the system keyring.
///
/// A random 256-bit master key is created on first use and lives only in the
/// keychain; record blobs are `iv || ciphertext` under that key.
pub struct KeyringCipher {
    service: String,
}

impl KeyringCipher {
    /// Cipher bound to the default service name.
    pub fn new() -> Self {
        Self::with_service("murmur-desktop")
    }

    /// Cipher bound to a custom keyring service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Load the master key, creating it on first use.
    fn master_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let entry = keyring::Entry::new(&self.service, MASTER_KEY_ACCOUNT)
            .context("failed to access keyring")?;

        let encoded = match entry.get_password() {
            Ok(encoded) => encoded,
            Err(keyring::Error::NoEntry) => {
                let mut key = Zeroizing::new([0u8; KEY_SIZE]);
                rand::rng().fill_bytes(&mut *key);
                let encoded = STANDARD.encode(&*key);
                entry
                    .set_password(&encoded)
                    .context("failed to store master key in keyring")?;
                debug!(service = %self.service, "provisioned new secret master key");
                encoded
            }
            Err(e) => return Err(anyhow!("keyring error: {e}")),
        };

        let bytes = STANDARD
            .decode(encoded)
            .context("master key is not valid base64")?;
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(
            bytes
                .get(..KEY_SIZE)
                .ok_or_else(|| anyhow!("master key has wrong length"))?,
        );
        Ok(key)
    }
}

impl PlatformCipher for KeyringCipher {
    fn is_available(&self) -> bool {
        self.master_key().is_ok()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.master_key()?;
        let (iv, ciphertext) = cipher::encrypt_cbc(&key, plaintext);

        let mut blob = Vec::with_capacity(IV_SIZE + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < IV_SIZE {
            return Err(anyhow!("platform blob too short"));
        }
        let key = self.master_key()?;
        let (iv, ciphertext) = blob.split_at(IV_SIZE);
        cipher::decrypt_cbc(&key, iv, ciphertext)
    }
}

impl Default for KeyringCipher {
    fn default() -> Self {
        Self::new()
    }
}
