//! Machine-derived fallback key.
//!
//! The key is a pure function of stable machine identifiers, so it never
//! needs to be stored: any process on the same machine re-derives it.

use anyhow::Result;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cipher::{self, IV_SIZE, KEY_SIZE};

/// Derive the 256-bit fallback key from host name, OS family and CPU
/// architecture, bound to this application with a fixed salt.
fn machine_derived_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut hasher = Sha256::new();

    if let Ok(name) = hostname::get() {
        hasher.update(name.as_encoded_bytes());
    }
    hasher.update(std::env::consts::OS.as_bytes());
    hasher.update(std::env::consts::ARCH.as_bytes());

    // Application-specific salt
    hasher.update(b"murmur-desktop-secret-encryption-v1");

    let digest = hasher.finalize();
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&digest);
    key
}

/// Encrypt `plaintext` under the machine-derived key with a fresh IV.
pub(crate) fn encrypt_with_machine_key(plaintext: &[u8]) -> ([u8; IV_SIZE], Vec<u8>) {
    let key = machine_derived_key();
    cipher::encrypt_cbc(&key, plaintext)
}

/// Decrypt a record written by [`encrypt_with_machine_key`].
pub(crate) fn decrypt_with_machine_key(iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let key = machine_derived_key();
    cipher::decrypt_cbc(&key, iv, ciphertext)
}
