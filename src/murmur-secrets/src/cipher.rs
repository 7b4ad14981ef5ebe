//! AES-256-CBC helpers shared by both encryption paths.

use aes::Aes256;
use anyhow::{Result, anyhow};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub(crate) const KEY_SIZE: usize = 32;
pub(crate) const IV_SIZE: usize = 16;

/// Encrypt with a freshly generated random IV. Returns `(iv, ciphertext)`;
/// the IV must be stored alongside the ciphertext.
pub(crate) fn encrypt_cbc(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> ([u8; IV_SIZE], Vec<u8>) {
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    (iv, ciphertext)
}

/// Decrypt a record produced by [`encrypt_cbc`].
pub(crate) fn decrypt_cbc(
    key: &[u8; KEY_SIZE],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let iv: [u8; IV_SIZE] = iv
        .try_into()
        .map_err(|_| anyhow!("invalid IV length: {}", iv.len()))?;

    Aes256CbcDec::new(key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| anyhow!("decryption failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let key = [7u8; KEY_SIZE];
        let (iv, ciphertext) = encrypt_cbc(&key, b"some secret value");
        let plaintext = decrypt_cbc(&key, &iv, &ciphertext).unwrap();
        assert_eq!(plaintext, b"some secret value");
    }

    #[test]
    fn test_iv_is_fresh_per_encryption() {
        let key = [7u8; KEY_SIZE];
        let (iv_a, ct_a) = encrypt_cbc(&key, b"same input");
        let (iv_b, ct_b) = encrypt_cbc(&key, b"same input");
        assert_ne!(iv_a, iv_b);
        assert_ne!(ct_a, ct_b);
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = [7u8; KEY_SIZE];
        let (iv, mut ciphertext) = encrypt_cbc(&key, b"secret");
        ciphertext.pop();
        assert!(decrypt_cbc(&key, &iv, &ciphertext).is_err());
    }

    #[test]
    fn test_bad_iv_length_fails() {
        let key = [7u8; KEY_SIZE];
        let (_, ciphertext) = encrypt_cbc(&key, b"secret");
        assert!(decrypt_cbc(&key, &[0u8; 7], &ciphertext).is_err());
    }
}
