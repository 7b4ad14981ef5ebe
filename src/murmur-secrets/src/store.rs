//! File-backed secret records.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::derived;
use crate::platform::PlatformCipher;
use crate::SecretStoreError;

/// Which function produced (and can decrypt) a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretMethod {
    /// Encrypted through the platform secret capability.
    #[serde(rename = "platform-native")]
    PlatformNative,
    /// Encrypted with the machine-derived key, AES-256-CBC with per-record IV.
    #[serde(rename = "derived-key-cbc")]
    DerivedKeyCbc,
}

/// On-disk record envelope.
#[derive(Serialize, Deserialize)]
struct SecretEnvelope {
    method: SecretMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
    ciphertext: String,
}

/// Presence report for a record, with a display-safe preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretStatus {
    pub present: bool,
    /// Masked preview (first/last few characters). Never the raw secret.
    pub preview: Option<String>,
}

/// Encrypted storage for small named secrets.
///
/// No in-memory cache is kept across calls: every read re-queries the backing
/// file and re-derives or re-fetches key material, so a keychain change never
/// serves stale plaintext.
pub struct SecretStore {
    dir: PathBuf,
    platform: Box<dyn PlatformCipher>,
}

impl SecretStore {
    /// Store rooted at `dir`, using `platform` for the native path.
    pub fn new(dir: impl Into<PathBuf>, platform: Box<dyn PlatformCipher>) -> Self {
        Self {
            dir: dir.into(),
            platform,
        }
    }

    /// Encrypt and persist `plaintext` under `id`, overwriting any previous
    /// record. Prefers the platform capability; falls back to the
    /// machine-derived key when it is unavailable or failing.
    pub fn save(&self, id: &str, plaintext: &str) -> Result<(), SecretStoreError> {
        let path = self.record_path(id)?;

        let envelope = if self.platform.is_available() {
            match self.platform.encrypt(plaintext.as_bytes()) {
                Ok(blob) => SecretEnvelope {
                    method: SecretMethod::PlatformNative,
                    iv: None,
                    ciphertext: STANDARD.encode(blob),
                },
                Err(e) => {
                    warn!(id, error = %e, "platform encryption failed, using derived key");
                    derived_envelope(plaintext)
                }
            }
        } else {
            derived_envelope(plaintext)
        };

        let json = serde_json::to_string(&envelope)
            .map_err(|e| SecretStoreError::EncryptionFailed(e.to_string()))?;

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SecretStoreError::StorageWriteFailed(e.to_string()))?;
        std::fs::write(&path, json)
            .map_err(|e| SecretStoreError::StorageWriteFailed(e.to_string()))?;
        restrict_permissions(&path);

        debug!(id, method = ?envelope.method, "secret record saved");
        Ok(())
    }

    /// Load and decrypt the record stored under `id`.
    ///
    /// Fail-closed: a missing, corrupt or undecryptable record yields `None`.
    pub fn load(&self, id: &str) -> Option<SecretString> {
        let path = self.record_path(id).ok()?;
        let raw = std::fs::read(&path).ok()?;

        let envelope: SecretEnvelope = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id, error = %e, "secret record is corrupt, treating as absent");
                return None;
            }
        };
        let ciphertext = match STANDARD.decode(&envelope.ciphertext) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                warn!(id, error = %e, "secret record ciphertext is corrupt, treating as absent");
                return None;
            }
        };

        let plaintext = match envelope.method {
            SecretMethod::PlatformNative => self.platform.decrypt(&ciphertext),
            SecretMethod::DerivedKeyCbc => {
                let iv = envelope.iv.as_deref().unwrap_or_default();
                match STANDARD.decode(iv) {
                    Ok(iv) => derived::decrypt_with_machine_key(&iv, &ciphertext),
                    Err(e) => Err(e.into()),
                }
            }
        };

        match plaintext.map(String::from_utf8) {
            Ok(Ok(plaintext)) => Some(SecretString::from(plaintext)),
            Ok(Err(e)) => {
                warn!(id, error = %e, "decrypted record is not UTF-8, treating as absent");
                None
            }
            Err(e) => {
                warn!(id, error = %e, "failed to decrypt secret record, treating as absent");
                None
            }
        }
    }

    /// Remove the record stored under `id`.
    ///
    /// Returns `Ok(false)` when there was nothing to delete. The file is
    /// overwritten with random bytes before removal.
    pub fn delete(&self, id: &str) -> Result<bool, SecretStoreError> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Ok(false);
        }

        // Best-effort scramble before unlinking.
        if let Ok(metadata) = std::fs::metadata(&path) {
            let mut noise = vec![0u8; metadata.len() as usize];
            rand::rng().fill_bytes(&mut noise);
            let _ = std::fs::write(&path, &noise);
        }

        std::fs::remove_file(&path)
            .map_err(|e| SecretStoreError::StorageWriteFailed(e.to_string()))?;
        debug!(id, "secret record deleted");
        Ok(true)
    }

    /// Presence plus a masked preview for display.
    pub fn status(&self, id: &str) -> SecretStatus {
        use secrecy::ExposeSecret;

        match self.load(id) {
            Some(secret) => SecretStatus {
                present: true,
                preview: Some(mask_secret(secret.expose_secret())),
            },
            None => SecretStatus {
                present: false,
                preview: None,
            },
        }
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, SecretStoreError> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SecretStoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.enc")))
    }
}

fn derived_envelope(plaintext: &str) -> SecretEnvelope {
    let (iv, ciphertext) = derived::encrypt_with_machine_key(plaintext.as_bytes());
    SecretEnvelope {
        method: SecretMethod::DerivedKeyCbc,
        iv: Some(STANDARD.encode(iv)),
        ciphertext: STANDARD.encode(ciphertext),
    }
}

/// Mask a secret for safe display.
fn mask_secret(secret: &str) -> String {
    if secret.len() <= 13 || !secret.is_ascii() {
        return "***".to_string();
    }
    let prefix = &secret[..8];
    let suffix = &secret[secret.len() - 5..];
    format!("{prefix}***{suffix}")
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = std::fs::set_permissions(path, perms) {
            warn!(path = %path.display(), error = %e, "failed to restrict record permissions");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use crate::cipher;

    /// Platform capability that is never available.
    struct NoPlatform;

    impl PlatformCipher for NoPlatform {
        fn is_available(&self) -> bool {
            false
        }
        fn encrypt(&self, _plaintext: &[u8]) -> Result<Vec<u8>> {
            Err(anyhow!("platform encryption not available"))
        }
        fn decrypt(&self, _blob: &[u8]) -> Result<Vec<u8>> {
            Err(anyhow!("platform encryption not available"))
        }
    }

    /// In-memory platform capability with a fixed key, for exercising the
    /// platform-native path without a real keychain.
    struct MemoryPlatform {
        key: [u8; 32],
    }

    impl MemoryPlatform {
        fn new() -> Self {
            Self { key: [42u8; 32] }
        }
    }

    impl PlatformCipher for MemoryPlatform {
        fn is_available(&self) -> bool {
            true
        }
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
            let (iv, ciphertext) = cipher::encrypt_cbc(&self.key, plaintext);
            let mut blob = iv.to_vec();
            blob.extend_from_slice(&ciphertext);
            Ok(blob)
        }
        fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
            let (iv, ciphertext) = blob.split_at(16);
            cipher::decrypt_cbc(&self.key, iv, ciphertext)
        }
    }

    fn derived_store(dir: &TempDir) -> SecretStore {
        SecretStore::new(dir.path(), Box::new(NoPlatform))
    }

    fn platform_store(dir: &TempDir) -> SecretStore {
        SecretStore::new(dir.path(), Box::new(MemoryPlatform::new()))
    }

    #[test]
    fn test_round_trip_derived_key_path() {
        let dir = TempDir::new().unwrap();
        let store = derived_store(&dir);

        assert!(store.load("api-key").is_none());
        store.save("api-key", "sk-proj-1234567890ABCDE").unwrap();
        let loaded = store.load("api-key").unwrap();
        assert_eq!(loaded.expose_secret(), "sk-proj-1234567890ABCDE");
    }

    #[test]
    fn test_round_trip_platform_path() {
        let dir = TempDir::new().unwrap();
        let store = platform_store(&dir);

        store.save("api-key", "sk-proj-1234567890ABCDE").unwrap();
        let loaded = store.load("api-key").unwrap();
        assert_eq!(loaded.expose_secret(), "sk-proj-1234567890ABCDE");
    }

    #[test]
    fn test_method_tag_matches_encryption_path() {
        let dir = TempDir::new().unwrap();

        derived_store(&dir).save("fallback", "secret-value-1").unwrap();
        let raw = std::fs::read_to_string(dir.path().join("fallback.enc")).unwrap();
        assert!(raw.contains("\"derived-key-cbc\""));
        assert!(raw.contains("\"iv\""));

        platform_store(&dir).save("native", "secret-value-2").unwrap();
        let raw = std::fs::read_to_string(dir.path().join("native.enc")).unwrap();
        assert!(raw.contains("\"platform-native\""));
        assert!(!raw.contains("\"iv\""));
    }

    #[test]
    fn test_derived_record_readable_when_platform_appears() {
        let dir = TempDir::new().unwrap();
        derived_store(&dir).save("api-key", "stable-value-123").unwrap();

        // A later run with a working keychain must still decrypt the old
        // record through its tagged method.
        let loaded = platform_store(&dir).load("api-key").unwrap();
        assert_eq!(loaded.expose_secret(), "stable-value-123");
    }

    #[test]
    fn test_overwrite_replaces_record() {
        let dir = TempDir::new().unwrap();
        let store = derived_store(&dir);

        store.save("api-key", "first-secret-value").unwrap();
        store.save("api-key", "second-secret-value").unwrap();
        assert_eq!(store.load("api-key").unwrap().expose_secret(), "second-secret-value");
    }

    #[test]
    fn test_delete_then_load_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = derived_store(&dir);

        store.save("api-key", "some-secret-value").unwrap();
        assert!(store.delete("api-key").unwrap());
        assert!(store.load("api-key").is_none());
    }

    #[test]
    fn test_double_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = derived_store(&dir);

        store.save("api-key", "some-secret-value").unwrap();
        assert!(store.delete("api-key").unwrap());
        assert!(!store.delete("api-key").unwrap());
        assert!(!store.delete("never-existed").unwrap());
    }

    #[test]
    fn test_corrupt_record_is_absent_not_error() {
        let dir = TempDir::new().unwrap();
        let store = derived_store(&dir);

        std::fs::write(dir.path().join("api-key.enc"), b"not json at all").unwrap();
        assert!(store.load("api-key").is_none());

        // Valid envelope, garbage ciphertext.
        std::fs::write(
            dir.path().join("api-key.enc"),
            r#"{"method":"derived-key-cbc","iv":"AAAA","ciphertext":"!!!"}"#,
        )
        .unwrap();
        assert!(store.load("api-key").is_none());
    }

    #[test]
    fn test_status_masks_preview() {
        let dir = TempDir::new().unwrap();
        let store = derived_store(&dir);

        store.save("api-key", "sk-proj-1234567890ABCDE").unwrap();
        let status = store.status("api-key");
        assert!(status.present);
        assert_eq!(status.preview.as_deref(), Some("sk-proj-***ABCDE"));

        store.save("short", "tiny-secret").unwrap();
        assert_eq!(store.status("short").preview.as_deref(), Some("***"));

        let absent = store.status("missing");
        assert!(!absent.present);
        assert!(absent.preview.is_none());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let dir = TempDir::new().unwrap();
        let store = derived_store(&dir);

        assert!(matches!(
            store.save("../escape", "value"),
            Err(SecretStoreError::InvalidId(_))
        ));
        assert!(store.load("../escape").is_none());
    }
}
