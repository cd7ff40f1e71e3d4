use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use super::{SecretBackend, StorageError};

/// File layout: MAGIC | salt | nonce | ciphertext (with Poly1305 tag).
const MAGIC: &[u8; 4] = b"SGF1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

/// Fallback store: a single file sealed with ChaCha20-Poly1305 under a key
/// derived from a local secret with Argon2.
///
/// Weaker than the keychain since the secret lives on the same device, but
/// tampering and truncation are detected.
pub struct EncryptedFileBackend {
    path: PathBuf,
    secret: String,
}

impl EncryptedFileBackend {
    pub fn new(path: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            secret: secret.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_LEN], StorageError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.secret.as_bytes(), salt, &mut key)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;
        Ok(key)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = self.derive_key(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: MAGIC,
                },
            )
            .map_err(|e| StorageError::Crypto(e.to_string()))?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open(&self, blob: &[u8]) -> Result<Vec<u8>, StorageError> {
        if blob.len() < HEADER_LEN || &blob[..MAGIC.len()] != MAGIC {
            return Err(StorageError::Corrupt("unrecognized file header".to_string()));
        }
        let (salt, rest) = blob[MAGIC.len()..].split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: MAGIC,
                },
            )
            .map_err(|_| StorageError::Corrupt("authentication tag mismatch".to_string()))
    }
}

impl SecretBackend for EncryptedFileBackend {
    fn name(&self) -> &'static str {
        "encrypted-file"
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let blob = self.seal(bytes)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, blob)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let blob = match fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.open(&blob).map(Some)
    }

    fn erase(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(dir: &tempfile::TempDir, secret: &str) -> EncryptedFileBackend {
        EncryptedFileBackend::new(dir.path().join("nested").join("session.bin"), secret)
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(&dir, "device-secret");
        store.write(b"hello session").unwrap();
        assert_eq!(store.read().unwrap(), Some(b"hello session".to_vec()));

        let on_disk = fs::read(store.path()).unwrap();
        assert!(on_disk.starts_with(MAGIC));
        assert!(!on_disk.windows(7).any(|w| w == b"session"));
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(backend(&dir, "s").read().unwrap(), None);
    }

    #[test]
    fn test_wrong_secret_is_reported_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        backend(&dir, "right").write(b"payload").unwrap();
        let err = backend(&dir, "wrong").read().unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[test]
    fn test_tampered_file_is_reported_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(&dir, "secret");
        store.write(b"payload").unwrap();

        let mut blob = fs::read(store.path()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        fs::write(store.path(), &blob).unwrap();
        assert!(matches!(store.read(), Err(StorageError::Corrupt(_))));

        fs::write(store.path(), b"SG").unwrap();
        assert!(matches!(store.read(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_erase_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(&dir, "secret");
        store.erase().unwrap();
        store.write(b"payload").unwrap();
        store.erase().unwrap();
        store.erase().unwrap();
        assert_eq!(store.read().unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = backend(&dir, "secret");
        store.write(b"payload").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
