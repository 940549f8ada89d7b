//! Payload Key Management
//!
//! Handles generation, storage and loading of the symmetric key that
//! protects audit event payloads at rest, and the AES-256-GCM cipher
//! built from it.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AuditError, AuditResult};

/// AES-256 key size in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce size (96 bits).
pub const NONCE_LEN: usize = 12;

/// Authentication tag appended by AES-GCM.
const TAG_LEN: usize = 16;

/// Authenticated cipher for event payloads.
///
/// Ciphertext layout is `nonce || ciphertext || tag`. The key is never
/// exposed; logs identify it by `fingerprint()`.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl PayloadCipher {
    /// Build a cipher from raw key bytes.
    pub fn from_key_bytes(key: &[u8]) -> AuditResult<Self> {
        if key.len() != KEY_LEN {
            return Err(AuditError::EncryptionError(format!(
                "Key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AuditError::EncryptionError(format!("Invalid key: {}", e)))?;

        let digest = Sha256::digest(key);
        let fingerprint = hex::encode(&digest[..8]);

        Ok(Self { cipher, fingerprint })
    }

    /// Encrypt a plaintext payload with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> AuditResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| AuditError::EncryptionError("Payload encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a payload produced by `encrypt`, failing if authentication fails.
    pub fn decrypt(&self, sealed: &[u8]) -> AuditResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(AuditError::EncryptionError(format!(
                "Ciphertext too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                AuditError::EncryptionError("Ciphertext failed authentication".to_string())
            })
    }

    /// Short, non-reversible identifier of the key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

fn write_key_file(path: &Path, key: &[u8; KEY_LEN]) -> AuditResult<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .map_err(|e| AuditError::StorageError(format!("Failed to create key file: {}", e)))?;
    writeln!(file, "{}", STANDARD.encode(key))?;
    file.sync_all()?;
    Ok(())
}

/// Key lifecycle: generate once per deployment, persist owner-only, load.
pub struct KeyManager {
    key_path: PathBuf,
}

impl KeyManager {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn key_exists(&self) -> bool {
        self.key_path.exists()
    }

    /// Load the existing key, or generate and persist a new one if absent.
    pub fn load_or_generate(&self) -> AuditResult<PayloadCipher> {
        if self.key_exists() {
            return self.load_key();
        }

        match self.generate_key() {
            Ok(cipher) => Ok(cipher),
            // Another process created the key between our check and create.
            Err(AuditError::StorageError(msg)) if self.key_exists() => {
                debug!("Key appeared while generating ({}), loading it", msg);
                self.load_key()
            }
            Err(e) => Err(e),
        }
    }

    /// Generate a new random key and write it to `key_path`.
    ///
    /// Refuses to overwrite an existing key file.
    pub fn generate_key(&self) -> AuditResult<PayloadCipher> {
        if let Some(parent) = self.key_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let cipher = PayloadCipher::from_key_bytes(&key)?;

        // The key is written and synced under a private name, then linked
        // into place, so readers never see a partially written key file.
        let temp_path = self.temp_path();
        let published = write_key_file(&temp_path, &key).and_then(|()| {
            fs::hard_link(&temp_path, &self.key_path).map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    AuditError::StorageError(format!(
                        "Key file already exists: {}",
                        self.key_path.display()
                    ))
                } else {
                    AuditError::StorageError(format!("Failed to publish key file: {}", e))
                }
            })
        });
        if let Err(e) = fs::remove_file(&temp_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %temp_path.display(), "Failed to remove temporary key file: {}", e);
            }
        }
        published?;

        info!(
            key_path = %self.key_path.display(),
            fingerprint = %cipher.fingerprint(),
            "Generated new audit payload key"
        );
        Ok(cipher)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .key_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audit.key".to_string());
        self.key_path
            .with_file_name(format!(".{}.tmp-{}", name, Uuid::new_v4().simple()))
    }

    /// Load the key from `key_path`.
    pub fn load_key(&self) -> AuditResult<PayloadCipher> {
        let contents = fs::read_to_string(&self.key_path).map_err(|e| {
            AuditError::EncryptionError(format!(
                "Key file {} unavailable: {}",
                self.key_path.display(),
                e
            ))
        })?;

        self.warn_if_permissive();

        let key = STANDARD
            .decode(contents.trim())
            .map_err(|_| AuditError::EncryptionError("Key file is corrupt".to_string()))?;

        let cipher = PayloadCipher::from_key_bytes(&key)
            .map_err(|_| AuditError::EncryptionError("Key file is corrupt".to_string()))?;

        info!(
            key_path = %self.key_path.display(),
            fingerprint = %cipher.fingerprint(),
            "Loaded audit payload key"
        );
        Ok(cipher)
    }

    #[cfg(unix)]
    fn warn_if_permissive(&self) {
        use std::os::unix::fs::PermissionsExt;

        if let Ok(metadata) = fs::metadata(&self.key_path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    key_path = %self.key_path.display(),
                    mode = %format!("{:o}", mode & 0o777),
                    "Audit key file is accessible to group or others"
                );
            }
        }
    }

    #[cfg(not(unix))]
    fn warn_if_permissive(&self) {}
}
