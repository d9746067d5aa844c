//! Key Store
//!
//! Single source of truth for the client key pair and the cached
//! certificate. Every operation runs under one lock so a refresh can never
//! observe keys from one generation paired with a certificate from another.
//!
//! Persistence is delegated to a [`CredentialVault`]. Writes go straight to
//! the vault and are durable when the call returns.

use crate::certificate::Certificate;
use crate::keys::{KeyPair, PrivateKey, PublicKey};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Entries held in a credential vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultItem {
    /// PKCS#8 PEM of the Ed25519 private key
    PrivateKey,
    /// JSON-encoded [`Certificate`]
    Certificate,
}

impl VaultItem {
    /// Stable entry name
    pub fn name(&self) -> &'static str {
        match self {
            VaultItem::PrivateKey => "client_key.pem",
            VaultItem::Certificate => "client_certificate.json",
        }
    }
}

/// Secure storage backend for credential entries
pub trait CredentialVault: Send + Sync {
    fn read(&self, item: VaultItem) -> Result<Option<String>, StoreError>;
    fn write(&self, item: VaultItem, value: &str) -> Result<(), StoreError>;
    fn remove(&self, item: VaultItem) -> Result<(), StoreError>;
}

/// In-memory vault (tests, ephemeral sessions)
#[derive(Default)]
pub struct MemoryVault {
    entries: Mutex<HashMap<VaultItem, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<VaultItem, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialVault for MemoryVault {
    fn read(&self, item: VaultItem) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(&item).cloned())
    }

    fn write(&self, item: VaultItem, value: &str) -> Result<(), StoreError> {
        self.entries().insert(item, value.to_string());
        Ok(())
    }

    fn remove(&self, item: VaultItem) -> Result<(), StoreError> {
        self.entries().remove(&item);
        Ok(())
    }
}

/// Directory-backed vault
///
/// Each entry is a file. Writes go to a temporary sibling which is synced
/// and renamed over the target.
pub struct FileVault {
    dir: PathBuf,
}

impl FileVault {
    /// Open (and create if needed) a vault directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    /// Vault directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, item: VaultItem) -> PathBuf {
        self.dir.join(item.name())
    }
}

impl CredentialVault for FileVault {
    fn read(&self, item: VaultItem) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(item)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    fn write(&self, item: VaultItem, value: &str) -> Result<(), StoreError> {
        let target = self.path(item);
        let tmp = target.with_extension("tmp");

        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::Io(e.to_string()))?;
        file.write_all(value.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        file.sync_all().map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&tmp, &target).map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }

    fn remove(&self, item: VaultItem) -> Result<(), StoreError> {
        match fs::remove_file(self.path(item)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }
}

/// Key Store
///
/// - `keys()` creates and persists a pair on first access
/// - rotating or deleting keys always drops the cached certificate
/// - all calls are serialized
pub struct KeyStore {
    vault: Box<dyn CredentialVault>,
    lock: Mutex<()>,
}

impl KeyStore {
    /// Create a store over a vault
    pub fn new(vault: impl CredentialVault + 'static) -> Self {
        Self {
            vault: Box::new(vault),
            lock: Mutex::new(()),
        }
    }

    /// Create a store that lives only in memory
    pub fn in_memory() -> Self {
        Self::new(MemoryVault::new())
    }

    /// Open a file-backed store
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::new(FileVault::open(dir)?))
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current key pair, generated on first access
    pub fn keys(&self) -> Result<KeyPair, StoreError> {
        let _guard = self.guard();
        self.load_or_create_keys()
    }

    /// Cached certificate, if any
    pub fn cached_certificate(&self) -> Result<Option<Certificate>, StoreError> {
        let _guard = self.guard();
        self.load_certificate()
    }

    /// Keys and certificate read under one lock
    pub fn snapshot(&self) -> Result<(KeyPair, Option<Certificate>), StoreError> {
        let _guard = self.guard();
        let keys = self.load_or_create_keys()?;
        let certificate = self.load_certificate()?;
        Ok((keys, certificate))
    }

    /// Cache a freshly issued certificate
    pub fn store_certificate(&self, certificate: &Certificate) -> Result<(), StoreError> {
        let _guard = self.guard();
        self.write_certificate(certificate)
    }

    /// Cache a certificate issued for `public`.
    ///
    /// Returns `false` without writing if the stored key pair is no longer
    /// the one the certificate was issued for.
    pub fn store_certificate_for(
        &self,
        public: &PublicKey,
        certificate: &Certificate,
    ) -> Result<bool, StoreError> {
        let _guard = self.guard();
        let current = match self.vault.read(VaultItem::PrivateKey)? {
            Some(pem) => PrivateKey::from_pem(&pem).ok().map(|key| key.public_key()),
            None => None,
        };

        if current.as_ref() != Some(public) {
            warn!("Keys changed while the certificate was issued, not storing it");
            return Ok(false);
        }

        self.write_certificate(certificate)?;
        Ok(true)
    }

    /// Drop the cached certificate
    pub fn delete_certificate(&self) -> Result<(), StoreError> {
        let _guard = self.guard();
        self.vault.remove(VaultItem::Certificate)
    }

    /// Drop keys and the certificate bound to them
    pub fn delete_keys(&self) -> Result<(), StoreError> {
        let _guard = self.guard();
        self.vault.remove(VaultItem::Certificate)?;
        self.vault.remove(VaultItem::PrivateKey)?;
        info!("Deleted client keys and certificate");
        Ok(())
    }

    /// Replace the key pair, dropping the certificate first
    pub fn rotate_keys(&self) -> Result<KeyPair, StoreError> {
        let _guard = self.guard();
        self.vault.remove(VaultItem::Certificate)?;
        let keys = KeyPair::generate();
        self.vault.write(VaultItem::PrivateKey, &keys.private.to_pem())?;
        info!("Rotated client keys (public: {:?})", keys.public);
        Ok(keys)
    }

    fn write_certificate(&self, certificate: &Certificate) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(certificate)
            .map_err(|e| StoreError::Encoding(e.to_string()))?;
        self.vault.write(VaultItem::Certificate, &encoded)?;
        debug!("Stored certificate valid until {}", certificate.valid_until);
        Ok(())
    }

    fn load_or_create_keys(&self) -> Result<KeyPair, StoreError> {
        if let Some(pem) = self.vault.read(VaultItem::PrivateKey)? {
            match PrivateKey::from_pem(&pem) {
                Ok(private) => return Ok(KeyPair::from_private(private)),
                Err(e) => {
                    warn!("Stored client key is unreadable ({}), generating a new one", e);
                    self.vault.remove(VaultItem::Certificate)?;
                }
            }
        }

        let keys = KeyPair::generate();
        self.vault.write(VaultItem::PrivateKey, &keys.private.to_pem())?;
        info!("Generated new client keys (public: {:?})", keys.public);
        Ok(keys)
    }

    fn load_certificate(&self) -> Result<Option<Certificate>, StoreError> {
        let Some(encoded) = self.vault.read(VaultItem::Certificate)? else {
            return Ok(None);
        };

        match serde_json::from_str(&encoded) {
            Ok(certificate) => Ok(Some(certificate)),
            Err(e) => {
                warn!("Discarding unreadable cached certificate: {}", e);
                self.vault.remove(VaultItem::Certificate)?;
                Ok(None)
            }
        }
    }
}

/// Key store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}
