use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::paths::set_aside;
use super::{KeyValueStore, WalletPaths};
use crate::errors::{WalletError, WalletResult};

const KEYSTORE_MAGIC: &[u8; 8] = b"MCWALLET";
const KEYSTORE_VERSION: u16 = 1;
const VERIFIER_PLAINTEXT: &[u8] = b"multichain-wallet keystore";
const VERIFIER_AAD: &str = "__verifier__";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Argon2id cost parameters used when a keystore is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024, // 64 MiB
            iterations: 3,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdfParameters {
    m_cost_kib: u32,
    t_cost: u32,
    p_cost: u32,
    salt: [u8; SALT_LEN],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEntry {
    nonce: [u8; NONCE_LEN],
    checksum: [u8; 32],
    ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeystoreFile {
    magic: [u8; 8],
    version: u16,
    kdf: KdfParameters,
    verifier: SealedEntry,
    entries: BTreeMap<String, SealedEntry>,
    updated_at: DateTime<Utc>,
}

/// Passphrase-protected keystore file.
///
/// The AES-256-GCM key is derived once with Argon2id when the store is
/// opened. Each entry is sealed with its own nonce and bound to its name as
/// associated data. Every write replaces the file atomically after copying
/// the previous version into the backup directory.
pub struct EncryptedFileStore {
    paths: WalletPaths,
    key: Zeroizing<[u8; KEY_LEN]>,
    state: Mutex<KeystoreFile>,
    max_backups: usize,
}

impl EncryptedFileStore {
    /// Open the keystore under `paths`, creating it when absent.
    ///
    /// A wrong passphrase fails with `CryptoError` before any entry is read.
    /// A keystore that cannot be parsed is moved aside and replaced by an
    /// empty one.
    pub fn open(
        paths: &WalletPaths,
        passphrase: &SecretString,
        kdf: KdfSettings,
        max_backups: usize,
    ) -> WalletResult<Self> {
        paths.ensure_directories()?;

        let existing = if paths.keystore_file().exists() {
            match read_keystore_file(paths.keystore_file()) {
                Ok(file) => Some(file),
                Err(err) => {
                    log::warn!("Keystore is unreadable, starting empty: {}", err);
                    set_aside(paths.keystore_file())?;
                    None
                }
            }
        } else {
            None
        };

        let (key, file) = match existing {
            Some(file) => {
                let key = derive_key(passphrase, &file.kdf)?;
                open_entry(&key, VERIFIER_AAD, &file.verifier).map_err(|_| {
                    WalletError::CryptoError(
                        "Incorrect passphrase or corrupted keystore".to_string(),
                    )
                })?;
                (key, file)
            }
            None => {
                let mut salt = [0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                let params = KdfParameters {
                    m_cost_kib: kdf.memory_kib,
                    t_cost: kdf.iterations,
                    p_cost: kdf.parallelism,
                    salt,
                };
                let key = derive_key(passphrase, &params)?;
                let file = KeystoreFile {
                    magic: *KEYSTORE_MAGIC,
                    version: KEYSTORE_VERSION,
                    kdf: params,
                    verifier: seal_entry(&key, VERIFIER_AAD, VERIFIER_PLAINTEXT)?,
                    entries: BTreeMap::new(),
                    updated_at: Utc::now(),
                };
                write_atomic(paths.keystore_file(), &serde_json::to_vec(&file)?)?;
                log::info!("Created keystore at {}", paths.keystore_file().display());
                (key, file)
            }
        };

        Ok(Self {
            paths: paths.clone(),
            key,
            state: Mutex::new(file),
            max_backups,
        })
    }

    pub fn path(&self) -> &Path {
        self.paths.keystore_file()
    }

    pub fn available_backups(&self) -> WalletResult<Vec<PathBuf>> {
        self.paths.list_backups()
    }

    /// Roll the keystore back to a backup written by this store.
    pub fn restore_from_backup(&self, backup_path: &Path) -> WalletResult<()> {
        let restored = read_keystore_file(backup_path)?;
        open_entry(&self.key, VERIFIER_AAD, &restored.verifier).map_err(|_| {
            WalletError::CryptoError("Backup was written under a different passphrase".to_string())
        })?;

        let mut state = self.state.lock();
        self.paths.restore_keystore_from_backup(backup_path)?;
        *state = restored;
        Ok(())
    }

    fn read_entry(&self, name: &str) -> WalletResult<Option<SecretString>> {
        let sealed = match self.state.lock().entries.get(name) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        let plaintext = open_entry(&self.key, name, &sealed)?;
        let value = String::from_utf8(plaintext.to_vec())
            .map_err(|_| WalletError::StorageError(format!("Entry {} is not UTF-8", name)))?;
        Ok(Some(SecretString::from(value)))
    }

    fn write_with<F>(&self, mutate: F) -> WalletResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, SealedEntry>) -> WalletResult<()>,
    {
        let mut state = self.state.lock();
        let mut next = state.clone();
        mutate(&mut next.entries)?;
        next.updated_at = Utc::now();

        if self.paths.keystore_file().exists() {
            self.paths.create_keystore_backup()?;
        }
        write_atomic(self.paths.keystore_file(), &serde_json::to_vec(&next)?)?;
        if let Err(err) = self.paths.prune_old_backups(self.max_backups) {
            log::warn!("Failed to prune keystore backups: {}", err);
        }

        *state = next;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> WalletResult<Option<SecretString>> {
        self.read_entry(key)
    }

    async fn set(&self, key: &str, value: SecretString) -> WalletResult<()> {
        let sealed = seal_entry(&self.key, key, value.expose_secret().as_bytes())?;
        self.write_with(|entries| {
            entries.insert(key.to_string(), sealed);
            Ok(())
        })
    }

    async fn remove(&self, key: &str) -> WalletResult<()> {
        if !self.state.lock().entries.contains_key(key) {
            return Ok(());
        }
        self.write_with(|entries| {
            entries.remove(key);
            Ok(())
        })
    }

    async fn keys(&self) -> WalletResult<Vec<String>> {
        Ok(self.state.lock().entries.keys().cloned().collect())
    }
}

fn read_keystore_file(path: &Path) -> WalletResult<KeystoreFile> {
    let bytes = fs::read(path)?;
    let file: KeystoreFile = serde_json::from_slice(&bytes)?;

    if &file.magic != KEYSTORE_MAGIC {
        return Err(WalletError::ValidationError(
            "Invalid keystore magic marker".to_string(),
        ));
    }
    if file.version != KEYSTORE_VERSION {
        return Err(WalletError::ValidationError(format!(
            "Unsupported keystore version: {}",
            file.version
        )));
    }
    Ok(file)
}

fn derive_key(
    passphrase: &SecretString,
    params: &KdfParameters,
) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let argon_params = Params::new(
        params.m_cost_kib,
        params.t_cost,
        params.p_cost,
        Some(KEY_LEN),
    )
    .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(
            passphrase.expose_secret().as_bytes(),
            &params.salt,
            key.as_mut(),
        )
        .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

fn aead_key(key: &[u8; KEY_LEN]) -> WalletResult<LessSafeKey> {
    let unbound = UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    Ok(LessSafeKey::new(unbound))
}

fn seal_entry(key: &[u8; KEY_LEN], name: &str, plaintext: &[u8]) -> WalletResult<SealedEntry> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut in_out = plaintext.to_vec();
    aead_key(key)?
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(name.as_bytes()),
            &mut in_out,
        )
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;

    Ok(SealedEntry {
        nonce,
        checksum: blake3_checksum(plaintext),
        ciphertext: in_out,
    })
}

fn open_entry(
    key: &[u8; KEY_LEN],
    name: &str,
    entry: &SealedEntry,
) -> WalletResult<Zeroizing<Vec<u8>>> {
    if entry.ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::CryptoError(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let mut in_out = Zeroizing::new(entry.ciphertext.clone());
    let plaintext_len = aead_key(key)?
        .open_in_place(
            Nonce::assume_unique_for_key(entry.nonce),
            Aad::from(name.as_bytes()),
            in_out.as_mut_slice(),
        )
        .map_err(|_| WalletError::CryptoError("Decryption failure".to_string()))?
        .len();
    in_out.truncate(plaintext_len);

    if blake3_checksum(&in_out) != entry.checksum {
        return Err(WalletError::ValidationError(
            "Keystore integrity verification failed".to_string(),
        ));
    }
    Ok(in_out)
}

fn blake3_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake3::new();
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> WalletResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| WalletError::StorageError("Invalid keystore path".to_string()))?;
    fs::create_dir_all(dir)?;

    let tmp_path = path.with_extension("new");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
