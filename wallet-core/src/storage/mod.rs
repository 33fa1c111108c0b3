pub mod paths;
pub mod vault;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};

use crate::errors::WalletResult;

pub use paths::WalletPaths;
pub use vault::{EncryptedFileStore, KdfSettings};

/// Persistent secure storage for small secret strings keyed by name.
///
/// The registry keeps one entry per chain (`wallet_<chain>`) holding the
/// exported private key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> WalletResult<Option<SecretString>>;
    async fn set(&self, key: &str, value: SecretString) -> WalletResult<()>;
    async fn remove(&self, key: &str) -> WalletResult<()>;
    async fn keys(&self) -> WalletResult<Vec<String>>;
}

/// Volatile store for tests and hosts that bring their own persistence.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, SecretString>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> WalletResult<Option<SecretString>> {
        Ok(self
            .entries
            .read()
            .get(key)
            .map(|value| SecretString::from(value.expose_secret().to_string())))
    }

    async fn set(&self, key: &str, value: SecretString) -> WalletResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> WalletResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> WalletResult<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
