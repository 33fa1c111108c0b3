use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::approval::ApprovalGate;
use crate::bridge::protocol::PairingTransport;
use crate::bridge::SessionBridge;
use crate::config_store::{environment_from_env, ConfigStore, WalletConfig};
use crate::errors::{WalletError, WalletResult};
use crate::provider::ClientTable;
use crate::registry::WalletRegistry;
use crate::session::SessionManager;
use crate::storage::{EncryptedFileStore, KeyValueStore, WalletPaths};

/// Everything a running wallet needs, built once per process and passed by
/// reference to whoever drives it.
pub struct WalletContext {
    paths: WalletPaths,
    config_store: ConfigStore,
    config: WalletConfig,
    environment: String,
    store: Arc<EncryptedFileStore>,
    registry: Arc<WalletRegistry>,
    bridge: SessionBridge,
}

impl WalletContext {
    /// Open (or create) the wallet under `root_dir`, load its wallets and wire
    /// the bridge to `transport`.
    pub async fn initialize(
        root_dir: PathBuf,
        passphrase: &SecretString,
        transport: Arc<dyn PairingTransport>,
    ) -> WalletResult<Self> {
        let environment = environment_from_env();
        let paths = WalletPaths::new(&root_dir)?;
        paths.ensure_directories()?;

        let config_store = ConfigStore::from_paths(&paths);
        let config = match config_store.load_or_recover(environment.clone()) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Continuing with default configuration: {}", err);
                WalletConfig::new(environment.clone())
            }
        };

        // Argon2 derivation blocks for a while; run it on the blocking pool.
        let store = {
            let paths = paths.clone();
            let passphrase = SecretString::from(passphrase.expose_secret().to_string());
            let kdf = config.storage.kdf_settings();
            let max_backups = config.storage.max_backups;
            tokio::task::spawn_blocking(move || {
                EncryptedFileStore::open(&paths, &passphrase, kdf, max_backups)
            })
            .await
            .map_err(|err| WalletError::StorageError(format!("Keystore open task failed: {}", err)))??
        };
        let store = Arc::new(store);
        let clients = ClientTable::from_config(&config)?;

        let registry = Arc::new(WalletRegistry::new(
            store.clone() as Arc<dyn KeyValueStore>,
            clients,
        )?);
        registry.initialize().await?;

        let bridge = SessionBridge::new(
            registry.clone(),
            ApprovalGate::new(),
            SessionManager::with_ttl_hours(config.bridge.session_ttl_hours),
            transport,
        );

        log::info!(
            "Wallet context ready ({} environment, root {})",
            environment,
            paths.root_dir().display()
        );

        Ok(Self {
            paths,
            config_store,
            config,
            environment,
            store,
            registry,
            bridge,
        })
    }

    pub fn registry(&self) -> &Arc<WalletRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &SessionBridge {
        &self.bridge
    }

    pub fn approvals(&self) -> &ApprovalGate {
        self.bridge.gate()
    }

    pub fn store(&self) -> &EncryptedFileStore {
        &self.store
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    /// Persist a configuration change. Endpoint changes apply the next time
    /// the context is initialized.
    pub fn update_config<F>(&mut self, updater: F) -> WalletResult<&WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        self.config = self
            .config_store
            .update(self.environment.clone(), updater)?;
        Ok(&self.config)
    }
}
