use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainType, NetworkId};
use crate::errors::{WalletError, WalletResult};
use crate::storage::paths::set_aside;
use crate::storage::{KdfSettings, WalletPaths};

const CONFIG_VERSION: u16 = 1;

/// Environment variable selecting the configuration environment name.
pub const ENVIRONMENT_VAR: &str = "MULTICHAIN_WALLET_ENV";
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// RPC (and optional indexer) endpoint for one chain/network pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub chain: ChainType,
    pub network: NetworkId,
    pub rpc_url: String,
    #[serde(default)]
    pub indexer_url: Option<String>,
}

impl EndpointConfig {
    pub fn new(chain: ChainType, network: &str, rpc_url: &str, indexer_url: Option<&str>) -> Self {
        Self {
            chain,
            network: NetworkId::from(network),
            rpc_url: rpc_url.to_string(),
            indexer_url: indexer_url.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub kdf_memory_kib: u32,
    pub kdf_iterations: u32,
    pub max_backups: usize,
}

impl StorageConfig {
    pub fn kdf_settings(&self) -> KdfSettings {
        KdfSettings {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: 1,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let kdf = KdfSettings::default();
        Self {
            kdf_memory_kib: kdf.memory_kib,
            kdf_iterations: kdf.iterations,
            max_backups: 5,
        }
    }
}

/// Wallet identity shown to dApps during pairing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

impl Default for WalletMetadata {
    fn default() -> Self {
        Self {
            name: "Multichain Wallet".to_string(),
            description: "Self-custodial wallet for EVM chains and Solana".to_string(),
            url: "https://multichain-wallet.app".to_string(),
            icons: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    pub session_ttl_hours: u32,
    pub metadata: WalletMetadata,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24 * 7,
            metadata: WalletMetadata::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    pub environment: String,
    pub endpoints: Vec<EndpointConfig>,
    pub storage: StorageConfig,
    pub bridge: BridgeConfig,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl WalletConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            endpoints: default_endpoints(),
            storage: StorageConfig::default(),
            bridge: BridgeConfig::default(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn endpoint(&self, chain: ChainType, network: &NetworkId) -> Option<&EndpointConfig> {
        self.endpoints
            .iter()
            .find(|e| e.chain == chain && &e.network == network)
    }
}

fn default_endpoints() -> Vec<EndpointConfig> {
    const ETH_MAINNET: &str = "https://eth-mainnet.g.alchemy.com/v2/{ALCHEMY_API_KEY}";
    const ETH_SEPOLIA: &str = "https://eth-sepolia.g.alchemy.com/v2/{ALCHEMY_API_KEY}";
    const POLYGON_MAINNET: &str = "https://polygon-mainnet.g.alchemy.com/v2/{ALCHEMY_API_KEY}";
    const POLYGON_AMOY: &str = "https://polygon-amoy.g.alchemy.com/v2/{ALCHEMY_API_KEY}";

    vec![
        EndpointConfig::new(ChainType::Ethereum, "mainnet", ETH_MAINNET, Some(ETH_MAINNET)),
        EndpointConfig::new(ChainType::Ethereum, "sepolia", ETH_SEPOLIA, Some(ETH_SEPOLIA)),
        EndpointConfig::new(
            ChainType::Polygon,
            "mainnet",
            POLYGON_MAINNET,
            Some(POLYGON_MAINNET),
        ),
        EndpointConfig::new(ChainType::Polygon, "amoy", POLYGON_AMOY, Some(POLYGON_AMOY)),
        EndpointConfig::new(
            ChainType::Binance,
            "mainnet",
            "https://bsc-dataseed.binance.org",
            None,
        ),
        EndpointConfig::new(
            ChainType::Binance,
            "testnet",
            "https://data-seed-prebsc-1-s1.binance.org:8545",
            None,
        ),
        EndpointConfig::new(
            ChainType::Solana,
            "mainnet-beta",
            "https://api.mainnet-beta.solana.com",
            None,
        ),
        EndpointConfig::new(
            ChainType::Solana,
            "devnet",
            "https://api.devnet.solana.com",
            None,
        ),
    ]
}

/// Environment name from `MULTICHAIN_WALLET_ENV`, defaulting to production.
pub fn environment_from_env() -> String {
    std::env::var(ENVIRONMENT_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

/// Substitute `{VAR_NAME}` placeholders in an endpoint URL.
///
/// Fails with `ValidationError` naming the first variable `lookup` cannot
/// resolve.
pub fn expand_placeholders<F>(url: &str, lookup: F) -> WalletResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let placeholder = Regex::new(r"\{([A-Z][A-Z0-9_]*)\}")
        .map_err(|e| WalletError::ValidationError(format!("Invalid placeholder regex: {}", e)))?;

    let mut missing = None;
    let expanded = placeholder.replace_all(url, |caps: &Captures| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(WalletError::ValidationError(format!(
            "Environment variable {} is not set",
            name
        ))),
        None => Ok(expanded.into_owned()),
    }
}

/// `expand_placeholders` against the process environment.
pub fn expand_env_placeholders(url: &str) -> WalletResult<String> {
    expand_placeholders(url, |name| std::env::var(name).ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: WalletConfig,
    modified_at_unix: i64,
}

/// Handles persistence of wallet configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> WalletResult<WalletConfig> {
        if !self.path.exists() {
            let config = WalletConfig::new(environment);
            self.save(&config)?;
            log::info!("Wrote default configuration to {}", self.path.display());
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    /// Like `load_or_default`, but an unreadable or tampered file is moved
    /// aside and replaced by the defaults.
    pub fn load_or_recover(&self, environment: impl Into<String>) -> WalletResult<WalletConfig> {
        let environment = environment.into();
        match self.load_or_default(environment.clone()) {
            Ok(config) => Ok(config),
            Err(err) => {
                log::warn!("Configuration is unreadable, using defaults: {}", err);
                if self.path.exists() {
                    set_aside(&self.path)?;
                }
                self.load_or_default(environment)
            }
        }
    }

    pub fn save(&self, config: &WalletConfig) -> WalletResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        updater: F,
    ) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &WalletConfig) -> WalletResult<[u8; 32]> {
    let encoded = serde_json::to_vec(config)?;
    let mut hasher = Blake3::new();
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}
