//! Wallet registry
//!
//! Single source of truth for which key signs for the user on each chain.
//! Holds at most one wallet per [`ChainType`], persists private keys through a
//! [`KeyValueStore`] and routes balance, transfer and history queries to the
//! clients registered for a `(chain, network)` pair.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, MutexGuard};

use crate::api::types::{TokenBalance, Transaction, TransactionStatus, WalletSummary};
use crate::chain::{Amount, ChainType, NetworkId};
use crate::crypto::WalletKeyPair;
use crate::errors::{WalletError, WalletResult};
use crate::provider::ClientTable;
use crate::storage::KeyValueStore;
use crate::validation::InputValidator;

/// Fractional digits kept in token balance display strings.
pub const TOKEN_DISPLAY_DECIMALS: u8 = 6;

/// Active key pair of one chain.
#[derive(Debug)]
pub struct WalletRecord {
    pub chain: ChainType,
    pub address: String,
    key: WalletKeyPair,
}

impl WalletRecord {
    fn new(chain: ChainType, key: WalletKeyPair) -> Self {
        Self {
            chain,
            address: key.address(),
            key,
        }
    }

    pub fn key(&self) -> &WalletKeyPair {
        &self.key
    }
}

pub struct WalletRegistry {
    store: Arc<dyn KeyValueStore>,
    clients: ClientTable,
    validator: InputValidator,
    wallets: RwLock<HashMap<ChainType, Arc<WalletRecord>>>,
    chain_locks: [Mutex<()>; 4],
    initialized: Mutex<bool>,
}

impl WalletRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, clients: ClientTable) -> WalletResult<Self> {
        Ok(Self {
            store,
            clients,
            validator: InputValidator::new()?,
            wallets: RwLock::new(HashMap::new()),
            chain_locks: Default::default(),
            initialized: Mutex::new(false),
        })
    }

    /// Load every persisted wallet. Safe to call more than once; later calls
    /// are no-ops. Entries that cannot be read or decoded are logged and
    /// skipped.
    pub async fn initialize(&self) -> WalletResult<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            log::debug!("Wallet registry already initialized");
            return Ok(());
        }

        for chain in ChainType::ALL {
            match self.store.get(&chain.storage_key()).await {
                Ok(Some(secret)) => {
                    match WalletKeyPair::from_credential(chain, secret.expose_secret()) {
                        Ok(key) => {
                            let record = WalletRecord::new(chain, key);
                            log::info!("Loaded {} wallet {}", chain, record.address);
                            self.wallets.write().insert(chain, Arc::new(record));
                        }
                        Err(err) => log::warn!("Discarding stored {} wallet: {}", chain, err),
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("Failed to read stored {} wallet: {}", chain, err),
            }
        }

        *initialized = true;
        log::info!(
            "Wallet registry initialized with {} wallet(s) and {} client(s)",
            self.wallets.read().len(),
            self.clients.len()
        );
        Ok(())
    }

    /// Generate and persist a fresh wallet, replacing any existing one.
    pub async fn create_wallet(&self, chain: ChainType) -> WalletResult<String> {
        self.ensure_initialized().await?;
        let _guard = self.lock_chain(chain).await;
        self.install(chain, WalletKeyPair::generate(chain)).await
    }

    /// Import a private key or mnemonic. Invalid input leaves the current
    /// wallet untouched.
    pub async fn import_wallet(&self, chain: ChainType, credential: &str) -> WalletResult<String> {
        self.ensure_initialized().await?;
        let key = WalletKeyPair::from_credential(chain, credential)?;
        let _guard = self.lock_chain(chain).await;
        self.install(chain, key).await
    }

    pub async fn get_address(&self, chain: ChainType) -> WalletResult<Option<String>> {
        self.ensure_initialized().await?;
        Ok(self.wallets.read().get(&chain).map(|w| w.address.clone()))
    }

    pub async fn has_wallet(&self, chain: ChainType) -> WalletResult<bool> {
        self.ensure_initialized().await?;
        Ok(self.wallets.read().contains_key(&chain))
    }

    /// Addresses of every chain with a wallet.
    pub async fn addresses(&self) -> WalletResult<Vec<(ChainType, String)>> {
        self.ensure_initialized().await?;
        let wallets = self.wallets.read();
        Ok(ChainType::ALL
            .iter()
            .filter_map(|chain| wallets.get(chain).map(|w| (*chain, w.address.clone())))
            .collect())
    }

    pub async fn summaries(&self) -> WalletResult<Vec<WalletSummary>> {
        Ok(self
            .addresses()
            .await?
            .into_iter()
            .map(|(chain, address)| WalletSummary {
                chain,
                address,
                native_symbol: chain.native_symbol().to_string(),
                default_network: chain.default_network().network_id(),
            })
            .collect())
    }

    /// Native balance as a decimal string.
    pub async fn get_balance(&self, chain: ChainType, network: &NetworkId) -> WalletResult<String> {
        self.ensure_initialized().await?;
        let wallet = self.wallet(chain)?;
        let client = self.clients.rpc(chain, network)?;
        let balance = client.native_balance(&wallet.address).await?;
        Ok(balance.as_string())
    }

    /// Non-zero token balances; empty for networks without an indexer.
    pub async fn get_token_balances(
        &self,
        chain: ChainType,
        network: &NetworkId,
    ) -> WalletResult<Vec<TokenBalance>> {
        self.ensure_initialized().await?;
        let wallet = self.wallet(chain)?;
        let indexer = match self.clients.indexer(chain, network)? {
            Some(indexer) => indexer,
            None => return Ok(Vec::new()),
        };

        let mut balances = Vec::new();
        for holding in indexer.token_balances(&wallet.address).await? {
            match Amount::from_hex_units(&holding.raw_balance, 0) {
                Ok(raw) if raw.is_zero() => continue,
                Ok(_) => {}
                Err(err) => {
                    log::debug!(
                        "Skipping token {} with unreadable balance {}: {}",
                        holding.contract_address,
                        holding.raw_balance,
                        err
                    );
                    continue;
                }
            }

            let token = indexer.token_metadata(&holding.contract_address).await?;
            let amount = match Amount::from_hex_units(&holding.raw_balance, token.decimals) {
                Ok(amount) => amount,
                Err(err) => {
                    log::debug!(
                        "Skipping token {} with {} decimals: {}",
                        holding.contract_address,
                        token.decimals,
                        err
                    );
                    continue;
                }
            };
            balances.push(TokenBalance {
                balance: amount.to_display_string(TOKEN_DISPLAY_DECIMALS),
                raw_balance: holding.raw_balance,
                token,
            });
        }
        Ok(balances)
    }

    /// Submit a native transfer once and report it as pending.
    pub async fn send_transaction(
        &self,
        chain: ChainType,
        network: &NetworkId,
        to: &str,
        amount: &str,
    ) -> WalletResult<Transaction> {
        self.ensure_initialized().await?;
        let _guard = self.lock_chain(chain).await;
        let wallet = self.wallet(chain)?;
        let client = self.clients.rpc(chain, network)?;
        let amount = self.validate_transfer(chain, to, amount)?;

        let hash = client.send_native(wallet.key(), to, amount).await?;
        log::info!("Submitted {} transaction {}", chain, hash);

        Ok(Transaction {
            hash,
            from: wallet.address.clone(),
            to: to.to_string(),
            value: amount.as_string(),
            asset: chain.native_symbol().to_string(),
            timestamp: Utc::now(),
            status: TransactionStatus::Pending,
            chain,
            network: network.clone(),
        })
    }

    /// Check a recipient and a decimal amount without touching the network.
    pub fn validate_transfer(&self, chain: ChainType, to: &str, amount: &str) -> WalletResult<Amount> {
        self.validator.validate_address(chain, to)?;
        self.validator.parse_amount(chain, amount)
    }

    pub async fn sign_message(&self, chain: ChainType, message: &[u8]) -> WalletResult<String> {
        self.ensure_initialized().await?;
        let _guard = self.lock_chain(chain).await;
        let wallet = self.wallet(chain)?;
        wallet.key().sign_message(message)
    }

    /// Indexed transfers; empty for networks without an indexer.
    pub async fn get_transaction_history(
        &self,
        chain: ChainType,
        network: &NetworkId,
    ) -> WalletResult<Vec<Transaction>> {
        self.ensure_initialized().await?;
        let wallet = self.wallet(chain)?;
        match self.clients.indexer(chain, network)? {
            Some(indexer) => indexer.transfers(&wallet.address).await,
            None => Ok(Vec::new()),
        }
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    /// Persist first so a failed write keeps the previous wallet.
    async fn install(&self, chain: ChainType, key: WalletKeyPair) -> WalletResult<String> {
        let secret = SecretString::from(key.export_secret().to_string());
        self.store.set(&chain.storage_key(), secret).await?;

        let record = WalletRecord::new(chain, key);
        let address = record.address.clone();
        self.wallets.write().insert(chain, Arc::new(record));
        log::info!("Active {} wallet is now {}", chain, address);
        Ok(address)
    }

    fn wallet(&self, chain: ChainType) -> WalletResult<Arc<WalletRecord>> {
        self.wallets
            .read()
            .get(&chain)
            .cloned()
            .ok_or(WalletError::WalletNotFound(chain))
    }

    async fn ensure_initialized(&self) -> WalletResult<()> {
        if *self.initialized.lock().await {
            Ok(())
        } else {
            Err(WalletError::NotInitialized)
        }
    }

    async fn lock_chain(&self, chain: ChainType) -> MutexGuard<'_, ()> {
        self.chain_locks[chain as usize].lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    async fn registry_with(store: Arc<dyn KeyValueStore>) -> WalletRegistry {
        let registry = WalletRegistry::new(store, ClientTable::empty()).unwrap();
        registry.initialize().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn operations_require_initialization() {
        let registry =
            WalletRegistry::new(Arc::new(MemoryStore::new()), ClientTable::empty()).unwrap();
        assert_eq!(
            registry.create_wallet(ChainType::Ethereum).await,
            Err(WalletError::NotInitialized)
        );
        assert_eq!(
            registry.has_wallet(ChainType::Ethereum).await,
            Err(WalletError::NotInitialized)
        );

        registry.initialize().await.unwrap();
        registry.initialize().await.unwrap();
        assert_eq!(registry.has_wallet(ChainType::Ethereum).await, Ok(false));
    }

    #[tokio::test]
    async fn import_persists_under_chain_key() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone()).await;

        let address = registry
            .import_wallet(ChainType::Binance, HARDHAT_KEY)
            .await
            .unwrap();
        assert_eq!(address, "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

        let stored = store.get("wallet_binance").await.unwrap().unwrap();
        assert_eq!(stored.expose_secret(), HARDHAT_KEY);
    }

    #[tokio::test]
    async fn initialize_restores_and_skips_corrupt_entries() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("wallet_ethereum", SecretString::from(HARDHAT_KEY.to_string()))
            .await
            .unwrap();
        store
            .set("wallet_solana", SecretString::from("garbage".to_string()))
            .await
            .unwrap();

        let registry = registry_with(store).await;
        assert_eq!(
            registry.get_address(ChainType::Ethereum).await.unwrap().as_deref(),
            Some("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
        assert!(!registry.has_wallet(ChainType::Solana).await.unwrap());
    }

    #[tokio::test]
    async fn addresses_follow_chain_order() {
        let registry = registry_with(Arc::new(MemoryStore::new())).await;
        let sol = registry.create_wallet(ChainType::Solana).await.unwrap();
        let eth = registry.create_wallet(ChainType::Ethereum).await.unwrap();

        let addresses = registry.addresses().await.unwrap();
        assert_eq!(
            addresses,
            vec![(ChainType::Ethereum, eth), (ChainType::Solana, sol)]
        );

        let summaries = registry.summaries().await.unwrap();
        assert_eq!(summaries[1].native_symbol, "SOL");
        assert_eq!(summaries[1].default_network, NetworkId::from("mainnet-beta"));
    }

    #[tokio::test]
    async fn unregistered_network_is_provider_unavailable() {
        let registry = registry_with(Arc::new(MemoryStore::new())).await;
        registry.create_wallet(ChainType::Polygon).await.unwrap();

        let err = registry
            .get_balance(ChainType::Polygon, &NetworkId::from("amoy"))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::ProviderUnavailable { .. }));

        let err = registry
            .get_token_balances(ChainType::Polygon, &NetworkId::from("amoy"))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn sign_message_uses_active_wallet() {
        let registry = registry_with(Arc::new(MemoryStore::new())).await;
        assert_eq!(
            registry.sign_message(ChainType::Ethereum, b"hi").await,
            Err(WalletError::WalletNotFound(ChainType::Ethereum))
        );

        registry
            .import_wallet(ChainType::Ethereum, HARDHAT_KEY)
            .await
            .unwrap();
        let signature = registry
            .sign_message(ChainType::Ethereum, b"hi")
            .await
            .unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 2 + 130);
    }
}
