//! External chain clients
//!
//! The registry talks to chains only through [`ChainClient`] and
//! [`TokenIndexer`]. Clients are bound to one `(ChainType, NetworkId)` pair
//! each and collected into a [`ClientTable`] that is fixed once built.

pub mod alchemy;
pub mod evm;
pub mod solana;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::types::{Token, Transaction};
use crate::chain::{Amount, ChainFamily, ChainType, NetworkId};
use crate::config_store::{expand_env_placeholders, WalletConfig};
use crate::crypto::WalletKeyPair;
use crate::errors::{WalletError, WalletResult};

pub use alchemy::AlchemyIndexer;
pub use evm::EvmRpcClient;
pub use solana::SolanaRpcClient;

/// Native-currency operations against one network.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn native_balance(&self, address: &str) -> WalletResult<Amount>;

    /// Sign and submit a native transfer, returning the transaction hash.
    async fn send_native(
        &self,
        key: &WalletKeyPair,
        to: &str,
        amount: Amount,
    ) -> WalletResult<String>;
}

/// Raw token position as returned by an indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolding {
    pub contract_address: String,
    /// `0x`-hex base units.
    pub raw_balance: String,
}

/// Token and transfer lookups for one network.
#[async_trait]
pub trait TokenIndexer: Send + Sync {
    async fn token_balances(&self, owner: &str) -> WalletResult<Vec<TokenHolding>>;
    async fn token_metadata(&self, contract_address: &str) -> WalletResult<Token>;
    /// Transfers in and out of `owner`, newest first.
    async fn transfers(&self, owner: &str) -> WalletResult<Vec<Transaction>>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 over HTTP POST.
pub struct JsonRpcTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(url: impl Into<String>) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> WalletResult<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        log::debug!("rpc -> {} (id {})", method, request.id);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| WalletError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(WalletError::NetworkError(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| WalletError::InvalidResponse(format!("No result for {}", method)))
    }
}

/// Clients bound to one chain/network pair.
#[derive(Clone)]
pub struct ChainClients {
    pub rpc: Arc<dyn ChainClient>,
    pub indexer: Option<Arc<dyn TokenIndexer>>,
}

/// Fixed mapping from `(ChainType, NetworkId)` to its clients.
#[derive(Clone, Default)]
pub struct ClientTable {
    clients: HashMap<(ChainType, NetworkId), ChainClients>,
}

impl ClientTable {
    pub fn builder() -> ClientTableBuilder {
        ClientTableBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build HTTP clients for every endpoint in the configuration.
    ///
    /// Endpoints whose URL references an unset environment variable are
    /// skipped with a warning, leaving that pair unavailable.
    pub fn from_config(config: &WalletConfig) -> WalletResult<Self> {
        let mut builder = ClientTableBuilder::default();

        for endpoint in &config.endpoints {
            let descriptor = endpoint
                .chain
                .find_network(endpoint.network.as_str())
                .ok_or_else(|| {
                    WalletError::UnsupportedChain(format!(
                        "{} has no network {}",
                        endpoint.chain, endpoint.network
                    ))
                })?;

            let rpc_url = match expand_env_placeholders(&endpoint.rpc_url) {
                Ok(url) => url,
                Err(err) => {
                    log::warn!(
                        "Skipping {} / {} endpoint: {}",
                        endpoint.chain,
                        endpoint.network,
                        err
                    );
                    continue;
                }
            };

            let rpc: Arc<dyn ChainClient> = match (endpoint.chain.family(), descriptor.evm_chain_id())
            {
                (ChainFamily::Evm, Some(chain_id)) => {
                    Arc::new(EvmRpcClient::new(&rpc_url, endpoint.chain, chain_id)?)
                }
                (ChainFamily::Solana, None) => Arc::new(SolanaRpcClient::new(&rpc_url)?),
                _ => {
                    return Err(WalletError::UnsupportedChain(format!(
                        "{} / {} has no usable network reference",
                        endpoint.chain, endpoint.network
                    )))
                }
            };
            builder = builder.register(endpoint.chain, endpoint.network.clone(), rpc)?;

            if let Some(indexer_url) = &endpoint.indexer_url {
                match expand_env_placeholders(indexer_url) {
                    Ok(url) => {
                        let indexer = AlchemyIndexer::new(&url, endpoint.chain, endpoint.network.clone())?;
                        builder = builder.with_indexer(
                            endpoint.chain,
                            endpoint.network.clone(),
                            Arc::new(indexer),
                        )?;
                    }
                    Err(err) => log::warn!(
                        "No indexer for {} / {}: {}",
                        endpoint.chain,
                        endpoint.network,
                        err
                    ),
                }
            }
        }

        let table = builder.build();
        log::info!("Configured {} chain clients", table.len());
        Ok(table)
    }

    pub fn get(&self, chain: ChainType, network: &NetworkId) -> WalletResult<&ChainClients> {
        self.clients
            .get(&(chain, network.clone()))
            .ok_or_else(|| WalletError::ProviderUnavailable {
                chain,
                network: network.clone(),
            })
    }

    pub fn rpc(&self, chain: ChainType, network: &NetworkId) -> WalletResult<Arc<dyn ChainClient>> {
        Ok(self.get(chain, network)?.rpc.clone())
    }

    /// Indexer for a configured pair; `Ok(None)` when the pair has no indexing integration.
    pub fn indexer(
        &self,
        chain: ChainType,
        network: &NetworkId,
    ) -> WalletResult<Option<Arc<dyn TokenIndexer>>> {
        Ok(self.get(chain, network)?.indexer.clone())
    }

    pub fn contains(&self, chain: ChainType, network: &NetworkId) -> bool {
        self.clients.contains_key(&(chain, network.clone()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Builder that validates pairs against the chain's network table.
#[derive(Default)]
pub struct ClientTableBuilder {
    clients: HashMap<(ChainType, NetworkId), ChainClients>,
}

impl ClientTableBuilder {
    pub fn register(
        mut self,
        chain: ChainType,
        network: impl Into<NetworkId>,
        rpc: Arc<dyn ChainClient>,
    ) -> WalletResult<Self> {
        let network = Self::checked_network(chain, network.into())?;
        self.clients
            .insert((chain, network), ChainClients { rpc, indexer: None });
        Ok(self)
    }

    /// Attach an indexer to an already registered pair.
    pub fn with_indexer(
        mut self,
        chain: ChainType,
        network: impl Into<NetworkId>,
        indexer: Arc<dyn TokenIndexer>,
    ) -> WalletResult<Self> {
        let network = Self::checked_network(chain, network.into())?;
        let entry = self
            .clients
            .get_mut(&(chain, network.clone()))
            .ok_or(WalletError::ProviderUnavailable { chain, network })?;
        entry.indexer = Some(indexer);
        Ok(self)
    }

    pub fn build(self) -> ClientTable {
        ClientTable {
            clients: self.clients,
        }
    }

    fn checked_network(chain: ChainType, network: NetworkId) -> WalletResult<NetworkId> {
        if chain.find_network(network.as_str()).is_none() {
            return Err(WalletError::UnsupportedChain(format!(
                "{} has no network {}",
                chain, network
            )));
        }
        Ok(network)
    }
}
