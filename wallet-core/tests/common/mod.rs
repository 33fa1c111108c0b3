#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use multichain_wallet_lib::bridge::protocol::{
    PairingTransport, PairingUri, ProtocolError, RequestResponse, SessionApproval,
    SessionProposal, SessionRequest, SessionRequestParams, RpcCall,
};
use multichain_wallet_lib::crypto::WalletKeyPair;
use multichain_wallet_lib::{
    Amount, ApprovalGate, ApprovalRequest, ChainClient, ChainType, ClientTable, MemoryStore,
    NetworkId, SessionBridge, SessionManager, Token, TokenHolding, TokenIndexer, Transaction,
    TransactionStatus, WalletRegistry, WalletResult,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

pub const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const HARDHAT_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const DAPP_ORIGIN: &str = "https://dapp.example";

/// Chain client that answers from memory and records every call.
pub struct RecordingClient {
    balance: Amount,
    balance_calls: AtomicUsize,
    sends: Mutex<Vec<(String, String)>>,
}

impl RecordingClient {
    pub fn new(balance: Amount) -> Self {
        Self {
            balance,
            balance_calls: AtomicUsize::new(0),
            sends: Mutex::new(Vec::new()),
        }
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    /// `(to, decimal amount)` of every submitted transfer.
    pub fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().clone()
    }

    pub fn external_calls(&self) -> usize {
        self.balance_calls() + self.sends.lock().len()
    }
}

#[async_trait]
impl ChainClient for RecordingClient {
    async fn native_balance(&self, _address: &str) -> WalletResult<Amount> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.balance)
    }

    async fn send_native(
        &self,
        _key: &WalletKeyPair,
        to: &str,
        amount: Amount,
    ) -> WalletResult<String> {
        let mut sends = self.sends.lock();
        sends.push((to.to_string(), amount.as_string()));
        Ok(format!("0xhash{}", sends.len()))
    }
}

/// Indexer serving fixed holdings, token metadata and transfers.
#[derive(Default)]
pub struct StaticIndexer {
    pub holdings: Vec<TokenHolding>,
    pub tokens: HashMap<String, Token>,
    pub transfers: Vec<Transaction>,
    pub metadata_calls: AtomicUsize,
}

impl StaticIndexer {
    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenIndexer for StaticIndexer {
    async fn token_balances(&self, _owner: &str) -> WalletResult<Vec<TokenHolding>> {
        Ok(self.holdings.clone())
    }

    async fn token_metadata(&self, contract_address: &str) -> WalletResult<Token> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .get(contract_address)
            .cloned()
            .ok_or_else(|| multichain_wallet_lib::WalletError::NotFound(contract_address.into()))
    }

    async fn transfers(&self, _owner: &str) -> WalletResult<Vec<Transaction>> {
        Ok(self.transfers.clone())
    }
}

/// Pairing handler that records what the bridge hands it.
#[derive(Default)]
pub struct RecordingTransport {
    pub paired: Mutex<Vec<PairingUri>>,
    pub approvals: Mutex<Vec<SessionApproval>>,
    pub rejections: Mutex<Vec<(u64, ProtocolError)>>,
    pub responses: Mutex<Vec<RequestResponse>>,
    pub disconnects: Mutex<Vec<(String, ProtocolError)>>,
}

#[async_trait]
impl PairingTransport for RecordingTransport {
    async fn pair(&self, uri: &PairingUri) -> WalletResult<()> {
        self.paired.lock().push(uri.clone());
        Ok(())
    }

    async fn approve_session(&self, approval: &SessionApproval) -> WalletResult<String> {
        self.approvals.lock().push(approval.clone());
        Ok(format!("topic-{}", approval.id))
    }

    async fn reject_session(&self, proposal_id: u64, error: &ProtocolError) -> WalletResult<()> {
        self.rejections.lock().push((proposal_id, error.clone()));
        Ok(())
    }

    async fn respond(&self, response: &RequestResponse) -> WalletResult<()> {
        self.responses.lock().push(response.clone());
        Ok(())
    }

    async fn disconnect(&self, topic: &str, error: &ProtocolError) -> WalletResult<()> {
        self.disconnects.lock().push((topic.to_string(), error.clone()));
        Ok(())
    }
}

/// Answer every prompt raised after this call with `policy`, recording what
/// was asked.
pub fn answer_prompts<F>(gate: &ApprovalGate, policy: F) -> Arc<Mutex<Vec<ApprovalRequest>>>
where
    F: Fn(&ApprovalRequest) -> bool + Send + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut events = gate.subscribe();
    let responder = gate.clone();
    let log = seen.clone();
    tokio::spawn(async move {
        while let Ok(request) = events.recv().await {
            let approved = policy(&request);
            log.lock().push(request.clone());
            let _ = responder.resolve(request.id, approved);
        }
    });
    seen
}

pub fn eth(amount: &str) -> Amount {
    Amount::from_decimal_str(amount, 18).unwrap()
}

/// Registry over a memory store with one recording client on Ethereum
/// mainnet and Sepolia, Polygon mainnet and Solana devnet.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub client: Arc<RecordingClient>,
    pub registry: Arc<WalletRegistry>,
    pub transport: Arc<RecordingTransport>,
    pub bridge: SessionBridge,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_table(|client| {
            ClientTable::builder()
                .register(ChainType::Ethereum, "mainnet", client.clone())
                .unwrap()
                .register(ChainType::Ethereum, "sepolia", client.clone())
                .unwrap()
                .register(ChainType::Polygon, "mainnet", client.clone())
                .unwrap()
                .register(ChainType::Solana, "devnet", client)
                .unwrap()
                .build()
        })
        .await
    }

    pub async fn with_table<F>(build: F) -> Self
    where
        F: FnOnce(Arc<dyn ChainClient>) -> ClientTable,
    {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(RecordingClient::new(eth("1.5")));
        let table = build(client.clone());
        let registry = Arc::new(WalletRegistry::new(store.clone(), table).unwrap());
        registry.initialize().await.unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let bridge = SessionBridge::new(
            registry.clone(),
            ApprovalGate::new(),
            SessionManager::default(),
            transport.clone(),
        );

        Self {
            store,
            client,
            registry,
            transport,
            bridge,
        }
    }

    pub fn gate(&self) -> &ApprovalGate {
        self.bridge.gate()
    }
}

/// Proposal requiring `chains`, each grouped under its CAIP-2 namespace.
pub fn proposal(id: u64, chains: &[&str], methods: &[&str]) -> SessionProposal {
    let mut required = serde_json::Map::new();
    for chain in chains {
        let namespace = chain.split(':').next().unwrap_or(chain).to_string();
        let entry = required.entry(namespace).or_insert_with(|| {
            json!({
                "chains": [],
                "methods": methods,
                "events": ["accountsChanged", "chainChanged"]
            })
        });
        entry["chains"].as_array_mut().unwrap().push(json!(chain));
    }

    serde_json::from_value(json!({
        "id": id,
        "params": {
            "proposer": {
                "publicKey": "a3ad5e26070ddb2809200c6f56e739333512015bceeadbb8ea1731c4c7ddb207",
                "metadata": {
                    "name": "Demo dApp",
                    "description": "Test dApp",
                    "url": DAPP_ORIGIN,
                    "icons": []
                }
            },
            "requiredNamespaces": required
        }
    }))
    .unwrap()
}

pub fn request(id: u64, topic: &str, chain_id: &str, method: &str, params: Value) -> SessionRequest {
    SessionRequest {
        id,
        topic: topic.to_string(),
        params: SessionRequestParams {
            request: RpcCall {
                method: method.to_string(),
                params,
            },
            chain_id: chain_id.to_string(),
        },
    }
}

pub fn transfer(chain: ChainType, network: &str, to: &str, value: &str) -> Transaction {
    Transaction {
        hash: format!("0x{}", to.len()),
        from: HARDHAT_ADDRESS.to_string(),
        to: to.to_string(),
        value: value.to_string(),
        asset: chain.native_symbol().to_string(),
        timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        status: TransactionStatus::Confirmed,
        chain,
        network: NetworkId::from(network),
    }
}
