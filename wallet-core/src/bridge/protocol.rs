//! Wire types exchanged with the pairing handler and embedded pages.
//!
//! Session traffic follows the WalletConnect v2 sign API shapes; page traffic
//! follows EIP-1193 JSON-RPC 2.0. Only the fields the bridge reads or writes
//! are modelled.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::{ChainType, NetworkDescriptor};
use crate::errors::{WalletError, WalletResult};

pub const JSONRPC_VERSION: &str = "2.0";

/// Reason codes sent back to the pairing handler.
pub mod reasons {
    pub const USER_REJECTED: i64 = 5000;
    pub const UNSUPPORTED_CHAINS: i64 = 5100;
    pub const UNSUPPORTED_ACCOUNTS: i64 = 5103;
    pub const USER_DISCONNECTED: i64 = 6000;
}

/// Only sign protocol v2 URIs are accepted.
const SUPPORTED_PAIRING_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposer {
    #[serde(default)]
    pub public_key: Option<String>,
    pub metadata: PeerMetadata,
}

/// Chains, methods and events a dApp asks for under one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalNamespace {
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalParams {
    pub proposer: Proposer,
    #[serde(default)]
    pub required_namespaces: BTreeMap<String, ProposalNamespace>,
    #[serde(default)]
    pub optional_namespaces: BTreeMap<String, ProposalNamespace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProposal {
    pub id: u64,
    pub params: ProposalParams,
}

impl SessionProposal {
    /// Every required CAIP-2 chain, in namespace order.
    ///
    /// A namespace keyed by a full chain id (`eip155:1`) with no `chains`
    /// list stands for that chain alone.
    pub fn required_chains(&self) -> Vec<String> {
        let mut chains = Vec::new();
        for (key, namespace) in &self.params.required_namespaces {
            if namespace.chains.is_empty() && key.contains(':') {
                chains.push(key.clone());
            }
            chains.extend(namespace.chains.iter().cloned());
        }
        chains
    }
}

/// Chain-scoped JSON-RPC call carried by a session request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub request: RpcCall,
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub id: u64,
    pub topic: String,
    pub params: SessionRequestParams,
}

/// Accounts, methods and events granted under one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionApproval {
    pub id: u64,
    pub namespaces: BTreeMap<String, SessionNamespace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&WalletError> for ProtocolError {
    fn from(error: &WalletError) -> Self {
        Self::new(error.rpc_code(), error.to_string())
    }
}

/// JSON-RPC 2.0 result or error envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &WalletError) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(ProtocolError::from(error)),
        }
    }

    pub fn from_result(id: Value, outcome: &WalletResult<Value>) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result.clone()),
            Err(error) => Self::failure(id, error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Answer to a session request, addressed by topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResponse {
    pub topic: String,
    pub response: RpcResponse,
}

/// EIP-1193 request posted by an embedded page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMessage {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

pub type PageResponse = RpcResponse;

/// Parsed `wc:` pairing URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub topic: String,
    pub version: u32,
    pub relay_protocol: String,
    pub sym_key: String,
    pub expiry_timestamp: Option<u64>,
}

impl PairingUri {
    /// Parse `wc:<topic>@<version>?relay-protocol=<p>&symKey=<hex>[&expiryTimestamp=<secs>]`.
    pub fn parse(uri: &str) -> WalletResult<Self> {
        let invalid = |reason: &str| WalletError::ValidationError(format!("Pairing URI {}", reason));

        let rest = uri
            .trim()
            .strip_prefix("wc:")
            .ok_or_else(|| invalid("must start with wc:"))?;
        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| invalid("has no parameters"))?;
        let (topic, version) = path
            .split_once('@')
            .ok_or_else(|| invalid("has no version"))?;

        if topic.is_empty() || !topic.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("has a malformed topic"));
        }
        let version: u32 = version
            .parse()
            .map_err(|_| invalid("has a malformed version"))?;
        if version != SUPPORTED_PAIRING_VERSION {
            return Err(invalid(&format!("version {} is not supported", version)));
        }

        let mut relay_protocol = None;
        let mut sym_key = None;
        let mut expiry_timestamp = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "relay-protocol" => relay_protocol = Some(value.to_string()),
                "symKey" => sym_key = Some(value.to_string()),
                "expiryTimestamp" => {
                    expiry_timestamp = Some(
                        value
                            .parse()
                            .map_err(|_| invalid("has a malformed expiryTimestamp"))?,
                    )
                }
                _ => {}
            }
        }

        let relay_protocol = relay_protocol
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("is missing relay-protocol"))?;
        let sym_key = sym_key.ok_or_else(|| invalid("is missing symKey"))?;
        if sym_key.len() != 64 || hex::decode(&sym_key).is_err() {
            return Err(invalid("has a malformed symKey"));
        }

        Ok(Self {
            topic: topic.to_string(),
            version,
            relay_protocol,
            sym_key,
            expiry_timestamp,
        })
    }
}

/// CAIP-2 namespace of a chain (`eip155` or `solana`).
pub fn caip2_namespace(chain: ChainType) -> &'static str {
    match chain.family() {
        crate::chain::ChainFamily::Evm => "eip155",
        crate::chain::ChainFamily::Solana => "solana",
    }
}

/// Resolve a CAIP-2 chain id to a supported chain and network.
pub fn parse_caip2(chain_id: &str) -> WalletResult<(ChainType, &'static NetworkDescriptor)> {
    let unsupported = || WalletError::UnsupportedChain(chain_id.to_string());
    let (namespace, reference) = chain_id.split_once(':').ok_or_else(unsupported)?;
    match namespace {
        "eip155" => reference
            .parse::<u64>()
            .ok()
            .and_then(ChainType::from_evm_chain_id)
            .ok_or_else(unsupported),
        "solana" => ChainType::from_solana_reference(reference).ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

/// CAIP-10 account id, e.g. `eip155:1:0xabc...`.
pub fn account_id(network: &NetworkDescriptor, address: &str) -> String {
    format!("{}:{}", network.caip2(), address)
}

/// Address part of a CAIP-10 account id.
pub fn account_address(account: &str) -> Option<&str> {
    account.rsplit_once(':').map(|(_, address)| address)
}

/// External pairing handler (relay client). Its own protocol is out of scope;
/// the bridge only hands it decisions and responses.
#[async_trait]
pub trait PairingTransport: Send + Sync {
    async fn pair(&self, uri: &PairingUri) -> WalletResult<()>;

    /// Approve a proposal; returns the topic of the new session.
    async fn approve_session(&self, approval: &SessionApproval) -> WalletResult<String>;

    async fn reject_session(&self, proposal_id: u64, error: &ProtocolError) -> WalletResult<()>;

    async fn respond(&self, response: &RequestResponse) -> WalletResult<()>;

    async fn disconnect(&self, topic: &str, error: &ProtocolError) -> WalletResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SYM_KEY: &str = "587d5484ce2a2a6ee3ba1962fdd7e8588e06200c46823bd18fbd67def96ad303";

    #[test]
    fn parses_pairing_uri() {
        let uri = format!(
            "wc:7f6e504bfad60b485450578e05678ed3e8e8c4751d3c6160be17160d63ec90f9@2\
             ?relay-protocol=irn&symKey={}&expiryTimestamp=1705000000",
            SYM_KEY
        );
        let parsed = PairingUri::parse(&uri).unwrap();
        assert_eq!(
            parsed.topic,
            "7f6e504bfad60b485450578e05678ed3e8e8c4751d3c6160be17160d63ec90f9"
        );
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.relay_protocol, "irn");
        assert_eq!(parsed.sym_key, SYM_KEY);
        assert_eq!(parsed.expiry_timestamp, Some(1_705_000_000));
    }

    #[test]
    fn rejects_malformed_pairing_uris() {
        let cases = [
            "https://example.com".to_string(),
            format!("wc:abcd?relay-protocol=irn&symKey={}", SYM_KEY),
            format!("wc:abcd@1?relay-protocol=irn&symKey={}", SYM_KEY),
            "wc:abcd@2?relay-protocol=irn&symKey=1234".to_string(),
            format!("wc:abcd@2?symKey={}", SYM_KEY),
            format!("wc:@2?relay-protocol=irn&symKey={}", SYM_KEY),
        ];
        for uri in cases {
            assert!(
                matches!(PairingUri::parse(&uri), Err(WalletError::ValidationError(_))),
                "{}",
                uri
            );
        }
    }

    #[test]
    fn caip2_resolution() {
        let (chain, network) = parse_caip2("eip155:137").unwrap();
        assert_eq!(chain, ChainType::Polygon);
        assert_eq!(network.id, "mainnet");

        let (chain, network) = parse_caip2("solana:EtWTRABZaYq6iMfeYKouRu166VU2xqa1").unwrap();
        assert_eq!(chain, ChainType::Solana);
        assert_eq!(network.id, "devnet");

        assert!(matches!(
            parse_caip2("eip155:10"),
            Err(WalletError::UnsupportedChain(_))
        ));
        assert!(parse_caip2("cosmos:cosmoshub-4").is_err());
        assert!(parse_caip2("eip155").is_err());
    }

    #[test]
    fn account_ids_round_trip_addresses() {
        let network = ChainType::Ethereum.default_network();
        let account = account_id(network, "0xabc");
        assert_eq!(account, "eip155:1:0xabc");
        assert_eq!(account_address(&account), Some("0xabc"));
        assert_eq!(caip2_namespace(ChainType::Binance), "eip155");
    }

    #[test]
    fn proposal_lists_required_chains() {
        let proposal: SessionProposal = serde_json::from_value(json!({
            "id": 1,
            "params": {
                "proposer": { "metadata": { "name": "Demo", "url": "https://demo.app" } },
                "requiredNamespaces": {
                    "eip155": { "chains": ["eip155:1", "eip155:137"], "methods": ["personal_sign"], "events": [] },
                    "eip155:56": { "methods": ["eth_sendTransaction"] }
                }
            }
        }))
        .unwrap();

        assert_eq!(
            proposal.required_chains(),
            vec!["eip155:1", "eip155:137", "eip155:56"]
        );
        assert!(proposal.params.optional_namespaces.is_empty());
    }

    #[test]
    fn responses_carry_either_result_or_error() {
        let ok = RpcResponse::success(json!(7), json!("0x1"));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, json!({ "id": 7, "jsonrpc": "2.0", "result": "0x1" }));

        let err = RpcResponse::failure(json!("a"), &WalletError::UserRejected);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"]["code"], 4001);
        assert!(json.get("result").is_none());
    }
}
