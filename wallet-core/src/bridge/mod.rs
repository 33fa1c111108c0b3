//! dApp session bridge
//!
//! Turns session proposals and requests from remote dApps (through a
//! [`PairingTransport`]) and EIP-1193 messages from embedded pages into
//! registry calls. Anything that discloses an address or moves funds waits on
//! the [`ApprovalGate`]; every request is answered, including failures, which
//! carry the EIP-1193 code of the underlying [`WalletError`].

pub mod methods;
pub mod protocol;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::approval::{ApprovalAction, ApprovalGate};
use crate::chain::{ChainFamily, ChainType, NetworkDescriptor, NetworkId};
use crate::errors::{WalletError, WalletResult};
use crate::registry::WalletRegistry;
use crate::session::{ProposalState, SessionManager};

use methods::{classify, is_supported_on, parse_signing, parse_transfer, supported_methods, MethodKind};
use protocol::{
    account_address, account_id, caip2_namespace, parse_caip2, reasons, PageMessage,
    PageResponse, PairingTransport, PairingUri, ProtocolError, RequestResponse, RpcCall,
    RpcResponse, SessionApproval, SessionNamespace, SessionProposal, SessionRequest,
};

/// Where a request came from and which chain it targets.
struct RequestContext<'a> {
    origin: &'a str,
    chain: ChainType,
    network: &'static NetworkDescriptor,
}

pub struct SessionBridge {
    registry: Arc<WalletRegistry>,
    gate: ApprovalGate,
    sessions: SessionManager,
    transport: Arc<dyn PairingTransport>,
    /// Embedded-page origins allowed to see the address of a chain.
    page_connections: RwLock<HashSet<(String, ChainType)>>,
}

impl SessionBridge {
    pub fn new(
        registry: Arc<WalletRegistry>,
        gate: ApprovalGate,
        sessions: SessionManager,
        transport: Arc<dyn PairingTransport>,
    ) -> Self {
        Self {
            registry,
            gate,
            sessions,
            transport,
            page_connections: RwLock::new(HashSet::new()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    /// Parse a `wc:` URI and hand it to the pairing handler.
    pub async fn pair(&self, uri: &str) -> WalletResult<PairingUri> {
        let parsed = PairingUri::parse(uri)?;
        self.transport.pair(&parsed).await?;
        log::info!("Paired with topic {}", parsed.topic);
        Ok(parsed)
    }

    /// Evaluate a new proposal. Returns the state it ends in.
    pub async fn on_session_proposal(
        &self,
        proposal: SessionProposal,
    ) -> WalletResult<ProposalState> {
        match self.sessions.record_proposal(proposal.clone()) {
            ProposalState::Proposed | ProposalState::AwaitingWalletCreation { .. } => {
                self.evaluate_proposal(proposal).await
            }
            settled => {
                log::debug!("Ignoring repeated proposal {} ({:?})", proposal.id, settled);
                Ok(settled)
            }
        }
    }

    /// Re-run a proposal parked for lack of a wallet.
    pub async fn retry_proposal(&self, id: u64) -> WalletResult<ProposalState> {
        let record = self
            .sessions
            .proposal(id)
            .ok_or_else(|| WalletError::NotFound(format!("session proposal {}", id)))?;
        match record.state {
            ProposalState::Proposed | ProposalState::AwaitingWalletCreation { .. } => {
                self.evaluate_proposal(record.proposal).await
            }
            settled => Ok(settled),
        }
    }

    async fn evaluate_proposal(&self, proposal: SessionProposal) -> WalletResult<ProposalState> {
        let chains = match resolve_chains(&proposal) {
            Ok(chains) => chains,
            Err(reason) => {
                log::warn!("Rejecting proposal {}: {}", proposal.id, reason);
                self.transport
                    .reject_session(
                        proposal.id,
                        &ProtocolError::new(reasons::UNSUPPORTED_CHAINS, reason),
                    )
                    .await?;
                self.sessions
                    .set_proposal_state(proposal.id, ProposalState::Rejected)?;
                return Ok(ProposalState::Rejected);
            }
        };

        for (chain, _, _) in &chains {
            if !self.registry.has_wallet(*chain).await? {
                let parked = ProposalState::AwaitingWalletCreation { chain: *chain };
                log::info!(
                    "Proposal {} waits for a {} wallet",
                    proposal.id,
                    chain
                );
                self.sessions.set_proposal_state(proposal.id, parked.clone())?;
                return Ok(parked);
            }
        }

        self.sessions
            .set_proposal_state(proposal.id, ProposalState::AwaitingUserApproval)?;
        let metadata = proposal.params.proposer.metadata.clone();
        let pending = self.gate.propose(ApprovalAction::ConnectSession {
            origin: metadata.url.clone(),
            proposer: metadata.name.clone(),
            chains: chains.iter().map(|(_, _, caip2)| caip2.clone()).collect(),
        });

        if let Err(err) = pending.decision().await {
            self.transport
                .reject_session(
                    proposal.id,
                    &ProtocolError::new(reasons::USER_REJECTED, err.to_string()),
                )
                .await?;
            self.sessions
                .set_proposal_state(proposal.id, ProposalState::Rejected)?;
            return Ok(ProposalState::Rejected);
        }

        let mut namespaces = BTreeMap::new();
        for (chain, network, _) in &chains {
            let address = self
                .registry
                .get_address(*chain)
                .await?
                .ok_or(WalletError::WalletNotFound(*chain))?;
            let key = caip2_namespace(*chain);
            let namespace = namespaces
                .entry(key.to_string())
                .or_insert_with(|| granted_namespace(&proposal, key, chain.family()));
            let account = account_id(network, &address);
            if !namespace.accounts.contains(&account) {
                namespace.accounts.push(account);
            }
        }

        let approval = SessionApproval {
            id: proposal.id,
            namespaces: namespaces.clone(),
        };
        let topic = match self.transport.approve_session(&approval).await {
            Ok(topic) => topic,
            Err(err) => {
                self.sessions
                    .set_proposal_state(proposal.id, ProposalState::Proposed)?;
                return Err(err);
            }
        };

        self.sessions
            .activate(topic.clone(), proposal.id, metadata, namespaces);
        Ok(ProposalState::Approved { topic })
    }

    /// Serve a request on an approved session. The response, success or
    /// failure, is relayed to the pairing handler and returned.
    pub async fn on_session_request(
        &self,
        request: SessionRequest,
    ) -> WalletResult<RequestResponse> {
        let outcome = self.dispatch_session_request(&request).await;
        if let Err(err) = &outcome {
            log::info!(
                "Session request {} ({}) failed: {}",
                request.id,
                request.params.request.method,
                err
            );
        }

        let response = RequestResponse {
            topic: request.topic.clone(),
            response: RpcResponse::from_result(json!(request.id), &outcome),
        };
        self.transport.respond(&response).await?;
        Ok(response)
    }

    async fn dispatch_session_request(&self, request: &SessionRequest) -> WalletResult<Value> {
        let session = self.sessions.session(&request.topic)?;
        let call = &request.params.request;
        if matches!(classify(&call.method), MethodKind::Unsupported) {
            return Err(WalletError::UnsupportedMethod(call.method.clone()));
        }

        let chain_id = &request.params.chain_id;
        if !session.allows_chain(chain_id) {
            return Err(WalletError::UnsupportedChain(format!(
                "{} is not part of session {}",
                chain_id, session.topic
            )));
        }
        let (chain, network) = parse_caip2(chain_id)?;
        let kind = supported_kind(&call.method, chain)?;
        if !session.allows_method(&call.method) {
            return Err(WalletError::Unauthorized(format!(
                "{} was not granted to this session",
                call.method
            )));
        }

        let addresses: Vec<String> = session
            .accounts_on(chain_id)
            .iter()
            .filter_map(|account| account_address(account).map(str::to_string))
            .collect();
        self.ensure_current_accounts(&session.topic, chain, &addresses)
            .await?;

        let ctx = RequestContext {
            origin: session.origin(),
            chain,
            network,
        };
        match kind {
            MethodKind::AccountDisclosure => Ok(accounts_result(chain, &addresses)),
            _ => self.serve(&ctx, kind, call).await,
        }
    }

    /// A session may only speak for the wallet the registry holds now. If the
    /// chain's wallet was replaced or removed since approval, the session is
    /// closed and the peer told its accounts are gone.
    async fn ensure_current_accounts(
        &self,
        topic: &str,
        chain: ChainType,
        granted: &[String],
    ) -> WalletResult<()> {
        if let Some(current) = self.registry.get_address(chain).await? {
            if granted.iter().any(|a| same_address(chain, a, &current)) {
                return Ok(());
            }
        }

        log::warn!(
            "Closing session {}: its {} account is no longer the active wallet",
            topic,
            chain
        );
        if self.sessions.close(topic) {
            self.transport
                .disconnect(
                    topic,
                    &ProtocolError::new(
                        reasons::UNSUPPORTED_ACCOUNTS,
                        format!("The {} account of this session was replaced", chain),
                    ),
                )
                .await?;
        }
        Err(WalletError::Unauthorized(format!(
            "Session {} no longer holds the active {} account",
            topic, chain
        )))
    }

    /// Close a session from the wallet side and tell the peer.
    pub async fn disconnect(&self, topic: &str) -> WalletResult<()> {
        if !self.sessions.close(topic) {
            log::debug!("Disconnect for inactive session {}", topic);
            return Ok(());
        }
        self.transport
            .disconnect(
                topic,
                &ProtocolError::new(reasons::USER_DISCONNECTED, "User disconnected"),
            )
            .await
    }

    /// The peer ended the session.
    pub fn on_session_delete(&self, topic: &str) {
        self.sessions.close(topic);
    }

    /// Serve an EIP-1193 request from an embedded page.
    pub async fn handle_page_message(
        &self,
        origin: &str,
        chain: ChainType,
        network: &NetworkId,
        message: PageMessage,
    ) -> PageResponse {
        let outcome = self
            .dispatch_page_message(origin, chain, network, &message)
            .await;
        if let Err(err) = &outcome {
            log::info!("Page request {} from {} failed: {}", message.method, origin, err);
        }
        RpcResponse::from_result(message.id.clone(), &outcome)
    }

    async fn dispatch_page_message(
        &self,
        origin: &str,
        chain: ChainType,
        network: &NetworkId,
        message: &PageMessage,
    ) -> WalletResult<Value> {
        let network = chain.find_network(network.as_str()).ok_or_else(|| {
            WalletError::UnsupportedChain(format!("{} {}", chain, network))
        })?;
        let kind = supported_kind(&message.method, chain)?;
        let ctx = RequestContext {
            origin,
            chain,
            network,
        };
        let call = RpcCall {
            method: message.method.clone(),
            params: message.params.clone(),
        };

        match kind {
            MethodKind::AccountDisclosure => {
                let requesting = matches!(
                    message.method.as_str(),
                    "eth_requestAccounts" | "solana_requestAccounts"
                );
                if !self.is_page_connected(origin, chain) {
                    if !requesting {
                        return Ok(accounts_result(chain, &[]));
                    }
                    self.require_wallet(chain).await?;
                    self.gate
                        .propose(ApprovalAction::DiscloseAccounts {
                            origin: origin.to_string(),
                            chain,
                        })
                        .decision()
                        .await?;
                    self.page_connections
                        .write()
                        .insert((origin.to_string(), chain));
                    log::info!("{} connected to the {} wallet", origin, chain);
                }
                let address = self.require_wallet(chain).await?;
                Ok(accounts_result(chain, &[address]))
            }
            MethodKind::ChainInfo => self.serve(&ctx, kind, &call).await,
            _ => {
                if !self.is_page_connected(origin, chain) {
                    return Err(WalletError::Unauthorized(format!(
                        "{} has not been granted access",
                        origin
                    )));
                }
                self.serve(&ctx, kind, &call).await
            }
        }
    }

    pub fn is_page_connected(&self, origin: &str, chain: ChainType) -> bool {
        self.page_connections
            .read()
            .contains(&(origin.to_string(), chain))
    }

    /// Forget every page connection of `origin`.
    pub fn disconnect_page(&self, origin: &str) {
        self.page_connections.write().retain(|(o, _)| o != origin);
    }

    async fn serve(
        &self,
        ctx: &RequestContext<'_>,
        kind: MethodKind,
        call: &RpcCall,
    ) -> WalletResult<Value> {
        match kind {
            MethodKind::ChainInfo => chain_info(&call.method, ctx.network),
            MethodKind::Transaction => self.send_transaction(ctx, &call.params).await,
            MethodKind::Signing => self.sign_message(ctx, &call.method, &call.params).await,
            MethodKind::AccountDisclosure | MethodKind::Unsupported => {
                Err(WalletError::UnsupportedMethod(call.method.clone()))
            }
        }
    }

    async fn send_transaction(&self, ctx: &RequestContext<'_>, params: &Value) -> WalletResult<Value> {
        let address = self.require_wallet(ctx.chain).await?;
        let network = ctx.network.network_id();
        if !self.registry.clients().contains(ctx.chain, &network) {
            return Err(WalletError::ProviderUnavailable {
                chain: ctx.chain,
                network,
            });
        }

        let transfer = parse_transfer(ctx.chain, params)?;
        if let Some(from) = &transfer.from {
            if !same_address(ctx.chain, from, &address) {
                return Err(WalletError::Unauthorized(format!(
                    "{} is not the active {} account",
                    from, ctx.chain
                )));
            }
        }

        let value = transfer.value.as_string();
        self.registry
            .validate_transfer(ctx.chain, &transfer.to, &value)?;
        self.gate
            .propose(ApprovalAction::SendTransaction {
                origin: ctx.origin.to_string(),
                chain: ctx.chain,
                network: network.clone(),
                to: transfer.to.clone(),
                value: value.clone(),
            })
            .decision()
            .await?;

        let transaction = self
            .registry
            .send_transaction(ctx.chain, &network, &transfer.to, &value)
            .await?;
        Ok(json!(transaction.hash))
    }

    async fn sign_message(
        &self,
        ctx: &RequestContext<'_>,
        method: &str,
        params: &Value,
    ) -> WalletResult<Value> {
        let address = self.require_wallet(ctx.chain).await?;
        let request = parse_signing(method, params)?;
        if let Some(signer) = &request.address {
            if !same_address(ctx.chain, signer, &address) {
                return Err(WalletError::Unauthorized(format!(
                    "{} is not the active {} account",
                    signer, ctx.chain
                )));
            }
        }

        self.gate
            .propose(ApprovalAction::SignMessage {
                origin: ctx.origin.to_string(),
                chain: ctx.chain,
                message: request.preview(),
            })
            .decision()
            .await?;

        let signature = self.registry.sign_message(ctx.chain, &request.message).await?;
        Ok(match ctx.chain.family() {
            ChainFamily::Evm => json!(signature),
            ChainFamily::Solana => json!({ "signature": signature }),
        })
    }

    async fn require_wallet(&self, chain: ChainType) -> WalletResult<String> {
        self.registry
            .get_address(chain)
            .await?
            .ok_or(WalletError::WalletNotFound(chain))
    }
}

/// Classify `method`, failing with `UnsupportedMethod` unless this wallet
/// serves it on `chain`.
fn supported_kind(method: &str, chain: ChainType) -> WalletResult<MethodKind> {
    match classify(method) {
        MethodKind::Unsupported => Err(WalletError::UnsupportedMethod(method.to_string())),
        _ if !is_supported_on(method, chain) => {
            Err(WalletError::UnsupportedMethod(method.to_string()))
        }
        kind => Ok(kind),
    }
}

/// Resolve the chains a proposal needs. Falls back to the supported optional
/// chains when nothing is required.
fn resolve_chains(
    proposal: &SessionProposal,
) -> Result<Vec<(ChainType, &'static NetworkDescriptor, String)>, String> {
    for key in proposal.params.required_namespaces.keys() {
        let namespace = key.split(':').next().unwrap_or(key);
        if namespace != "eip155" && namespace != "solana" {
            return Err(format!("Unsupported namespace {}", key));
        }
    }

    let mut resolved = Vec::new();
    let required = proposal.required_chains();
    if required.is_empty() {
        for namespace in proposal.params.optional_namespaces.values() {
            for chain_id in &namespace.chains {
                if let Ok((chain, network)) = parse_caip2(chain_id) {
                    resolved.push((chain, network, chain_id.clone()));
                }
            }
        }
    } else {
        let mut unsupported = Vec::new();
        for chain_id in required {
            match parse_caip2(&chain_id) {
                Ok((chain, network)) => resolved.push((chain, network, chain_id)),
                Err(_) => unsupported.push(chain_id),
            }
        }
        if !unsupported.is_empty() {
            return Err(format!("Unsupported chains: {}", unsupported.join(", ")));
        }
    }

    let mut seen = HashSet::new();
    resolved.retain(|(_, _, chain_id)| seen.insert(chain_id.clone()));
    if resolved.is_empty() {
        return Err("No supported chains requested".to_string());
    }
    Ok(resolved)
}

/// Methods and events granted under `key`: what the dApp asked for, limited
/// to the methods served for `family`.
fn granted_namespace(proposal: &SessionProposal, key: &str, family: ChainFamily) -> SessionNamespace {
    let scoped = format!("{}:", key);
    let requested = proposal
        .params
        .required_namespaces
        .iter()
        .chain(proposal.params.optional_namespaces.iter())
        .filter(|(name, _)| name.as_str() == key || name.starts_with(&scoped))
        .map(|(_, namespace)| namespace);

    let mut granted = SessionNamespace::default();
    for namespace in requested {
        for method in &namespace.methods {
            if supported_methods(family).contains(&method.as_str())
                && !granted.methods.contains(method)
            {
                granted.methods.push(method.clone());
            }
        }
        for event in &namespace.events {
            if !granted.events.contains(event) {
                granted.events.push(event.clone());
            }
        }
    }
    granted
}

fn accounts_result(chain: ChainType, addresses: &[String]) -> Value {
    match chain.family() {
        ChainFamily::Evm => json!(addresses),
        ChainFamily::Solana => Value::Array(
            addresses
                .iter()
                .map(|address| json!({ "pubkey": address }))
                .collect(),
        ),
    }
}

fn chain_info(method: &str, network: &NetworkDescriptor) -> WalletResult<Value> {
    let chain_id = network
        .evm_chain_id()
        .ok_or_else(|| WalletError::UnsupportedMethod(method.to_string()))?;
    match method {
        "eth_chainId" => Ok(json!(format!("0x{:x}", chain_id))),
        "net_version" => Ok(json!(chain_id.to_string())),
        other => Err(WalletError::UnsupportedMethod(other.to_string())),
    }
}

/// EVM addresses compare case-insensitively; base58 is case-sensitive.
fn same_address(chain: ChainType, a: &str, b: &str) -> bool {
    match chain.family() {
        ChainFamily::Evm => a.eq_ignore_ascii_case(b),
        ChainFamily::Solana => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{PeerMetadata, ProposalNamespace, ProposalParams, Proposer};

    fn proposal(required: Vec<(&str, Vec<&str>, Vec<&str>)>) -> SessionProposal {
        let required_namespaces = required
            .into_iter()
            .map(|(key, chains, methods)| {
                (
                    key.to_string(),
                    ProposalNamespace {
                        chains: chains.iter().map(|c| c.to_string()).collect(),
                        methods: methods.iter().map(|m| m.to_string()).collect(),
                        events: vec!["accountsChanged".to_string()],
                    },
                )
            })
            .collect();
        SessionProposal {
            id: 1,
            params: ProposalParams {
                proposer: Proposer {
                    public_key: None,
                    metadata: PeerMetadata::default(),
                },
                required_namespaces,
                optional_namespaces: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn resolves_required_chains() {
        let p = proposal(vec![("eip155", vec!["eip155:1", "eip155:56"], vec![])]);
        let chains = resolve_chains(&p).unwrap();
        let resolved: Vec<ChainType> = chains.iter().map(|(c, _, _)| *c).collect();
        assert_eq!(resolved, vec![ChainType::Ethereum, ChainType::Binance]);
    }

    #[test]
    fn unknown_namespaces_and_chains_are_refused() {
        let p = proposal(vec![("cosmos", vec!["cosmos:cosmoshub-4"], vec![])]);
        assert!(resolve_chains(&p).unwrap_err().contains("cosmos"));

        let p = proposal(vec![("eip155", vec!["eip155:1", "eip155:10"], vec![])]);
        assert_eq!(resolve_chains(&p).unwrap_err(), "Unsupported chains: eip155:10");

        let p = proposal(vec![]);
        assert!(resolve_chains(&p).is_err());
    }

    #[test]
    fn granted_methods_are_limited_to_supported_ones() {
        let p = proposal(vec![(
            "eip155",
            vec!["eip155:1"],
            vec!["personal_sign", "eth_signTypedData_v4", "eth_sendTransaction"],
        )]);
        let granted = granted_namespace(&p, "eip155", ChainFamily::Evm);
        assert_eq!(granted.methods, vec!["personal_sign", "eth_sendTransaction"]);
        assert_eq!(granted.events, vec!["accountsChanged"]);
        assert!(granted.accounts.is_empty());
    }

    #[test]
    fn chain_info_answers() {
        let polygon = ChainType::Polygon.default_network();
        assert_eq!(chain_info("eth_chainId", polygon).unwrap(), json!("0x89"));
        assert_eq!(chain_info("net_version", polygon).unwrap(), json!("137"));
        assert!(chain_info("eth_chainId", ChainType::Solana.default_network()).is_err());
    }

    #[test]
    fn unsupported_methods_fail_before_dispatch() {
        assert!(matches!(
            supported_kind("eth_signTypedData_v4", ChainType::Ethereum),
            Err(WalletError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            supported_kind("personal_sign", ChainType::Solana),
            Err(WalletError::UnsupportedMethod(_))
        ));
        assert_eq!(
            supported_kind("personal_sign", ChainType::Ethereum).unwrap(),
            MethodKind::Signing
        );
    }

    #[test]
    fn address_comparison_by_family() {
        assert!(same_address(ChainType::Ethereum, "0xABC", "0xabc"));
        assert!(!same_address(ChainType::Solana, "Abc", "abc"));
    }
}
