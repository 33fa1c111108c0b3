use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::bridge::protocol::{PeerMetadata, SessionNamespace, SessionProposal};
use crate::chain::ChainType;
use crate::errors::{WalletError, WalletResult};

/// Default lifetime of an idle dApp session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lifecycle of a session proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalState {
    Proposed,
    /// Parked until the user creates or imports a wallet for `chain`.
    AwaitingWalletCreation { chain: ChainType },
    AwaitingUserApproval,
    Approved { topic: String },
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ProposalRecord {
    pub proposal: SessionProposal,
    pub state: ProposalState,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Closed,
}

/// Approved connection with a remote dApp.
#[derive(Debug, Clone)]
pub struct Session {
    pub topic: String,
    pub proposal_id: u64,
    pub peer: PeerMetadata,
    pub namespaces: BTreeMap<String, SessionNamespace>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    expires_at: Instant,
}

impl Session {
    /// Origin shown in approval prompts.
    pub fn origin(&self) -> &str {
        if self.peer.url.is_empty() {
            &self.peer.name
        } else {
            &self.peer.url
        }
    }

    /// Approved CAIP-10 accounts on one CAIP-2 chain.
    pub fn accounts_on(&self, chain_id: &str) -> Vec<String> {
        let prefix = format!("{}:", chain_id);
        self.namespaces
            .values()
            .flat_map(|ns| ns.accounts.iter())
            .filter(|account| {
                account
                    .strip_prefix(&prefix)
                    .map(|address| !address.contains(':'))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn allows_chain(&self, chain_id: &str) -> bool {
        !self.accounts_on(chain_id).is_empty()
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.namespaces
            .values()
            .any(|ns| ns.methods.iter().any(|m| m == method))
    }

    fn touch(&mut self, ttl: Duration) {
        self.expires_at = Instant::now() + ttl;
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct SessionState {
    proposals: HashMap<u64, ProposalRecord>,
    sessions: HashMap<String, Session>,
}

/// Tracks session proposals and approved sessions with idle expiry.
#[derive(Debug, Clone)]
pub struct SessionManager {
    state: Arc<RwLock<SessionState>>,
    ttl: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
            ttl,
        }
    }

    pub fn with_ttl_hours(hours: u32) -> Self {
        Self::new(Duration::from_secs(u64::from(hours.max(1)) * 60 * 60))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a freshly received proposal in the `Proposed` state. A proposal
    /// id seen before keeps its recorded state.
    pub fn record_proposal(&self, proposal: SessionProposal) -> ProposalState {
        let mut state = self.state.write();
        state
            .proposals
            .entry(proposal.id)
            .or_insert_with(|| ProposalRecord {
                proposal,
                state: ProposalState::Proposed,
                received_at: Utc::now(),
            })
            .state
            .clone()
    }

    pub fn set_proposal_state(&self, id: u64, next: ProposalState) -> WalletResult<()> {
        let mut state = self.state.write();
        let record = state
            .proposals
            .get_mut(&id)
            .ok_or_else(|| WalletError::NotFound(format!("session proposal {}", id)))?;
        log::debug!("Proposal {}: {:?} -> {:?}", id, record.state, next);
        record.state = next;
        Ok(())
    }

    pub fn proposal(&self, id: u64) -> Option<ProposalRecord> {
        self.state.read().proposals.get(&id).cloned()
    }

    pub fn proposal_state(&self, id: u64) -> Option<ProposalState> {
        self.state.read().proposals.get(&id).map(|r| r.state.clone())
    }

    /// Proposals parked until a wallet exists for `chain`.
    pub fn proposals_awaiting(&self, chain: ChainType) -> Vec<u64> {
        let state = self.state.read();
        let mut ids: Vec<u64> = state
            .proposals
            .values()
            .filter(|r| r.state == ProposalState::AwaitingWalletCreation { chain })
            .map(|r| r.proposal.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Register an approved session and mark its proposal `Approved`.
    pub fn activate(
        &self,
        topic: String,
        proposal_id: u64,
        peer: PeerMetadata,
        namespaces: BTreeMap<String, SessionNamespace>,
    ) -> Session {
        let session = Session {
            topic: topic.clone(),
            proposal_id,
            peer,
            namespaces,
            status: SessionStatus::Active,
            created_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };

        let mut state = self.state.write();
        if let Some(record) = state.proposals.get_mut(&proposal_id) {
            record.state = ProposalState::Approved {
                topic: topic.clone(),
            };
        }
        state.sessions.insert(topic.clone(), session.clone());
        log::info!("Session {} active for {}", topic, session.origin());
        session
    }

    /// Look up an active session and refresh its expiry. Unknown, closed and
    /// expired topics are unauthorized; an expired session is closed here.
    pub fn session(&self, topic: &str) -> WalletResult<Session> {
        let mut state = self.state.write();
        let session = state
            .sessions
            .get_mut(topic)
            .ok_or_else(|| WalletError::Unauthorized(format!("Unknown session {}", topic)))?;

        if session.status == SessionStatus::Closed {
            return Err(WalletError::Unauthorized(format!(
                "Session {} is closed",
                topic
            )));
        }
        if session.is_expired() {
            session.status = SessionStatus::Closed;
            log::info!("Session {} expired", topic);
            return Err(WalletError::Unauthorized(format!(
                "Session {} expired",
                topic
            )));
        }

        session.touch(self.ttl);
        Ok(session.clone())
    }

    /// Status without refreshing expiry.
    pub fn status(&self, topic: &str) -> Option<SessionStatus> {
        self.state.read().sessions.get(topic).map(|s| s.status)
    }

    /// Mark a session closed. Returns whether it was active.
    pub fn close(&self, topic: &str) -> bool {
        let mut state = self.state.write();
        match state.sessions.get_mut(topic) {
            Some(session) if session.status == SessionStatus::Active => {
                session.status = SessionStatus::Closed;
                log::info!("Session {} closed", topic);
                true
            }
            _ => false,
        }
    }

    pub fn active_sessions(&self) -> Vec<Session> {
        let state = self.state.read();
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active && !s.is_expired())
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Close every expired session; returns their topics.
    pub fn prune_expired(&self) -> Vec<String> {
        let mut state = self.state.write();
        let mut closed = Vec::new();
        for session in state.sessions.values_mut() {
            if session.status == SessionStatus::Active && session.is_expired() {
                session.status = SessionStatus::Closed;
                closed.push(session.topic.clone());
            }
        }
        closed.sort();
        closed
    }
}
