//! Human approval gate
//!
//! Every disclosing or state-changing dApp request waits here for an explicit
//! decision. `propose` registers a prompt and returns a [`PendingApproval`]
//! handle; a UI lists or subscribes to prompts and answers with `resolve`.
//! A prompt that is dismissed, or whose handle is dropped, counts as a
//! rejection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::chain::{ChainType, NetworkId};
use crate::errors::{WalletError, WalletResult};
use crate::validation::sanitize_display;

const EVENT_CAPACITY: usize = 32;

/// What the user is asked to allow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ApprovalAction {
    #[serde(rename_all = "camelCase")]
    ConnectSession {
        origin: String,
        proposer: String,
        chains: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    DiscloseAccounts { origin: String, chain: ChainType },
    #[serde(rename_all = "camelCase")]
    SendTransaction {
        origin: String,
        chain: ChainType,
        network: NetworkId,
        to: String,
        value: String,
    },
    #[serde(rename_all = "camelCase")]
    SignMessage {
        origin: String,
        chain: ChainType,
        message: String,
    },
}

impl ApprovalAction {
    pub fn origin(&self) -> &str {
        match self {
            ApprovalAction::ConnectSession { origin, .. }
            | ApprovalAction::DiscloseAccounts { origin, .. }
            | ApprovalAction::SendTransaction { origin, .. }
            | ApprovalAction::SignMessage { origin, .. } => origin,
        }
    }

    /// Confirmation text shown to the user.
    pub fn summary(&self) -> String {
        match self {
            ApprovalAction::ConnectSession {
                origin,
                proposer,
                chains,
            } => format!(
                "{} ({}) wants to connect on {}",
                sanitize_display(proposer),
                sanitize_display(origin),
                chains.join(", ")
            ),
            ApprovalAction::DiscloseAccounts { origin, chain } => format!(
                "{} wants to see your {} address",
                sanitize_display(origin),
                chain
            ),
            ApprovalAction::SendTransaction {
                origin,
                chain,
                network,
                to,
                value,
            } => format!(
                "{} requests sending {} {} to {} on {} {}",
                sanitize_display(origin),
                sanitize_display(value),
                chain.native_symbol(),
                sanitize_display(to),
                chain,
                network
            ),
            ApprovalAction::SignMessage {
                origin,
                chain,
                message,
            } => format!(
                "{} requests a {} signature for: {}",
                sanitize_display(origin),
                chain,
                sanitize_display(message)
            ),
        }
    }
}

/// Prompt awaiting a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub action: ApprovalAction,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

struct PendingEntry {
    request: ApprovalRequest,
    responder: oneshot::Sender<bool>,
}

struct GateInner {
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
    events: broadcast::Sender<ApprovalRequest>,
}

#[derive(Clone)]
pub struct ApprovalGate {
    inner: Arc<GateInner>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(GateInner {
                pending: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Register a prompt for `action`.
    pub fn propose(&self, action: ApprovalAction) -> PendingApproval {
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            summary: action.summary(),
            action,
            created_at: Utc::now(),
        };
        let (responder, receiver) = oneshot::channel();

        self.inner.pending.lock().insert(
            request.id,
            PendingEntry {
                request: request.clone(),
                responder,
            },
        );
        log::info!("Approval {} requested: {}", request.id, request.summary);
        // No subscribers is fine; the prompt stays listed in `pending()`.
        let _ = self.inner.events.send(request.clone());

        PendingApproval {
            request,
            receiver: Some(receiver),
            gate: self.inner.clone(),
        }
    }

    /// Answer a prompt. Fails with `NotFound` if it was already answered or
    /// abandoned.
    pub fn resolve(&self, id: Uuid, approved: bool) -> WalletResult<()> {
        let entry = self
            .inner
            .pending
            .lock()
            .remove(&id)
            .ok_or_else(|| WalletError::NotFound(format!("approval {}", id)))?;

        log::info!(
            "Approval {} {}",
            id,
            if approved { "granted" } else { "declined" }
        );
        if entry.responder.send(approved).is_err() {
            log::debug!("Approval {} resolved after its requester went away", id);
        }
        Ok(())
    }

    pub fn dismiss(&self, id: Uuid) -> WalletResult<()> {
        self.resolve(id, false)
    }

    /// Outstanding prompts, oldest first.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .inner
            .pending
            .lock()
            .values()
            .map(|entry| entry.request.clone())
            .collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    /// Stream of prompts proposed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.inner.events.subscribe()
    }
}

/// Handle held by the requester while a prompt is outstanding.
pub struct PendingApproval {
    request: ApprovalRequest,
    receiver: Option<oneshot::Receiver<bool>>,
    gate: Arc<GateInner>,
}

impl PendingApproval {
    pub fn id(&self) -> Uuid {
        self.request.id
    }

    pub fn request(&self) -> &ApprovalRequest {
        &self.request
    }

    /// Wait for the user. `Err(UserRejected)` unless explicitly approved.
    pub async fn decision(mut self) -> WalletResult<()> {
        let receiver = match self.receiver.take() {
            Some(receiver) => receiver,
            None => return Err(WalletError::UserRejected),
        };
        match receiver.await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(WalletError::UserRejected),
        }
    }
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        if self.gate.pending.lock().remove(&self.request.id).is_some() {
            log::debug!("Approval {} abandoned", self.request.id);
        }
    }
}
