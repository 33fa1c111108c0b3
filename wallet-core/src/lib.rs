// lib.rs - Core library structure for the multichain wallet

pub mod api;
pub mod app_state;
pub mod approval;
pub mod bridge;
pub mod chain;
pub mod config_store;
pub mod crypto;
pub mod errors;
pub mod provider;
pub mod registry;
pub mod session;
pub mod storage;
pub mod validation;

// Re-export common types
pub use api::types::*;
pub use app_state::WalletContext;
pub use approval::{ApprovalAction, ApprovalGate, ApprovalRequest, PendingApproval};
pub use bridge::protocol::{
    PageMessage, PageResponse, PairingTransport, PairingUri, ProtocolError, RequestResponse,
    SessionApproval, SessionProposal, SessionRequest,
};
pub use bridge::SessionBridge;
pub use chain::{Amount, ChainFamily, ChainType, NetworkDescriptor, NetworkId};
pub use config_store::{ConfigStore, WalletConfig};
pub use errors::{WalletError, WalletResult};
pub use provider::{ChainClient, ClientTable, TokenHolding, TokenIndexer};
pub use registry::WalletRegistry;
pub use session::{ProposalState, SessionManager, SessionStatus};
pub use storage::{EncryptedFileStore, KeyValueStore, MemoryStore, WalletPaths};
pub use validation::InputValidator;
