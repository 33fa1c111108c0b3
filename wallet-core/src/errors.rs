use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chain::{ChainType, NetworkId};

/// EIP-1193 / JSON-RPC error codes relayed to dApps.
pub mod rpc_codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletError {
    // Registry errors
    InvalidCredential(String),
    WalletNotFound(ChainType),
    ProviderUnavailable { chain: ChainType, network: NetworkId },

    // Approval and bridge errors
    UserRejected,
    UnsupportedMethod(String),
    UnsupportedChain(String),
    Unauthorized(String),

    // Cryptographic errors
    CryptoError(String),
    SignatureError(String),

    // Network errors
    NetworkError(String),
    InvalidResponse(String),

    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),
    InvalidAmount(String),

    // Application errors
    NotInitialized,
    NotFound(String),

    // Generic errors
    Unknown(String),
}

impl WalletError {
    /// Code relayed to a remote peer when this error answers one of its requests.
    pub fn rpc_code(&self) -> i64 {
        match self {
            WalletError::UserRejected => rpc_codes::USER_REJECTED,
            WalletError::Unauthorized(_) | WalletError::WalletNotFound(_) => {
                rpc_codes::UNAUTHORIZED
            }
            WalletError::UnsupportedMethod(_) => rpc_codes::UNSUPPORTED_METHOD,
            WalletError::UnsupportedChain(_) => rpc_codes::CHAIN_DISCONNECTED,
            WalletError::ValidationError(_)
            | WalletError::InvalidAddress(_)
            | WalletError::InvalidAmount(_)
            | WalletError::InvalidCredential(_) => rpc_codes::INVALID_PARAMS,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::InvalidCredential(msg) => write!(f, "Invalid credential: {}", msg),
            WalletError::WalletNotFound(chain) => write!(f, "No wallet found for {}", chain),
            WalletError::ProviderUnavailable { chain, network } => {
                write!(f, "No provider configured for {} / {}", chain, network)
            }

            WalletError::UserRejected => write!(f, "User rejected the request"),
            WalletError::UnsupportedMethod(method) => {
                write!(f, "Method not supported: {}", method)
            }
            WalletError::UnsupportedChain(msg) => write!(f, "Unsupported chain: {}", msg),
            WalletError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),

            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            WalletError::SignatureError(msg) => write!(f, "Signature error: {}", msg),

            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            WalletError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            WalletError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),

            WalletError::NotInitialized => write!(f, "Wallet registry not initialized"),
            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),

            WalletError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

// Helper macro for easy error creation
#[macro_export]
macro_rules! wallet_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::WalletError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::WalletError::$variant
    };
}

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => WalletError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WalletError::PermissionDenied(error.to_string())
            }
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(error: reqwest::Error) -> Self {
        WalletError::NetworkError(error.to_string())
    }
}
