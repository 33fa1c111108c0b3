use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainType, NetworkId};

/// Fungible token as described by an indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub chain: ChainType,
    pub contract_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub token: Token,
    /// Balance in base units as reported by the indexer (`0x`-hex).
    pub raw_balance: String,
    /// Balance scaled by the token's decimals.
    pub balance: String,
}

/// Transaction lifecycle. New submissions are reported as `Pending` and
/// never advanced locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Decimal amount in the transferred asset's display units.
    pub value: String,
    /// Asset symbol, native or token.
    pub asset: String,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    pub chain: ChainType,
    pub network: NetworkId,
}

/// Registry view of one chain's wallet, for hosts listing accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    pub chain: ChainType,
    pub address: String,
    pub native_symbol: String,
    pub default_network: NetworkId,
}
