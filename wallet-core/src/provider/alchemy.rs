use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{JsonRpcTransport, TokenHolding, TokenIndexer};
use crate::api::types::{Token, Transaction, TransactionStatus};
use crate::chain::{Amount, ChainType, NetworkId};
use crate::errors::WalletResult;

/// Transfers requested per direction.
const TRANSFER_PAGE_SIZE: u32 = 50;

/// Token and transfer indexer backed by Alchemy's enhanced JSON-RPC API.
pub struct AlchemyIndexer {
    transport: JsonRpcTransport,
    chain: ChainType,
    network: NetworkId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalancesResult {
    token_balances: Vec<RawTokenBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenBalance {
    contract_address: String,
    token_balance: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TokenMetadataResult {
    name: Option<String>,
    symbol: Option<String>,
    decimals: Option<u8>,
    logo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetTransfersResult {
    transfers: Vec<AssetTransfer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetTransfer {
    #[serde(default)]
    unique_id: Option<String>,
    hash: String,
    from: String,
    to: Option<String>,
    value: Option<f64>,
    asset: Option<String>,
    #[serde(default)]
    raw_contract: Option<RawContract>,
    #[serde(default)]
    metadata: Option<TransferMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    value: Option<String>,
    decimal: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferMetadata {
    block_timestamp: Option<DateTime<Utc>>,
}

impl AlchemyIndexer {
    pub fn new(url: &str, chain: ChainType, network: NetworkId) -> WalletResult<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(url)?,
            chain,
            network,
        })
    }

    async fn transfers_in_direction(
        &self,
        direction: &str,
        owner: &str,
    ) -> WalletResult<Vec<AssetTransfer>> {
        let mut filter = json!({
            "fromBlock": "0x0",
            "toBlock": "latest",
            "category": ["external", "erc20"],
            "withMetadata": true,
            "order": "desc",
            "maxCount": format!("0x{:x}", TRANSFER_PAGE_SIZE),
        });
        filter[direction] = json!(owner);

        let result: AssetTransfersResult = self
            .transport
            .call("alchemy_getAssetTransfers", json!([filter]))
            .await?;
        Ok(result.transfers)
    }

    fn to_transaction(&self, transfer: AssetTransfer) -> Transaction {
        let value = transfer
            .raw_contract
            .as_ref()
            .and_then(raw_contract_value)
            .or_else(|| transfer.value.map(|v| v.to_string()))
            .unwrap_or_else(|| "0".to_string());

        Transaction {
            hash: transfer.hash,
            from: transfer.from,
            to: transfer.to.unwrap_or_default(),
            value,
            asset: transfer
                .asset
                .unwrap_or_else(|| self.chain.native_symbol().to_string()),
            timestamp: transfer
                .metadata
                .and_then(|m| m.block_timestamp)
                .unwrap_or(DateTime::UNIX_EPOCH),
            status: TransactionStatus::Confirmed,
            chain: self.chain,
            network: self.network.clone(),
        }
    }
}

fn raw_contract_value(raw: &RawContract) -> Option<String> {
    let decimals = raw
        .decimal
        .as_deref()
        .and_then(|d| u8::from_str_radix(d.trim_start_matches("0x"), 16).ok())?;
    let amount = Amount::from_hex_units(raw.value.as_deref()?, decimals).ok()?;
    Some(amount.as_string())
}

/// Merge both directions newest first, dropping transfers seen twice.
fn merge_transfers(incoming: Vec<AssetTransfer>, outgoing: Vec<AssetTransfer>) -> Vec<AssetTransfer> {
    let mut seen = HashSet::new();
    let mut merged: Vec<AssetTransfer> = outgoing
        .into_iter()
        .chain(incoming)
        .filter(|t| seen.insert(t.unique_id.clone().unwrap_or_else(|| t.hash.clone())))
        .collect();
    merged.sort_by(|a, b| {
        let ts = |t: &AssetTransfer| t.metadata.as_ref().and_then(|m| m.block_timestamp);
        ts(b).cmp(&ts(a))
    });
    merged
}

#[async_trait]
impl TokenIndexer for AlchemyIndexer {
    async fn token_balances(&self, owner: &str) -> WalletResult<Vec<TokenHolding>> {
        let result: TokenBalancesResult = self
            .transport
            .call("alchemy_getTokenBalances", json!([owner, "erc20"]))
            .await?;

        Ok(result
            .token_balances
            .into_iter()
            .filter(|b| b.error.is_none())
            .filter_map(|b| {
                b.token_balance.map(|raw_balance| TokenHolding {
                    contract_address: b.contract_address,
                    raw_balance,
                })
            })
            .collect())
    }

    async fn token_metadata(&self, contract_address: &str) -> WalletResult<Token> {
        let result: TokenMetadataResult = self
            .transport
            .call("alchemy_getTokenMetadata", json!([contract_address]))
            .await?;

        Ok(Token {
            chain: self.chain,
            contract_address: contract_address.to_string(),
            symbol: result.symbol.unwrap_or_default(),
            name: result.name.unwrap_or_default(),
            decimals: result.decimals.unwrap_or(0),
            logo: result.logo,
        })
    }

    async fn transfers(&self, owner: &str) -> WalletResult<Vec<Transaction>> {
        let outgoing = self.transfers_in_direction("fromAddress", owner).await?;
        let incoming = self.transfers_in_direction("toAddress", owner).await?;

        Ok(merge_transfers(incoming, outgoing)
            .into_iter()
            .map(|t| self.to_transaction(t))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(json: serde_json::Value) -> AssetTransfer {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn raw_contract_value_uses_token_decimals() {
        let raw = RawContract {
            value: Some("0xf4240".to_string()),
            decimal: Some("0x6".to_string()),
        };
        assert_eq!(raw_contract_value(&raw).as_deref(), Some("1"));

        let missing = RawContract {
            value: None,
            decimal: Some("0x12".to_string()),
        };
        assert_eq!(raw_contract_value(&missing), None);
    }

    #[test]
    fn merge_orders_newest_first_and_dedupes() {
        let outgoing = vec![transfer(json!({
            "uniqueId": "0xaa:external",
            "hash": "0xaa",
            "from": "0x1",
            "to": "0x1",
            "value": 0.5,
            "asset": "ETH",
            "metadata": { "blockTimestamp": "2024-03-01T00:00:00.000Z" }
        }))];
        let incoming = vec![
            transfer(json!({
                "uniqueId": "0xaa:external",
                "hash": "0xaa",
                "from": "0x1",
                "to": "0x1",
                "value": 0.5,
                "asset": "ETH",
                "metadata": { "blockTimestamp": "2024-03-01T00:00:00.000Z" }
            })),
            transfer(json!({
                "uniqueId": "0xbb:log:3",
                "hash": "0xbb",
                "from": "0x2",
                "to": "0x1",
                "value": 12.0,
                "asset": "USDC",
                "rawContract": { "value": "0xb71b00", "decimal": "0x6" },
                "metadata": { "blockTimestamp": "2024-04-01T00:00:00.000Z" }
            })),
        ];

        let merged = merge_transfers(incoming, outgoing);
        let hashes: Vec<&str> = merged.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0xbb", "0xaa"]);
    }

    #[test]
    fn transfers_map_to_confirmed_transactions() {
        let indexer =
            AlchemyIndexer::new("https://example.invalid", ChainType::Polygon, NetworkId::from("amoy"))
                .unwrap();
        let tx = indexer.to_transaction(transfer(json!({
            "hash": "0xbb",
            "from": "0x2",
            "to": null,
            "value": null,
            "asset": null,
            "rawContract": { "value": "0xb71b00", "decimal": "0x6" }
        })));

        assert_eq!(tx.value, "12");
        assert_eq!(tx.asset, "POL");
        assert_eq!(tx.to, "");
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert_eq!(tx.network, NetworkId::from("amoy"));
        assert_eq!(tx.timestamp, DateTime::UNIX_EPOCH);
    }
}
