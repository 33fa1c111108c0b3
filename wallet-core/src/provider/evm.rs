use async_trait::async_trait;
use serde_json::json;

use super::{ChainClient, JsonRpcTransport};
use crate::chain::{Amount, ChainFamily, ChainType};
use crate::crypto::{keccak256, WalletKeyPair};
use crate::errors::{WalletError, WalletResult};

/// Gas limit of a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// JSON-RPC client for an EVM network (Ethereum, Polygon, BNB Smart Chain).
pub struct EvmRpcClient {
    transport: JsonRpcTransport,
    chain: ChainType,
    chain_id: u64,
}

impl EvmRpcClient {
    pub fn new(url: &str, chain: ChainType, chain_id: u64) -> WalletResult<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(url)?,
            chain,
            chain_id,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn quantity(&self, method: &str, params: serde_json::Value) -> WalletResult<u128> {
        let hex: String = self.transport.call(method, params).await?;
        parse_quantity(&hex)
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    async fn native_balance(&self, address: &str) -> WalletResult<Amount> {
        let hex: String = self
            .transport
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        Amount::from_hex_units(&hex, self.chain.native_decimals())
            .map_err(|e| WalletError::InvalidResponse(format!("eth_getBalance: {}", e)))
    }

    async fn send_native(
        &self,
        key: &WalletKeyPair,
        to: &str,
        amount: Amount,
    ) -> WalletResult<String> {
        if key.family() != ChainFamily::Evm {
            return Err(WalletError::SignatureError(
                "EVM transfers require a secp256k1 key".to_string(),
            ));
        }
        let from = key.address();
        let to_bytes = parse_address(to)?;

        let nonce = self
            .quantity("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;

        let tx = LegacyTransaction {
            nonce: u64::try_from(nonce)
                .map_err(|_| WalletError::InvalidResponse("Nonce out of range".to_string()))?,
            gas_price,
            gas_limit: TRANSFER_GAS_LIMIT,
            to: to_bytes,
            value: amount.base_units(),
        };

        let digest = keccak256(&tx.signing_payload(self.chain_id));
        let signature = key.sign_prehash_recoverable(&digest)?;
        let raw = tx.encode_signed(self.chain_id, &signature);

        log::info!(
            "Submitting {} {} transfer on chain {} (nonce {})",
            amount,
            self.chain.native_symbol(),
            self.chain_id,
            tx.nonce
        );
        self.transport
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await
    }
}

/// EIP-155 legacy transaction without calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::uint(self.nonce as u128),
            rlp::uint(self.gas_price),
            rlp::uint(self.gas_limit as u128),
            rlp::bytes(&self.to),
            rlp::uint(self.value),
            rlp::bytes(&[]),
        ]
    }

    /// RLP of `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]`.
    pub fn signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(rlp::uint(chain_id as u128));
        fields.push(rlp::uint(0));
        fields.push(rlp::uint(0));
        rlp::list(&fields)
    }

    /// Raw signed transaction; `signature` is r‖s‖recovery-id.
    pub fn encode_signed(&self, chain_id: u64, signature: &[u8; 65]) -> Vec<u8> {
        let v = signature[64] as u128 + chain_id as u128 * 2 + 35;
        let mut fields = self.base_fields();
        fields.push(rlp::uint(v));
        fields.push(rlp::bytes(strip_leading_zeros(&signature[..32])));
        fields.push(rlp::bytes(strip_leading_zeros(&signature[32..64])));
        rlp::list(&fields)
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Recursive-length-prefix encoding of the value shapes a transfer needs.
mod rlp {
    use super::strip_leading_zeros;

    pub fn bytes(data: &[u8]) -> Vec<u8> {
        if data.len() == 1 && data[0] < 0x80 {
            return vec![data[0]];
        }
        let mut out = length_prefix(data.len(), 0x80);
        out.extend_from_slice(data);
        out
    }

    pub fn uint(value: u128) -> Vec<u8> {
        bytes(strip_leading_zeros(&value.to_be_bytes()))
    }

    /// List of already-encoded items.
    pub fn list(items: &[Vec<u8>]) -> Vec<u8> {
        let payload: Vec<u8> = items.concat();
        let mut out = length_prefix(payload.len(), 0xc0);
        out.extend_from_slice(&payload);
        out
    }

    fn length_prefix(len: usize, offset: u8) -> Vec<u8> {
        if len < 56 {
            return vec![offset + len as u8];
        }
        let len_bytes = (len as u64).to_be_bytes();
        let len_bytes = strip_leading_zeros(&len_bytes);
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend_from_slice(len_bytes);
        out
    }
}

fn parse_quantity(hex_str: &str) -> WalletResult<u128> {
    let digits = hex_str
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::InvalidResponse(format!("Not a hex quantity: {}", hex_str)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|_| WalletError::InvalidResponse(format!("Not a hex quantity: {}", hex_str)))
}

fn parse_address(address: &str) -> WalletResult<[u8; 20]> {
    let digits = address
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::InvalidAddress(address.to_string()))?;
    let bytes = hex::decode(digits).map_err(|_| WalletError::InvalidAddress(address.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::InvalidAddress(address.to_string()))
}
