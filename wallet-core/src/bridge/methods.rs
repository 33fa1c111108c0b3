//! Request method classification and parameter decoding.

use serde::Deserialize;
use serde_json::Value;

use crate::chain::{Amount, ChainFamily, ChainType};
use crate::errors::{WalletError, WalletResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Reveals wallet addresses.
    AccountDisclosure,
    /// Moves funds.
    Transaction,
    /// Produces a signature over caller-supplied bytes.
    Signing,
    /// Public chain information, answered without disclosure.
    ChainInfo,
    Unsupported,
}

pub const EVM_METHODS: &[&str] = &[
    "eth_accounts",
    "eth_requestAccounts",
    "eth_sendTransaction",
    "eth_sign",
    "personal_sign",
    "eth_chainId",
    "net_version",
];

pub const SOLANA_METHODS: &[&str] = &[
    "solana_getAccounts",
    "solana_requestAccounts",
    "solana_signMessage",
];

pub fn classify(method: &str) -> MethodKind {
    match method {
        "eth_accounts" | "eth_requestAccounts" | "solana_getAccounts"
        | "solana_requestAccounts" => MethodKind::AccountDisclosure,
        "eth_sendTransaction" => MethodKind::Transaction,
        "eth_sign" | "personal_sign" | "solana_signMessage" => MethodKind::Signing,
        "eth_chainId" | "net_version" => MethodKind::ChainInfo,
        _ => MethodKind::Unsupported,
    }
}

/// Methods this wallet serves for a chain family.
pub fn supported_methods(family: ChainFamily) -> &'static [&'static str] {
    match family {
        ChainFamily::Evm => EVM_METHODS,
        ChainFamily::Solana => SOLANA_METHODS,
    }
}

/// Whether `method` may be used on `chain`.
pub fn is_supported_on(method: &str, chain: ChainType) -> bool {
    supported_methods(chain.family()).contains(&method)
}

/// Native transfer extracted from `eth_sendTransaction` params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: Option<String>,
    pub to: String,
    pub value: Amount,
}

#[derive(Debug, Deserialize)]
struct EthTransactionParams {
    #[serde(default)]
    from: Option<String>,
    to: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default, alias = "input")]
    data: Option<String>,
}

/// Decode `[{from, to, value, data?}]`. Contract calls (non-empty data) are
/// not supported.
pub fn parse_transfer(chain: ChainType, params: &Value) -> WalletResult<TransferRequest> {
    let tx = params
        .get(0)
        .cloned()
        .ok_or_else(|| invalid_params("eth_sendTransaction expects a transaction object"))?;
    let tx: EthTransactionParams = serde_json::from_value(tx)
        .map_err(|e| invalid_params(&format!("malformed transaction: {}", e)))?;

    if tx
        .data
        .as_deref()
        .map(|d| !d.is_empty() && d != "0x")
        .unwrap_or(false)
    {
        return Err(invalid_params("contract calls are not supported"));
    }

    let to = tx
        .to
        .filter(|to| !to.is_empty())
        .ok_or_else(|| invalid_params("transaction has no recipient"))?;
    let value = match tx.value.as_deref() {
        Some(hex) => Amount::from_hex_units(hex, chain.native_decimals())
            .map_err(|e| invalid_params(&format!("malformed value: {}", e)))?,
        None => Amount::from_base_units(0, chain.native_decimals())?,
    };

    Ok(TransferRequest {
        from: tx.from,
        to,
        value,
    })
}

/// Message and expected signer extracted from a signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub address: Option<String>,
    pub message: Vec<u8>,
}

impl SigningRequest {
    /// Readable form for an approval prompt: UTF-8 text when possible,
    /// otherwise `0x` hex.
    pub fn preview(&self) -> String {
        match std::str::from_utf8(&self.message) {
            Ok(text) => text.to_string(),
            Err(_) => format!("0x{}", hex::encode(&self.message)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SolanaSignParams {
    message: String,
    #[serde(default)]
    pubkey: Option<String>,
}

/// Decode `personal_sign [message, address]`, `eth_sign [address, message]`
/// or `solana_signMessage {message (base58), pubkey}`.
pub fn parse_signing(method: &str, params: &Value) -> WalletResult<SigningRequest> {
    match method {
        "personal_sign" => Ok(SigningRequest {
            message: evm_message_bytes(str_param(params, 0)?)?,
            address: params.get(1).and_then(Value::as_str).map(str::to_string),
        }),
        "eth_sign" => Ok(SigningRequest {
            address: Some(str_param(params, 0)?.to_string()),
            message: evm_message_bytes(str_param(params, 1)?)?,
        }),
        "solana_signMessage" => {
            let params: SolanaSignParams = serde_json::from_value(params.clone())
                .map_err(|e| invalid_params(&format!("malformed solana_signMessage: {}", e)))?;
            let message = bs58::decode(&params.message)
                .into_vec()
                .map_err(|_| invalid_params("message is not base58"))?;
            Ok(SigningRequest {
                address: params.pubkey,
                message,
            })
        }
        other => Err(WalletError::UnsupportedMethod(other.to_string())),
    }
}

/// `0x`-prefixed hex is decoded; anything else is taken as UTF-8 text.
fn evm_message_bytes(message: &str) -> WalletResult<Vec<u8>> {
    match message.strip_prefix("0x") {
        Some(hex_body) => {
            hex::decode(hex_body).map_err(|_| invalid_params("message is not valid hex"))
        }
        None => Ok(message.as_bytes().to_vec()),
    }
}

fn str_param(params: &Value, index: usize) -> WalletResult<&str> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params(&format!("missing string parameter {}", index)))
}

fn invalid_params(reason: &str) -> WalletError {
    WalletError::ValidationError(reason.to_string())
}
