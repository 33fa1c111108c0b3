use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChainClient, JsonRpcTransport};
use crate::chain::{Amount, ChainFamily, ChainType};
use crate::crypto::WalletKeyPair;
use crate::errors::{WalletError, WalletResult};

/// System Program id (`11111111111111111111111111111111`).
const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];
/// System Program instruction index of `Transfer`.
const SYSTEM_TRANSFER: u32 = 2;

/// JSON-RPC client for a Solana cluster.
pub struct SolanaRpcClient {
    transport: JsonRpcTransport,
}

#[derive(Debug, Deserialize)]
struct RpcContextual<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
}

impl SolanaRpcClient {
    pub fn new(url: &str) -> WalletResult<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(url)?,
        })
    }

    async fn latest_blockhash(&self) -> WalletResult<[u8; 32]> {
        let response: RpcContextual<LatestBlockhash> = self
            .transport
            .call("getLatestBlockhash", json!([{ "commitment": "finalized" }]))
            .await?;
        decode_pubkey(&response.value.blockhash)
            .map_err(|_| WalletError::InvalidResponse("Malformed blockhash".to_string()))
    }
}

#[async_trait]
impl ChainClient for SolanaRpcClient {
    async fn native_balance(&self, address: &str) -> WalletResult<Amount> {
        let response: RpcContextual<u64> = self.transport.call("getBalance", json!([address])).await?;
        Amount::from_base_units(response.value as u128, ChainType::Solana.native_decimals())
    }

    async fn send_native(
        &self,
        key: &WalletKeyPair,
        to: &str,
        amount: Amount,
    ) -> WalletResult<String> {
        if key.family() != ChainFamily::Solana {
            return Err(WalletError::SignatureError(
                "Solana transfers require an ed25519 key".to_string(),
            ));
        }
        let from = key
            .ed25519_public_key()
            .ok_or_else(|| WalletError::SignatureError("Missing ed25519 public key".to_string()))?;
        let to = decode_pubkey(to)?;
        let lamports = u64::try_from(amount.base_units())
            .map_err(|_| WalletError::InvalidAmount("Amount exceeds u64 lamports".to_string()))?;

        let blockhash = self.latest_blockhash().await?;
        let message = transfer_message(&from, &to, lamports, &blockhash);
        let signature = key.sign_ed25519(&message)?;

        let mut transaction = Vec::with_capacity(1 + 64 + message.len());
        push_compact_u16(&mut transaction, 1);
        transaction.extend_from_slice(&signature);
        transaction.extend_from_slice(&message);

        log::info!("Submitting {} SOL transfer", amount);
        self.transport
            .call(
                "sendTransaction",
                json!([
                    bs58::encode(transaction).into_string(),
                    { "encoding": "base58" }
                ]),
            )
            .await
    }
}

/// Legacy message carrying a single System Program transfer.
///
/// A transfer to the sending account lists that account once.
fn transfer_message(
    from: &[u8; 32],
    to: &[u8; 32],
    lamports: u64,
    recent_blockhash: &[u8; 32],
) -> Vec<u8> {
    let mut accounts: Vec<&[u8; 32]> = vec![from];
    if to != from {
        accounts.push(to);
    }
    accounts.push(&SYSTEM_PROGRAM_ID);
    let program_index = (accounts.len() - 1) as u8;
    let to_index = if to != from { 1u8 } else { 0u8 };

    let mut message = Vec::with_capacity(150);
    // Header: one required signature, no read-only signers, program read-only.
    message.extend_from_slice(&[1, 0, 1]);
    push_compact_u16(&mut message, accounts.len() as u16);
    for account in &accounts {
        message.extend_from_slice(*account);
    }
    message.extend_from_slice(recent_blockhash);

    push_compact_u16(&mut message, 1);
    message.push(program_index);
    push_compact_u16(&mut message, 2);
    message.extend_from_slice(&[0, to_index]);

    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    push_compact_u16(&mut message, data.len() as u16);
    message.extend_from_slice(&data);
    message
}

fn push_compact_u16(out: &mut Vec<u8>, mut value: u16) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

fn decode_pubkey(value: &str) -> WalletResult<[u8; 32]> {
    bs58::decode(value)
        .into_vec()
        .ok()
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .ok_or_else(|| WalletError::InvalidAddress(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    #[test]
    fn compact_u16_matches_shortvec_encoding() {
        let cases: [(u16, &[u8]); 5] = [
            (0, &[0x00]),
            (0x7f, &[0x7f]),
            (0x80, &[0x80, 0x01]),
            (0x3fff, &[0xff, 0x7f]),
            (0x4000, &[0x80, 0x80, 0x01]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            push_compact_u16(&mut out, value);
            assert_eq!(out, expected, "value {:#x}", value);
        }
    }

    #[test]
    fn transfer_message_layout() {
        let from = [1u8; 32];
        let to = [2u8; 32];
        let blockhash = [9u8; 32];
        let message = transfer_message(&from, &to, 1_500_000_000, &blockhash);

        assert_eq!(&message[..4], &[1, 0, 1, 3]);
        assert_eq!(&message[4..36], &from);
        assert_eq!(&message[36..68], &to);
        assert_eq!(&message[68..100], &SYSTEM_PROGRAM_ID);
        assert_eq!(&message[100..132], &blockhash);
        // one instruction: program 2, accounts [0, 1], 12 data bytes
        assert_eq!(&message[132..138], &[1, 2, 2, 0, 1, 12]);
        assert_eq!(&message[138..142], &2u32.to_le_bytes());
        assert_eq!(&message[142..], &1_500_000_000u64.to_le_bytes());
    }

    #[test]
    fn self_transfer_lists_account_once() {
        let key = [7u8; 32];
        let message = transfer_message(&key, &key, 1, &[0u8; 32]);
        assert_eq!(&message[..4], &[1, 0, 1, 2]);
        let instruction = &message[4 + 64 + 32..];
        assert_eq!(&instruction[..6], &[1, 1, 2, 0, 0, 12]);
    }

    #[test]
    fn message_signature_verifies_under_sender_key() {
        let key = WalletKeyPair::generate(ChainType::Solana);
        let from = key.ed25519_public_key().unwrap();
        let message = transfer_message(&from, &[3u8; 32], 5, &[4u8; 32]);
        let signature = key.sign_ed25519(&message).unwrap();

        let public = ed25519_dalek::VerifyingKey::from_bytes(&from).unwrap();
        assert!(public
            .verify(&message, &ed25519_dalek::Signature::from_bytes(&signature))
            .is_ok());
    }

    #[test]
    fn system_program_id_is_all_ones_in_base58() {
        assert_eq!(
            decode_pubkey("11111111111111111111111111111111").unwrap(),
            SYSTEM_PROGRAM_ID
        );
        assert!(decode_pubkey("0xnotbase58").is_err());
    }
}
