/// Wallet key pairs for the supported chain families
///
/// EVM chains (Ethereum, Polygon, BNB Smart Chain) share secp256k1 keys with
/// Keccak-256 addresses; Solana uses ed25519 keys with base58 addresses.
/// Curve arithmetic and hashing are delegated to `k256`, `ed25519-dalek`,
/// `sha3`, `bip32` and `bip39`.
use crate::chain::{ChainFamily, ChainType};
use crate::errors::{WalletError, WalletResult};
use ed25519_dalek::Signer;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use sha2::Sha512;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// BIP-44 path used for EVM accounts.
pub const EVM_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";
/// SLIP-0010 path used for Solana accounts (all levels hardened).
pub const SOLANA_DERIVATION_PATH: [u32; 4] = [44, 501, 0, 0];

const HARDENED: u32 = 0x8000_0000;
const SLIP10_ED25519_SEED: &[u8] = b"ed25519 seed";

/// Signing key of one wallet, tagged by curve.
#[derive(Clone)]
pub enum WalletKeyPair {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl WalletKeyPair {
    /// Generate a fresh random key for the chain's family.
    pub fn generate(chain: ChainType) -> Self {
        match chain.family() {
            ChainFamily::Evm => Self::Secp256k1(k256::ecdsa::SigningKey::random(&mut OsRng)),
            ChainFamily::Solana => Self::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng)),
        }
    }

    /// Decode a user-supplied private key or BIP-39 mnemonic.
    ///
    /// Any input that does not decode to a valid key fails with
    /// `WalletError::InvalidCredential`.
    pub fn from_credential(chain: ChainType, input: &str) -> WalletResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(WalletError::InvalidCredential(
                "Credential cannot be empty".to_string(),
            ));
        }

        if trimmed.split_whitespace().count() > 1 {
            return Self::from_mnemonic(chain, trimmed);
        }

        match chain.family() {
            ChainFamily::Evm => Self::from_evm_hex(trimmed),
            ChainFamily::Solana => Self::from_solana_secret(trimmed),
        }
    }

    fn from_mnemonic(chain: ChainType, phrase: &str) -> WalletResult<Self> {
        use bip39::{Language, Mnemonic};

        let normalized = phrase
            .split_whitespace()
            .map(|word| word.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|e| WalletError::InvalidCredential(format!("Invalid mnemonic: {}", e)))?;
        let seed = Zeroizing::new(mnemonic.to_seed(""));

        match chain.family() {
            ChainFamily::Evm => {
                let path: bip32::DerivationPath = EVM_DERIVATION_PATH
                    .parse()
                    .map_err(|e| WalletError::CryptoError(format!("Invalid path: {}", e)))?;
                let xprv = bip32::XPrv::derive_from_path(seed.as_slice(), &path)
                    .map_err(|e| WalletError::CryptoError(format!("Derivation failed: {}", e)))?;
                Ok(Self::Secp256k1(xprv.private_key().clone()))
            }
            ChainFamily::Solana => {
                let secret = slip10_ed25519_derive(seed.as_slice(), &SOLANA_DERIVATION_PATH)?;
                Ok(Self::Ed25519(ed25519_dalek::SigningKey::from_bytes(&secret)))
            }
        }
    }

    fn from_evm_hex(input: &str) -> WalletResult<Self> {
        let digits = input.strip_prefix("0x").unwrap_or(input);
        if digits.len() != 64 {
            return Err(WalletError::InvalidCredential(format!(
                "Private key must be 32 bytes of hex, got {} characters",
                digits.len()
            )));
        }
        let bytes = Zeroizing::new(
            hex::decode(digits)
                .map_err(|_| WalletError::InvalidCredential("Invalid hex".to_string()))?,
        );
        let key = k256::ecdsa::SigningKey::from_slice(&bytes).map_err(|_| {
            WalletError::InvalidCredential("Private key is not a valid secp256k1 scalar".into())
        })?;
        Ok(Self::Secp256k1(key))
    }

    fn from_solana_secret(input: &str) -> WalletResult<Self> {
        let bytes: Zeroizing<Vec<u8>> = if input.starts_with('[') {
            Zeroizing::new(serde_json::from_str::<Vec<u8>>(input).map_err(|_| {
                WalletError::InvalidCredential("Invalid byte-array secret key".to_string())
            })?)
        } else {
            Zeroizing::new(bs58::decode(input).into_vec().map_err(|_| {
                WalletError::InvalidCredential("Invalid base58 secret key".to_string())
            })?)
        };

        match bytes.len() {
            64 => {
                let mut keypair = Zeroizing::new([0u8; 64]);
                keypair.copy_from_slice(&bytes);
                let key = ed25519_dalek::SigningKey::from_keypair_bytes(&keypair).map_err(|_| {
                    WalletError::InvalidCredential(
                        "Keypair public half does not match secret".to_string(),
                    )
                })?;
                Ok(Self::Ed25519(key))
            }
            32 => {
                let mut secret = Zeroizing::new([0u8; 32]);
                secret.copy_from_slice(&bytes);
                Ok(Self::Ed25519(ed25519_dalek::SigningKey::from_bytes(&secret)))
            }
            other => Err(WalletError::InvalidCredential(format!(
                "Secret key must be 32 or 64 bytes, got {}",
                other
            ))),
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Self::Secp256k1(_) => ChainFamily::Evm,
            Self::Ed25519(_) => ChainFamily::Solana,
        }
    }

    /// Public address: EIP-55 hex for EVM, base58 public key for Solana.
    pub fn address(&self) -> String {
        match self {
            Self::Secp256k1(key) => checksum_encode(&evm_address_bytes(key)),
            Self::Ed25519(key) => bs58::encode(key.verifying_key().to_bytes()).into_string(),
        }
    }

    /// Raw 20-byte EVM address.
    pub fn evm_address_bytes(&self) -> Option<[u8; 20]> {
        match self {
            Self::Secp256k1(key) => Some(evm_address_bytes(key)),
            Self::Ed25519(_) => None,
        }
    }

    /// Raw 32-byte ed25519 public key.
    pub fn ed25519_public_key(&self) -> Option<[u8; 32]> {
        match self {
            Self::Secp256k1(_) => None,
            Self::Ed25519(key) => Some(key.verifying_key().to_bytes()),
        }
    }

    /// Private key string as persisted and as accepted by `from_credential`.
    pub fn export_secret(&self) -> Zeroizing<String> {
        match self {
            Self::Secp256k1(key) => Zeroizing::new(format!("0x{}", hex::encode(key.to_bytes()))),
            Self::Ed25519(key) => {
                let keypair = Zeroizing::new(key.to_keypair_bytes());
                Zeroizing::new(bs58::encode(keypair.as_slice()).into_string())
            }
        }
    }

    /// Sign a user-facing message.
    ///
    /// EVM keys produce an EIP-191 `personal_sign` signature (`0x` + r‖s‖v,
    /// v = 27/28); ed25519 keys produce a base58 signature over the raw bytes.
    pub fn sign_message(&self, message: &[u8]) -> WalletResult<String> {
        match self {
            Self::Secp256k1(_) => {
                let digest = eip191_hash(message);
                let mut signature = self.sign_prehash_recoverable(&digest)?;
                signature[64] += 27;
                Ok(format!("0x{}", hex::encode(signature)))
            }
            Self::Ed25519(_) => {
                let signature = self.sign_ed25519(message)?;
                Ok(bs58::encode(signature).into_string())
            }
        }
    }

    /// Sign a 32-byte digest, returning r‖s‖recovery-id (0 or 1).
    pub fn sign_prehash_recoverable(&self, digest: &[u8; 32]) -> WalletResult<[u8; 65]> {
        match self {
            Self::Secp256k1(key) => {
                let (signature, recovery_id) = key
                    .sign_prehash_recoverable(digest)
                    .map_err(|e| WalletError::SignatureError(e.to_string()))?;
                let mut out = [0u8; 65];
                out[..64].copy_from_slice(&signature.to_bytes());
                out[64] = recovery_id.to_byte();
                Ok(out)
            }
            Self::Ed25519(_) => Err(WalletError::SignatureError(
                "Recoverable signatures require a secp256k1 key".to_string(),
            )),
        }
    }

    /// Sign raw bytes with an ed25519 key.
    pub fn sign_ed25519(&self, bytes: &[u8]) -> WalletResult<[u8; 64]> {
        match self {
            Self::Ed25519(key) => Ok(key.sign(bytes).to_bytes()),
            Self::Secp256k1(_) => Err(WalletError::SignatureError(
                "Plain signatures require an ed25519 key".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for WalletKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKeyPair")
            .field("family", &self.family())
            .field("address", &self.address())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// EIP-191 `personal_sign` digest of a message.
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

fn evm_address_bytes(key: &k256::ecdsa::SigningKey) -> [u8; 20] {
    let point = key.verifying_key().to_encoded_point(false);
    // Skip the 0x04 prefix, hash x || y, keep the last 20 bytes
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// EIP-55 mixed-case checksum encoding.
pub fn checksum_encode(address: &[u8; 20]) -> String {
    let hex_addr = hex::encode(address);
    let hash = keccak256(hex_addr.as_bytes());

    let mut result = String::with_capacity(42);
    result.push_str("0x");
    for (i, c) in hex_addr.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            result.push(c.to_ascii_uppercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// SLIP-0010 ed25519 derivation along a fully hardened path.
fn slip10_ed25519_derive(seed: &[u8], path: &[u32]) -> WalletResult<Zeroizing<[u8; 32]>> {
    let mut mac = HmacSha512::new_from_slice(SLIP10_ED25519_SEED)
        .map_err(|e| WalletError::CryptoError(format!("HMAC error: {}", e)))?;
    mac.update(seed);
    let master = mac.finalize().into_bytes();

    let mut key = Zeroizing::new([0u8; 32]);
    let mut chain_code = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&master[..32]);
    chain_code.copy_from_slice(&master[32..]);

    for index in path {
        let mut mac = HmacSha512::new_from_slice(chain_code.as_slice())
            .map_err(|e| WalletError::CryptoError(format!("HMAC error: {}", e)))?;
        mac.update(&[0x00]);
        mac.update(key.as_slice());
        mac.update(&(index | HARDENED).to_be_bytes());
        let child = mac.finalize().into_bytes();
        key.copy_from_slice(&child[..32]);
        chain_code.copy_from_slice(&child[32..]);
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn evm_private_key_yields_checksummed_address() {
        let keypair = WalletKeyPair::from_credential(ChainType::Ethereum, HARDHAT_KEY).unwrap();
        assert_eq!(
            keypair.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert_eq!(keypair.export_secret().as_str(), HARDHAT_KEY);
    }

    #[test]
    fn evm_mnemonic_uses_bip44_path() {
        let keypair = WalletKeyPair::from_credential(ChainType::Polygon, TEST_MNEMONIC).unwrap();
        assert_eq!(
            keypair.address(),
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
    }

    #[test]
    fn solana_mnemonic_uses_slip10_path() {
        let first = WalletKeyPair::from_credential(ChainType::Solana, TEST_MNEMONIC).unwrap();
        assert_eq!(
            first.address(),
            "HAgk14JpMQLgt6rVgv7cBQFJWFto5Dqxi472uT3DKpqk"
        );
        let second =
            WalletKeyPair::from_credential(ChainType::Solana, &TEST_MNEMONIC.to_uppercase())
                .unwrap();
        assert_eq!(first.address(), second.address());
        assert_eq!(bs58::decode(first.address()).into_vec().unwrap().len(), 32);
    }

    #[test]
    fn solana_secret_round_trips_through_export() {
        let keypair = WalletKeyPair::generate(ChainType::Solana);
        let exported = keypair.export_secret();
        let restored = WalletKeyPair::from_credential(ChainType::Solana, &exported).unwrap();
        assert_eq!(keypair.address(), restored.address());

        let bytes = bs58::decode(exported.as_str()).into_vec().unwrap();
        let json = serde_json::to_string(&bytes).unwrap();
        let from_json = WalletKeyPair::from_credential(ChainType::Solana, &json).unwrap();
        assert_eq!(keypair.address(), from_json.address());
    }

    #[test]
    fn mismatched_solana_keypair_is_rejected() {
        let keypair = WalletKeyPair::generate(ChainType::Solana);
        let mut bytes = bs58::decode(keypair.export_secret().as_str())
            .into_vec()
            .unwrap();
        bytes[40] ^= 0xff;
        let tampered = bs58::encode(bytes).into_string();
        let err = WalletKeyPair::from_credential(ChainType::Solana, &tampered).unwrap_err();
        assert!(matches!(err, WalletError::InvalidCredential(_)));
    }

    #[test]
    fn malformed_credentials_are_rejected() {
        for input in [
            "",
            "0x1234",
            "not a valid mnemonic phrase at all",
            "zzzz",
            "0x0000000000000000000000000000000000000000000000000000000000000000",
        ] {
            let err = WalletKeyPair::from_credential(ChainType::Ethereum, input).unwrap_err();
            assert!(
                matches!(err, WalletError::InvalidCredential(_)),
                "input {:?} gave {:?}",
                input,
                err
            );
        }
        let err = WalletKeyPair::from_credential(ChainType::Solana, "0OIl").unwrap_err();
        assert!(matches!(err, WalletError::InvalidCredential(_)));
    }

    #[test]
    fn personal_sign_recovers_to_signer_address() {
        let keypair = WalletKeyPair::from_credential(ChainType::Ethereum, HARDHAT_KEY).unwrap();
        let message = b"hello dapp";
        let signature = keypair.sign_message(message).unwrap();
        let bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();
        assert_eq!(bytes.len(), 65);
        assert!(bytes[64] == 27 || bytes[64] == 28);

        let sig = Signature::from_slice(&bytes[..64]).unwrap();
        let recid = RecoveryId::try_from(bytes[64] - 27).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(&eip191_hash(message), &sig, recid).unwrap();
        let point = recovered.to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        assert_eq!(checksum_encode(&address), keypair.address());
    }

    #[test]
    fn ed25519_signature_verifies() {
        use ed25519_dalek::Verifier;

        let keypair = WalletKeyPair::generate(ChainType::Solana);
        let signature = keypair.sign_message(b"gm").unwrap();
        let bytes: [u8; 64] = bs58::decode(signature)
            .into_vec()
            .unwrap()
            .try_into()
            .unwrap();
        let public = ed25519_dalek::VerifyingKey::from_bytes(
            &keypair.ed25519_public_key().unwrap(),
        )
        .unwrap();
        assert!(public
            .verify(b"gm", &ed25519_dalek::Signature::from_bytes(&bytes))
            .is_ok());
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let keypair = WalletKeyPair::generate(ChainType::Ethereum);
        let rendered = format!("{:?}", keypair);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&keypair.export_secret()[2..]));
    }
}
