/// Chain and network tables for the wallet
///
/// Every supported chain maps to an ordered list of networks; the first entry
/// is the default shown to users. Numeric EVM chain ids and Solana genesis
/// references are kept alongside so dApp namespaces can be resolved back to a
/// `(ChainType, NetworkDescriptor)` pair.
use crate::errors::{WalletError, WalletResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Blockchain family a wallet key pair belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Ethereum,
    Polygon,
    Solana,
    Binance,
}

/// Signing and addressing family shared by several chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    Evm,
    Solana,
}

impl ChainType {
    pub const ALL: [ChainType; 4] = [
        ChainType::Ethereum,
        ChainType::Polygon,
        ChainType::Solana,
        ChainType::Binance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Ethereum => "ethereum",
            ChainType::Polygon => "polygon",
            ChainType::Solana => "solana",
            ChainType::Binance => "binance",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            ChainType::Solana => ChainFamily::Solana,
            _ => ChainFamily::Evm,
        }
    }

    /// Decimal precision of the chain's native currency.
    pub fn native_decimals(&self) -> u8 {
        match self.family() {
            ChainFamily::Evm => 18,
            ChainFamily::Solana => 9,
        }
    }

    pub fn native_symbol(&self) -> &'static str {
        match self {
            ChainType::Ethereum => "ETH",
            ChainType::Polygon => "POL",
            ChainType::Solana => "SOL",
            ChainType::Binance => "BNB",
        }
    }

    /// Key under which the chain's private key is persisted.
    pub fn storage_key(&self) -> String {
        format!("wallet_{}", self.as_str())
    }

    /// Networks for this chain, default first.
    pub fn networks(&self) -> &'static [NetworkDescriptor] {
        match self {
            ChainType::Ethereum => ETHEREUM_NETWORKS,
            ChainType::Polygon => POLYGON_NETWORKS,
            ChainType::Solana => SOLANA_NETWORKS,
            ChainType::Binance => BINANCE_NETWORKS,
        }
    }

    pub fn default_network(&self) -> &'static NetworkDescriptor {
        &self.networks()[0]
    }

    pub fn find_network(&self, network: &str) -> Option<&'static NetworkDescriptor> {
        self.networks().iter().find(|n| n.id == network)
    }

    /// Resolve a numeric EVM chain id (e.g. `1`, `137`) to its chain and network.
    pub fn from_evm_chain_id(chain_id: u64) -> Option<(ChainType, &'static NetworkDescriptor)> {
        ChainType::ALL.iter().find_map(|chain| {
            chain
                .networks()
                .iter()
                .find(|n| n.reference == NetworkRef::Evm(chain_id))
                .map(|n| (*chain, n))
        })
    }

    /// Resolve a Solana CAIP-2 reference (truncated genesis hash).
    pub fn from_solana_reference(
        reference: &str,
    ) -> Option<(ChainType, &'static NetworkDescriptor)> {
        SOLANA_NETWORKS
            .iter()
            .find(|n| matches!(n.reference, NetworkRef::Solana(r) if r == reference))
            .map(|n| (ChainType::Solana, n))
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" => Ok(ChainType::Ethereum),
            "polygon" => Ok(ChainType::Polygon),
            "solana" => Ok(ChainType::Solana),
            "binance" => Ok(ChainType::Binance),
            other => Err(WalletError::UnsupportedChain(other.to_string())),
        }
    }
}

/// Identifier of one deployment of a chain (`mainnet`, `sepolia`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NetworkId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NetworkId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Protocol-level reference of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkRef {
    /// EIP-155 chain id.
    Evm(u64),
    /// CAIP-2 reference of a Solana cluster.
    Solana(&'static str),
}

/// Display name and identifier of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub name: &'static str,
    pub id: &'static str,
    pub reference: NetworkRef,
}

impl NetworkDescriptor {
    pub fn network_id(&self) -> NetworkId {
        NetworkId::from(self.id)
    }

    pub fn evm_chain_id(&self) -> Option<u64> {
        match self.reference {
            NetworkRef::Evm(id) => Some(id),
            NetworkRef::Solana(_) => None,
        }
    }

    /// CAIP-2 chain identifier, e.g. `eip155:1`.
    pub fn caip2(&self) -> String {
        match self.reference {
            NetworkRef::Evm(id) => format!("eip155:{}", id),
            NetworkRef::Solana(reference) => format!("solana:{}", reference),
        }
    }
}

const ETHEREUM_NETWORKS: &[NetworkDescriptor] = &[
    NetworkDescriptor {
        name: "Ethereum Mainnet",
        id: "mainnet",
        reference: NetworkRef::Evm(1),
    },
    NetworkDescriptor {
        name: "Sepolia",
        id: "sepolia",
        reference: NetworkRef::Evm(11_155_111),
    },
];

const POLYGON_NETWORKS: &[NetworkDescriptor] = &[
    NetworkDescriptor {
        name: "Polygon Mainnet",
        id: "mainnet",
        reference: NetworkRef::Evm(137),
    },
    NetworkDescriptor {
        name: "Polygon Amoy",
        id: "amoy",
        reference: NetworkRef::Evm(80_002),
    },
];

const BINANCE_NETWORKS: &[NetworkDescriptor] = &[
    NetworkDescriptor {
        name: "BNB Smart Chain",
        id: "mainnet",
        reference: NetworkRef::Evm(56),
    },
    NetworkDescriptor {
        name: "BNB Smart Chain Testnet",
        id: "testnet",
        reference: NetworkRef::Evm(97),
    },
];

const SOLANA_NETWORKS: &[NetworkDescriptor] = &[
    NetworkDescriptor {
        name: "Solana Mainnet Beta",
        id: "mainnet-beta",
        reference: NetworkRef::Solana("5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp"),
    },
    NetworkDescriptor {
        name: "Solana Devnet",
        id: "devnet",
        reference: NetworkRef::Solana("EtWTRABZaYq6iMfeYKouRu166VU2xqa1"),
    },
];

/// Token amount in base units with an explicit decimal precision.
///
/// Uses fixed-point arithmetic to avoid floating-point precision issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount {
    base_units: u128,
    decimals: u8,
}

impl Amount {
    /// Largest precision representable alongside a meaningful whole part in u128.
    pub const MAX_DECIMALS: u8 = 30;

    pub fn from_base_units(base_units: u128, decimals: u8) -> WalletResult<Self> {
        if decimals > Self::MAX_DECIMALS {
            return Err(WalletError::InvalidAmount(format!(
                "Unsupported precision: {} decimals",
                decimals
            )));
        }
        Ok(Amount {
            base_units,
            decimals,
        })
    }

    /// Parse a `0x`-prefixed hex quantity of base units (JSON-RPC style).
    pub fn from_hex_units(hex_str: &str, decimals: u8) -> WalletResult<Self> {
        let digits = hex_str
            .strip_prefix("0x")
            .or_else(|| hex_str.strip_prefix("0X"))
            .ok_or_else(|| WalletError::InvalidAmount("Hex quantity must start with 0x".into()))?;
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            return Self::from_base_units(0, decimals);
        }
        if trimmed.len() > 32 {
            return Err(WalletError::InvalidAmount("Amount overflow".to_string()));
        }
        let units = u128::from_str_radix(trimmed, 16)
            .map_err(|_| WalletError::InvalidAmount("Invalid hex quantity".to_string()))?;
        Self::from_base_units(units, decimals)
    }

    /// Parse a decimal string such as `"1.25"` at the given precision.
    pub fn from_decimal_str(amount_str: &str, decimals: u8) -> WalletResult<Self> {
        let amount_str = amount_str.trim();
        if amount_str.is_empty() {
            return Err(WalletError::InvalidAmount(
                "Amount cannot be empty".to_string(),
            ));
        }

        let (whole_str, frac_str) = match amount_str.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (amount_str, ""),
        };
        if frac_str.contains('.') {
            return Err(WalletError::InvalidAmount(
                "Invalid decimal format".to_string(),
            ));
        }
        if frac_str.len() > decimals as usize {
            return Err(WalletError::InvalidAmount(
                "Too many decimal places".to_string(),
            ));
        }

        let whole_part: u128 = if whole_str.is_empty() {
            0
        } else {
            whole_str
                .parse()
                .map_err(|_| WalletError::InvalidAmount("Invalid number format".to_string()))?
        };

        let fractional_units: u128 = if frac_str.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac_str, width = decimals as usize);
            padded
                .parse()
                .map_err(|_| WalletError::InvalidAmount("Invalid fractional part".to_string()))?
        };

        let total = whole_part
            .checked_mul(Self::unit(decimals)?)
            .and_then(|w| w.checked_add(fractional_units))
            .ok_or_else(|| WalletError::InvalidAmount("Amount overflow".to_string()))?;

        Self::from_base_units(total, decimals)
    }

    fn unit(decimals: u8) -> WalletResult<u128> {
        10_u128
            .checked_pow(decimals as u32)
            .ok_or_else(|| WalletError::InvalidAmount("Precision overflow".to_string()))
    }

    pub fn base_units(&self) -> u128 {
        self.base_units
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.base_units == 0
    }

    /// `0x`-prefixed hex quantity, as JSON-RPC expects.
    pub fn to_hex_units(&self) -> String {
        format!("0x{:x}", self.base_units)
    }

    /// Full-precision decimal string without trailing zeros.
    pub fn as_string(&self) -> String {
        let unit = 10_u128.pow(self.decimals as u32);
        let whole = self.base_units / unit;
        let fractional = self.base_units % unit;

        if fractional == 0 {
            whole.to_string()
        } else {
            let frac_str = format!("{:0width$}", fractional, width = self.decimals as usize);
            format!("{}.{}", whole, frac_str.trim_end_matches('0'))
        }
    }

    /// Decimal string rounded to at most `max_decimals` places.
    pub fn to_display_string(self, max_decimals: u8) -> String {
        if max_decimals >= self.decimals {
            return self.as_string();
        }

        let unit = 10_u128.pow(self.decimals as u32);
        let scale = 10_u128.pow((self.decimals - max_decimals) as u32);
        let rounded = self.base_units / scale + u128::from(self.base_units % scale >= scale / 2);
        let display_unit = unit / scale;
        let whole = rounded / display_unit;
        let fractional = rounded % display_unit;

        if fractional == 0 || max_decimals == 0 {
            whole.to_string()
        } else {
            let frac_str = format!("{:0width$}", fractional, width = max_decimals as usize);
            format!("{}.{}", whole, frac_str.trim_end_matches('0'))
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}
