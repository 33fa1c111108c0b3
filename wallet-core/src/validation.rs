use crate::chain::{Amount, ChainFamily, ChainType};
use crate::errors::{WalletError, WalletResult};
use regex::Regex;

/// Longest text shown verbatim in an approval prompt.
pub const MAX_DISPLAY_LEN: usize = 200;

/// Input validation for user- and dApp-supplied values
pub struct InputValidator {
    evm_address_pattern: Regex,
    amount_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let evm_address_pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid address regex: {}", e)))?;

        let amount_pattern = Regex::new(r"^\d+(\.\d+)?$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid amount regex: {}", e)))?;

        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                WalletError::ValidationError(format!("Invalid security regex: {}", e))
            })
        })
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            evm_address_pattern,
            amount_pattern,
            malicious_patterns,
        })
    }

    /// Validate a destination address in the chain's native format.
    pub fn validate_address(&self, chain: ChainType, address: &str) -> WalletResult<()> {
        self.check_basic_security(address)?;

        if address.is_empty() {
            return Err(WalletError::ValidationError(
                "Address cannot be empty".to_string(),
            ));
        }

        if address.len() > 100 {
            return Err(WalletError::ValidationError("Address too long".to_string()));
        }

        let valid = match chain.family() {
            ChainFamily::Evm => self.evm_address_pattern.is_match(address),
            ChainFamily::Solana => bs58::decode(address)
                .into_vec()
                .map(|bytes| bytes.len() == 32)
                .unwrap_or(false),
        };
        if !valid {
            return Err(WalletError::InvalidAddress(format!(
                "{} is not a valid {} address",
                address, chain
            )));
        }

        Ok(())
    }

    /// Parse a positive decimal amount of the chain's native currency.
    pub fn parse_amount(&self, chain: ChainType, amount: &str) -> WalletResult<Amount> {
        self.check_basic_security(amount)?;

        if amount.is_empty() {
            return Err(WalletError::ValidationError(
                "Amount cannot be empty".to_string(),
            ));
        }

        if !self.amount_pattern.is_match(amount) {
            return Err(WalletError::InvalidAmount(
                "Amount format is invalid".to_string(),
            ));
        }

        let parsed = Amount::from_decimal_str(amount, chain.native_decimals())?;
        if parsed.is_zero() {
            return Err(WalletError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        Ok(parsed)
    }

    /// Check for basic security issues in any input
    pub fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.len() > 1000 {
            return Err(WalletError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        for pattern in &self.malicious_patterns {
            if pattern.is_match(&lowered) {
                return Err(WalletError::ValidationError(
                    "Input contains potentially malicious content".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Strip control characters and bound the length of text a dApp controls.
pub fn sanitize_display(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DISPLAY_LEN)
        .collect();
    if input.chars().filter(|c| !c.is_control()).count() > MAX_DISPLAY_LEN {
        format!("{}...", cleaned)
    } else {
        cleaned
    }
}
