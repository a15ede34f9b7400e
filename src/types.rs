//! Core types for the pop-up store

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash of a submitted transaction
pub type TxHash = H256;

/// Decimals used for item prices and for every amount typed by an operator
pub const REFERENCE_DECIMALS: u32 = 18;

/// A token the store accepts as payment.
///
/// Tokens are identified by their position in the list returned by the
/// contract. Positions shift on removal, so an index is only meaningful
/// against the list it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentToken {
    /// Display name registered alongside the token
    #[serde(rename = "tokenName")]
    pub name: String,
    /// Token contract address
    #[serde(rename = "tokenAddress")]
    pub address: Address,
}

impl PaymentToken {
    /// Create a new payment token
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

/// A product sold by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Opaque product identifier
    #[serde(rename = "itemId")]
    pub item_id: String,
    /// Price in 18-decimal reference units
    pub price: U256,
}

impl Item {
    /// Create a new item
    pub fn new(item_id: impl Into<String>, price: U256) -> Self {
        Self {
            item_id: item_id.into(),
            price,
        }
    }

    /// Price formatted as a decimal string, "0" when unset
    pub fn display_price(&self) -> String {
        units::format_units(self.price, REFERENCE_DECIMALS)
    }

    /// Whether a price has been set for this item
    pub fn is_priced(&self) -> bool {
        !self.price.is_zero()
    }
}

/// How a payment or withdrawal is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// The chain's base currency, sent as transaction value
    Native,
    /// A registered token, by position in the token list
    Token(usize),
}

impl PaymentMethod {
    /// Whether this is the native-currency method
    pub fn is_native(&self) -> bool {
        matches!(self, PaymentMethod::Native)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Native => write!(f, "native"),
            PaymentMethod::Token(index) => write!(f, "token #{}", index),
        }
    }
}

/// A `PaymentReceive` log entry emitted by the store contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Paying account
    #[serde(rename = "payersAddress")]
    pub payer: Address,
    /// Free-form transaction description written by the contract
    #[serde(rename = "txDetails")]
    pub tx_details: String,
    /// Purchased item
    #[serde(rename = "itemId")]
    pub item_id: String,
    /// Amount paid in the token's (or native currency's) base units
    pub amount: U256,
    /// Name of the token used
    #[serde(rename = "tokenName")]
    pub token_name: String,
    /// Address of the token used (zero for native payments)
    #[serde(rename = "tokenAddress")]
    pub token_address: Address,
    /// Block time of the payment, unix seconds
    pub timestamp: u64,
    /// Block, transaction and receipt detail, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<LogDetails>,
}

impl PaymentEvent {
    /// Position of the event in chain order
    pub fn ordering_key(&self) -> (u64, u64) {
        self.details
            .as_ref()
            .map(|d| (d.block_number, d.log_index))
            .unwrap_or((0, 0))
    }

    /// Payment time as a UTC datetime
    pub fn paid_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp as i64, 0)
    }
}

/// Where a log entry sits on chain and what its transaction looked like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDetails {
    pub block_number: u64,
    pub block_hash: H256,
    pub transaction_hash: TxHash,
    pub log_index: u64,
    /// Sender of the emitting transaction (from the receipt)
    pub transaction_from: Option<Address>,
    /// Gas consumed by the emitting transaction (from the receipt)
    pub gas_used: Option<U256>,
    /// Receipt status
    pub success: Option<bool>,
}

/// Decimal-string conversions for on-chain amounts.
///
/// All conversions are exact: no floating point is involved, and inputs
/// carrying more fractional digits than the unit allows are rejected.
pub mod units {
    use crate::{Result, StoreError};
    use ethereum_types::U256;

    /// Parse a decimal string such as `"400"` or `"0.25"` into base units
    pub fn parse_units(value: &str, decimals: u32) -> Result<U256> {
        let value = value.trim();
        if value.is_empty() {
            return Err(StoreError::invalid_amount("amount is empty"));
        }

        let (int_part, frac_part) = match value.split_once('.') {
            Some((i, f)) => (i, f),
            None => (value, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(StoreError::invalid_amount(format!("'{}' has no digits", value)));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(StoreError::invalid_amount(format!(
                "'{}' is not a decimal number",
                value
            )));
        }
        if frac_part.len() > decimals as usize {
            return Err(StoreError::invalid_amount(format!(
                "'{}' has more than {} fractional digits",
                value, decimals
            )));
        }

        let mut digits = String::with_capacity(int_part.len() + decimals as usize);
        digits.push_str(int_part);
        digits.push_str(frac_part);
        for _ in frac_part.len()..decimals as usize {
            digits.push('0');
        }
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(U256::zero());
        }

        U256::from_dec_str(digits)
            .map_err(|_| StoreError::invalid_amount(format!("'{}' does not fit in 256 bits", value)))
    }

    /// Format base units as a decimal string without trailing zeros
    pub fn format_units(value: U256, decimals: u32) -> String {
        let raw = value.to_string();
        let decimals = decimals as usize;
        if decimals == 0 {
            return raw;
        }

        let padded = if raw.len() <= decimals {
            format!("{}{}", "0".repeat(decimals + 1 - raw.len()), raw)
        } else {
            raw
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
        let frac_part = frac_part.trim_end_matches('0');

        if frac_part.is_empty() {
            int_part.to_string()
        } else {
            format!("{}.{}", int_part, frac_part)
        }
    }

    /// Parse an 18-decimal amount
    pub fn parse_ether(value: &str) -> Result<U256> {
        parse_units(value, super::REFERENCE_DECIMALS)
    }

    /// Format an 18-decimal amount
    pub fn format_ether(value: U256) -> String {
        format_units(value, super::REFERENCE_DECIMALS)
    }
}

/// Known deployments and chain constants
pub mod networks {
    /// Local hardhat node
    pub const HARDHAT: &str = "hardhat";
    /// Ethereum Sepolia testnet
    pub const SEPOLIA: &str = "sepolia";

    /// Default JSON-RPC endpoint of a local hardhat node
    pub const HARDHAT_RPC_URL: &str = "http://127.0.0.1:8545";

    /// Chainlink ETH/USD aggregator on Sepolia, the feed the store is deployed against
    pub const SEPOLIA_ETH_USD_FEED: &str = "0x694AA1769357215DE4FAC081bf1f309aDC325306";

    /// Chain id for a known network name
    pub fn chain_id(network: &str) -> Option<u64> {
        match network {
            HARDHAT => Some(31337),
            SEPOLIA => Some(11_155_111),
            _ => None,
        }
    }

    /// Check if a network is known
    pub fn is_supported(network: &str) -> bool {
        chain_id(network).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::units::*;
    use super::*;

    #[test]
    fn test_parse_units_whole_and_fractional() {
        assert_eq!(
            parse_ether("400").unwrap(),
            U256::from(400u64) * U256::exp10(18)
        );
        assert_eq!(parse_ether("0.5").unwrap(), U256::exp10(17) * U256::from(5u64));
        assert_eq!(parse_ether(".5").unwrap(), U256::exp10(17) * U256::from(5u64));
        assert_eq!(parse_ether("0").unwrap(), U256::zero());
        assert_eq!(parse_units("1.25", 6).unwrap(), U256::from(1_250_000u64));
    }

    #[test]
    fn test_parse_units_rejects_garbage() {
        assert!(parse_ether("").is_err());
        assert!(parse_ether(".").is_err());
        assert!(parse_ether("1.2.3").is_err());
        assert!(parse_ether("-1").is_err());
        assert!(parse_ether("1e18").is_err());
        assert!(parse_units("0.1234567", 6).is_err());
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_ether(U256::from(400u64) * U256::exp10(18)), "400");
        assert_eq!(format_ether(U256::exp10(17) * U256::from(5u64)), "0.5");
        assert_eq!(format_ether(U256::one()), "0.000000000000000001");
        assert_eq!(format_ether(U256::zero()), "0");
        assert_eq!(format_units(U256::from(1_250_000u64), 6), "1.25");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
    }

    #[test]
    fn test_item_display_price() {
        let item = Item::new("123456789bb", parse_ether("19.99").unwrap());
        assert_eq!(item.display_price(), "19.99");
        assert!(item.is_priced());
        assert!(!Item::new("unpriced", U256::zero()).is_priced());
    }

    #[test]
    fn test_payment_token_serde_names() {
        let token = PaymentToken::new("USDT", Address::repeat_byte(0x11));
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["tokenName"], "USDT");
        assert!(json["tokenAddress"]
            .as_str()
            .unwrap()
            .starts_with("0x1111"));
    }

    #[test]
    fn test_networks() {
        assert_eq!(networks::chain_id(networks::HARDHAT), Some(31337));
        assert_eq!(networks::chain_id(networks::SEPOLIA), Some(11_155_111));
        assert!(!networks::is_supported("unsupported-network"));
    }
}
