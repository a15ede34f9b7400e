//! Error types for the pop-up store client

use ethereum_types::H256;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Decimal conversion error
    #[error("Decimal error: {0}")]
    Decimal(#[from] rust_decimal::Error),

    /// JSON-RPC level failure (transport succeeded, node answered with an error)
    #[error("RPC error: {message}")]
    Rpc { message: String },

    /// The node accepted the transaction but execution reverted
    #[error("Transaction reverted: {reason}")]
    Reverted { reason: String },

    /// Receipt did not show up within the configured polling window
    #[error("Transaction {hash} not mined after {attempts} receipt polls")]
    ReceiptNotFound { hash: String, attempts: u32 },

    /// ABI encoding or decoding failure
    #[error("ABI error: {message}")]
    Abi { message: String },

    /// Token selection is neither a token index nor the native-currency entry
    #[error("Invalid selection: {value} (token list has {token_count} entries)")]
    InvalidSelection { value: String, token_count: usize },

    /// Selection was made against a token list that has since changed
    #[error("Stale selection: made against token list generation {selected}, current is {current}")]
    StaleSelection { selected: u64, current: u64 },

    /// A token list change went through but the list could not be re-read
    #[error("Transaction {tx_hash:?} was accepted but the token list could not be re-read: {reason}")]
    ListRefreshFailed { tx_hash: H256, reason: String },

    /// Malformed or out-of-range amount
    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    /// Malformed address
    #[error("Invalid address: {value}")]
    InvalidAddress { value: String },

    /// Price or conversion rate is unusable
    #[error("Invalid price: {message}")]
    InvalidPrice { message: String },

    /// The price oracle has no rate to offer
    #[error("Price oracle unavailable: {reason}")]
    OracleUnavailable { reason: String },

    /// An action is already running
    #[error("Action already in progress: {action}")]
    ActionInProgress { action: String },

    /// Signing error
    #[error("Signing error: {message}")]
    Signing { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Create an RPC error
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
        }
    }

    /// Create a reverted-transaction error
    pub fn reverted(reason: impl Into<String>) -> Self {
        Self::Reverted {
            reason: reason.into(),
        }
    }

    /// Create an ABI error
    pub fn abi(message: impl Into<String>) -> Self {
        Self::Abi {
            message: message.into(),
        }
    }

    /// Create an invalid amount error
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        Self::InvalidAmount {
            message: message.into(),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address(value: impl Into<String>) -> Self {
        Self::InvalidAddress {
            value: value.into(),
        }
    }

    /// Create an invalid price error
    pub fn invalid_price(message: impl Into<String>) -> Self {
        Self::InvalidPrice {
            message: message.into(),
        }
    }

    /// Create an oracle unavailable error
    pub fn oracle_unavailable(reason: impl Into<String>) -> Self {
        Self::OracleUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an action-in-progress error
    pub fn action_in_progress(action: impl Into<String>) -> Self {
        Self::ActionInProgress {
            action: action.into(),
        }
    }

    /// Create a signing error
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the failure came from the chain rejecting the call, as opposed
    /// to transport or local validation.
    pub fn is_on_chain(&self) -> bool {
        matches!(self, Self::Reverted { .. } | Self::ReceiptNotFound { .. })
    }
}
