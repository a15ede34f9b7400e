//! Client configuration
//!
//! A [`StoreConfig`] describes how to reach a deployed store: the node, the
//! contract, who signs, where the native price comes from and how receipts
//! are awaited. It loads from `POPUP_STORE_*` environment variables or a
//! JSON file and builds the matching gateway and price oracle.

use crate::blockchain::{BlockchainClient, ReceiptPolling, TransactionSigner};
use crate::gateway::{parse_address, RpcStoreGateway};
use crate::oracle::{FeedPriceOracle, PriceOracle, SharedPrice, StaticPriceOracle};
use crate::types::networks;
use crate::wallet::WalletFactory;
use crate::{Result, StoreError};
use ethereum_types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Configuration for a store client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON-RPC endpoint of the node
    pub rpc_url: String,
    /// Deployed store contract
    pub store_address: String,
    /// Network name (`hardhat`, `sepolia`)
    pub network: String,
    /// Chain id for transaction signing; derived from `network` when unset
    pub chain_id: Option<u64>,
    /// Node-managed account that sends transactions
    pub sender: Option<String>,
    /// Private key for local signing; takes precedence over `sender`
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    /// First block scanned for payment events
    pub from_block: u64,
    /// Chainlink ETH/USD aggregator address
    pub price_feed: Option<String>,
    /// Fixed native price, overriding the feed
    pub native_price: Option<Decimal>,
    /// Reject feed answers older than this many seconds
    pub feed_max_age_secs: Option<u64>,
    /// Headroom added to native payments, in basis points
    pub slippage_bps: u32,
    pub receipt_poll_interval_ms: u64,
    pub receipt_poll_attempts: u32,
    /// Fetch receipt detail for every payment event
    pub with_receipts: bool,
    /// HTTP timeout for RPC requests
    pub request_timeout_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let polling = ReceiptPolling::default();
        Self {
            rpc_url: networks::HARDHAT_RPC_URL.to_string(),
            store_address: String::new(),
            network: networks::HARDHAT.to_string(),
            chain_id: None,
            sender: None,
            private_key: None,
            from_block: 1,
            price_feed: None,
            native_price: None,
            feed_max_age_secs: None,
            slippage_bps: 0,
            receipt_poll_interval_ms: polling.interval.as_millis() as u64,
            receipt_poll_attempts: polling.attempts,
            with_receipts: true,
            request_timeout_secs: Some(30),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| StoreError::config(format!("Invalid {}: {}", name, e)))
}

impl StoreConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::config(format!("Failed to read config file: {}", e)))?;

        let config: StoreConfig = serde_json::from_str(&content)
            .map_err(|e| StoreError::config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `POPUP_STORE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration from `POPUP_STORE_*` settings resolved by `lookup`.
    /// Blank values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(rpc_url) = env_var("POPUP_STORE_RPC_URL") {
            config.rpc_url = rpc_url;
        }

        if let Some(store_address) = env_var("POPUP_STORE_ADDRESS") {
            config.store_address = store_address;
        }

        if let Some(network) = env_var("POPUP_STORE_NETWORK") {
            config.network = network;
        }

        if let Some(chain_id) = env_var("POPUP_STORE_CHAIN_ID") {
            config.chain_id = Some(parse_env("POPUP_STORE_CHAIN_ID", &chain_id)?);
        }

        if let Some(sender) = env_var("POPUP_STORE_SENDER") {
            config.sender = Some(sender);
        }

        if let Some(private_key) = env_var("POPUP_STORE_PRIVATE_KEY") {
            config.private_key = Some(private_key);
        }

        if let Some(from_block) = env_var("POPUP_STORE_FROM_BLOCK") {
            config.from_block = parse_env("POPUP_STORE_FROM_BLOCK", &from_block)?;
        }

        if let Some(price_feed) = env_var("POPUP_STORE_PRICE_FEED") {
            config.price_feed = Some(price_feed);
        }

        if let Some(native_price) = env_var("POPUP_STORE_NATIVE_PRICE") {
            config.native_price = Some(parse_env("POPUP_STORE_NATIVE_PRICE", &native_price)?);
        }

        if let Some(max_age) = env_var("POPUP_STORE_FEED_MAX_AGE_SECS") {
            config.feed_max_age_secs = Some(parse_env("POPUP_STORE_FEED_MAX_AGE_SECS", &max_age)?);
        }

        if let Some(slippage) = env_var("POPUP_STORE_SLIPPAGE_BPS") {
            config.slippage_bps = parse_env("POPUP_STORE_SLIPPAGE_BPS", &slippage)?;
        }

        if let Some(interval) = env_var("POPUP_STORE_RECEIPT_POLL_INTERVAL_MS") {
            config.receipt_poll_interval_ms =
                parse_env("POPUP_STORE_RECEIPT_POLL_INTERVAL_MS", &interval)?;
        }

        if let Some(attempts) = env_var("POPUP_STORE_RECEIPT_POLL_ATTEMPTS") {
            config.receipt_poll_attempts = parse_env("POPUP_STORE_RECEIPT_POLL_ATTEMPTS", &attempts)?;
        }

        if let Some(with_receipts) = env_var("POPUP_STORE_WITH_RECEIPTS") {
            config.with_receipts = parse_env("POPUP_STORE_WITH_RECEIPTS", &with_receipts)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.rpc_url)
            .map_err(|e| StoreError::config(format!("Invalid POPUP_STORE_RPC_URL: {}", e)))?;

        if self.store_address.is_empty() {
            return Err(StoreError::config("POPUP_STORE_ADDRESS is required"));
        }
        parse_address(&self.store_address)?;

        if self.private_key.is_none() && self.sender.is_none() {
            return Err(StoreError::config(
                "Either POPUP_STORE_PRIVATE_KEY or POPUP_STORE_SENDER is required",
            ));
        }
        if let Some(sender) = &self.sender {
            parse_address(sender)?;
        }
        if self.private_key.is_some() {
            self.resolved_chain_id()?;
        }

        if let Some(feed) = &self.price_feed {
            parse_address(feed)?;
        }
        if let Some(price) = self.native_price {
            if price <= Decimal::ZERO {
                return Err(StoreError::config("POPUP_STORE_NATIVE_PRICE must be positive"));
            }
        }

        if self.slippage_bps > 10_000 {
            return Err(StoreError::config("POPUP_STORE_SLIPPAGE_BPS cannot exceed 10000"));
        }
        if self.receipt_poll_attempts == 0 {
            return Err(StoreError::config(
                "POPUP_STORE_RECEIPT_POLL_ATTEMPTS must be positive",
            ));
        }

        Ok(())
    }

    /// Parsed store contract address
    pub fn store(&self) -> Result<Address> {
        parse_address(&self.store_address)
    }

    /// Explicit chain id, or the one of the named network
    pub fn resolved_chain_id(&self) -> Result<u64> {
        self.chain_id
            .or_else(|| networks::chain_id(&self.network))
            .ok_or_else(|| {
                StoreError::config(format!(
                    "Unknown network '{}'; set POPUP_STORE_CHAIN_ID",
                    self.network
                ))
            })
    }

    /// Receipt polling settings
    pub fn receipt_polling(&self) -> ReceiptPolling {
        ReceiptPolling {
            interval: Duration::from_millis(self.receipt_poll_interval_ms),
            attempts: self.receipt_poll_attempts,
        }
    }

    fn signer(&self) -> Result<TransactionSigner> {
        if let Some(private_key) = &self.private_key {
            let wallet = WalletFactory::from_private_key(private_key, self.resolved_chain_id()?)?;
            return Ok(TransactionSigner::Local(wallet));
        }
        match &self.sender {
            Some(sender) => Ok(TransactionSigner::Node(parse_address(sender)?)),
            None => Err(StoreError::config("No transaction signer configured")),
        }
    }

    fn client_with(&self, signer: TransactionSigner) -> Result<BlockchainClient> {
        let client =
            BlockchainClient::new(self.rpc_url.clone(), signer).with_polling(self.receipt_polling());
        match self.request_timeout_secs {
            Some(secs) => client.with_timeout(Duration::from_secs(secs)),
            None => Ok(client),
        }
    }

    /// JSON-RPC client that signs with the configured account
    pub fn build_client(&self) -> Result<BlockchainClient> {
        self.client_with(self.signer()?)
    }

    /// Gateway to the configured store contract
    pub fn build_gateway(&self) -> Result<RpcStoreGateway> {
        let client = self.build_client()?;
        info!(
            rpc_url = %self.rpc_url,
            store = %self.store_address,
            sender = ?client.sender(),
            "store gateway configured"
        );
        let gateway = RpcStoreGateway::new(client, self.store()?);
        Ok(if self.with_receipts {
            gateway
        } else {
            gateway.without_receipts()
        })
    }

    /// Native price source: the fixed price if set, else the configured
    /// feed (Sepolia's ETH/USD feed by default), else an empty shared price
    /// that refuses native payments until someone sets it.
    pub fn build_oracle(&self) -> Result<Arc<dyn PriceOracle>> {
        if let Some(price) = self.native_price {
            return Ok(Arc::new(StaticPriceOracle::new(price)));
        }

        let feed = match (&self.price_feed, self.network.as_str()) {
            (Some(feed), _) => Some(parse_address(feed)?),
            (None, networks::SEPOLIA) => Some(parse_address(networks::SEPOLIA_ETH_USD_FEED)?),
            (None, _) => None,
        };

        match feed {
            Some(feed) => {
                // Reads only; the sender is never used.
                let client = self.client_with(TransactionSigner::Node(Address::zero()))?;
                let mut oracle = FeedPriceOracle::new(Arc::new(client), feed);
                if let Some(secs) = self.feed_max_age_secs {
                    oracle = oracle.with_max_age(Duration::from_secs(secs));
                }
                Ok(Arc::new(oracle))
            }
            None => Ok(Arc::new(SharedPrice::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const STORE: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
    const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn node_config() -> StoreConfig {
        StoreConfig {
            store_address: STORE.to_string(),
            sender: Some("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_needs_store_and_signer() {
        let config = StoreConfig::default();
        assert_eq!(config.rpc_url, networks::HARDHAT_RPC_URL);
        assert_eq!(config.from_block, 1);
        assert!(config.validate().is_err());

        assert!(node_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = node_config();
        config.rpc_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = node_config();
        config.store_address = "0x1234".to_string();
        assert!(config.validate().is_err());

        let mut config = node_config();
        config.native_price = Some(Decimal::ZERO);
        assert!(config.validate().is_err());

        let mut config = node_config();
        config.private_key = Some(HARDHAT_KEY.to_string());
        config.network = "mainnet".to_string();
        assert!(config.validate().is_err());
        config.chain_id = Some(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rpcUrl": "ignored", "store_address": "{}", "sender": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266", "network": "sepolia", "slippage_bps": 100}}"#,
            STORE
        )
        .unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.network, "sepolia");
        assert_eq!(config.slippage_bps, 100);
        assert_eq!(config.resolved_chain_id().unwrap(), 11_155_111);
        assert_eq!(config.rpc_url, networks::HARDHAT_RPC_URL);

        assert!(StoreConfig::from_file("/nonexistent/store.json").is_err());
    }

    fn lookup(vars: &HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        let vars = vars.clone();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_vars() {
        let mut vars = HashMap::from([
            ("POPUP_STORE_ADDRESS", STORE.to_string()),
            ("POPUP_STORE_PRIVATE_KEY", HARDHAT_KEY.to_string()),
            ("POPUP_STORE_NATIVE_PRICE", "2500.5".to_string()),
            ("POPUP_STORE_FROM_BLOCK", "42".to_string()),
            ("POPUP_STORE_SENDER", "  ".to_string()),
        ]);

        let config = StoreConfig::from_vars(lookup(&vars)).unwrap();
        assert_eq!(config.from_block, 42);
        assert_eq!(config.native_price, Some(Decimal::from_str("2500.5").unwrap()));
        assert_eq!(config.sender, None);

        let client = config.build_client().unwrap();
        assert_eq!(
            client.sender(),
            parse_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
        );

        vars.insert("POPUP_STORE_FROM_BLOCK", "soon".to_string());
        let err = StoreConfig::from_vars(lookup(&vars)).unwrap_err();
        assert!(
            err.to_string().contains("POPUP_STORE_FROM_BLOCK"),
            "Error message MUST name the bad setting - actual: {}",
            err
        );

        vars.remove("POPUP_STORE_ADDRESS");
        vars.insert("POPUP_STORE_FROM_BLOCK", "42".to_string());
        assert!(StoreConfig::from_vars(lookup(&vars)).is_err());
    }

    #[test]
    fn test_private_key_is_not_serialized() {
        let mut config = node_config();
        config.private_key = Some(HARDHAT_KEY.to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("ac0974"));
    }

    #[tokio::test]
    async fn test_oracle_selection() {
        let mut config = node_config();
        config.native_price = Some(Decimal::from(2000));
        let oracle = config.build_oracle().unwrap();
        assert_eq!(oracle.native_price().await.unwrap(), Decimal::from(2000));

        let config = node_config();
        let oracle = config.build_oracle().unwrap();
        assert!(matches!(
            oracle.native_price().await,
            Err(StoreError::OracleUnavailable { .. })
        ));
    }
}
