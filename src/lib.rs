//! # popup-store - pop-up store payment client
//!
//! A Rust client for the pop-up store contract: a point of sale that accepts
//! payment in the chain's native currency or in any token from an
//! owner-managed list. This library provides the contract gateway, price
//! oracles, the payment resolver that turns a customer's pick into contract
//! calls, the admin flows and the `PaymentReceive` event feed.

pub mod abi;
pub mod admin;
pub mod blockchain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod gateway;
pub mod latch;
pub mod memory;
pub mod oracle;
pub mod registry;
pub mod resolver;
pub mod storefront;
pub mod types;
pub mod wallet;

// Re-exports for convenience
pub use admin::{AdminConsole, BalanceSheet};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use events::PaymentFeed;
pub use gateway::{RpcStoreGateway, StoreGateway};
pub use memory::InMemoryGateway;
pub use oracle::{PriceOracle, SharedPrice, StaticPriceOracle};
pub use registry::{Selection, TokenRegistry, TokenSnapshot};
pub use resolver::{PaymentResolver, SettlementOutcome, SettlementPlan};
pub use storefront::{Checkout, ItemView};
pub use types::*;

/// Current version of the popup-store library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::{Address, U256};

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_payment_token_serialization() {
        let token = PaymentToken::new("USDT", Address::repeat_byte(0x01));
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["tokenName"], "USDT");
        assert_eq!(
            json["tokenAddress"],
            "0x0101010101010101010101010101010101010101"
        );

        let back: PaymentToken = serde_json::from_value(json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_item_display_price() {
        let item = Item::new("123456789bb", U256::from(400u64) * U256::exp10(18));
        assert_eq!(item.display_price(), "400");
        assert!(item.is_priced());
        assert!(!Item::new("unpriced", U256::zero()).is_priced());
    }

    #[tokio::test]
    async fn test_reexported_flow() {
        let gateway = std::sync::Arc::new(InMemoryGateway::default());
        let registry = std::sync::Arc::new(TokenRegistry::new(gateway.clone()));
        let admin = AdminConsole::new(gateway.clone(), registry.clone());

        let tokens = admin
            .add_token("USDT", "0x0101010101010101010101010101010101010101")
            .await
            .unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(registry.snapshot().await.unwrap(), tokens);
    }
}
