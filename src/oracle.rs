//! Native-currency price sources
//!
//! A rate is the number of reference units (the unit item prices are set
//! in) one whole native coin is worth, e.g. `2500.12` for ETH/USD.

use crate::abi::{self, signatures};
use crate::blockchain::BlockchainClient;
use crate::{Result, StoreError};
use async_trait::async_trait;
use ethereum_types::Address;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Source of the native-currency conversion rate
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn native_price(&self) -> Result<Decimal>;
}

fn ensure_positive(rate: Decimal) -> Result<Decimal> {
    if rate <= Decimal::ZERO {
        return Err(StoreError::invalid_price(format!(
            "conversion rate must be positive, got {}",
            rate
        )));
    }
    Ok(rate)
}

/// Oracle with a fixed rate
#[derive(Debug, Clone, Copy)]
pub struct StaticPriceOracle {
    rate: Decimal,
}

impl StaticPriceOracle {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn native_price(&self) -> Result<Decimal> {
        ensure_positive(self.rate)
    }
}

/// Process-wide rate cell.
///
/// Whoever polls the real price source calls [`set`](SharedPrice::set);
/// checkouts read the latest value. Clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct SharedPrice {
    rate: Arc<RwLock<Option<Decimal>>>,
}

impl SharedPrice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new rate
    pub async fn set(&self, rate: Decimal) -> Result<()> {
        let rate = ensure_positive(rate)?;
        *self.rate.write().await = Some(rate);
        Ok(())
    }

    /// Forget the current rate
    pub async fn clear(&self) {
        *self.rate.write().await = None;
    }

    /// Latest published rate, if any
    pub async fn get(&self) -> Option<Decimal> {
        *self.rate.read().await
    }

    /// Copy the current value of `source` into this cell
    pub async fn refresh_from(&self, source: &dyn PriceOracle) -> Result<Decimal> {
        let rate = source.native_price().await?;
        self.set(rate).await?;
        Ok(rate)
    }
}

#[async_trait]
impl PriceOracle for SharedPrice {
    async fn native_price(&self) -> Result<Decimal> {
        self.get()
            .await
            .ok_or_else(|| StoreError::oracle_unavailable("no native price published yet"))
    }
}

/// Every way a feed read can fail surfaces as `OracleUnavailable`
fn unavailable(e: StoreError) -> StoreError {
    match e {
        StoreError::OracleUnavailable { .. } => e,
        other => StoreError::oracle_unavailable(other.to_string()),
    }
}

/// Chainlink AggregatorV3 price feed read over JSON-RPC
pub struct FeedPriceOracle {
    client: Arc<BlockchainClient>,
    feed: Address,
    /// Reject answers older than this
    max_age: Option<Duration>,
}

impl std::fmt::Debug for FeedPriceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPriceOracle")
            .field("feed", &self.feed)
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl FeedPriceOracle {
    pub fn new(client: Arc<BlockchainClient>, feed: Address) -> Self {
        Self {
            client,
            feed,
            max_age: None,
        }
    }

    /// Reject rounds last updated more than `max_age` ago
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    async fn decimals(&self) -> Result<u32> {
        let data = self
            .client
            .call(self.feed, &abi::encode_call(signatures::FEED_DECIMALS, &[]))
            .await?;
        let decimals = abi::read_uint(&data, 0)?;
        if decimals > 28u64.into() {
            return Err(StoreError::oracle_unavailable(format!(
                "feed reports {} decimals",
                decimals
            )));
        }
        Ok(decimals.low_u32())
    }
}

#[async_trait]
impl PriceOracle for FeedPriceOracle {
    async fn native_price(&self) -> Result<Decimal> {
        let decimals = self.decimals().await.map_err(unavailable)?;
        let data = self
            .client
            .call(
                self.feed,
                &abi::encode_call(signatures::FEED_LATEST_ROUND_DATA, &[]),
            )
            .await
            .map_err(unavailable)?;
        let round = abi::decode_round_data(&data).map_err(unavailable)?;

        let answer = round
            .answer
            .filter(|a| !a.is_zero())
            .ok_or_else(|| StoreError::oracle_unavailable("feed answer is not positive"))?;
        if answer > u64::MAX.into() {
            return Err(StoreError::oracle_unavailable("feed answer out of range"));
        }

        if let Some(max_age) = self.max_age {
            let now = chrono::Utc::now().timestamp().max(0) as u64;
            let age = now.saturating_sub(round.updated_at);
            if age > max_age.as_secs() {
                return Err(StoreError::oracle_unavailable(format!(
                    "feed answer is {}s old",
                    age
                )));
            }
        }

        let rate = Decimal::from_i128_with_scale(answer.low_u64() as i128, decimals);
        debug!(feed = ?self.feed, %rate, round = %round.round_id, "read price feed");
        ensure_positive(rate)
    }
}
