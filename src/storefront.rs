//! Item page checkout flow

use crate::gateway::StoreGateway;
use crate::latch::ActionLatch;
use crate::oracle::PriceOracle;
use crate::registry::{SelectOption, Selection, TokenRegistry, TokenSnapshot};
use crate::resolver::{PaymentResolver, ResolverContext, SettlementOutcome};
use crate::types::{Item, PaymentMethod};
use crate::Result;
use std::sync::Arc;
use tracing::{error, info};

/// What the item page shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub item: Item,
    pub tokens: TokenSnapshot,
    /// Picker entries, native currency last
    pub options: Vec<SelectOption>,
}

/// Checkout for a single item
pub struct Checkout<G: StoreGateway> {
    gateway: Arc<G>,
    registry: Arc<TokenRegistry<G>>,
    resolver: PaymentResolver<G>,
    oracle: Arc<dyn PriceOracle>,
    item_id: String,
    latch: ActionLatch,
}

impl<G: StoreGateway> Checkout<G> {
    pub fn new(
        gateway: Arc<G>,
        registry: Arc<TokenRegistry<G>>,
        oracle: Arc<dyn PriceOracle>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            resolver: PaymentResolver::new(gateway.clone()),
            gateway,
            registry,
            oracle,
            item_id: item_id.into(),
            latch: ActionLatch::new("payment"),
        }
    }

    /// Headroom added to native payments, in basis points
    pub fn with_slippage_bps(mut self, bps: u32) -> Self {
        self.resolver = self.resolver.with_slippage_bps(bps);
        self
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Whether a payment is in flight
    pub fn is_paying(&self) -> bool {
        self.latch.is_busy()
    }

    /// Read the item price and a fresh token list
    pub async fn load(&self) -> Result<ItemView> {
        let price = self.gateway.item_price(&self.item_id).await?;
        let tokens = self.registry.refresh().await?;
        Ok(ItemView {
            item: Item::new(self.item_id.clone(), price),
            options: tokens.options(),
            tokens,
        })
    }

    /// Pay with the picker value `raw` taken from `view`. An empty value
    /// does nothing.
    ///
    /// The value is read against the list the page rendered, so a page left
    /// open across a token removal gets [`StaleSelection`] instead of paying
    /// with whatever token now sits at that position.
    ///
    /// [`StaleSelection`]: crate::StoreError::StaleSelection
    pub async fn pay(&self, view: &ItemView, raw: &str) -> Result<Option<SettlementOutcome>> {
        match view.tokens.parse(raw)? {
            Some(selection) => self.pay_with(&selection).await.map(Some),
            None => Ok(None),
        }
    }

    /// Pay with an already parsed selection
    pub async fn pay_with(&self, selection: &Selection) -> Result<SettlementOutcome> {
        let _guard = self.latch.try_acquire()?;

        let result = self.settle(selection).await;
        match &result {
            Ok(outcome) => info!(
                item_id = %self.item_id,
                method = %outcome.method,
                "payment successful"
            ),
            Err(e) => error!(item_id = %self.item_id, error = %e, "payment failed"),
        }
        result
    }

    async fn settle(&self, selection: &Selection) -> Result<SettlementOutcome> {
        let snapshot = self.registry.ensure_current(selection).await?;
        let price = self.gateway.item_price(&self.item_id).await?;
        let item = Item::new(self.item_id.clone(), price);

        let context = match selection.method {
            PaymentMethod::Native => {
                ResolverContext::with_native_price(self.oracle.native_price().await?)
            }
            PaymentMethod::Token(_) => ResolverContext::default(),
        };

        let plan = self.resolver.plan(selection, &snapshot, &item, &context)?;
        self.resolver.settle(&plan).await
    }
}
