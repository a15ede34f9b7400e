//! Payment resolution and settlement
//!
//! Turns a payment selection and an item price into the contract calls that
//! settle it:
//! - tokens: `approve(store, price)` on the token, then `payWithToken`
//! - native currency: one `payWithEth` carrying the converted value
//!
//! Planning is pure and separate from execution so the decision can be
//! inspected (and tested) without touching a chain.

use crate::gateway::StoreGateway;
use crate::registry::{Selection, TokenSnapshot};
use crate::types::{Item, PaymentMethod, TxHash};
use crate::{Result, StoreError};
use ethereum_types::{Address, U256};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};

/// Basis-point denominator
const BPS: u64 = 10_000;

/// Inputs the resolver needs from outside the selection itself
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverContext {
    /// Reference units per native coin; only read for native payments
    pub native_price: Option<Decimal>,
}

impl ResolverContext {
    pub fn with_native_price(native_price: Decimal) -> Self {
        Self {
            native_price: Some(native_price),
        }
    }
}

/// The calls that will settle one payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementPlan {
    Native {
        item_id: String,
        /// Value attached to `payWithEth`, in wei
        value: U256,
    },
    Token {
        index: usize,
        /// Token contract the approval is sent to
        token: Address,
        /// Store contract the approval is granted to
        spender: Address,
        item_id: String,
        /// Amount approved and paid
        amount: U256,
    },
}

impl SettlementPlan {
    pub fn method(&self) -> PaymentMethod {
        match self {
            SettlementPlan::Native { .. } => PaymentMethod::Native,
            SettlementPlan::Token { index, .. } => PaymentMethod::Token(*index),
        }
    }

    pub fn item_id(&self) -> &str {
        match self {
            SettlementPlan::Native { item_id, .. } | SettlementPlan::Token { item_id, .. } => {
                item_id
            }
        }
    }
}

/// Result of an accepted settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub method: PaymentMethod,
    /// Transactions sent, in order (approval first for tokens)
    pub transactions: Vec<TxHash>,
}

/// Convert an 18-decimal reference price to wei at `rate` reference units
/// per coin.
///
/// With the rate written as `mantissa / 10^scale` the result is
/// `floor(price * 10^scale / mantissa)`, computed in 256-bit integers.
pub fn native_amount(price: U256, rate: Decimal) -> Result<U256> {
    if rate <= Decimal::ZERO {
        return Err(StoreError::invalid_price(format!(
            "conversion rate must be positive, got {}",
            rate
        )));
    }

    let mantissa = U256::from(rate.mantissa().unsigned_abs());
    let scaled = price
        .checked_mul(U256::exp10(rate.scale() as usize))
        .ok_or_else(|| StoreError::invalid_amount("price too large to convert"))?;
    Ok(scaled / mantissa)
}

/// Raise `value` by `bps` basis points, rounding down
pub fn apply_slippage(value: U256, bps: u32) -> Result<U256> {
    if bps == 0 {
        return Ok(value);
    }
    value
        .checked_mul(U256::from(BPS + u64::from(bps)))
        .map(|v| v / U256::from(BPS))
        .ok_or_else(|| StoreError::invalid_amount("amount overflows with slippage"))
}

/// Decides how a payment is settled and issues the calls
pub struct PaymentResolver<G: StoreGateway> {
    gateway: Arc<G>,
    /// Extra native value sent on top of the converted price
    slippage_bps: u32,
}

impl<G: StoreGateway> PaymentResolver<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            slippage_bps: 0,
        }
    }

    /// Attach `bps` basis points of headroom to native payments
    pub fn with_slippage_bps(mut self, bps: u32) -> Self {
        self.slippage_bps = bps;
        self
    }

    /// Work out the settlement calls for `item` paid with `selection`
    pub fn plan(
        &self,
        selection: &Selection,
        snapshot: &TokenSnapshot,
        item: &Item,
        context: &ResolverContext,
    ) -> Result<SettlementPlan> {
        if selection.generation != snapshot.generation {
            return Err(StoreError::StaleSelection {
                selected: selection.generation,
                current: snapshot.generation,
            });
        }
        if !item.is_priced() {
            return Err(StoreError::invalid_price(format!(
                "item {} has no price",
                item.item_id
            )));
        }

        match selection.method {
            PaymentMethod::Native => {
                let rate = context
                    .native_price
                    .ok_or_else(|| StoreError::oracle_unavailable("no native price in context"))?;
                let value = apply_slippage(native_amount(item.price, rate)?, self.slippage_bps)?;
                if value.is_zero() {
                    return Err(StoreError::invalid_amount(
                        "converted native amount rounds to zero",
                    ));
                }
                Ok(SettlementPlan::Native {
                    item_id: item.item_id.clone(),
                    value,
                })
            }
            PaymentMethod::Token(index) => {
                let token = snapshot
                    .token(index)
                    .ok_or_else(|| StoreError::InvalidSelection {
                        value: index.to_string(),
                        token_count: snapshot.len(),
                    })?;
                Ok(SettlementPlan::Token {
                    index,
                    token: token.address,
                    spender: self.gateway.store_address(),
                    item_id: item.item_id.clone(),
                    amount: item.price,
                })
            }
        }
    }

    /// Issue the planned calls.
    ///
    /// For tokens the payment is only sent once the approval was accepted.
    /// Nothing is retried or rolled back.
    pub async fn settle(&self, plan: &SettlementPlan) -> Result<SettlementOutcome> {
        match plan {
            SettlementPlan::Native { item_id, value } => {
                info!(item_id = %item_id, %value, "paying with native currency");
                let tx = self
                    .gateway
                    .pay_with_eth(item_id, *value)
                    .await
                    .map_err(|e| {
                        error!(item_id = %item_id, error = %e, "native payment failed");
                        e
                    })?;
                Ok(SettlementOutcome {
                    method: PaymentMethod::Native,
                    transactions: vec![tx],
                })
            }
            SettlementPlan::Token {
                index,
                token,
                spender,
                item_id,
                amount,
            } => {
                info!(item_id = %item_id, index, %amount, "approving token spend");
                let approval = self
                    .gateway
                    .approve(*token, *spender, *amount)
                    .await
                    .map_err(|e| {
                        error!(item_id = %item_id, error = %e, "token approval failed");
                        e
                    })?;

                info!(item_id = %item_id, index, %amount, "paying with token");
                let payment = self
                    .gateway
                    .pay_with_token(*amount, *index, item_id)
                    .await
                    .map_err(|e| {
                        error!(item_id = %item_id, error = %e, "token payment failed");
                        e
                    })?;

                Ok(SettlementOutcome {
                    method: PaymentMethod::Token(*index),
                    transactions: vec![approval, payment],
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CallKind;
    use crate::memory::InMemoryGateway;
    use crate::types::{units::parse_ether, PaymentToken};
    use std::str::FromStr;

    fn snapshot(tokens: Vec<PaymentToken>) -> TokenSnapshot {
        TokenSnapshot {
            tokens,
            generation: 3,
        }
    }

    fn usdt() -> PaymentToken {
        PaymentToken::new("USDT", Address::repeat_byte(0x01))
    }

    #[test]
    fn test_native_amount_exact() {
        // $400 at $2000/ETH is 0.2 ETH
        let value = native_amount(parse_ether("400").unwrap(), Decimal::from(2000)).unwrap();
        assert_eq!(value, parse_ether("0.2").unwrap());

        // fractional rate: $10 at $2500.5/ETH
        let value =
            native_amount(parse_ether("10").unwrap(), Decimal::from_str("2500.5").unwrap()).unwrap();
        assert_eq!(value, U256::from(3_999_200_159_968_006u64));
    }

    #[test]
    fn test_native_amount_monotonic() {
        let rates = ["0.5", "1", "1999.99", "2000", "35000.123456"];
        let prices = ["0.01", "1", "19.99", "400", "1000000"];

        for rate in rates {
            let rate = Decimal::from_str(rate).unwrap();
            let mut previous = U256::zero();
            for price in prices {
                let value = native_amount(parse_ether(price).unwrap(), rate).unwrap();
                assert!(value >= previous, "not monotonic in price at rate {}", rate);
                previous = value;
            }
        }

        for price in prices {
            let price = parse_ether(price).unwrap();
            let mut previous = U256::MAX;
            for rate in rates {
                let value = native_amount(price, Decimal::from_str(rate).unwrap()).unwrap();
                assert!(value <= previous, "not inversely monotonic in rate");
                previous = value;
            }
        }
    }

    #[test]
    fn test_native_amount_rejects_bad_rate() {
        let price = parse_ether("1").unwrap();
        assert!(native_amount(price, Decimal::ZERO).is_err());
        assert!(native_amount(price, Decimal::from(-5)).is_err());
    }

    #[test]
    fn test_slippage() {
        assert_eq!(
            apply_slippage(U256::from(10_000u64), 100).unwrap(),
            U256::from(10_100u64)
        );
        assert_eq!(apply_slippage(U256::from(7u64), 0).unwrap(), U256::from(7u64));
        assert!(apply_slippage(U256::MAX, 1).is_err());
    }

    #[test]
    fn test_plan_token_branch() {
        let gateway = Arc::new(InMemoryGateway::default());
        let resolver = PaymentResolver::new(gateway.clone());
        let tokens = snapshot(vec![usdt()]);
        let selection = tokens.select(PaymentMethod::Token(0)).unwrap();
        let item = Item::new("123456789bb", parse_ether("400").unwrap());

        let plan = resolver
            .plan(&selection, &tokens, &item, &ResolverContext::default())
            .unwrap();
        assert_eq!(
            plan,
            SettlementPlan::Token {
                index: 0,
                token: usdt().address,
                spender: gateway.store_address(),
                item_id: "123456789bb".to_string(),
                amount: item.price,
            }
        );
    }

    #[test]
    fn test_plan_native_needs_price() {
        let resolver = PaymentResolver::new(Arc::new(InMemoryGateway::default()));
        let tokens = snapshot(vec![usdt()]);
        let selection = tokens.select(PaymentMethod::Native).unwrap();
        let item = Item::new("123456789bb", parse_ether("400").unwrap());

        assert!(matches!(
            resolver.plan(&selection, &tokens, &item, &ResolverContext::default()),
            Err(StoreError::OracleUnavailable { .. })
        ));

        let plan = resolver
            .plan(
                &selection,
                &tokens,
                &item,
                &ResolverContext::with_native_price(Decimal::from(2000)),
            )
            .unwrap();
        assert_eq!(plan.method(), PaymentMethod::Native);
        assert_eq!(
            plan,
            SettlementPlan::Native {
                item_id: "123456789bb".to_string(),
                value: parse_ether("0.2").unwrap(),
            }
        );
    }

    #[test]
    fn test_plan_rejects_stale_and_unpriced() {
        let resolver = PaymentResolver::new(Arc::new(InMemoryGateway::default()));
        let tokens = snapshot(vec![usdt()]);
        let selection = tokens.select(PaymentMethod::Token(0)).unwrap();
        let newer = TokenSnapshot {
            tokens: vec![],
            generation: 4,
        };
        let item = Item::new("123456789bb", parse_ether("1").unwrap());
        assert!(matches!(
            resolver.plan(&selection, &newer, &item, &ResolverContext::default()),
            Err(StoreError::StaleSelection { selected: 3, current: 4 })
        ));

        let unpriced = Item::new("free", U256::zero());
        assert!(matches!(
            resolver.plan(&selection, &tokens, &unpriced, &ResolverContext::default()),
            Err(StoreError::InvalidPrice { .. })
        ));
    }

    #[tokio::test]
    async fn test_settle_token_approves_first() {
        let gateway = Arc::new(InMemoryGateway::default().with_token("USDT", usdt().address));
        let resolver = PaymentResolver::new(gateway.clone());
        let plan = SettlementPlan::Token {
            index: 0,
            token: usdt().address,
            spender: gateway.store_address(),
            item_id: "123456789bb".to_string(),
            amount: parse_ether("400").unwrap(),
        };

        let outcome = resolver.settle(&plan).await.unwrap();
        assert_eq!(outcome.transactions.len(), 2);

        let kinds: Vec<CallKind> = gateway.calls().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![CallKind::Approve, CallKind::PayWithToken]);
    }

    #[tokio::test]
    async fn test_failed_approval_skips_payment() {
        let gateway = Arc::new(InMemoryGateway::default().with_token("USDT", usdt().address));
        gateway.fail_on(CallKind::Approve);
        let resolver = PaymentResolver::new(gateway.clone());
        let plan = SettlementPlan::Token {
            index: 0,
            token: usdt().address,
            spender: gateway.store_address(),
            item_id: "123456789bb".to_string(),
            amount: parse_ether("400").unwrap(),
        };

        assert!(resolver.settle(&plan).await.is_err());
        assert!(gateway.calls_of(CallKind::PayWithToken).is_empty());
    }

    #[tokio::test]
    async fn test_native_slippage_applied() {
        let gateway = Arc::new(InMemoryGateway::default());
        let resolver = PaymentResolver::new(gateway.clone()).with_slippage_bps(100);
        let tokens = snapshot(vec![]);
        let selection = tokens.select(PaymentMethod::Native).unwrap();
        let item = Item::new("123456789bb", parse_ether("400").unwrap());

        let plan = resolver
            .plan(
                &selection,
                &tokens,
                &item,
                &ResolverContext::with_native_price(Decimal::from(2000)),
            )
            .unwrap();
        resolver.settle(&plan).await.unwrap();

        assert_eq!(
            gateway.calls_of(CallKind::PayWithEth),
            vec![crate::gateway::GatewayCall::PayWithEth {
                item_id: "123456789bb".to_string(),
                value: parse_ether("0.202").unwrap(),
            }]
        );
    }
}
