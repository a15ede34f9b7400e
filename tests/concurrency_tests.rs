//! In-progress latches under overlapping requests

use async_trait::async_trait;
use ethereum_types::{Address, U256};
use popup_store::gateway::CallKind;
use popup_store::types::units::parse_ether;
use popup_store::{
    AdminConsole, Checkout, InMemoryGateway, PaymentEvent, PaymentMethod, PaymentToken, Result,
    StaticPriceOracle, StoreError, StoreGateway, TokenRegistry, TxHash,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

const ITEM: &str = "123456789bb";

/// In-memory store whose approvals and withdrawals park until released
struct GatedGateway {
    inner: InMemoryGateway,
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
}

impl GatedGateway {
    fn new(inner: InMemoryGateway) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every gateway call so far, reads included
    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn hold(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[async_trait]
impl StoreGateway for GatedGateway {
    fn store_address(&self) -> Address {
        self.inner.store_address()
    }

    async fn payment_tokens(&self) -> Result<Vec<PaymentToken>> {
        self.count();
        self.inner.payment_tokens().await
    }

    async fn token_balance(&self, index: usize) -> Result<U256> {
        self.count();
        self.inner.token_balance(index).await
    }

    async fn native_balance(&self) -> Result<U256> {
        self.count();
        self.inner.native_balance().await
    }

    async fn item_price(&self, item_id: &str) -> Result<U256> {
        self.count();
        self.inner.item_price(item_id).await
    }

    async fn add_payment_token(&self, name: &str, address: Address) -> Result<TxHash> {
        self.count();
        self.inner.add_payment_token(name, address).await
    }

    async fn remove_payment_token(&self, index: usize) -> Result<TxHash> {
        self.count();
        self.inner.remove_payment_token(index).await
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash> {
        self.count();
        self.hold().await;
        self.inner.approve(token, spender, amount).await
    }

    async fn pay_with_token(&self, amount: U256, index: usize, item_id: &str) -> Result<TxHash> {
        self.count();
        self.inner.pay_with_token(amount, index, item_id).await
    }

    async fn pay_with_eth(&self, item_id: &str, value: U256) -> Result<TxHash> {
        self.count();
        self.inner.pay_with_eth(item_id, value).await
    }

    async fn withdraw_token(&self, index: usize, amount: U256) -> Result<TxHash> {
        self.count();
        self.hold().await;
        self.inner.withdraw_token(index, amount).await
    }

    async fn withdraw_eth(&self, amount: U256) -> Result<TxHash> {
        self.count();
        self.hold().await;
        self.inner.withdraw_eth(amount).await
    }

    async fn set_price(&self, item_id: &str, amount: U256) -> Result<TxHash> {
        self.count();
        self.inner.set_price(item_id, amount).await
    }

    async fn payment_events(&self, from_block: u64) -> Result<Vec<PaymentEvent>> {
        self.count();
        self.inner.payment_events(from_block).await
    }

    async fn latest_block(&self) -> Result<u64> {
        self.count();
        self.inner.latest_block().await
    }
}

fn gated_store() -> (InMemoryGateway, Arc<GatedGateway>, Arc<TokenRegistry<GatedGateway>>) {
    let memory = InMemoryGateway::default()
        .with_token("USDT", Address::repeat_byte(0x7a))
        .with_price(ITEM, parse_ether("400").unwrap());
    let gateway = Arc::new(GatedGateway::new(memory.clone()));
    let registry = Arc::new(TokenRegistry::new(gateway.clone()));
    (memory, gateway, registry)
}

#[tokio::test]
async fn test_second_payment_while_first_in_flight_is_refused() {
    let (memory, gateway, registry) = gated_store();
    let checkout = Checkout::new(
        gateway.clone(),
        registry,
        Arc::new(StaticPriceOracle::new(Decimal::from(2000))),
        ITEM,
    );
    let view = checkout.load().await.unwrap();

    let first = checkout.pay(&view, "0");
    let second = async {
        gateway.entered.notified().await;
        assert!(checkout.is_paying());

        let before = gateway.call_count();
        let result = checkout.pay(&view, "0").await;
        let after = gateway.call_count();

        gateway.release.notify_one();
        (result, before, after)
    };
    let (first, (second, before, after)) = tokio::join!(first, second);

    let err = second.unwrap_err();
    assert!(
        matches!(err, StoreError::ActionInProgress { .. }),
        "Overlapping payment MUST be refused - actual: {:?}",
        err
    );
    assert_eq!(before, after, "Refused payment MUST NOT reach the gateway");

    let outcome = first.unwrap().unwrap();
    assert_eq!(outcome.method, PaymentMethod::Token(0));
    assert_eq!(memory.calls_of(CallKind::Approve).len(), 1);
    assert_eq!(memory.calls_of(CallKind::PayWithToken).len(), 1);
    assert!(!checkout.is_paying());
}

#[tokio::test]
async fn test_second_withdrawal_while_first_in_flight_is_refused() {
    let (memory, gateway, registry) = gated_store();
    memory
        .pay_with_eth(ITEM, parse_ether("2").unwrap())
        .await
        .unwrap();
    let admin = AdminConsole::new(gateway.clone(), registry);
    let tokens = admin.tokens().await.unwrap();

    let first = admin.withdraw(&tokens, "1", "1");
    let second = async {
        gateway.entered.notified().await;

        let before = gateway.call_count();
        let result = admin.withdraw(&tokens, "1", "1").await;
        let after = gateway.call_count();

        // a different action is not held up by the pending withdrawal
        let price = admin.set_price(ITEM, "500").await;

        gateway.release.notify_one();
        (result, before, after, price)
    };
    let (first, (second, before, after, price)) = tokio::join!(first, second);

    let err = second.unwrap_err();
    assert!(
        matches!(err, StoreError::ActionInProgress { .. }),
        "Overlapping withdrawal MUST be refused - actual: {:?}",
        err
    );
    assert_eq!(before, after, "Refused withdrawal MUST NOT reach the gateway");
    assert!(price.is_ok());

    first.unwrap();
    assert_eq!(memory.calls_of(CallKind::WithdrawEth).len(), 1);
    assert_eq!(
        memory.native_balance().await.unwrap(),
        parse_ether("1").unwrap()
    );
}
