//! In-process stand-in for the deployed store contract.
//!
//! Tracks the token registry, contract balances, allowances, prices and
//! emitted events in memory, records every state-changing call, and can be
//! told to fail chosen calls. All clones share the same state.

use crate::gateway::{CallKind, GatewayCall, StoreGateway};
use crate::types::{LogDetails, PaymentEvent, PaymentToken, TxHash};
use crate::{Result, StoreError};
use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct MemoryInner {
    owner: Address,
    /// Account the next calls are made from
    caller: Address,
    tokens: Vec<PaymentToken>,
    /// Contract holdings per token address
    token_balances: HashMap<Address, U256>,
    native_balance: U256,
    /// (token, owner, spender) -> allowance
    allowances: HashMap<(Address, Address, Address), U256>,
    prices: HashMap<String, U256>,
    events: Vec<PaymentEvent>,
    calls: Vec<GatewayCall>,
    failing: HashSet<CallKind>,
    fail_all: bool,
    /// Token list reads start failing once a call of this kind goes through
    break_reads_after: Option<CallKind>,
    reads_failing: bool,
    block: u64,
    tx_counter: u64,
}

/// In-memory implementation of [`StoreGateway`]
#[derive(Clone)]
pub struct InMemoryGateway {
    store: Address,
    inner: Arc<RwLock<MemoryInner>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new(Address::repeat_byte(0xee))
    }
}

impl std::fmt::Debug for InMemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryGateway")
            .field("store", &self.store)
            .finish()
    }
}

impl InMemoryGateway {
    /// Create a store owned by `owner`; calls are made as the owner until
    /// [`set_caller`](Self::set_caller) says otherwise.
    pub fn new(owner: Address) -> Self {
        Self {
            store: Address::repeat_byte(0x5e),
            inner: Arc::new(RwLock::new(MemoryInner {
                owner,
                caller: owner,
                tokens: Vec::new(),
                token_balances: HashMap::new(),
                native_balance: U256::zero(),
                allowances: HashMap::new(),
                prices: HashMap::new(),
                events: Vec::new(),
                calls: Vec::new(),
                failing: HashSet::new(),
                fail_all: false,
                break_reads_after: None,
                reads_failing: false,
                block: 1,
                tx_counter: 0,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a token directly, bypassing the call log
    pub fn with_token(self, name: &str, address: Address) -> Self {
        self.write().tokens.push(PaymentToken::new(name, address));
        self
    }

    /// Set an item price directly, bypassing the call log
    pub fn with_price(self, item_id: &str, price: U256) -> Self {
        self.write().prices.insert(item_id.to_string(), price);
        self
    }

    /// Configure the gateway to fail every state-changing call
    pub fn with_failure(self) -> Self {
        self.write().fail_all = true;
        self
    }

    /// Make calls of `kind` fail from now on
    pub fn fail_on(&self, kind: CallKind) {
        self.write().failing.insert(kind);
    }

    /// Make token list reads fail as soon as a call of `kind` succeeds
    pub fn fail_token_reads_after(&self, kind: CallKind) {
        self.write().break_reads_after = Some(kind);
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        let mut inner = self.write();
        inner.failing.clear();
        inner.fail_all = false;
        inner.break_reads_after = None;
        inner.reads_failing = false;
    }

    /// Make subsequent calls from `caller`
    pub fn set_caller(&self, caller: Address) {
        self.write().caller = caller;
    }

    // =========================================================================
    // Assertion Helpers
    // =========================================================================

    /// All recorded state-changing calls, in order
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.read().calls.clone()
    }

    /// Recorded calls of one kind
    pub fn calls_of(&self, kind: CallKind) -> Vec<GatewayCall> {
        self.read()
            .calls
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    /// Allowance `owner` granted `spender` on `token`
    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.read()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    /// Advance the block counter without a transaction
    pub fn mine(&self) {
        self.write().block += 1;
    }

    /// Record the call, apply failure injection, and hand back the state
    /// for the call's effects.
    fn begin(&self, call: GatewayCall) -> Result<RwLockWriteGuard<'_, MemoryInner>> {
        let mut inner = self.write();
        let kind = call.kind();
        inner.calls.push(call);
        if inner.fail_all || inner.failing.contains(&kind) {
            return Err(StoreError::reverted(format!("{:?} rejected", kind)));
        }
        Ok(inner)
    }

    fn only_owner(inner: &MemoryInner) -> Result<()> {
        if inner.caller != inner.owner {
            return Err(StoreError::reverted("Ownable: caller is not the owner"));
        }
        Ok(())
    }

    fn token_at(inner: &MemoryInner, index: usize) -> Result<PaymentToken> {
        inner
            .tokens
            .get(index)
            .cloned()
            .ok_or_else(|| StoreError::reverted(format!("token index {} out of range", index)))
    }

    /// Finish a successful transaction: new block, new hash
    fn commit(inner: &mut MemoryInner) -> TxHash {
        let kind = inner.calls.last().map(GatewayCall::kind);
        if kind.is_some() && kind == inner.break_reads_after {
            inner.reads_failing = true;
        }
        inner.tx_counter += 1;
        inner.block += 1;
        H256::from_low_u64_be(inner.tx_counter)
    }

    fn emit(inner: &mut MemoryInner, tx_hash: TxHash, mut event: PaymentEvent) {
        let log_index = inner
            .events
            .iter()
            .filter(|e| e.ordering_key().0 == inner.block)
            .count() as u64;
        event.details = Some(LogDetails {
            block_number: inner.block,
            block_hash: H256::from_low_u64_be(inner.block),
            transaction_hash: tx_hash,
            log_index,
            transaction_from: Some(inner.caller),
            gas_used: None,
            success: Some(true),
        });
        inner.events.push(event);
    }
}

#[async_trait]
impl StoreGateway for InMemoryGateway {
    fn store_address(&self) -> Address {
        self.store
    }

    async fn payment_tokens(&self) -> Result<Vec<PaymentToken>> {
        let inner = self.read();
        if inner.reads_failing {
            return Err(StoreError::rpc("paymentTokens unavailable"));
        }
        Ok(inner.tokens.clone())
    }

    async fn token_balance(&self, index: usize) -> Result<U256> {
        let inner = self.read();
        let token = Self::token_at(&inner, index)?;
        Ok(inner
            .token_balances
            .get(&token.address)
            .copied()
            .unwrap_or_default())
    }

    async fn native_balance(&self) -> Result<U256> {
        Ok(self.read().native_balance)
    }

    async fn item_price(&self, item_id: &str) -> Result<U256> {
        Ok(self.read().prices.get(item_id).copied().unwrap_or_default())
    }

    async fn add_payment_token(&self, name: &str, address: Address) -> Result<TxHash> {
        let mut inner = self.begin(GatewayCall::AddPaymentToken {
            name: name.to_string(),
            address,
        })?;
        Self::only_owner(&inner)?;
        inner.tokens.push(PaymentToken::new(name, address));
        Ok(Self::commit(&mut inner))
    }

    async fn remove_payment_token(&self, index: usize) -> Result<TxHash> {
        let mut inner = self.begin(GatewayCall::RemovePaymentToken { index })?;
        Self::only_owner(&inner)?;
        Self::token_at(&inner, index)?;
        inner.tokens.remove(index);
        Ok(Self::commit(&mut inner))
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash> {
        let mut inner = self.begin(GatewayCall::Approve {
            token,
            spender,
            amount,
        })?;
        let owner = inner.caller;
        inner.allowances.insert((token, owner, spender), amount);
        Ok(Self::commit(&mut inner))
    }

    async fn pay_with_token(&self, amount: U256, index: usize, item_id: &str) -> Result<TxHash> {
        let mut inner = self.begin(GatewayCall::PayWithToken {
            amount,
            index,
            item_id: item_id.to_string(),
        })?;
        let token = Self::token_at(&inner, index)?;
        if amount.is_zero() {
            return Err(StoreError::reverted("amount must be greater than zero"));
        }

        let key = (token.address, inner.caller, self.store);
        let allowance = inner.allowances.get(&key).copied().unwrap_or_default();
        if allowance < amount {
            return Err(StoreError::reverted("ERC20: insufficient allowance"));
        }
        inner.allowances.insert(key, allowance - amount);
        *inner.token_balances.entry(token.address).or_default() += amount;

        let tx_hash = Self::commit(&mut inner);
        let event = PaymentEvent {
            payer: inner.caller,
            tx_details: "token payment".to_string(),
            item_id: item_id.to_string(),
            amount,
            token_name: token.name,
            token_address: token.address,
            timestamp: chrono::Utc::now().timestamp() as u64,
            details: None,
        };
        Self::emit(&mut inner, tx_hash, event);
        Ok(tx_hash)
    }

    async fn pay_with_eth(&self, item_id: &str, value: U256) -> Result<TxHash> {
        let mut inner = self.begin(GatewayCall::PayWithEth {
            item_id: item_id.to_string(),
            value,
        })?;
        if value.is_zero() {
            return Err(StoreError::reverted("no value sent"));
        }
        inner.native_balance += value;

        let tx_hash = Self::commit(&mut inner);
        let event = PaymentEvent {
            payer: inner.caller,
            tx_details: "eth payment".to_string(),
            item_id: item_id.to_string(),
            amount: value,
            token_name: "ETH".to_string(),
            token_address: Address::zero(),
            timestamp: chrono::Utc::now().timestamp() as u64,
            details: None,
        };
        Self::emit(&mut inner, tx_hash, event);
        Ok(tx_hash)
    }

    async fn withdraw_token(&self, index: usize, amount: U256) -> Result<TxHash> {
        let mut inner = self.begin(GatewayCall::WithdrawToken { index, amount })?;
        Self::only_owner(&inner)?;
        let token = Self::token_at(&inner, index)?;
        let balance = inner.token_balances.entry(token.address).or_default();
        if *balance < amount {
            return Err(StoreError::reverted("insufficient token balance"));
        }
        *balance -= amount;
        Ok(Self::commit(&mut inner))
    }

    async fn withdraw_eth(&self, amount: U256) -> Result<TxHash> {
        let mut inner = self.begin(GatewayCall::WithdrawEth { amount })?;
        Self::only_owner(&inner)?;
        if inner.native_balance < amount {
            return Err(StoreError::reverted("insufficient balance"));
        }
        inner.native_balance -= amount;
        Ok(Self::commit(&mut inner))
    }

    async fn set_price(&self, item_id: &str, amount: U256) -> Result<TxHash> {
        let mut inner = self.begin(GatewayCall::SetPrice {
            item_id: item_id.to_string(),
            amount,
        })?;
        Self::only_owner(&inner)?;
        inner.prices.insert(item_id.to_string(), amount);
        Ok(Self::commit(&mut inner))
    }

    async fn payment_events(&self, from_block: u64) -> Result<Vec<PaymentEvent>> {
        Ok(self
            .read()
            .events
            .iter()
            .filter(|e| e.ordering_key().0 >= from_block)
            .cloned()
            .collect())
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(self.read().block)
    }
}
