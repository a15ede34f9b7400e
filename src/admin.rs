//! Store administration: token registry, withdrawals, prices, balances

use crate::gateway::{parse_address, StoreGateway};
use crate::latch::ActionLatch;
use crate::registry::{Selection, TokenRegistry, TokenSnapshot, NATIVE_LABEL};
use crate::types::units::{format_ether, parse_ether};
use crate::types::{PaymentEvent, PaymentMethod, TxHash};
use crate::{Result, StoreError};
use ethereum_types::U256;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// One line of the balance card
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceEntry {
    pub label: String,
    pub method: PaymentMethod,
    pub amount: U256,
}

impl BalanceEntry {
    /// Amount formatted with 18 decimals
    pub fn display_amount(&self) -> String {
        format_ether(self.amount)
    }
}

/// Contract holdings: native currency first, then every registered token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSheet {
    pub entries: Vec<BalanceEntry>,
}

impl BalanceSheet {
    pub fn native(&self) -> Option<&BalanceEntry> {
        self.entries.iter().find(|e| e.method.is_native())
    }

    pub fn token(&self, index: usize) -> Option<&BalanceEntry> {
        self.entries
            .iter()
            .find(|e| e.method == PaymentMethod::Token(index))
    }
}

/// Operator actions on the store.
///
/// Each mutating action has its own in-progress latch, so e.g. a price
/// update can run while a withdrawal is pending, but not two withdrawals.
pub struct AdminConsole<G: StoreGateway> {
    gateway: Arc<G>,
    registry: Arc<TokenRegistry<G>>,
    add_latch: ActionLatch,
    remove_latch: ActionLatch,
    withdraw_latch: ActionLatch,
    price_latch: ActionLatch,
}

impl<G: StoreGateway> AdminConsole<G> {
    pub fn new(gateway: Arc<G>, registry: Arc<TokenRegistry<G>>) -> Self {
        Self {
            gateway,
            registry,
            add_latch: ActionLatch::new("add token"),
            remove_latch: ActionLatch::new("remove token"),
            withdraw_latch: ActionLatch::new("withdraw"),
            price_latch: ActionLatch::new("set price"),
        }
    }

    /// Current token list
    pub async fn tokens(&self) -> Result<TokenSnapshot> {
        self.registry.refresh().await
    }

    /// Register a token from form input and return the refreshed list
    pub async fn add_token(&self, name: &str, address: &str) -> Result<TokenSnapshot> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::config("token name cannot be empty"));
        }
        let address = parse_address(address)?;

        let _guard = self.add_latch.try_acquire()?;
        let (_, snapshot) = self
            .registry
            .add(name, address)
            .await
            .map_err(|e| log_failure("add token", e))?;
        Ok(snapshot)
    }

    /// Remove the token picked with `raw` from the rendered list `tokens`
    /// and return the refreshed list.
    ///
    /// Fails with [`StoreError::ListRefreshFailed`] when the removal went
    /// through but the list could not be read back.
    pub async fn remove_token(&self, tokens: &TokenSnapshot, raw: &str) -> Result<TokenSnapshot> {
        let selection = require_selection(tokens, raw)?;

        let _guard = self.remove_latch.try_acquire()?;
        let (_, snapshot) = self
            .registry
            .remove(&selection)
            .await
            .map_err(|e| log_failure("remove token", e))?;
        Ok(snapshot)
    }

    /// Withdraw `amount` (a decimal string) of the currency picked with `raw`
    /// from the rendered list `tokens`
    pub async fn withdraw(&self, tokens: &TokenSnapshot, raw: &str, amount: &str) -> Result<TxHash> {
        let selection = require_selection(tokens, raw)?;
        let amount = parse_ether(amount)?;
        self.withdraw_with(&selection, amount).await
    }

    /// Withdraw with an already parsed selection and amount
    pub async fn withdraw_with(&self, selection: &Selection, amount: U256) -> Result<TxHash> {
        if amount.is_zero() {
            return Err(StoreError::invalid_amount("withdrawal amount must be positive"));
        }

        let _guard = self.withdraw_latch.try_acquire()?;
        self.registry.ensure_current(selection).await?;

        let result = match selection.method {
            PaymentMethod::Native => self.gateway.withdraw_eth(amount).await,
            PaymentMethod::Token(index) => self.gateway.withdraw_token(index, amount).await,
        };
        let tx = result.map_err(|e| log_failure("withdraw", e))?;
        info!(method = %selection.method, %amount, "withdrawal sent");
        Ok(tx)
    }

    /// Set an item price from form input in reference units
    pub async fn set_price(&self, item_id: &str, amount: &str) -> Result<TxHash> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(StoreError::config("product id cannot be empty"));
        }
        let amount = parse_ether(amount)?;

        let _guard = self.price_latch.try_acquire()?;
        let tx = self
            .gateway
            .set_price(item_id, amount)
            .await
            .map_err(|e| log_failure("set price", e))?;
        info!(item_id, %amount, "price updated");
        Ok(tx)
    }

    /// Native and per-token holdings of the contract
    pub async fn balances(&self) -> Result<BalanceSheet> {
        let snapshot = self.registry.refresh().await?;

        let mut entries = Vec::with_capacity(snapshot.len() + 1);
        entries.push(BalanceEntry {
            label: NATIVE_LABEL.to_string(),
            method: PaymentMethod::Native,
            amount: self.gateway.native_balance().await?,
        });
        for (index, token) in snapshot.tokens.iter().enumerate() {
            entries.push(BalanceEntry {
                label: token.name.clone(),
                method: PaymentMethod::Token(index),
                amount: self.gateway.token_balance(index).await?,
            });
        }
        Ok(BalanceSheet { entries })
    }

    /// Payments received since `from_block`
    pub async fn payments(&self, from_block: u64) -> Result<Vec<PaymentEvent>> {
        self.gateway.payment_events(from_block).await
    }
}

/// Admin forms have no "nothing picked" state
fn require_selection(tokens: &TokenSnapshot, raw: &str) -> Result<Selection> {
    tokens
        .parse(raw)?
        .ok_or_else(|| StoreError::InvalidSelection {
            value: raw.to_string(),
            token_count: tokens.len(),
        })
}

fn log_failure(action: &str, e: StoreError) -> StoreError {
    error!(action, error = %e, "admin action failed");
    e
}
