//! Read-through cache of the accepted token list
//!
//! Indices are positions, and positions shift when a token is removed. The
//! registry numbers every distinct list it has seen (its generation) and
//! stamps each [`Selection`] with the generation it was made against, so a
//! selection made before a removal can never be replayed against the list
//! that came after it.

use crate::gateway::StoreGateway;
use crate::types::{PaymentMethod, PaymentToken, TxHash};
use crate::{Result, StoreError};
use ethereum_types::Address;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A token list as fetched from the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub tokens: Vec<PaymentToken>,
    pub generation: u64,
}

impl TokenSnapshot {
    /// Token at `index`, if present
    pub fn token(&self, index: usize) -> Option<&PaymentToken> {
        self.tokens.get(index)
    }

    /// Number of registered tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Validate a method against this list and stamp it
    pub fn select(&self, method: PaymentMethod) -> Result<Selection> {
        if let PaymentMethod::Token(index) = method {
            if index >= self.tokens.len() {
                return Err(StoreError::InvalidSelection {
                    value: index.to_string(),
                    token_count: self.tokens.len(),
                });
            }
        }
        Ok(Selection {
            method,
            generation: self.generation,
        })
    }

    /// Parse the select-box value used by the storefront and dashboard
    pub fn parse(&self, raw: &str) -> Result<Option<Selection>> {
        match parse_selection(raw, self.tokens.len())? {
            Some(method) => self.select(method).map(Some),
            None => Ok(None),
        }
    }

    /// Entries a token picker offers, native currency last
    pub fn options(&self) -> Vec<SelectOption> {
        let mut options: Vec<SelectOption> = self
            .tokens
            .iter()
            .enumerate()
            .map(|(index, token)| SelectOption {
                value: index.to_string(),
                label: token.name.clone(),
                method: PaymentMethod::Token(index),
            })
            .collect();
        options.push(SelectOption {
            value: self.tokens.len().to_string(),
            label: NATIVE_LABEL.to_string(),
            method: PaymentMethod::Native,
        });
        options
    }
}

/// Label of the native-currency entry in pickers
pub const NATIVE_LABEL: &str = "ETH";

/// One entry of a token picker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    /// Wire value the picker submits
    pub value: String,
    pub label: String,
    pub method: PaymentMethod,
}

/// A payment method chosen against a specific token list generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub method: PaymentMethod,
    pub generation: u64,
}

/// Translate a picker value into a payment method.
///
/// Pickers submit the token index as a string and use the index one past
/// the last token for the native currency. An empty value means nothing
/// was picked. This is the only place that convention is understood.
pub fn parse_selection(raw: &str, token_count: usize) -> Result<Option<PaymentMethod>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let invalid = || StoreError::InvalidSelection {
        value: raw.to_string(),
        token_count,
    };
    let index: usize = raw.parse().map_err(|_| invalid())?;

    match index.cmp(&token_count) {
        std::cmp::Ordering::Less => Ok(Some(PaymentMethod::Token(index))),
        std::cmp::Ordering::Equal => Ok(Some(PaymentMethod::Native)),
        std::cmp::Ordering::Greater => Err(invalid()),
    }
}

/// Cached list plus the generation it belongs to
#[derive(Debug, Default)]
struct RegistryState {
    /// `None` until first fetched and after every invalidation
    tokens: Option<Vec<PaymentToken>>,
    generation: u64,
}

/// Cached view of the gateway's token list
pub struct TokenRegistry<G: StoreGateway> {
    gateway: Arc<G>,
    state: RwLock<RegistryState>,
}

impl<G: StoreGateway> TokenRegistry<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Current snapshot, fetching it when nothing valid is cached
    pub async fn snapshot(&self) -> Result<TokenSnapshot> {
        {
            let state = self.state.read().await;
            if let Some(tokens) = &state.tokens {
                return Ok(TokenSnapshot {
                    tokens: tokens.clone(),
                    generation: state.generation,
                });
            }
        }
        self.refresh().await
    }

    /// Re-read the list from the gateway. The generation moves on only when
    /// the list changed.
    ///
    /// A fetch that overlaps an invalidation is discarded and repeated, so
    /// a list read before a mutation is never stored under the generation
    /// that follows it.
    pub async fn refresh(&self) -> Result<TokenSnapshot> {
        loop {
            let started_at = self.state.read().await.generation;
            let tokens = self.gateway.payment_tokens().await?;

            let mut state = self.state.write().await;
            if state.generation != started_at {
                debug!(
                    started_at,
                    current = state.generation,
                    "token list changed during fetch, re-reading"
                );
                continue;
            }

            let changed = matches!(&state.tokens, Some(current) if *current != tokens);
            if changed {
                state.generation += 1;
            }
            state.tokens = Some(tokens.clone());

            let snapshot = TokenSnapshot {
                tokens,
                generation: state.generation,
            };
            debug!(
                generation = snapshot.generation,
                count = snapshot.len(),
                "token list refreshed"
            );
            return Ok(snapshot);
        }
    }

    /// Drop the cached list and move to a new generation. The next read
    /// goes to the gateway, and every selection made so far is stale.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.tokens = None;
        state.generation += 1;
    }

    /// Fail unless `selection` was made against the current list
    pub async fn ensure_current(&self, selection: &Selection) -> Result<TokenSnapshot> {
        let snapshot = self.snapshot().await?;
        if snapshot.generation != selection.generation {
            return Err(StoreError::StaleSelection {
                selected: selection.generation,
                current: snapshot.generation,
            });
        }
        Ok(snapshot)
    }

    /// Register a token, then re-read the list
    pub async fn add(&self, name: &str, address: Address) -> Result<(TxHash, TokenSnapshot)> {
        let result = self.gateway.add_payment_token(name, address).await;
        self.invalidate().await;
        let tx = result?;
        info!(name, ?address, "payment token added");
        let snapshot = self.reload_after(tx).await?;
        Ok((tx, snapshot))
    }

    /// Remove the selected token, then re-read the list.
    ///
    /// Every selection made before this call is stale afterwards, even when
    /// the index happens to still be in range.
    pub async fn remove(&self, selection: &Selection) -> Result<(TxHash, TokenSnapshot)> {
        let snapshot = self.ensure_current(selection).await?;
        let index = match selection.method {
            PaymentMethod::Token(index) => index,
            PaymentMethod::Native => {
                return Err(StoreError::InvalidSelection {
                    value: NATIVE_LABEL.to_string(),
                    token_count: snapshot.len(),
                })
            }
        };

        let result = self.gateway.remove_payment_token(index).await;
        // Whatever happened on chain, the cached positions can no longer be trusted.
        self.invalidate().await;
        let tx = result?;
        info!(index, "payment token removed");
        let snapshot = self.reload_after(tx).await?;
        Ok((tx, snapshot))
    }

    /// Re-read the list after a mutation that went through. The cache stays
    /// empty when this fails, so the next read tries again.
    async fn reload_after(&self, tx_hash: TxHash) -> Result<TokenSnapshot> {
        self.refresh().await.map_err(|e| {
            warn!(?tx_hash, error = %e, "token list re-read failed");
            StoreError::ListRefreshFailed {
                tx_hash,
                reason: e.to_string(),
            }
        })
    }
}
