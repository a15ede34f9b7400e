//! Contract gateway: the store contract's external call surface

use crate::abi::{self, signatures, Token};
use crate::blockchain::BlockchainClient;
use crate::types::{LogDetails, PaymentEvent, PaymentToken, TxHash};
use crate::{Result, StoreError};
use async_trait::async_trait;
use ethereum_types::{Address, U256};
use tracing::{debug, info, warn};

/// The deployed store contract, plus the ERC20 `approve` call payments need.
///
/// Token indices are positions in the list returned by
/// [`payment_tokens`](StoreGateway::payment_tokens) at the time of the call.
/// Write methods return once the transaction has been accepted.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Address of the store contract (the spender for token approvals)
    fn store_address(&self) -> Address;

    async fn payment_tokens(&self) -> Result<Vec<PaymentToken>>;

    /// Balance the contract holds of the token at `index`
    async fn token_balance(&self, index: usize) -> Result<U256>;

    /// Native-currency balance of the contract
    async fn native_balance(&self) -> Result<U256>;

    /// Price of an item in 18-decimal reference units; zero when unset
    async fn item_price(&self, item_id: &str) -> Result<U256>;

    async fn add_payment_token(&self, name: &str, address: Address) -> Result<TxHash>;

    /// Remove the token at `index`; later tokens shift down by one
    async fn remove_payment_token(&self, index: usize) -> Result<TxHash>;

    /// ERC20 `approve` on `token` in favour of `spender`
    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash>;

    async fn pay_with_token(&self, amount: U256, index: usize, item_id: &str) -> Result<TxHash>;

    /// Pay for `item_id` with `value` attached as native currency
    async fn pay_with_eth(&self, item_id: &str, value: U256) -> Result<TxHash>;

    async fn withdraw_token(&self, index: usize, amount: U256) -> Result<TxHash>;

    async fn withdraw_eth(&self, amount: U256) -> Result<TxHash>;

    async fn set_price(&self, item_id: &str, amount: U256) -> Result<TxHash>;

    /// `PaymentReceive` events from `from_block` onwards, in chain order
    async fn payment_events(&self, from_block: u64) -> Result<Vec<PaymentEvent>>;

    async fn latest_block(&self) -> Result<u64>;
}

/// A state-changing gateway call, as recorded by test gateways
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    AddPaymentToken { name: String, address: Address },
    RemovePaymentToken { index: usize },
    Approve { token: Address, spender: Address, amount: U256 },
    PayWithToken { amount: U256, index: usize, item_id: String },
    PayWithEth { item_id: String, value: U256 },
    WithdrawToken { index: usize, amount: U256 },
    WithdrawEth { amount: U256 },
    SetPrice { item_id: String, amount: U256 },
}

impl GatewayCall {
    /// Kind of call, for filtering and failure injection
    pub fn kind(&self) -> CallKind {
        match self {
            GatewayCall::AddPaymentToken { .. } => CallKind::AddPaymentToken,
            GatewayCall::RemovePaymentToken { .. } => CallKind::RemovePaymentToken,
            GatewayCall::Approve { .. } => CallKind::Approve,
            GatewayCall::PayWithToken { .. } => CallKind::PayWithToken,
            GatewayCall::PayWithEth { .. } => CallKind::PayWithEth,
            GatewayCall::WithdrawToken { .. } => CallKind::WithdrawToken,
            GatewayCall::WithdrawEth { .. } => CallKind::WithdrawEth,
            GatewayCall::SetPrice { .. } => CallKind::SetPrice,
        }
    }
}

/// Discriminant of [`GatewayCall`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    AddPaymentToken,
    RemovePaymentToken,
    Approve,
    PayWithToken,
    PayWithEth,
    WithdrawToken,
    WithdrawEth,
    SetPrice,
}

/// Gateway backed by a JSON-RPC node
#[derive(Debug)]
pub struct RpcStoreGateway {
    client: BlockchainClient,
    store: Address,
    /// Fetch receipt detail for every event log
    with_receipts: bool,
}

impl RpcStoreGateway {
    /// Create a gateway for the store deployed at `store`
    pub fn new(client: BlockchainClient, store: Address) -> Self {
        Self {
            client,
            store,
            with_receipts: true,
        }
    }

    /// Skip per-log receipt lookups when loading events
    pub fn without_receipts(mut self) -> Self {
        self.with_receipts = false;
        self
    }

    /// Underlying JSON-RPC client
    pub fn client(&self) -> &BlockchainClient {
        &self.client
    }

    async fn read(&self, signature: &str, args: &[Token]) -> Result<Vec<u8>> {
        self.client
            .call(self.store, &abi::encode_call(signature, args))
            .await
    }

    async fn write(&self, signature: &str, args: &[Token], value: U256) -> Result<TxHash> {
        self.write_to(self.store, signature, args, value).await
    }

    async fn write_to(
        &self,
        to: Address,
        signature: &str,
        args: &[Token],
        value: U256,
    ) -> Result<TxHash> {
        info!(function = signature, ?to, %value, "sending transaction");
        let result = self
            .client
            .transact(to, abi::encode_call(signature, args), value)
            .await;
        if let Err(e) = &result {
            warn!(function = signature, error = %e, "transaction failed");
        }
        result
    }
}

fn index_token(index: usize) -> Token {
    Token::Uint(U256::from(index))
}

#[async_trait]
impl StoreGateway for RpcStoreGateway {
    fn store_address(&self) -> Address {
        self.store
    }

    async fn payment_tokens(&self) -> Result<Vec<PaymentToken>> {
        let data = self.read(signatures::GET_PAYMENT_TOKENS, &[]).await?;
        abi::decode_payment_tokens(&data)
    }

    async fn token_balance(&self, index: usize) -> Result<U256> {
        let data = self
            .read(signatures::GET_TOKEN_BALANCE, &[index_token(index)])
            .await?;
        abi::read_uint(&data, 0)
    }

    async fn native_balance(&self) -> Result<U256> {
        self.client.get_balance(self.store).await
    }

    async fn item_price(&self, item_id: &str) -> Result<U256> {
        let data = self
            .read(signatures::ITEM_PRICE, &[Token::String(item_id.to_string())])
            .await?;
        abi::read_uint(&data, 0)
    }

    async fn add_payment_token(&self, name: &str, address: Address) -> Result<TxHash> {
        self.write(
            signatures::ADD_PAYMENT_TOKEN,
            &[Token::String(name.to_string()), Token::Address(address)],
            U256::zero(),
        )
        .await
    }

    async fn remove_payment_token(&self, index: usize) -> Result<TxHash> {
        self.write(
            signatures::REMOVE_PAYMENT_TOKEN,
            &[index_token(index)],
            U256::zero(),
        )
        .await
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash> {
        self.write_to(
            token,
            signatures::ERC20_APPROVE,
            &[Token::Address(spender), Token::Uint(amount)],
            U256::zero(),
        )
        .await
    }

    async fn pay_with_token(&self, amount: U256, index: usize, item_id: &str) -> Result<TxHash> {
        self.write(
            signatures::PAY_WITH_TOKEN,
            &[
                Token::Uint(amount),
                index_token(index),
                Token::String(item_id.to_string()),
            ],
            U256::zero(),
        )
        .await
    }

    async fn pay_with_eth(&self, item_id: &str, value: U256) -> Result<TxHash> {
        self.write(
            signatures::PAY_WITH_ETH,
            &[Token::String(item_id.to_string())],
            value,
        )
        .await
    }

    async fn withdraw_token(&self, index: usize, amount: U256) -> Result<TxHash> {
        self.write(
            signatures::WITHDRAW_TOKEN,
            &[index_token(index), Token::Uint(amount)],
            U256::zero(),
        )
        .await
    }

    async fn withdraw_eth(&self, amount: U256) -> Result<TxHash> {
        self.write(signatures::WITHDRAW_ETH, &[Token::Uint(amount)], U256::zero())
            .await
    }

    async fn set_price(&self, item_id: &str, amount: U256) -> Result<TxHash> {
        self.write(
            signatures::SET_PRICE,
            &[Token::String(item_id.to_string()), Token::Uint(amount)],
            U256::zero(),
        )
        .await
    }

    async fn payment_events(&self, from_block: u64) -> Result<Vec<PaymentEvent>> {
        let topic = abi::event_topic(signatures::PAYMENT_RECEIVE_EVENT);
        let logs = self.client.get_logs(self.store, topic, from_block).await?;
        debug!(count = logs.len(), from_block, "loaded payment logs");

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let mut event = abi::decode_payment_event(&log.topics, &log.data_bytes()?)?;

            let (Some(block_number), Some(block_hash), Some(transaction_hash), Some(log_index)) =
                (log.block_number, log.block_hash, log.transaction_hash, log.log_index)
            else {
                // Pending logs have no position yet and are picked up on a later poll.
                continue;
            };

            let receipt = if self.with_receipts {
                self.client.get_transaction_receipt(transaction_hash).await?
            } else {
                None
            };

            event.details = Some(LogDetails {
                block_number: block_number.low_u64(),
                block_hash,
                transaction_hash,
                log_index: log_index.low_u64(),
                transaction_from: receipt.as_ref().and_then(|r| r.from),
                gas_used: receipt.as_ref().and_then(|r| r.gas_used),
                success: receipt
                    .as_ref()
                    .map(|r| r.status() == crate::blockchain::TransactionStatus::Confirmed),
            });
            events.push(event);
        }

        events.sort_by_key(PaymentEvent::ordering_key);
        Ok(events)
    }

    async fn latest_block(&self) -> Result<u64> {
        self.client.block_number().await
    }
}

/// Check that a token address is usable before registering it
pub fn parse_address(value: &str) -> Result<Address> {
    use std::str::FromStr;

    let trimmed = value.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| StoreError::invalid_address(value))?;
    if hex_part.len() != 40 {
        return Err(StoreError::invalid_address(value));
    }
    Address::from_str(hex_part).map_err(|_| StoreError::invalid_address(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let address = parse_address("0x694AA1769357215DE4FAC081bf1f309aDC325306").unwrap();
        assert_eq!(address.as_bytes()[0], 0x69);
        assert!(parse_address("694AA1769357215DE4FAC081bf1f309aDC325306").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xZZ4AA1769357215DE4FAC081bf1f309aDC325306").is_err());
    }

    #[test]
    fn test_call_kind() {
        let call = GatewayCall::PayWithEth {
            item_id: "123".to_string(),
            value: U256::one(),
        };
        assert_eq!(call.kind(), CallKind::PayWithEth);
    }
}
