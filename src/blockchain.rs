//! JSON-RPC transport for the store contract
//!
//! This module provides the node interactions the gateway needs:
//! - Contract reads (`eth_call`)
//! - Transaction submission, node-signed or locally signed
//! - Receipt polling
//! - Log queries and balance checks

use crate::wallet::{LegacyTransaction, LocalWallet};
use crate::{Result, StoreError};
use ethereum_types::{Address, H256, U256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Who signs outgoing transactions
pub enum TransactionSigner {
    /// Account unlocked on the node (local dev nodes)
    Node(Address),
    /// Key held by this process
    Local(LocalWallet),
}

impl TransactionSigner {
    /// Account that sends transactions
    pub fn address(&self) -> Address {
        match self {
            TransactionSigner::Node(address) => *address,
            TransactionSigner::Local(wallet) => wallet.address(),
        }
    }
}

impl std::fmt::Debug for TransactionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionSigner::Node(address) => f.debug_tuple("Node").field(address).finish(),
            TransactionSigner::Local(wallet) => f.debug_tuple("Local").field(wallet).finish(),
        }
    }
}

/// Blockchain transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Confirmed,
    Failed,
}

/// Subset of a transaction receipt the store cares about
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    pub block_number: Option<U256>,
    pub from: Option<Address>,
    pub gas_used: Option<U256>,
    pub status: Option<U256>,
}

impl TransactionReceipt {
    /// Receipt status, treating a missing status field (pre-Byzantium) as success
    pub fn status(&self) -> TransactionStatus {
        match self.status {
            Some(status) if status.is_zero() => TransactionStatus::Failed,
            _ => TransactionStatus::Confirmed,
        }
    }
}

/// A log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: String,
    pub block_number: Option<U256>,
    pub block_hash: Option<H256>,
    pub transaction_hash: Option<H256>,
    pub log_index: Option<U256>,
}

impl RpcLog {
    /// Decoded data bytes
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        decode_hex(&self.data)
    }
}

/// Transaction request for `eth_sendTransaction` and gas estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(rename = "gasPrice", skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
}

/// Receipt polling settings
#[derive(Debug, Clone, Copy)]
pub struct ReceiptPolling {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for ReceiptPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1_000),
            attempts: 60,
        }
    }
}

/// Blockchain client for JSON-RPC interactions
pub struct BlockchainClient {
    /// RPC endpoint URL
    rpc_url: String,
    /// HTTP client for RPC calls
    client: reqwest::Client,
    signer: TransactionSigner,
    polling: ReceiptPolling,
    request_id: AtomicU64,
}

impl std::fmt::Debug for BlockchainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainClient")
            .field("rpc_url", &self.rpc_url)
            .field("signer", &self.signer)
            .field("polling", &self.polling)
            .finish()
    }
}

pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub(crate) fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| StoreError::rpc(format!("Invalid hex in RPC response: {}", e)))
}

impl BlockchainClient {
    /// Create a new blockchain client
    pub fn new(rpc_url: impl Into<String>, signer: TransactionSigner) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            client: reqwest::Client::new(),
            signer,
            polling: ReceiptPolling::default(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Set the receipt polling settings
    pub fn with_polling(mut self, polling: ReceiptPolling) -> Self {
        self.polling = polling;
        self
    }

    /// Set the request timeout of the underlying HTTP client
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(self)
    }

    /// Account that sends transactions
    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    /// Issue a JSON-RPC request and deserialize its `result`
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "rpc request");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id
            }))
            .send()
            .await
            .map_err(|e| StoreError::rpc(format!("RPC request failed: {}", e)))?;

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| StoreError::rpc(format!("Failed to parse RPC response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            // Nodes report failed eth_call / estimateGas as execution reverts.
            if message.contains("revert") {
                return Err(StoreError::reverted(message));
            }
            return Err(StoreError::rpc(format!("{} failed: {}", method, message)));
        }

        let result = response_json
            .get("result")
            .cloned()
            .ok_or_else(|| StoreError::rpc("No result in RPC response"))?;

        Ok(serde_json::from_value(result)?)
    }

    /// Execute a read-only call against a contract
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let result: String = self
            .request(
                "eth_call",
                json!([{ "to": to, "data": encode_hex(data) }, "latest"]),
            )
            .await?;
        decode_hex(&result)
    }

    /// Submit a transaction and wait until it is mined successfully
    pub async fn transact(&self, to: Address, data: Vec<u8>, value: U256) -> Result<H256> {
        let hash = match &self.signer {
            TransactionSigner::Node(from) => {
                let request = TransactionRequest {
                    from: *from,
                    to,
                    value: (!value.is_zero()).then_some(value),
                    data: Some(encode_hex(&data)),
                    gas: None,
                    gas_price: None,
                };
                self.request::<H256>("eth_sendTransaction", json!([request]))
                    .await?
            }
            TransactionSigner::Local(wallet) => {
                self.send_signed(wallet, to, data, value).await?
            }
        };

        debug!(?hash, "transaction submitted");
        let receipt = self.wait_for_receipt(hash).await?;
        match receipt.status() {
            TransactionStatus::Confirmed => Ok(hash),
            TransactionStatus::Failed => Err(StoreError::reverted(format!(
                "transaction {:?} failed on chain",
                hash
            ))),
        }
    }

    async fn send_signed(
        &self,
        wallet: &LocalWallet,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> Result<H256> {
        let from = wallet.address();
        let nonce: U256 = self
            .request("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let gas_price: U256 = self.request("eth_gasPrice", json!([])).await?;
        let gas = self
            .estimate_gas(&TransactionRequest {
                from,
                to,
                value: Some(value),
                data: Some(encode_hex(&data)),
                gas: None,
                gas_price: None,
            })
            .await?;

        let raw = wallet.sign_transaction(&LegacyTransaction {
            nonce,
            gas_price,
            gas,
            to,
            value,
            data,
        })?;

        self.request("eth_sendRawTransaction", json!([encode_hex(&raw)]))
            .await
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, transaction: &TransactionRequest) -> Result<U256> {
        self.request("eth_estimateGas", json!([transaction])).await
    }

    /// Get a transaction receipt, `None` while the transaction is pending
    pub async fn get_transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        self.request("eth_getTransactionReceipt", json!([tx_hash]))
            .await
    }

    /// Poll for a receipt using the configured interval and attempt budget
    pub async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt> {
        for attempt in 1..=self.polling.attempts {
            if let Some(receipt) = self.get_transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if attempt < self.polling.attempts {
                tokio::time::sleep(self.polling.interval).await;
            }
        }

        warn!(?tx_hash, attempts = self.polling.attempts, "receipt not found");
        Err(StoreError::ReceiptNotFound {
            hash: format!("{:?}", tx_hash),
            attempts: self.polling.attempts,
        })
    }

    /// Get the native balance of an address
    pub async fn get_balance(&self, address: Address) -> Result<U256> {
        self.request("eth_getBalance", json!([address, "latest"]))
            .await
    }

    /// Latest block number
    pub async fn block_number(&self) -> Result<u64> {
        let block: U256 = self.request("eth_blockNumber", json!([])).await?;
        Ok(block.low_u64())
    }

    /// Chain id reported by the node
    pub async fn chain_id(&self) -> Result<u64> {
        let chain_id: U256 = self.request("eth_chainId", json!([])).await?;
        Ok(chain_id.low_u64())
    }

    /// Logs emitted by `address` with the given first topic, from `from_block` to latest
    pub async fn get_logs(&self, address: Address, topic0: H256, from_block: u64) -> Result<Vec<RpcLog>> {
        self.request(
            "eth_getLogs",
            json!([{
                "address": address,
                "topics": [topic0],
                "fromBlock": format!("0x{:x}", from_block),
                "toBlock": "latest"
            }]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blockchain_client_creation() {
        let client = BlockchainClient::new(
            "http://127.0.0.1:8545",
            TransactionSigner::Node(Address::repeat_byte(0x01)),
        );
        assert_eq!(client.sender(), Address::repeat_byte(0x01));
    }

    #[test]
    fn test_transaction_request_serialization() {
        let tx = TransactionRequest {
            from: Address::repeat_byte(0x12),
            to: Address::repeat_byte(0x34),
            value: Some(U256::from(0x1000u64)),
            data: None,
            gas: None,
            gas_price: None,
        };

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["value"], "0x1000");
        assert!(json.get("data").is_none());
        assert!(json["from"].as_str().unwrap().starts_with("0x1212"));
    }

    #[test]
    fn test_receipt_status() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": format!("{:?}", H256::repeat_byte(0x01)),
            "blockNumber": "0x10",
            "from": format!("{:?}", Address::repeat_byte(0x02)),
            "gasUsed": "0x5208",
            "status": "0x0"
        }))
        .unwrap();
        assert_eq!(receipt.status(), TransactionStatus::Failed);
        assert_eq!(receipt.gas_used, Some(U256::from(21_000u64)));
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(encode_hex(&[0xde, 0xad]), "0xdead");
        assert_eq!(decode_hex("0xdead").unwrap(), vec![0xde, 0xad]);
        assert!(decode_hex("0xzz").is_err());
    }
}
