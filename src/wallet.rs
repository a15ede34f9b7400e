//! Local wallet for signing store transactions
//!
//! Builds and signs EIP-155 legacy transactions so the client can talk to
//! any JSON-RPC endpoint, not only nodes that hold the account's key.

use crate::crypto::{address_from_secret, keccak256, parse_secret_key, sign_hash};
use crate::{Result, StoreError};
use ethereum_types::{Address, H256, U256};
use rlp::RlpStream;
use secp256k1::SecretKey;

/// Wallet holding a private key for a single account
pub struct LocalWallet {
    /// Private key for signing (in production, this should come from secure storage)
    secret: SecretKey,
    address: Address,
    chain_id: u64,
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Fields of an unsigned legacy transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas: U256,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn rlp_append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }

    /// Hash that is signed under EIP-155
    pub fn signing_hash(&self, chain_id: u64) -> H256 {
        let mut stream = RlpStream::new_list(9);
        self.rlp_append_body(&mut stream);
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        H256::from(keccak256(&stream.out()))
    }
}

impl LocalWallet {
    /// Create a wallet from a parsed key
    pub fn new(secret: SecretKey, chain_id: u64) -> Self {
        Self {
            address: address_from_secret(&secret),
            secret,
            chain_id,
        }
    }

    /// Account address of this wallet
    pub fn address(&self) -> Address {
        self.address
    }

    /// Chain the wallet signs for
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Sign a transaction and return the raw bytes for `eth_sendRawTransaction`
    pub fn sign_transaction(&self, tx: &LegacyTransaction) -> Result<Vec<u8>> {
        let hash = tx.signing_hash(self.chain_id);
        let signature = sign_hash(hash, &self.secret)?;
        let v = u64::from(signature.recovery_id) + self.chain_id * 2 + 35;

        let mut stream = RlpStream::new_list(9);
        tx.rlp_append_body(&mut stream);
        stream.append(&v);
        stream.append(&signature.r);
        stream.append(&signature.s);
        Ok(stream.out().to_vec())
    }
}

/// Wallet factory for creating wallets from different sources
pub struct WalletFactory;

impl WalletFactory {
    /// Create wallet from private key string
    pub fn from_private_key(private_key: &str, chain_id: u64) -> Result<LocalWallet> {
        // Validate private key format
        if !private_key.starts_with("0x") || private_key.len() != 66 {
            return Err(StoreError::signing(
                "Invalid private key format. Must be 64 hex characters with 0x prefix",
            ));
        }

        let secret = parse_secret_key(private_key)?;
        Ok(LocalWallet::new(secret, chain_id))
    }

    /// Create wallet from environment variable
    pub fn from_env(private_key_env: &str, chain_id: u64) -> Result<LocalWallet> {
        let private_key = std::env::var(private_key_env).map_err(|_| {
            StoreError::config(format!(
                "Environment variable {} not found",
                private_key_env
            ))
        })?;

        Self::from_private_key(&private_key, chain_id)
    }
}
