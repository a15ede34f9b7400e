//! Cryptographic utilities for transaction signing

use crate::{Result, StoreError};
use ethereum_types::{Address, H256, U256};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

/// Keccak-256 hash function
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    Keccak256::digest(data).into()
}

/// Parse a `0x`-prefixed 32-byte hex private key
pub fn parse_secret_key(private_key: &str) -> Result<SecretKey> {
    let bytes = hex::decode(private_key.trim_start_matches("0x"))
        .map_err(|_| StoreError::signing("Invalid hex in private key"))?;
    SecretKey::from_slice(&bytes).map_err(|e| StoreError::signing(format!("Invalid private key: {}", e)))
}

/// Derive the account address controlled by a secret key
pub fn address_from_secret(secret: &SecretKey) -> Address {
    let secp = Secp256k1::signing_only();
    let public = PublicKey::from_secret_key(&secp, secret);
    let uncompressed = public.serialize_uncompressed();
    // Skip the 0x04 prefix; the address is the last 20 bytes of the hash.
    let hash = keccak256(&uncompressed[1..]);
    Address::from_slice(&hash[12..])
}

/// Recoverable ECDSA signature split into its Ethereum components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    /// Recovery id, 0 or 1
    pub recovery_id: u8,
    pub r: U256,
    pub s: U256,
}

/// Sign a 32-byte message hash
pub fn sign_hash(hash: H256, secret: &SecretKey) -> Result<RecoverableSignature> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest_slice(hash.as_bytes())
        .map_err(|e| StoreError::signing(format!("Invalid message hash: {}", e)))?;
    let signature = secp.sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, compact) = signature.serialize_compact();

    Ok(RecoverableSignature {
        recovery_id: recovery_id.to_i32() as u8,
        r: U256::from_big_endian(&compact[..32]),
        s: U256::from_big_endian(&compact[32..]),
    })
}
