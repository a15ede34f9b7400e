//! Solidity ABI encoding and decoding for the store's call surface
//!
//! Covers exactly the value shapes the store, its ERC20 tokens and the
//! Chainlink price feed use: `uint256`, `address`, `string`, arrays and
//! tuples of those.

use crate::crypto::keccak256;
use crate::types::PaymentEvent;
use crate::types::PaymentToken;
use crate::{Result, StoreError};
use ethereum_types::{Address, H256, U256};

/// Function and event signatures
pub mod signatures {
    pub const GET_PAYMENT_TOKENS: &str = "getPaymentTokens()";
    pub const GET_TOKEN_BALANCE: &str = "getTokenBalance(uint256)";
    pub const ITEM_PRICE: &str = "itemPrice(string)";
    pub const ADD_PAYMENT_TOKEN: &str = "addPaymentToken(string,address)";
    pub const REMOVE_PAYMENT_TOKEN: &str = "removePaymentToken(uint256)";
    pub const PAY_WITH_TOKEN: &str = "payWithToken(uint256,uint256,string)";
    pub const PAY_WITH_ETH: &str = "payWithEth(string)";
    pub const WITHDRAW_TOKEN: &str = "withdrawToken(uint256,uint256)";
    pub const WITHDRAW_ETH: &str = "withdrawEth(uint256)";
    pub const SET_PRICE: &str = "setPrice(string,uint256)";

    pub const ERC20_APPROVE: &str = "approve(address,uint256)";

    pub const FEED_LATEST_ROUND_DATA: &str = "latestRoundData()";
    pub const FEED_DECIMALS: &str = "decimals()";

    pub const PAYMENT_RECEIVE_EVENT: &str =
        "PaymentReceive(address,string,string,uint256,string,address,uint256)";
}

/// An ABI value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(U256),
    Address(Address),
    String(String),
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        match self {
            Token::Uint(_) | Token::Address(_) => false,
            Token::String(_) | Token::Array(_) => true,
            Token::Tuple(members) => members.iter().any(Token::is_dynamic),
        }
    }

    fn head_len(&self) -> usize {
        match self {
            Token::Tuple(members) if !self.is_dynamic() => {
                members.iter().map(Token::head_len).sum()
            }
            _ => 32,
        }
    }

    fn encode_static(&self, out: &mut Vec<u8>) {
        match self {
            Token::Uint(value) => out.extend_from_slice(&uint_word(*value)),
            Token::Address(address) => out.extend_from_slice(&address_word(*address)),
            Token::Tuple(members) => out.extend_from_slice(&encode(members)),
            Token::String(_) | Token::Array(_) => {}
        }
    }

    fn encode_dynamic(&self, out: &mut Vec<u8>) {
        match self {
            Token::String(value) => {
                let bytes = value.as_bytes();
                out.extend_from_slice(&uint_word(U256::from(bytes.len())));
                out.extend_from_slice(bytes);
                let padding = (32 - bytes.len() % 32) % 32;
                out.extend(std::iter::repeat(0u8).take(padding));
            }
            Token::Array(items) => {
                out.extend_from_slice(&uint_word(U256::from(items.len())));
                out.extend_from_slice(&encode(items));
            }
            Token::Tuple(members) => out.extend_from_slice(&encode(members)),
            Token::Uint(_) | Token::Address(_) => {}
        }
    }
}

fn uint_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// Encode a sequence of values with head/tail layout
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.iter().map(Token::head_len).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word(U256::from(head_len + tail.len())));
            token.encode_dynamic(&mut tail);
        } else {
            token.encode_static(&mut head);
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// First four bytes of the keccak hash of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for a function call
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(args));
    data
}

/// Topic hash of an event signature
pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8]> {
    data.get(offset..offset + 32).ok_or_else(|| {
        StoreError::abi(format!(
            "word at offset {} is out of bounds (data is {} bytes)",
            offset,
            data.len()
        ))
    })
}

/// Read a `uint256` from the word at `offset`
pub fn read_uint(data: &[u8], offset: usize) -> Result<U256> {
    Ok(U256::from_big_endian(word_at(data, offset)?))
}

fn read_offset(data: &[u8], offset: usize) -> Result<usize> {
    let value = read_uint(data, offset)?;
    if value > U256::from(data.len()) {
        return Err(StoreError::abi(format!(
            "length or offset {} exceeds data size {}",
            value,
            data.len()
        )));
    }
    Ok(value.low_u64() as usize)
}

/// Read an `address` from the word at `offset`
pub fn read_address(data: &[u8], offset: usize) -> Result<Address> {
    let word = word_at(data, offset)?;
    Ok(Address::from_slice(&word[12..]))
}

/// Read a `string` whose offset word sits at `head`, relative to `base`
pub fn read_string(data: &[u8], base: usize, head: usize) -> Result<String> {
    let start = base + read_offset(data, head)?;
    let len = read_offset(data, start)?;
    let bytes = data
        .get(start + 32..start + 32 + len)
        .ok_or_else(|| StoreError::abi("string bytes out of bounds"))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::abi("string is not valid UTF-8"))
}

/// Decode the `(string tokenName, address tokenAddress)[]` returned by `getPaymentTokens()`
pub fn decode_payment_tokens(data: &[u8]) -> Result<Vec<PaymentToken>> {
    let array = read_offset(data, 0)?;
    let count = read_offset(data, array)?;
    let base = array + 32;

    let mut tokens = Vec::with_capacity(count);
    for i in 0..count {
        let tuple = base + read_offset(data, base + 32 * i)?;
        let name = read_string(data, tuple, tuple)?;
        let address = read_address(data, tuple + 32)?;
        tokens.push(PaymentToken { name, address });
    }
    Ok(tokens)
}

/// Encode a token list the way `getPaymentTokens()` returns it
pub fn encode_payment_tokens(tokens: &[PaymentToken]) -> Vec<u8> {
    let items = tokens
        .iter()
        .map(|t| Token::Tuple(vec![Token::String(t.name.clone()), Token::Address(t.address)]))
        .collect();
    encode(&[Token::Array(items)])
}

/// Decode a `PaymentReceive` log.
///
/// The payer is taken from the second topic when it is indexed and from
/// the data otherwise. Block and receipt detail is filled in by the caller.
pub fn decode_payment_event(topics: &[H256], data: &[u8]) -> Result<PaymentEvent> {
    let expected = event_topic(signatures::PAYMENT_RECEIVE_EVENT);
    match topics.first() {
        Some(topic) if *topic == expected => {}
        _ => return Err(StoreError::abi("log is not a PaymentReceive event")),
    }

    let (payer, head) = match topics.get(1) {
        Some(topic) => (Address::from_slice(&topic.as_bytes()[12..]), 0),
        None => (read_address(data, 0)?, 32),
    };

    Ok(PaymentEvent {
        payer,
        tx_details: read_string(data, 0, head)?,
        item_id: read_string(data, 0, head + 32)?,
        amount: read_uint(data, head + 64)?,
        token_name: read_string(data, 0, head + 96)?,
        token_address: read_address(data, head + 128)?,
        timestamp: read_uint(data, head + 160)?.low_u64(),
        details: None,
    })
}

/// Encode the data section of a `PaymentReceive` log with an unindexed payer
pub fn encode_payment_event(event: &PaymentEvent) -> Vec<u8> {
    encode(&[
        Token::Address(event.payer),
        Token::String(event.tx_details.clone()),
        Token::String(event.item_id.clone()),
        Token::Uint(event.amount),
        Token::String(event.token_name.clone()),
        Token::Address(event.token_address),
        Token::Uint(U256::from(event.timestamp)),
    ])
}

/// The fields of an AggregatorV3 `latestRoundData()` answer this crate uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundData {
    pub round_id: U256,
    /// Raw `int256` answer; negative answers are reported as `None`
    pub answer: Option<U256>,
    pub updated_at: u64,
}

/// Decode `latestRoundData()`
pub fn decode_round_data(data: &[u8]) -> Result<RoundData> {
    let round_id = read_uint(data, 0)?;
    let raw_answer = read_uint(data, 32)?;
    let updated_at = read_uint(data, 96)?;

    // int256 sign bit
    let answer = if raw_answer.bit(255) {
        None
    } else {
        Some(raw_answer)
    };

    Ok(RoundData {
        round_id,
        answer,
        updated_at: updated_at.low_u64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(selector(signatures::ERC20_APPROVE)), "095ea7b3");
        assert_eq!(hex::encode(selector(signatures::FEED_DECIMALS)), "313ce567");
        assert_eq!(
            hex::encode(selector(signatures::FEED_LATEST_ROUND_DATA)),
            "feaf968c"
        );
    }

    #[test]
    fn test_encode_static_call() {
        let spender = Address::repeat_byte(0xab);
        let data = encode_call(
            signatures::ERC20_APPROVE,
            &[Token::Address(spender), Token::Uint(U256::from(400u64))],
        );
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[4 + 12..4 + 32], spender.as_bytes());
        assert_eq!(read_uint(&data[4..], 32).unwrap(), U256::from(400u64));
    }

    #[test]
    fn test_encode_string_layout() {
        // payWithToken(uint256,uint256,string)
        let data = encode(&[
            Token::Uint(U256::from(7u64)),
            Token::Uint(U256::zero()),
            Token::String("123456789bb".to_string()),
        ]);
        // three head words, length word, one padded data word
        assert_eq!(data.len(), 5 * 32);
        assert_eq!(read_uint(&data, 64).unwrap(), U256::from(96u64));
        assert_eq!(read_string(&data, 0, 64).unwrap(), "123456789bb");
    }

    #[test]
    fn test_payment_tokens_layout() {
        let tokens = vec![
            PaymentToken::new("USDT", Address::repeat_byte(0x01)),
            PaymentToken::new("A much longer token name over thirty-two bytes", Address::repeat_byte(0x02)),
        ];
        let data = encode_payment_tokens(&tokens);

        // outer offset, then the array length
        assert_eq!(read_uint(&data, 0).unwrap(), U256::from(32u64));
        assert_eq!(read_uint(&data, 32).unwrap(), U256::from(2u64));
        assert_eq!(decode_payment_tokens(&data).unwrap(), tokens);
    }

    #[test]
    fn test_empty_payment_tokens() {
        let data = encode_payment_tokens(&[]);
        assert!(decode_payment_tokens(&data).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_data_is_an_error() {
        let data = encode_payment_tokens(&[PaymentToken::new("USDT", Address::repeat_byte(0x01))]);
        assert!(decode_payment_tokens(&data[..data.len() - 40]).is_err());
        assert!(read_uint(&[0u8; 16], 0).is_err());
    }

    #[test]
    fn test_payment_event_with_indexed_payer() {
        let payer = Address::repeat_byte(0x42);
        let mut payer_topic = [0u8; 32];
        payer_topic[12..].copy_from_slice(payer.as_bytes());

        let data = encode(&[
            Token::String("token payment".to_string()),
            Token::String("123456789bb".to_string()),
            Token::Uint(U256::from(400u64)),
            Token::String("USDT".to_string()),
            Token::Address(Address::repeat_byte(0x07)),
            Token::Uint(U256::from(1_700_000_000u64)),
        ]);
        let topics = [
            event_topic(signatures::PAYMENT_RECEIVE_EVENT),
            H256::from(payer_topic),
        ];

        let event = decode_payment_event(&topics, &data).unwrap();
        assert_eq!(event.payer, payer);
        assert_eq!(event.item_id, "123456789bb");
        assert_eq!(event.token_name, "USDT");
        assert_eq!(event.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_foreign_log_rejected() {
        let topics = [event_topic("Transfer(address,address,uint256)")];
        assert!(decode_payment_event(&topics, &[]).is_err());
    }

    #[test]
    fn test_negative_feed_answer() {
        let data = encode(&[
            Token::Uint(U256::from(1u64)),
            Token::Uint(U256::MAX),
            Token::Uint(U256::zero()),
            Token::Uint(U256::from(100u64)),
            Token::Uint(U256::from(1u64)),
        ]);
        let round = decode_round_data(&data).unwrap();
        assert_eq!(round.answer, None);
        assert_eq!(round.updated_at, 100);
    }
}
