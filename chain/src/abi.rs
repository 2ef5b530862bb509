//! Hand-rolled ABI words and event topics for the settlement contract.
//!
//! The contract surface is small (one view call, one payout call, one event),
//! so calldata and results are encoded and decoded directly as 32-byte words.

use crate::{keccak256, Error, Result};

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Full keccak hash of an event signature, hex-encoded for log filters.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// Left-pads an address into a 32-byte word.
pub fn encode_address(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

/// An indexed-address topic for log filters.
pub fn topic_address(address: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(encode_address(address)))
}

/// An indexed-uint topic for log filters.
pub fn topic_u64(value: u64) -> String {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    format!("0x{}", hex::encode(word))
}

/// Splits a hex-encoded call result into 32-byte words.
pub fn decode_words(data: &str) -> Result<Vec<[u8; 32]>> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    let raw = hex::decode(stripped)
        .map_err(|err| Error::Decode(format!("invalid hex in call result: {err}")))?;
    if raw.len() % 32 != 0 {
        return Err(Error::Decode(format!(
            "call result length {} is not word-aligned",
            raw.len()
        )));
    }
    Ok(raw
        .chunks_exact(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

pub fn word_to_u64(word: &[u8; 32]) -> Result<u64> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(Error::Decode("uint64 word overflows".into()));
    }
    let mut out = [0u8; 8];
    out.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(out))
}

pub fn word_to_u128(word: &[u8; 32]) -> Result<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(Error::Decode("uint128 word overflows".into()));
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(out))
}

pub fn word_to_bool(word: &[u8; 32]) -> bool {
    word.iter().any(|b| *b != 0)
}
