//! Minimal RLP encoder, enough for legacy (EIP-155) transactions.

/// Encodes a byte string.
pub fn encode_bytes(payload: &[u8]) -> Vec<u8> {
    if payload.len() == 1 && payload[0] < 0x80 {
        return payload.to_vec();
    }
    let mut out = length_prefix(payload.len(), 0x80);
    out.extend_from_slice(payload);
    out
}

/// Encodes an unsigned integer as its minimal big-endian byte string.
pub fn encode_uint(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    encode_bytes(&bytes[start..])
}

/// Encodes a big-endian integer already in byte form, trimming leading zeros.
pub fn encode_biguint(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    encode_bytes(&bytes[start..])
}

/// Encodes a list of already-encoded items.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload = items.concat();
    let mut out = length_prefix(payload.len(), 0xc0);
    out.extend_from_slice(&payload);
    out
}

fn length_prefix(len: usize, offset: u8) -> Vec<u8> {
    if len <= 55 {
        return vec![offset + len as u8];
    }
    let len_bytes = (len as u64).to_be_bytes();
    let start = len_bytes.iter().position(|b| *b != 0).unwrap_or(7);
    let len_bytes = &len_bytes[start..];
    let mut out = vec![offset + 55 + len_bytes.len() as u8];
    out.extend_from_slice(len_bytes);
    out
}
