pub mod abi;
pub mod client;
pub mod rlp;

pub use client::{Client, Config};

use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Error type for settlement-chain operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid contract address: {0}")]
    InvalidAddress(String),
    #[error("invalid signer key: {0}")]
    InvalidSignerKey(String),
    #[error("no signing authority configured")]
    NoSigner,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("transaction {0} reverted")]
    Reverted(String),
    #[error("transaction {0} unconfirmed after {1:?}")]
    ConfirmationTimeout(String, std::time::Duration),
}

/// Result type for settlement-chain operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}
