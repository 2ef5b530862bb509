pub mod api;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for wallet address parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("wallet address must start with 0x")]
    MissingPrefix,
    #[error("wallet address must be 20 bytes of hex")]
    InvalidHex,
}

/// A settlement-chain wallet address.
///
/// Held as raw bytes and always rendered as lowercase hex, so every store key
/// and comparison uses the same canonical form regardless of how the caller
/// cased the address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wallet([u8; 20]);

impl Wallet {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Wallet {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix("0x").ok_or(WalletError::MissingPrefix)?;
        let raw = hex::decode(hex_part).map_err(|_| WalletError::InvalidHex)?;
        let bytes: [u8; 20] = raw.try_into().map_err(|_| WalletError::InvalidHex)?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Wallet {
    type Error = WalletError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Wallet> for String {
    fn from(wallet: Wallet) -> Self {
        wallet.to_string()
    }
}

impl From<[u8; 20]> for Wallet {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Snapshot of the settlement contract's current round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundInfo {
    pub id: u64,
    pub pot_wei: u128,
    pub start: u64,
    pub end: u64,
    pub finalized: bool,
}

/// A wallet's best score within a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoreRow {
    pub wallet: Wallet,
    pub best_score_ms: u64,
    pub achieved_at_ms: u64,
}

/// A single-use timing session. At most one exists per wallet; starting a new
/// attempt replaces it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub wallet: Wallet,
    pub token: String,
    pub round_id: u64,
    pub started_at_ms: u64,
}

/// Locally recorded closure of a round, written once after the payout
/// transaction confirms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundClosure {
    pub round_id: u64,
    pub winner: Wallet,
    pub closing_pot_wei: u128,
    pub closed_at_ms: u64,
}
