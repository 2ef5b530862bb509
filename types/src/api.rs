//! JSON bodies for the coordinator's HTTP surface.
//!
//! Field names are camelCase to match the browser client; requests also
//! accept `walletAddress` as an alias for `wallet`.

use crate::Wallet;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptRequest {
    #[serde(alias = "walletAddress")]
    pub wallet: Wallet,
    pub round_id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptResponse {
    pub session_token: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreRequest {
    #[serde(alias = "walletAddress")]
    pub wallet: Wallet,
    /// Advisory; the round recorded at session start is authoritative.
    #[serde(default)]
    pub round_id: Option<u64>,
    pub score_ms: u64,
    pub session_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreResponse {
    pub round_id: u64,
    pub best_score_ms: u64,
    pub round_closed: bool,
    pub winner: Option<Wallet>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub wallet: Wallet,
    pub best_score_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentRoundResponse {
    pub round_id: u64,
    /// Decimal string; pot values overflow JavaScript numbers.
    pub pot_wei: String,
    pub finalized: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
