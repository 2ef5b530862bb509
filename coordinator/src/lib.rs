use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;

pub mod api;
pub mod coordinator;
pub mod metrics;
pub mod store;

/// Configuration for the coordinator, deserialized from YAML.
#[derive(Deserialize, Serialize)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub log_level: String,

    pub rpc_url: String,
    pub contract_address: String,
    pub chain_id: u64,
    /// Payout authority key. Without it the coordinator still scores attempts
    /// but never submits payouts.
    #[serde(default)]
    pub signer_key: Option<String>,

    pub entry_fee_wei: u128,
    pub pot_multiplier: u64,
    #[serde(default = "default_tolerance_buffer_ms")]
    pub tolerance_buffer_ms: u64,
    #[serde(default = "default_payment_lookback_blocks")]
    pub payment_lookback_blocks: u64,
    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0")]
    InvalidNonZero { field: &'static str },
    #[error("entry_fee_wei * pot_multiplier overflows")]
    ThresholdOverflow,
}

pub struct ValidatedConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub log_level: Level,
    pub chain: holdout_chain::Config,
    /// Pot value that makes a round eligible for payout.
    pub threshold_wei: u128,
    pub tolerance_buffer_ms: u64,
    pub leaderboard_limit: usize,
}

fn default_tolerance_buffer_ms() -> u64 {
    4_000
}

fn default_payment_lookback_blocks() -> u64 {
    50_000
}

fn default_leaderboard_limit() -> usize {
    100
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.entry_fee_wei == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "entry_fee_wei",
            });
        }
        if self.pot_multiplier == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "pot_multiplier",
            });
        }
        if self.leaderboard_limit == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "leaderboard_limit",
            });
        }
        let threshold_wei = self
            .entry_fee_wei
            .checked_mul(u128::from(self.pot_multiplier))
            .ok_or(ConfigError::ThresholdOverflow)?;
        let log_level = Level::from_str(&self.log_level).map_err(|_| {
            ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            }
        })?;

        Ok(ValidatedConfig {
            port: self.port,
            db_path: PathBuf::from(self.db_path),
            log_level,
            chain: holdout_chain::Config {
                rpc_url: self.rpc_url,
                contract_address: self.contract_address,
                chain_id: self.chain_id,
                payment_lookback_blocks: self.payment_lookback_blocks,
                signer_key: self.signer_key,
            },
            threshold_wei,
            tolerance_buffer_ms: self.tolerance_buffer_ms,
            leaderboard_limit: self.leaderboard_limit,
        })
    }
}

#[cfg(test)]
mod tests;
