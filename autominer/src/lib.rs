//! Autominer for a 25-square round-based mining game.
//!
//! Follows each round through the board and round accounts, values every square,
//! and stakes the best squares in the last seconds before the round closes.

use automation::{AutomationConfig, Mode};
use motherlode_client::DEFAULT_PRICE_FEED_URL;
use motherlode_types::{
    consts::{DEFAULT_PROGRAM_ID, ORE_MINT, SOL_MINT},
    Pubkey,
};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;
use url::Url;

pub mod analyzer;
pub mod automation;
pub mod control;
pub mod engine;
pub mod ledger;
pub mod pricing;
pub mod sequencer;
pub mod tracker;
pub mod valuation;

/// Configuration for the autominer binary.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub rpc_url: String,
    /// Derived from `rpc_url` when absent.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub program_id: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default)]
    pub metrics_port: Option<u16>,

    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "default_stake_per_target")]
    pub stake_per_target: f64,

    #[serde(default = "default_ore_mint")]
    pub ore_mint: String,
    #[serde(default = "default_sol_mint")]
    pub sol_mint: String,
    #[serde(default = "default_price_feed_url")]
    pub price_feed_url: String,
    #[serde(default = "default_price_refresh_seconds")]
    pub price_refresh_seconds: u64,

    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,
    #[serde(default = "default_board_buffer")]
    pub board_buffer: usize,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} URL scheme must be {expected}: {value}")]
    InvalidUrlScheme {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("invalid program id: {value}")]
    InvalidProgramId { value: String },
    #[error("stake_per_target must be positive and finite (got {value})")]
    InvalidStake { value: f64 },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub program_id: Pubkey,

    pub log_level: Level,
    pub worker_threads: usize,
    pub metrics_port: Option<u16>,

    pub automation: AutomationConfig,

    pub ore_mint: String,
    pub sol_mint: String,
    pub price_feed_url: String,
    pub price_refresh: Duration,

    pub mailbox_size: usize,
    pub board_buffer: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_threads() -> usize {
    2
}

fn default_dry_run() -> bool {
    true
}

fn default_stake_per_target() -> f64 {
    AutomationConfig::default().stake_per_target
}

fn default_ore_mint() -> String {
    ORE_MINT.to_string()
}

fn default_sol_mint() -> String {
    SOL_MINT.to_string()
}

fn default_price_feed_url() -> String {
    DEFAULT_PRICE_FEED_URL.to_string()
}

fn default_price_refresh_seconds() -> u64 {
    pricing::DEFAULT_PRICE_REFRESH.as_secs()
}

fn default_mailbox_size() -> usize {
    64
}

fn default_board_buffer() -> usize {
    ledger::DEFAULT_STREAM_BUFFER_SIZE
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn ensure_not_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Empty { field });
    }
    Ok(())
}

fn validate_url(
    field: &'static str,
    value: &str,
    schemes: [&'static str; 2],
    expected: &'static str,
) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrlScheme {
            field,
            expected,
            value: value.to_string(),
        });
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn validate_http_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    validate_url(field, value, ["http", "https"], "http or https")
}

fn validate_ws_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    validate_url(field, value, ["ws", "wss"], "ws or wss")
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        validate_http_url("rpc_url", &self.rpc_url)?;
        if let Some(ws_url) = &self.ws_url {
            validate_ws_url("ws_url", ws_url)?;
        }
        validate_http_url("price_feed_url", &self.price_feed_url)?;

        let program_id = self.program_id.as_deref().unwrap_or(DEFAULT_PROGRAM_ID);
        let program_id =
            Pubkey::from_str(program_id).map_err(|_| ConfigError::InvalidProgramId {
                value: program_id.to_string(),
            })?;

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        ensure_nonzero("worker_threads", self.worker_threads as u64)?;
        ensure_nonzero("price_refresh_seconds", self.price_refresh_seconds)?;
        ensure_nonzero("mailbox_size", self.mailbox_size as u64)?;
        ensure_nonzero("board_buffer", self.board_buffer as u64)?;
        if !self.stake_per_target.is_finite() || self.stake_per_target <= 0.0 {
            return Err(ConfigError::InvalidStake {
                value: self.stake_per_target,
            });
        }
        ensure_not_empty("ore_mint", &self.ore_mint)?;
        ensure_not_empty("sol_mint", &self.sol_mint)?;

        Ok(ValidatedConfig {
            rpc_url: self.rpc_url,
            ws_url: self.ws_url,
            program_id,
            log_level,
            worker_threads: self.worker_threads,
            metrics_port: self.metrics_port,
            automation: AutomationConfig {
                mode: self.mode,
                dry_run: self.dry_run,
                stake_per_target: self.stake_per_target,
            },
            ore_mint: self.ore_mint,
            sol_mint: self.sol_mint,
            price_feed_url: self.price_feed_url,
            price_refresh: Duration::from_secs(self.price_refresh_seconds),
            mailbox_size: self.mailbox_size,
            board_buffer: self.board_buffer,
        })
    }
}
