//! Chain constants for normalization: treasury, redenomination, allow/ignore lists.
//!
//! Defaults describe Polkadot mainnet. A JSON file can override any field;
//! missing fields keep their default.
//!
//! Load from: env `POLKADOT_ETL_CONFIG_PATH`, or `./config/polkadot.json`, or `./polkadot.json`.

use crate::polkadot::block::MethodId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Polkadot treasury account.
pub const POLKADOT_TREASURY: &str = "13UVJyLnbVp9RBZYFwFGyDvVd1y27Tt8tkntv6Q7JVPhFsTB";

/// First block using the 10-decimal DOT denomination.
pub const REDENOMINATION_HEIGHT: u64 = 1_248_328;

const MAX_DECIMAL_SCALE: u32 = 28;

const DEFAULT_EVENT_ALLOW_LIST: &[&str] = &[
    "balances.BalanceSet",
    "balances.Deposit",
    "balances.DustLost",
    "balances.ReserveRepatriated",
    "balances.Slashed",
    "balances.Transfer",
    "claims.Claimed",
    "identity.SubIdentityAdded",
    "identity.SubIdentityRemoved",
    "identity.SubIdentityRevoked",
    "staking.Reward",
    "staking.Rewarded",
    "treasury.Deposit",
];

const DEFAULT_EXTRINSIC_IGNORE_LIST: &[&str] = &["paraInherent", "timestamp"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Token identifier written to every row.
    pub token: String,
    pub treasury_address: String,
    pub redenomination_height: u64,
    /// Raw amounts are divided by 10^decimals.
    pub decimals_before_redenomination: u32,
    pub decimals_after_redenomination: u32,
    /// Event types (`pallet.Method`) that produce rows.
    pub event_allow_list: Vec<String>,
    /// Extrinsics skipped entirely: `pallet` or `pallet.method`.
    pub extrinsic_ignore_list: Vec<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            token: "DOT".to_string(),
            treasury_address: POLKADOT_TREASURY.to_string(),
            redenomination_height: REDENOMINATION_HEIGHT,
            decimals_before_redenomination: 12,
            decimals_after_redenomination: 10,
            event_allow_list: DEFAULT_EVENT_ALLOW_LIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extrinsic_ignore_list: DEFAULT_EXTRINSIC_IGNORE_LIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ChainConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load config: env POLKADOT_ETL_CONFIG_PATH, then ./config/polkadot.json, then ./polkadot.json.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("POLKADOT_ETL_CONFIG_PATH") {
            return Self::load_from_path(Path::new(&path));
        }
        for candidate in [
            Path::new("./config/polkadot.json"),
            Path::new("./polkadot.json"),
        ] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for decimals in [
            self.decimals_before_redenomination,
            self.decimals_after_redenomination,
        ] {
            if decimals > MAX_DECIMAL_SCALE {
                return Err(ConfigError::Invalid(format!(
                    "decimals {decimals} exceeds {MAX_DECIMAL_SCALE}"
                )));
            }
        }
        Ok(())
    }

    /// Decimal places in effect at `height`.
    pub fn decimals_at(&self, height: u64) -> u32 {
        if height < self.redenomination_height {
            self.decimals_before_redenomination
        } else {
            self.decimals_after_redenomination
        }
    }

    pub fn is_ignored(&self, call: &MethodId) -> bool {
        self.extrinsic_ignore_list
            .iter()
            .any(|entry| match entry.split_once('.') {
                Some((pallet, method)) => pallet == call.pallet && method == call.method,
                None => *entry == call.pallet,
            })
    }

    pub fn is_allowed(&self, event: &MethodId) -> bool {
        self.event_allow_list.iter().any(|entry| {
            entry
                .split_once('.')
                .is_some_and(|(pallet, method)| pallet == event.pallet && method == event.method)
        })
    }
}
