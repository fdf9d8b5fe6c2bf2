//! Canonical transfer rows produced by normalization.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Which side of a transfer is absent or authority-assigned. Serialized as its integer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TransferType {
    Normal = 0,
    Fee = 1,
    NoSender = 2,
    NoReceiver = 3,
    BalancesSetByRoot = 4,
}

impl From<TransferType> for u8 {
    fn from(t: TransferType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for TransferType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Fee),
            2 => Ok(Self::NoSender),
            3 => Ok(Self::NoReceiver),
            4 => Ok(Self::BalancesSetByRoot),
            other => Err(format!("unknown transfer type {other}")),
        }
    }
}

/// One value movement. Equality is full-row equality, which is what
/// per-block deduplication relies on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalTransfer {
    pub block: u64,
    pub transaction_hash: String,
    pub sender_address: Option<String>,
    pub receiver_address: Option<String>,
    #[serde(rename = "type")]
    pub kind: TransferType,
    pub token_address: String,
    pub coin_value: Decimal,
    pub fee: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub block_timestamp: OffsetDateTime,
    /// Position of the source extrinsic in the block.
    pub log_index: u32,
}
