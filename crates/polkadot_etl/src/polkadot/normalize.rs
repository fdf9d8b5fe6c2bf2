//! Block normalization: sidecar block record -> canonical transfer rows.

use crate::polkadot::block::{value_as_u128, BlockRecord, Extrinsic, Signature};
use crate::polkadot::config::ChainConfig;
use crate::polkadot::rules::{rule_for, RuleContext, RuleError};
use crate::polkadot::transfer::CanonicalTransfer;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("block #{block} is not finalized")]
    BlockNotFinalized { block: u64 },
    #[error("block #{block} has no timestamp in its first extrinsic")]
    MissingTimestamp { block: u64 },
    #[error("block #{block} extrinsic {extrinsic_hash}: malformed signature {signature}")]
    MalformedSignature {
        block: u64,
        extrinsic_hash: String,
        signature: String,
    },
    #[error("block #{block}: event type {event_type} is allow-listed but has no rule")]
    UnhandledEventType { block: u64, event_type: String },
    #[error("block #{block} extrinsic {extrinsic_hash}: {event_type} data[{index}] is missing or malformed")]
    MalformedEventData {
        block: u64,
        extrinsic_hash: String,
        event_type: String,
        index: usize,
    },
    #[error("block #{block}: {event_type} amount {raw} cannot be scaled by 10^{decimals}")]
    AmountOutOfRange {
        block: u64,
        event_type: String,
        raw: u128,
        decimals: u32,
    },
}

/// Non-fatal findings about a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    NoRelevantTransfers { block: u64 },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::NoRelevantTransfers { block } => write!(
                f,
                "block #{block} doesn't have any transactions with relevant events"
            ),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Normalized {
    pub transfers: Vec<CanonicalTransfer>,
    pub advisories: Vec<Advisory>,
}

/// Where an event sits, for error reporting.
struct EventSite<'a> {
    block: u64,
    extrinsic_hash: &'a str,
    event_type: String,
}

impl EventSite<'_> {
    fn malformed(&self, index: usize) -> NormalizeError {
        NormalizeError::MalformedEventData {
            block: self.block,
            extrinsic_hash: self.extrinsic_hash.to_string(),
            event_type: self.event_type.clone(),
            index,
        }
    }

    fn amount(
        &self,
        data: &[Value],
        index: Option<usize>,
        decimals: u32,
    ) -> Result<Decimal, NormalizeError> {
        let Some(index) = index else {
            return Ok(Decimal::ZERO);
        };
        let raw = data
            .get(index)
            .and_then(value_as_u128)
            .ok_or_else(|| self.malformed(index))?;
        let out_of_range = || NormalizeError::AmountOutOfRange {
            block: self.block,
            event_type: self.event_type.clone(),
            raw,
            decimals,
        };
        let signed = i128::try_from(raw).map_err(|_| out_of_range())?;
        Decimal::try_from_i128_with_scale(signed, decimals)
            .map(|d| d.normalize())
            .map_err(|_| out_of_range())
    }
}

/// Signer of an extrinsic. Unsigned extrinsics (inherents, claims) have none.
pub fn resolve_signer(block: u64, extrinsic: &Extrinsic) -> Result<Option<&str>, NormalizeError> {
    match &extrinsic.signature {
        None => Ok(None),
        Some(Signature::Address(address)) => Ok(Some(address.as_str())),
        Some(Signature::Structured { signer }) => Ok(Some(signer.as_str())),
        Some(Signature::Other(value)) => Err(NormalizeError::MalformedSignature {
            block,
            extrinsic_hash: extrinsic.hash.clone(),
            signature: value.to_string(),
        }),
    }
}

/// Normalize one finalized block into transfer rows.
///
/// Pure: the same record always yields the same rows and advisories.
/// Exact duplicate rows are dropped, keeping the first occurrence.
pub fn normalize_block(
    block: &BlockRecord,
    config: &ChainConfig,
) -> Result<Normalized, NormalizeError> {
    if !block.finalized {
        return Err(NormalizeError::BlockNotFinalized {
            block: block.number,
        });
    }
    let block_timestamp = block.timestamp().ok_or(NormalizeError::MissingTimestamp {
        block: block.number,
    })?;
    let decimals = config.decimals_at(block.number);

    let mut seen = HashSet::new();
    let mut transfers = Vec::new();
    for (position, extrinsic) in block.extrinsics.iter().enumerate() {
        if config.is_ignored(&extrinsic.method) {
            continue;
        }
        let relevant: Vec<_> = extrinsic
            .events
            .iter()
            .filter(|event| config.is_allowed(&event.method))
            .collect();
        if relevant.is_empty() {
            continue;
        }
        let signer = resolve_signer(block.number, extrinsic)?;
        let ctx = RuleContext {
            success: extrinsic.success,
            block_height: block.number,
            author: block.author_id.as_deref(),
            signer,
            treasury: &config.treasury_address,
        };
        let log_index = u32::try_from(position).unwrap_or(u32::MAX);

        for event in relevant {
            let site = EventSite {
                block: block.number,
                extrinsic_hash: &extrinsic.hash,
                event_type: event.method.to_string(),
            };
            let rule = rule_for(&event.method).ok_or_else(|| NormalizeError::UnhandledEventType {
                block: block.number,
                event_type: site.event_type.clone(),
            })?;
            let outcome = (rule.apply)(&event.data, &ctx).map_err(|e| match e {
                RuleError::BadAddress { index } => site.malformed(index),
            })?;
            let coin_value = if rule.gated && !extrinsic.success {
                Decimal::ZERO
            } else {
                site.amount(&event.data, outcome.value_index, decimals)?
            };
            let fee = site.amount(&event.data, outcome.fee_index, decimals)?;

            let row = CanonicalTransfer {
                block: block.number,
                transaction_hash: extrinsic.hash.clone(),
                sender_address: outcome.sender,
                receiver_address: outcome.receiver,
                kind: outcome.kind,
                token_address: config.token.clone(),
                coin_value,
                fee,
                block_timestamp,
                log_index,
            };
            if seen.insert(row.clone()) {
                transfers.push(row);
            }
        }
    }

    let mut advisories = Vec::new();
    if transfers.is_empty() {
        advisories.push(Advisory::NoRelevantTransfers {
            block: block.number,
        });
    }
    Ok(Normalized {
        transfers,
        advisories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polkadot::config::{POLKADOT_TREASURY, REDENOMINATION_HEIGHT};
    use crate::polkadot::transfer::TransferType;
    use serde_json::json;
    use std::str::FromStr;

    const AUTHOR: &str = "1hCMdtRsaRA4ZTEKpPKPvEjK9rZpGhyFnRHSDhqFMCEayRL";
    const ALICE: &str = "15oF4uVJwmo4TdGW7VfQxNLavjCXviqxT9S1MgbjMNHr6Sp5";
    const BOB: &str = "14E5nqKAp3oAJcmzgZhUD2RcptBeUBScxKHgJKU4HPNcKVf3";

    fn timestamp_extrinsic() -> Value {
        json!({
            "method": { "pallet": "timestamp", "method": "set" },
            "hash": "0x01",
            "success": true,
            "signature": null,
            "args": { "now": "1633031994000" },
            "events": []
        })
    }

    fn block(number: u64, extrinsics: Vec<Value>) -> BlockRecord {
        let mut all = vec![timestamp_extrinsic()];
        all.extend(extrinsics);
        serde_json::from_value(json!({
            "number": number.to_string(),
            "finalized": true,
            "authorId": AUTHOR,
            "extrinsics": all
        }))
        .unwrap()
    }

    fn transfer_extrinsic(success: bool, amount: &str) -> Value {
        json!({
            "method": { "pallet": "balances", "method": "transferKeepAlive" },
            "hash": "0xaa",
            "success": success,
            "signature": { "signature": "0x00", "signer": { "id": ALICE } },
            "args": {},
            "events": [
                { "method": { "pallet": "balances", "method": "Withdraw" }, "data": [ALICE, "100"] },
                { "method": { "pallet": "balances", "method": "Transfer" }, "data": [ALICE, BOB, amount] },
                { "method": { "pallet": "system", "method": "ExtrinsicSuccess" }, "data": [{}] }
            ]
        })
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn transfer_row() {
        let b = block(7_000_000, vec![transfer_extrinsic(true, "25000000000")]);
        let out = normalize_block(&b, &ChainConfig::default()).unwrap();
        assert_eq!(out.transfers.len(), 1);
        let row = &out.transfers[0];
        assert_eq!(row.sender_address.as_deref(), Some(ALICE));
        assert_eq!(row.receiver_address.as_deref(), Some(BOB));
        assert_eq!(row.coin_value, dec("2.5"));
        assert_eq!(row.fee, Decimal::ZERO);
        assert_eq!(row.kind, TransferType::Normal);
        assert_eq!(row.log_index, 1);
        assert_eq!(row.token_address, "DOT");
        assert_eq!(row.block_timestamp.unix_timestamp(), 1_633_031_994);
        assert!(out.advisories.is_empty());
    }

    #[test]
    fn deterministic() {
        let b = block(7_000_000, vec![transfer_extrinsic(true, "25000000000")]);
        let config = ChainConfig::default();
        assert_eq!(
            normalize_block(&b, &config).unwrap(),
            normalize_block(&b, &config).unwrap()
        );
    }

    #[test]
    fn failed_extrinsic_zeroes_value_but_keeps_parties() {
        let config = ChainConfig::default();
        let ok = normalize_block(&block(7_000_000, vec![transfer_extrinsic(true, "50")]), &config)
            .unwrap();
        let failed =
            normalize_block(&block(7_000_000, vec![transfer_extrinsic(false, "50")]), &config)
                .unwrap();
        let (ok, failed) = (&ok.transfers[0], &failed.transfers[0]);
        assert_eq!(failed.coin_value, Decimal::ZERO);
        assert_ne!(ok.coin_value, Decimal::ZERO);
        assert_eq!(failed.sender_address, ok.sender_address);
        assert_eq!(failed.receiver_address, ok.receiver_address);
    }

    #[test]
    fn fee_is_not_gated() {
        let ext = json!({
            "method": { "pallet": "balances", "method": "transfer" },
            "hash": "0xbb",
            "success": false,
            "signature": { "signer": { "id": ALICE } },
            "events": [
                { "method": { "pallet": "balances", "method": "Deposit" }, "data": [AUTHOR, "31200000"] },
                { "method": { "pallet": "system", "method": "ExtrinsicFailed" }, "data": [] }
            ]
        });
        let out = normalize_block(&block(7_000_000, vec![ext]), &ChainConfig::default()).unwrap();
        assert_eq!(out.transfers[0].kind, TransferType::Fee);
        assert_eq!(out.transfers[0].fee, dec("0.00312"));
    }

    #[test]
    fn scaling_switches_at_redenomination() {
        let config = ChainConfig::default();
        let before = normalize_block(
            &block(REDENOMINATION_HEIGHT - 1, vec![transfer_extrinsic(true, "1000000000000")]),
            &config,
        )
        .unwrap();
        let after = normalize_block(
            &block(REDENOMINATION_HEIGHT, vec![transfer_extrinsic(true, "1000000000000")]),
            &config,
        )
        .unwrap();
        let (before, after) = (before.transfers[0].coin_value, after.transfers[0].coin_value);
        assert_eq!(before, dec("1"));
        assert_eq!(after, dec("100"));
        assert_eq!(after / before, dec("100"));
    }

    #[test]
    fn duplicate_rows_are_dropped() {
        let ext = json!({
            "method": { "pallet": "balances", "method": "transfer" },
            "hash": "0xcc",
            "success": true,
            "signature": ALICE,
            "events": [
                { "method": { "pallet": "balances", "method": "Deposit" }, "data": [POLKADOT_TREASURY, "8"] },
                { "method": { "pallet": "treasury", "method": "Deposit" }, "data": ["8"] },
                { "method": { "pallet": "balances", "method": "Deposit" }, "data": [POLKADOT_TREASURY, "8"] }
            ]
        });
        let out = normalize_block(&block(7_000_000, vec![ext]), &ChainConfig::default()).unwrap();
        assert_eq!(out.transfers.len(), 1);
        let unique: HashSet<_> = out.transfers.iter().collect();
        assert_eq!(unique.len(), out.transfers.len());
    }

    #[test]
    fn ignored_pallets_never_contribute() {
        let mut b = block(7_000_000, vec![]);
        b.extrinsics[0] = serde_json::from_value(json!({
            "method": { "pallet": "timestamp", "method": "set" },
            "hash": "0x01",
            "success": true,
            "args": { "now": "1633031994000" },
            "events": [
                { "method": { "pallet": "balances", "method": "Transfer" }, "data": [ALICE, BOB, "5"] }
            ]
        }))
        .unwrap();
        let out = normalize_block(&b, &ChainConfig::default()).unwrap();
        assert!(out.transfers.is_empty());
    }

    #[test]
    fn empty_block_gives_advisory_not_error() {
        let remark = json!({
            "method": { "pallet": "system", "method": "remark" },
            "hash": "0xdd",
            "success": true,
            "signature": null,
            "events": [{ "method": { "pallet": "system", "method": "ExtrinsicSuccess" }, "data": [] }]
        });
        let out = normalize_block(&block(42, vec![remark]), &ChainConfig::default()).unwrap();
        assert!(out.transfers.is_empty());
        assert_eq!(out.advisories, vec![Advisory::NoRelevantTransfers { block: 42 }]);
    }

    #[test]
    fn unfinalized_block_is_rejected() {
        let mut b = block(7_000_000, vec![transfer_extrinsic(true, "1")]);
        b.finalized = false;
        assert!(matches!(
            normalize_block(&b, &ChainConfig::default()),
            Err(NormalizeError::BlockNotFinalized { block: 7_000_000 })
        ));
    }

    #[test]
    fn unsigned_extrinsic_has_no_sender() {
        let ext = json!({
            "method": { "pallet": "claims", "method": "claim" },
            "hash": "0xee",
            "success": true,
            "signature": null,
            "events": [
                { "method": { "pallet": "claims", "method": "Claimed" }, "data": [BOB, "0x1234", "20000000000"] },
                { "method": { "pallet": "balances", "method": "Transfer" }, "data": [ALICE, BOB, "10000000000"] }
            ]
        });
        let out = normalize_block(&block(7_000_000, vec![ext]), &ChainConfig::default()).unwrap();
        assert_eq!(out.transfers.len(), 2);
        assert!(out.transfers.iter().all(|r| r.sender_address.is_none()));
        assert_eq!(out.transfers[0].coin_value, dec("2"));
    }

    #[test]
    fn malformed_signature_is_a_fault() {
        let mut ext = transfer_extrinsic(true, "1");
        ext["signature"] = json!({ "signer": 17 });
        let err = normalize_block(&block(7_000_000, vec![ext]), &ChainConfig::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedSignature { .. }));
        assert!(err.to_string().contains("0xaa"));
    }

    #[test]
    fn allow_listed_event_without_rule_fails_loudly() {
        let mut config = ChainConfig::default();
        config.event_allow_list.push("balances.Reserved".into());
        let ext = json!({
            "method": { "pallet": "staking", "method": "bond" },
            "hash": "0xff",
            "success": true,
            "signature": ALICE,
            "events": [{ "method": { "pallet": "balances", "method": "Reserved" }, "data": [ALICE, "1"] }]
        });
        let err = normalize_block(&block(7_000_000, vec![ext]), &config).unwrap_err();
        match err {
            NormalizeError::UnhandledEventType { block, event_type } => {
                assert_eq!(block, 7_000_000);
                assert_eq!(event_type, "balances.Reserved");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn bad_amount_slot_is_reported() {
        let err = normalize_block(
            &block(7_000_000, vec![transfer_extrinsic(true, "lots")]),
            &ChainConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::MalformedEventData { index: 2, .. }
        ));
    }
}
