//! Caller input parsing: timestamps and block/timestamp range selection.

use std::fmt;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("invalid block height: {0}")]
    InvalidBlock(String),
    #[error("missing bound: {0}")]
    MissingBound(&'static str),
    #[error("{0}")]
    MixedRange(&'static str),
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },
}

/// Parse RFC3339 timestamp.
pub fn parse_time_rfc3339(s: &str) -> Result<OffsetDateTime, InputError> {
    OffsetDateTime::parse(s.trim(), &Rfc3339)
        .map_err(|e| InputError::InvalidTimestamp(format!("{s}: {e}")))
}

/// Parse a timestamp: unix seconds, RFC3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime, InputError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(InputError::InvalidTimestamp("empty".to_string()));
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = s
            .parse()
            .map_err(|_| InputError::InvalidTimestamp(s.to_string()))?;
        return OffsetDateTime::from_unix_timestamp(secs)
            .map_err(|e| InputError::InvalidTimestamp(format!("{s}: {e}")));
    }
    if let Ok(dt) = parse_time_rfc3339(s) {
        return Ok(dt);
    }
    let space = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let t_sep = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(s, space)
        .or_else(|_| PrimitiveDateTime::parse(s, t_sep))
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| InputError::InvalidTimestamp(format!("{s}: {e}")))
}

/// Which pair of bounds the caller supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportRange {
    Blocks { start: u64, end: u64 },
    Timestamps {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
}

impl fmt::Display for ExportRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportRange::Blocks { start, end } => write!(f, "blocks {start}..={end}"),
            ExportRange::Timestamps { start, end } => write!(f, "timestamps {start}..={end}"),
        }
    }
}

/// Choose between a block range and a timestamp range. Exactly one complete
/// pair must be given; mixing a block bound with a timestamp bound is rejected.
pub fn validate_inputs(
    start_block: Option<u64>,
    end_block: Option<u64>,
    start_timestamp: Option<OffsetDateTime>,
    end_timestamp: Option<OffsetDateTime>,
) -> Result<ExportRange, InputError> {
    match (start_block, end_block, start_timestamp, end_timestamp) {
        (Some(start), Some(end), None, None) => {
            if start == 0 {
                return Err(InputError::InvalidBlock("0".to_string()));
            }
            if start > end {
                return Err(InputError::InvalidRange {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
            Ok(ExportRange::Blocks { start, end })
        }
        (None, None, Some(start), Some(end)) => {
            if start > end {
                return Err(InputError::InvalidRange {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
            Ok(ExportRange::Timestamps { start, end })
        }
        (Some(_), Some(_), _, _) => Err(InputError::MixedRange(
            "cannot specify both the blocks and the timestamps; pick one pair",
        )),
        (Some(_), None, Some(_), _) => Err(InputError::MixedRange(
            "cannot specify both the start block and the start timestamp",
        )),
        (Some(_), None, None, Some(_)) => Err(InputError::MixedRange(
            "cannot mix a start block with an end timestamp",
        )),
        (Some(_), None, None, None) => Err(InputError::MissingBound(
            "an end block is required with a start block",
        )),
        (None, Some(_), Some(_), _) => Err(InputError::MixedRange(
            "cannot mix a start timestamp with an end block",
        )),
        (None, _, Some(_), None) => Err(InputError::MissingBound(
            "an end timestamp is required with a start timestamp",
        )),
        (None, _, None, _) => Err(InputError::MissingBound(
            "specify either a start block or a start timestamp",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    #[test]
    fn timestamp_forms() {
        assert_eq!(parse_timestamp("1633031994").unwrap(), ts(1_633_031_994));
        assert_eq!(
            parse_timestamp("2021-09-30T19:59:54Z").unwrap(),
            ts(1_633_031_994)
        );
        assert_eq!(
            parse_timestamp("2021-09-30 19:59:54").unwrap(),
            ts(1_633_031_994)
        );
        assert_eq!(
            parse_timestamp("2021-09-30T21:59:54+02:00").unwrap(),
            ts(1_633_031_994)
        );
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn block_pair() {
        assert_eq!(
            validate_inputs(Some(5), Some(9), None, None),
            Ok(ExportRange::Blocks { start: 5, end: 9 })
        );
        assert_eq!(
            validate_inputs(Some(5), Some(5), None, None),
            Ok(ExportRange::Blocks { start: 5, end: 5 })
        );
        assert!(matches!(
            validate_inputs(Some(9), Some(5), None, None),
            Err(InputError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_inputs(Some(0), Some(5), None, None),
            Err(InputError::InvalidBlock(_))
        ));
    }

    #[test]
    fn timestamp_pair() {
        assert_eq!(
            validate_inputs(None, None, Some(ts(10)), Some(ts(20))),
            Ok(ExportRange::Timestamps {
                start: ts(10),
                end: ts(20)
            })
        );
        assert!(matches!(
            validate_inputs(None, None, Some(ts(20)), Some(ts(10))),
            Err(InputError::InvalidRange { .. })
        ));
    }

    #[test]
    fn mixed_and_missing() {
        let mixed = [
            (Some(1), Some(2), Some(ts(1)), None),
            (Some(1), None, Some(ts(1)), None),
            (Some(1), None, None, Some(ts(2))),
            (None, Some(2), Some(ts(1)), None),
        ];
        for (sb, eb, st, et) in mixed {
            assert!(
                matches!(validate_inputs(sb, eb, st, et), Err(InputError::MixedRange(_))),
                "{sb:?} {eb:?} {st:?} {et:?}"
            );
        }
        let missing = [
            (None, None, None, None),
            (Some(1), None, None, None),
            (None, None, Some(ts(1)), None),
            (None, Some(2), None, None),
            (None, None, None, Some(ts(2))),
        ];
        for (sb, eb, st, et) in missing {
            assert!(
                matches!(validate_inputs(sb, eb, st, et), Err(InputError::MissingBound(_))),
                "{sb:?} {eb:?} {st:?} {et:?}"
            );
        }
    }
}
