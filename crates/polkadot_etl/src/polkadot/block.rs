//! Sidecar block records: blocks, extrinsics, events, signatures.
//!
//! Mirrors the JSON served by `GET /blocks/{id}`. Only the fields the
//! normalizer and resolver read are modelled; everything else is ignored.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use time::OffsetDateTime;

/// One block as returned by the sidecar.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    #[serde(deserialize_with = "de_u64")]
    pub number: u64,
    #[serde(default)]
    pub finalized: bool,
    #[serde(default)]
    pub author_id: Option<String>,
    pub extrinsics: Vec<Extrinsic>,
    #[serde(default)]
    pub on_initialize: EventList,
    #[serde(default)]
    pub on_finalize: EventList,
}

impl BlockRecord {
    /// Block time in epoch milliseconds, from the first extrinsic's `now` argument.
    pub fn timestamp_ms(&self) -> Option<i64> {
        let now = self.extrinsics.first()?.args.get("now")?;
        match now {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        let ms = self.timestamp_ms()?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
    }
}

/// `(pallet, method)` pair naming a call or an event type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    pub pallet: String,
    pub method: String,
}

impl MethodId {
    pub fn new(pallet: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            pallet: pallet.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pallet, self.method)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Extrinsic {
    pub method: MethodId,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub signature: Option<Signature>,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub method: MethodId,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// `onInitialize` / `onFinalize` wrapper.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Signature as the sidecar reports it. A missing or `null` signature is
/// represented by `Option::None` on [`Extrinsic::signature`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signature {
    Address(String),
    Structured { signer: Signer },
    Other(Value),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signer {
    Address(String),
    Id { id: String },
}

impl Signer {
    pub fn as_str(&self) -> &str {
        match self {
            Signer::Address(a) => a,
            Signer::Id { id } => id,
        }
    }
}

/// Address inside event data: a plain string or an `{ "id": .. }` object.
pub fn value_as_address(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) => Some(s.as_str()),
        Value::Object(m) => m.get("id").and_then(Value::as_str),
        _ => None,
    }
}

/// Raw balance inside event data: decimal string, `0x` hex string, or integer.
pub fn value_as_u128(v: &Value) -> Option<u128> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => u128::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StrOrNum {
    Num(u64),
    Str(String),
}

fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match StrOrNum::deserialize(d)? {
        StrOrNum::Num(n) => Ok(n),
        StrOrNum::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_block_number_and_timestamp() {
        let block: BlockRecord = serde_json::from_value(json!({
            "number": "7229126",
            "finalized": true,
            "authorId": "1hCMdtRsaRA4ZTEKpPKPvEjK9rZpGhyFnRHSDhqFMCEayRL",
            "extrinsics": [{
                "method": { "pallet": "timestamp", "method": "set" },
                "signature": null,
                "args": { "now": "1633031994000" },
                "events": []
            }]
        }))
        .unwrap();
        assert_eq!(block.number, 7_229_126);
        assert_eq!(block.timestamp_ms(), Some(1_633_031_994_000));
        assert_eq!(block.timestamp().unwrap().unix_timestamp(), 1_633_031_994);
        assert!(block.extrinsics[0].signature.is_none());
        assert!(block.on_initialize.events.is_empty());
    }

    #[test]
    fn numeric_now_is_accepted() {
        let block: BlockRecord = serde_json::from_value(json!({
            "number": 5,
            "extrinsics": [{
                "method": { "pallet": "timestamp", "method": "set" },
                "args": { "now": 1_600_000_000_000u64 }
            }]
        }))
        .unwrap();
        assert_eq!(block.timestamp_ms(), Some(1_600_000_000_000));
        assert!(!block.finalized);
    }

    #[test]
    fn signature_shapes() {
        let bare: Signature = serde_json::from_value(json!("15oF4u")).unwrap();
        assert_eq!(bare, Signature::Address("15oF4u".into()));

        let nested: Signature =
            serde_json::from_value(json!({ "signature": "0x01", "signer": { "id": "14E5nq" } }))
                .unwrap();
        assert_eq!(
            nested,
            Signature::Structured {
                signer: Signer::Id { id: "14E5nq".into() }
            }
        );

        let flat: Signature =
            serde_json::from_value(json!({ "signature": "0x01", "signer": "14E5nq" })).unwrap();
        match flat {
            Signature::Structured { signer } => assert_eq!(signer.as_str(), "14E5nq"),
            other => panic!("unexpected {other:?}"),
        }

        let odd: Signature = serde_json::from_value(json!({ "signer": 42 })).unwrap();
        assert!(matches!(odd, Signature::Other(_)));
    }

    #[test]
    fn amounts_and_addresses() {
        assert_eq!(value_as_u128(&json!("1000")), Some(1000));
        assert_eq!(value_as_u128(&json!("0xff")), Some(255));
        assert_eq!(value_as_u128(&json!(7)), Some(7));
        assert_eq!(value_as_u128(&json!("-1")), None);
        assert_eq!(value_as_address(&json!({ "id": "1abc" })), Some("1abc"));
        assert_eq!(value_as_address(&json!(3)), None);
    }
}
