//! Key and Value Codecs
//!
//! Two bijections used by every backend:
//!
//! - **Keys**: arbitrary bytes ⇄ filesystem-safe names, using the URL-safe
//!   base64 alphabet (`A-Z a-z 0-9 - _` plus `=` padding). Decoding accepts
//!   names with or without padding.
//! - **Values**: [`Value`] ⇄ [`TaggedValue`], a JSON tree where every node
//!   carries an explicit `__type` tag:
//!
//! ```text
//! {"__type":"bytes","data":"aGVsbG8="}
//! {"__type":"list","data":[<bytes node>, ...]}
//! {"__type":"set","data":[<bytes node | item node>, ...]}
//! {"__type":"hash","data":{"<b64 field>":"<b64 value>", ...}}
//! {"__type":"zset","data":[[<bytes node>, 1.5], ...]}
//! {"__type":"item","value":<node>,"expireat":1700000000.5}
//! ```
//!
//! Scalars are stored as standard base64 text since JSON strings cannot
//! carry raw binary.

use crate::error::{StorageError, StorageResult};
use crate::storage::value::{ExpireAt, MemberSet, SortedSet, Value};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bytes::Bytes;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// URL-safe alphabet, padded on encode, padding-indifferent on decode.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ============================================================================
// KEYS
// ============================================================================

/// Encodes a key into a name safe to use as a file name component.
pub fn encode_key(key: &[u8]) -> String {
    KEY_ENGINE.encode(key)
}

/// Decodes a name produced by [`encode_key`].
///
/// Returns [`StorageError::InvalidKeyName`] for anything that is not valid
/// URL-safe base64, so directory walks can skip stray files.
pub fn decode_key(name: &str) -> StorageResult<Bytes> {
    KEY_ENGINE
        .decode(name)
        .map(Bytes::from)
        .map_err(|e| StorageError::InvalidKeyName(format!("{name}: {e}")))
}

// ============================================================================
// VALUES
// ============================================================================

/// JSON-serializable form of a [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type", rename_all = "lowercase")]
pub enum TaggedValue {
    Item {
        value: Box<TaggedValue>,
        #[serde(default)]
        expireat: Option<ExpireAt>,
    },
    Bytes {
        data: String,
    },
    List {
        data: Vec<TaggedValue>,
    },
    Set {
        data: Vec<TaggedValue>,
    },
    Hash {
        data: BTreeMap<String, String>,
    },
    Zset {
        data: Vec<(TaggedValue, Score)>,
    },
}

impl TaggedValue {
    fn scalar(data: &[u8]) -> Self {
        TaggedValue::Bytes {
            data: STANDARD.encode(data),
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            TaggedValue::Item { .. } => "item",
            TaggedValue::Bytes { .. } => "bytes",
            TaggedValue::List { .. } => "list",
            TaggedValue::Set { .. } => "set",
            TaggedValue::Hash { .. } => "hash",
            TaggedValue::Zset { .. } => "zset",
        }
    }
}

/// Converts a value into its tagged tree.
pub fn to_tagged(value: &Value) -> TaggedValue {
    match value {
        Value::Bytes(b) => TaggedValue::scalar(b),
        Value::Item(item) => TaggedValue::Item {
            value: Box::new(to_tagged(&item.value)),
            expireat: item.expire_at,
        },
        Value::List(list) => TaggedValue::List {
            data: list.iter().map(|b| TaggedValue::scalar(b)).collect(),
        },
        Value::Set(set) => TaggedValue::Set {
            data: set
                .entries()
                .map(|(member, expire_at)| match expire_at {
                    None => TaggedValue::scalar(member),
                    Some(at) => TaggedValue::Item {
                        value: Box::new(TaggedValue::scalar(member)),
                        expireat: Some(at),
                    },
                })
                .collect(),
        },
        Value::Hash(hash) => TaggedValue::Hash {
            data: hash
                .iter()
                .map(|(k, v)| (STANDARD.encode(k), STANDARD.encode(v)))
                .collect(),
        },
        Value::SortedSet(zset) => TaggedValue::Zset {
            data: zset
                .ranked()
                .into_iter()
                .map(|(member, score)| (TaggedValue::scalar(&member), Score(score)))
                .collect(),
        },
    }
}

/// Rebuilds a value from its tagged tree.
///
/// Fails with [`StorageError::CorruptValue`] when a node is structurally
/// valid JSON but the wrong shape for its position (e.g. a list holding a
/// hash) or when base64 payloads do not decode.
pub fn from_tagged(tagged: TaggedValue) -> StorageResult<Value> {
    match tagged {
        TaggedValue::Bytes { data } => Ok(Value::Bytes(decode_scalar(&data)?)),
        TaggedValue::Item { value, expireat } => Ok(Value::item(from_tagged(*value)?, expireat)),
        TaggedValue::List { data } => data
            .into_iter()
            .map(expect_scalar)
            .collect::<StorageResult<_>>()
            .map(Value::List),
        TaggedValue::Set { data } => {
            let mut set = MemberSet::new();
            for node in data {
                match node {
                    TaggedValue::Item { value, expireat } => {
                        set.insert_with_expiry(expect_scalar(*value)?, expireat);
                    }
                    other => {
                        set.insert(expect_scalar(other)?);
                    }
                }
            }
            Ok(Value::Set(set))
        }
        TaggedValue::Hash { data } => {
            let mut hash = HashMap::with_capacity(data.len());
            for (field, value) in data {
                hash.insert(decode_scalar(&field)?, decode_scalar(&value)?);
            }
            Ok(Value::Hash(hash))
        }
        TaggedValue::Zset { data } => {
            let mut zset = SortedSet::new();
            for (member, Score(score)) in data {
                zset.insert(expect_scalar(member)?, score);
            }
            Ok(Value::SortedSet(zset))
        }
    }
}

/// Serializes a value as tagged JSON bytes.
pub fn encode_value(value: &Value) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(&to_tagged(value))?)
}

/// Parses tagged JSON bytes back into a value.
pub fn decode_value(raw: &[u8]) -> StorageResult<Value> {
    let tagged: TaggedValue = serde_json::from_slice(raw)?;
    from_tagged(tagged)
}

fn decode_scalar(text: &str) -> StorageResult<Bytes> {
    STANDARD
        .decode(text)
        .map(Bytes::from)
        .map_err(|e| StorageError::corrupt(format!("bad scalar payload: {e}")))
}

fn expect_scalar(node: TaggedValue) -> StorageResult<Bytes> {
    match node {
        TaggedValue::Bytes { data } => decode_scalar(&data),
        other => Err(StorageError::corrupt(format!(
            "expected bytes node, found {}",
            other.tag()
        ))),
    }
}

/// Sorted-set score.
///
/// Finite scores are written as JSON numbers. JSON has no literal for
/// infinities or NaN, so those are written as the strings `"inf"`,
/// `"-inf"` and `"nan"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(pub f64);

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = self.0;
        if s.is_finite() {
            serializer.serialize_f64(s)
        } else if s.is_nan() {
            serializer.serialize_str("nan")
        } else if s > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScoreVisitor;

        impl Visitor<'_> for ScoreVisitor {
            type Value = Score;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or one of \"inf\", \"-inf\", \"nan\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Score, E> {
                Ok(Score(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Score, E> {
                Ok(Score(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Score, E> {
                Ok(Score(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Score, E> {
                match v {
                    "inf" | "+inf" => Ok(Score(f64::INFINITY)),
                    "-inf" => Ok(Score(f64::NEG_INFINITY)),
                    "nan" => Ok(Score(f64::NAN)),
                    _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(ScoreVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::value::{now_secs, Item};
    use serde_json::json;

    fn round_trip(value: Value) {
        let raw = encode_value(&value).unwrap();
        assert_eq!(decode_value(&raw).unwrap(), value);
    }

    #[test]
    fn test_key_round_trip() {
        let keys: [&[u8]; 6] = [
            b"",
            b"counter",
            b"user:1000/profile",
            b"\xff\xfe\x00\x01",
            b"with space and ../dots",
            &[0u8; 64],
        ];
        for key in keys {
            let name = encode_key(key);
            assert!(!name.contains('/'));
            assert!(!name.contains('\\'));
            assert_eq!(decode_key(&name).unwrap(), Bytes::copy_from_slice(key));
        }
    }

    #[test]
    fn test_key_decode_padding_tolerant() {
        assert_eq!(decode_key("Zm9v").unwrap(), Bytes::from("foo"));
        assert_eq!(decode_key("Zm8=").unwrap(), Bytes::from("fo"));
        assert_eq!(decode_key("Zm8").unwrap(), Bytes::from("fo"));
    }

    #[test]
    fn test_key_decode_rejects_garbage() {
        assert!(matches!(
            decode_key("not base64!"),
            Err(StorageError::InvalidKeyName(_))
        ));
        assert!(decode_key("a+b/").is_err());
    }

    #[test]
    fn test_bytes_node_shape() {
        let tagged = serde_json::to_value(to_tagged(&Value::bytes("hello"))).unwrap();
        assert_eq!(tagged, json!({"__type": "bytes", "data": "aGVsbG8="}));
    }

    #[test]
    fn test_item_node_shape() {
        let value = Value::item(Value::bytes("1"), None);
        let tagged = serde_json::to_value(to_tagged(&value)).unwrap();
        assert_eq!(
            tagged,
            json!({
                "__type": "item",
                "value": {"__type": "bytes", "data": "MQ=="},
                "expireat": null
            })
        );
    }

    #[test]
    fn test_round_trip_every_variant() {
        round_trip(Value::bytes(&b"\x80\x81 not utf8"[..]));
        round_trip(Value::item(Value::bytes("x"), Some(now_secs() + 30.0)));
        round_trip(Value::item(Value::item(Value::bytes("nested"), None), None));
        round_trip(Value::list(["a", "b", "a"]));
        round_trip(Value::list(Vec::<Bytes>::new()));
        round_trip(Value::hash([("field", "value"), ("\u{00e9}", "\u{2603}")]));
        round_trip(Value::hash([(&b"\xff"[..], &b"\x00"[..])]));

        let mut set: MemberSet = ["x", "y"].into_iter().collect();
        set.insert_with_expiry("z", Some(now_secs() + 60.0));
        round_trip(Value::Set(set));

        let zset: SortedSet = [("low", -3.25), ("high", 1e10), ("top", f64::INFINITY)]
            .into_iter()
            .collect();
        round_trip(Value::SortedSet(zset));
    }

    #[test]
    fn test_round_trip_item_wrapping_composites() {
        let item = Item::with_expiry(Value::list(["1", "2"]), now_secs() + 5.0);
        round_trip(Value::from(item));
    }

    #[test]
    fn test_zset_scores_are_numeric_literals() {
        let zset: SortedSet = [("m", 2.5)].into_iter().collect();
        let tagged = serde_json::to_value(to_tagged(&Value::SortedSet(zset))).unwrap();
        assert_eq!(
            tagged,
            json!({"__type": "zset", "data": [[{"__type": "bytes", "data": "bQ=="}, 2.5]]})
        );
    }

    #[test]
    fn test_integer_score_accepted() {
        let raw = br#"{"__type":"zset","data":[[{"__type":"bytes","data":"bQ=="},3]]}"#;
        let value = decode_value(raw).unwrap();
        let Value::SortedSet(zset) = value else {
            panic!("expected sorted set");
        };
        assert_eq!(zset.score(b"m"), Some(3.0));
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let raw = br#"{"__type":"stream","data":[]}"#;
        assert!(matches!(
            decode_value(raw),
            Err(StorageError::CorruptValue(_))
        ));
    }

    #[test]
    fn test_wrong_child_shape_is_corrupt() {
        let raw = br#"{"__type":"list","data":[{"__type":"list","data":[]}]}"#;
        assert!(matches!(
            decode_value(raw),
            Err(StorageError::CorruptValue(_))
        ));

        let raw = br#"{"__type":"bytes","data":"***"}"#;
        assert!(matches!(
            decode_value(raw),
            Err(StorageError::CorruptValue(_))
        ));

        let raw = br#"{"__type":"bytes"}"#;
        assert!(decode_value(raw).is_err());
    }

    #[test]
    fn test_missing_expireat_means_no_expiry() {
        let raw = br#"{"__type":"item","value":{"__type":"bytes","data":"MQ=="}}"#;
        assert_eq!(
            decode_value(raw).unwrap(),
            Value::item(Value::bytes("1"), None)
        );
    }
}
