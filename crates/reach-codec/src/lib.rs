//! Canonical key-sorted serialization and digest computation.
//!
//! Produces a byte string from any engine-produced data structure that is
//! identical across hosts and implementations: mapping keys sorted by UTF-8
//! byte order (recursively, depth-bounded), strings normalized to NFC,
//! integers encoded in their smallest canonical CBOR form, and floating
//! point values rejected outright rather than silently truncated.
//!
//! The canonical encoding is CBOR. A JSON rendering is also provided for
//! human debugging but callers must never feed it to anything that
//! computes or verifies a digest.

use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum nesting depth a canonical value may reach. Chosen to bound
/// recursive descent during both construction and validation.
pub const MAX_RECURSION_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("floating-point value present in a digest-eligible position")]
    FloatingPointForbidden,

    #[error("canonical value nesting exceeds depth {MAX_RECURSION_DEPTH}")]
    CanonicalRecursionDepth,

    #[error("map key is not valid UTF-8")]
    NonUtf8Key,

    #[error("map key is not a string")]
    UnsortableKeyType,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cbor encoding error: {0}")]
    Cbor(String),

    #[error("cbor decoding error: {0}")]
    Decode(String),
}

/// A canonicalized value: the closed set of shapes the codec accepts.
/// There is deliberately no floating-point variant.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    UInt(u64),
    SInt(i64),
    Text(String),
    Array(Vec<CanonicalValue>),
    Map(Vec<(String, CanonicalValue)>),
}

impl CanonicalValue {
    /// Converts a `serde_json::Value` into canonical form: keys sorted
    /// recursively, strings NFC-normalized, floats rejected.
    pub fn from_json(value: &serde_json::Value, depth: usize) -> Result<Self, CodecError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(CodecError::CanonicalRecursionDepth);
        }
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Ok(Self::UInt(u))
                } else if let Some(i) = n.as_i64() {
                    Ok(Self::SInt(i))
                } else {
                    Err(CodecError::FloatingPointForbidden)
                }
            }
            serde_json::Value::String(s) => Ok(Self::Text(s.nfc().collect())),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Self::from_json(item, depth + 1)?);
                }
                Ok(Self::Array(out))
            }
            serde_json::Value::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (k, v) in map {
                    let key: String = k.nfc().collect();
                    entries.push((key, Self::from_json(v, depth + 1)?));
                }
                entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
                Ok(Self::Map(entries))
            }
        }
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::UInt(u) => serializer.serialize_u64(*u),
            Self::SInt(i) => serializer.serialize_i64(*i),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// Converts any serializable value to its canonical form via a
/// `serde_json::Value` intermediate, mirroring how the reference
/// implementation canonicalizes mixed Rust/JSON structures.
pub fn to_canonical_value<T: Serialize>(value: &T) -> Result<CanonicalValue, CodecError> {
    let json = serde_json::to_value(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
    CanonicalValue::from_json(&json, 0)
}

/// Encodes a value to canonical CBOR bytes.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let canonical = to_canonical_value(value)?;
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&canonical, &mut buf).map_err(|e| CodecError::Cbor(e.to_string()))?;
    Ok(buf)
}

/// Renders a value as pretty JSON for human debugging. Not digest-eligible:
/// never pass this output to anything that verifies a fingerprint.
pub fn to_debug_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string_pretty(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// `blake3(bytes)` rendered as `blake3:<hex>`, the core's sole fingerprint
/// grammar. Alternate hash names are reserved but never produced here.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Canonicalizes and hashes a value in one step.
pub fn compute_fingerprint<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let bytes = to_canonical_cbor(value)?;
    Ok(digest_bytes(&bytes))
}

/// Items participating in the `RunEvent` digest ordering rule: ascending by
/// `(timestamp_us, event_id)`, ties broken by `event_id`.
pub trait DigestOrderable {
    fn timestamp_us(&self) -> u64;
    fn event_id(&self) -> u64;
}

/// Sorts events into canonical digest order without mutating the caller's copy.
#[must_use]
pub fn sort_for_digest<T: DigestOrderable + Clone>(events: &[T]) -> Vec<T> {
    let mut sorted: Vec<T> = events.to_vec();
    sorted.sort_by(|a, b| {
        match a.timestamp_us().cmp(&b.timestamp_us()) {
            Ordering::Equal => a.event_id().cmp(&b.event_id()),
            other => other,
        }
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct Pair {
        b: i64,
        a: i64,
    }

    #[test]
    fn canonical_key_order_is_independent_of_struct_field_order() {
        #[derive(Serialize)]
        struct Other {
            a: i64,
            b: i64,
        }
        let p1 = to_canonical_cbor(&Pair { b: 2, a: 1 }).unwrap();
        let p2 = to_canonical_cbor(&Other { a: 1, b: 2 }).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn nested_maps_sort_recursively() {
        let v1 = json!({"b": 2, "a": 1, "c": {"z": 26, "a": 1}});
        let v2 = json!({"c": {"a": 1, "z": 26}, "a": 1, "b": 2});
        let c1 = to_canonical_cbor(&v1).unwrap();
        let c2 = to_canonical_cbor(&v2).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn floats_are_rejected() {
        let v = json!({"value": 1.5});
        let err = to_canonical_cbor(&v).unwrap_err();
        assert!(matches!(err, CodecError::FloatingPointForbidden));
    }

    #[test]
    fn integers_that_look_like_floats_in_json_are_accepted() {
        // serde_json represents 2.0 as a float internally once parsed from
        // a literal with a decimal point; only values that actually need
        // float representation are forbidden.
        let v = json!({"value": 2});
        assert!(to_canonical_cbor(&v).is_ok());
    }

    #[test]
    fn recursion_depth_is_bounded() {
        let mut value = json!(1);
        for _ in 0..(MAX_RECURSION_DEPTH + 5) {
            value = json!({ "n": value });
        }
        let err = to_canonical_value(&value).unwrap_err();
        assert!(matches!(err, CodecError::CanonicalRecursionDepth));
    }

    #[test]
    fn digest_is_rendered_with_blake3_prefix() {
        let fp = compute_fingerprint(&json!({"a": 1})).unwrap();
        assert!(fp.starts_with("blake3:"));
        assert_eq!(fp.len(), "blake3:".len() + 64);
    }

    #[test]
    fn digest_determinism_across_permuted_keys() {
        let v1 = json!({"a": 1, "b": 2});
        let v2 = json!({"b": 2, "a": 1});
        assert_eq!(compute_fingerprint(&v1).unwrap(), compute_fingerprint(&v2).unwrap());
    }

    #[derive(Clone)]
    struct Ev {
        ts: u64,
        id: u64,
    }

    impl DigestOrderable for Ev {
        fn timestamp_us(&self) -> u64 {
            self.ts
        }
        fn event_id(&self) -> u64 {
            self.id
        }
    }

    #[test]
    fn events_sort_by_timestamp_then_event_id() {
        let events = vec![
            Ev { ts: 5, id: 2 },
            Ev { ts: 5, id: 1 },
            Ev { ts: 1, id: 9 },
        ];
        let sorted = sort_for_digest(&events);
        let order: Vec<(u64, u64)> = sorted.iter().map(|e| (e.ts, e.id)).collect();
        assert_eq!(order, vec![(1, 9), (5, 1), (5, 2)]);
    }

    #[test]
    fn strings_are_nfc_normalized() {
        // "e" + combining acute accent vs precomposed "é"
        let decomposed = "e\u{0301}";
        let precomposed = "\u{e9}";
        let a = to_canonical_cbor(&json!({"s": decomposed})).unwrap();
        let b = to_canonical_cbor(&json!({"s": precomposed})).unwrap();
        assert_eq!(a, b);
    }
}
