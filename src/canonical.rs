//! Order-insensitive canonical encoding.
//!
//! Everything that gets hashed or written to disk goes through
//! [`canonical_bytes`]: mappings serialize with keys in code-point order,
//! numbers serialize as their mathematical value (`1` and `1.0` produce the
//! same bytes), strings use standard JSON escaping, and sequences preserve
//! order. Two structurally equal values therefore always produce identical
//! bytes, which is what makes the record hashes and Merkle roots stable
//! under any permutation of the input.
//!
//! The encoder operates over a closed algebraic value type rather than
//! arbitrary serde input; [`CanonicalValue::from_json`] is the validation
//! pass that rejects anything outside it (non-finite floats, integers beyond
//! the i64 range).

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use sha2::{Digest, Sha256};

use crate::error::HgcError;

/// The closed value type accepted by the canonical encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<CanonicalValue>),
    Map(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    /// Convert a parsed JSON value into the canonical domain.
    ///
    /// Rejects non-finite floats and integers that do not fit in `i64`.
    pub fn from_json(value: &serde_json::Value) -> Result<CanonicalValue, HgcError> {
        match value {
            serde_json::Value::Null => Ok(CanonicalValue::Null),
            serde_json::Value::Bool(b) => Ok(CanonicalValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(CanonicalValue::Int(i))
                } else if n.is_u64() {
                    Err(HgcError::encode(format!("integer out of i64 range: {}", n)))
                } else if let Some(f) = n.as_f64() {
                    if !f.is_finite() {
                        return Err(HgcError::encode(format!("non-finite number: {}", f)));
                    }
                    Ok(CanonicalValue::Float(f))
                } else {
                    Err(HgcError::encode(format!(
                        "integer out of i64 range: {}",
                        n
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(CanonicalValue::Str(s.clone())),
            serde_json::Value::Array(items) => {
                let mut seq = Vec::with_capacity(items.len());
                for item in items {
                    seq.push(CanonicalValue::from_json(item)?);
                }
                Ok(CanonicalValue::Seq(seq))
            }
            serde_json::Value::Object(fields) => {
                let mut map = BTreeMap::new();
                for (k, v) in fields {
                    map.insert(k.clone(), CanonicalValue::from_json(v)?);
                }
                Ok(CanonicalValue::Map(map))
            }
        }
    }

    /// Canonicalize any serializable record by round-tripping through JSON.
    pub fn from_serialize<T: serde::Serialize>(value: &T) -> Result<CanonicalValue, HgcError> {
        let json = serde_json::to_value(value)
            .map_err(|e| HgcError::encode(format!("serialization failed: {}", e)))?;
        CanonicalValue::from_json(&json)
    }
}

/// Encode a canonical value to its unique UTF-8 byte form.
pub fn canonical_bytes(value: &CanonicalValue) -> Result<Vec<u8>, HgcError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out.into_bytes())
}

fn write_value(value: &CanonicalValue, out: &mut String) -> Result<(), HgcError> {
    match value {
        CanonicalValue::Null => out.push_str("null"),
        CanonicalValue::Bool(true) => out.push_str("true"),
        CanonicalValue::Bool(false) => out.push_str("false"),
        CanonicalValue::Int(i) => out.push_str(&i.to_string()),
        CanonicalValue::Float(f) => write_number(*f, out)?,
        CanonicalValue::Str(s) => write_escaped(s, out),
        CanonicalValue::Seq(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        CanonicalValue::Map(fields) => {
            out.push('{');
            for (i, (k, v)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(k, out);
                out.push(':');
                write_value(v, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Largest double below which every integral f64 is exactly representable
/// as i64 (2^53).
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

fn write_number(f: f64, out: &mut String) -> Result<(), HgcError> {
    if !f.is_finite() {
        return Err(HgcError::encode(format!("non-finite number: {}", f)));
    }
    // Integral floats collapse to the integer form so 1 and 1.0 encode
    // identically. -0.0 collapses to 0.
    if f == f.trunc() && f.abs() < MAX_EXACT_INT {
        out.push_str(&(f as i64).to_string());
    } else {
        out.push_str(&format!("{:?}", f));
    }
    Ok(())
}

fn write_escaped(s: &str, out: &mut String) {
    // serde_json's escaping is the standard JSON form and is deterministic.
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}

/// Lowercase hex SHA-256 of a byte string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Canonical byte form of any serializable record.
pub fn record_bytes<T: serde::Serialize>(record: &T) -> Result<Vec<u8>, HgcError> {
    canonical_bytes(&CanonicalValue::from_serialize(record)?)
}

/// Canonical hash of any serializable record.
pub fn record_hash<T: serde::Serialize>(record: &T) -> Result<String, HgcError> {
    Ok(sha256_hex(&record_bytes(record)?))
}

impl Serialize for CanonicalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CanonicalValue::Null => serializer.serialize_unit(),
            CanonicalValue::Bool(b) => serializer.serialize_bool(*b),
            CanonicalValue::Int(i) => serializer.serialize_i64(*i),
            CanonicalValue::Float(f) => serializer.serialize_f64(*f),
            CanonicalValue::Str(s) => serializer.serialize_str(s),
            CanonicalValue::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            CanonicalValue::Map(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(v: serde_json::Value) -> String {
        let cv = CanonicalValue::from_json(&v).unwrap();
        String::from_utf8(canonical_bytes(&cv).unwrap()).unwrap()
    }

    #[test]
    fn key_order_is_irrelevant() {
        assert_eq!(
            canon(json!({"a": 1, "b": [2, 3]})),
            canon(json!({"b": [2, 3], "a": 1}))
        );
    }

    #[test]
    fn keys_sort_by_code_point() {
        assert_eq!(
            canon(json!({"b": 1, "A": 2, "a": 3})),
            r#"{"A":2,"a":3,"b":1}"#
        );
    }

    #[test]
    fn integral_float_equals_integer() {
        assert_eq!(canon(json!(1)), canon(json!(1.0)));
        assert_eq!(canon(json!(1.0)), "1");
        assert_eq!(canon(json!(-0.0)), "0");
    }

    #[test]
    fn fractional_floats_have_single_form() {
        assert_eq!(canon(json!(1.5)), "1.5");
        assert_eq!(canon(json!(0.1)), "0.1");
        assert_eq!(canon(json!(-273.15)), "-273.15");
    }

    #[test]
    fn sequences_preserve_order() {
        assert_eq!(canon(json!([3, 1, 2])), "[3,1,2]");
        assert_ne!(canon(json!([1, 2])), canon(json!([2, 1])));
    }

    #[test]
    fn strings_use_json_escaping() {
        assert_eq!(canon(json!("a\"b\n")), r#""a\"b\n""#);
    }

    #[test]
    fn null_and_bools() {
        assert_eq!(canon(json!(null)), "null");
        assert_eq!(canon(json!(true)), "true");
        assert_eq!(canon(json!(false)), "false");
    }

    #[test]
    fn non_finite_rejected() {
        let err = canonical_bytes(&CanonicalValue::Float(f64::NAN)).unwrap_err();
        assert!(matches!(err, HgcError::Encode { .. }));
    }

    #[test]
    fn nested_structural_equality() {
        let a = json!({"outer": {"x": 1, "y": [true, null]}, "z": "s"});
        let b = json!({"z": "s", "outer": {"y": [true, null], "x": 1}});
        assert_eq!(canon(a), canon(b));
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
