//! MessagePack record codec.
//!
//! The primary encoding covers the native [`FieldValue`] variants
//! directly.  Extended variants are coerced while serializing:
//!
//! - decimals → canonical decimal string
//! - datetimes → ISO-8601 with a space separator
//! - dates → `YYYY-MM-DD`
//!
//! Decoding is the inverse of the primary encoding only: strings come
//! back as Unicode, `bin` payloads as `Bytes`, and integers canonicalize
//! through [`FieldValue::from_unsigned`].  MessagePack shapes with no
//! [`FieldValue`] counterpart (ext types, non-textual map keys) surface
//! as [`CodecError::UnknownType`].

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use thiserror::Error;

use crate::record::{FieldValue, RecordData};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The payload contains a shape the record model cannot express.
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("base64 armor: {0}")]
    Armor(#[from] base64::DecodeError),
}

/// Encode a record body to its binary form.
pub fn encode(data: &RecordData) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    let mut ser = rmp_serde::Serializer::new(&mut buf);
    Encoded(data).serialize(&mut ser)?;
    Ok(buf)
}

/// Decode a binary record body.
///
/// The top-level value must be a map; anything else is an
/// [`CodecError::UnknownType`].
pub fn decode(bytes: &[u8]) -> Result<RecordData, CodecError> {
    match rmp_serde::from_slice::<FieldValue>(bytes)? {
        FieldValue::Map(m) => Ok(m),
        other => Err(CodecError::UnknownType(format!(
            "record body is not a map: {other:?}"
        ))),
    }
}

/// Base64-armor a record body for transports that require text payloads.
pub fn armor(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Reverse [`armor`].
pub fn unarmor(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    Ok(BASE64.decode(data)?)
}

// ---------------------------------------------------------------------------
// Serde wiring
// ---------------------------------------------------------------------------

/// Serializes a map without cloning it into a `FieldValue::Map`.
struct Encoded<'a>(&'a RecordData);

impl Serialize for Encoded<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Nil => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::UInt(u) => serializer.serialize_u64(*u),
            FieldValue::Float(x) => serializer.serialize_f64(*x),
            FieldValue::Str(s) => serializer.serialize_str(s),
            FieldValue::Bytes(b) => serializer.serialize_bytes(b),
            FieldValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Map(m) => Encoded(m).serialize(serializer),
            // Extended variants: the documented coercions.
            FieldValue::Decimal(d) => serializer.serialize_str(&d.to_string()),
            FieldValue::DateTime(dt) => {
                serializer.serialize_str(&dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            FieldValue::Date(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FieldVisitor)
    }
}

struct FieldVisitor;

impl<'de> Visitor<'de> for FieldVisitor {
    type Value = FieldValue;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a MessagePack value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(FieldValue::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(FieldValue::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        FieldValue::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(FieldValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(FieldValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(FieldValue::from_unsigned(v))
    }

    fn visit_f32<E: de::Error>(self, v: f32) -> Result<Self::Value, E> {
        Ok(FieldValue::Float(f64::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(FieldValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(FieldValue::Str(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(FieldValue::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(FieldValue::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(FieldValue::Bytes(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(FieldValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<FieldValue, FieldValue>()? {
            // Producers may key maps with either str or bin; both decode
            // to textual keys here.
            let key = match key {
                FieldValue::Str(s) => s,
                FieldValue::Bytes(b) => String::from_utf8(b)
                    .map_err(|_| de::Error::custom("unknown type: non-UTF-8 map key"))?,
                other => {
                    return Err(de::Error::custom(format!(
                        "unknown type: map key {other:?}"
                    )));
                }
            };
            map.insert(key, value);
        }
        Ok(FieldValue::Map(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::record_data;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn round_trip(data: &RecordData) -> RecordData {
        decode(&encode(data).unwrap()).unwrap()
    }

    /// Test: primitives, mappings, and ordered sequences round-trip.
    #[test]
    fn round_trip_native_corpus() {
        let nested = record_data([("inner", FieldValue::Int(-3))]);
        let data = record_data([
            ("nil", FieldValue::Nil),
            ("flag", true.into()),
            ("int", (-42i64).into()),
            ("big", FieldValue::UInt(u64::MAX)),
            ("float", 1.5f64.into()),
            ("text", "hello".into()),
            ("bytes", FieldValue::Bytes(vec![0, 159, 146, 150])),
            ("list", FieldValue::List(vec![1i64.into(), "two".into()])),
            ("map", nested.into()),
        ]);
        assert_eq!(round_trip(&data), data);
    }

    /// Test: multi-byte unicode survives intact.
    #[test]
    fn round_trip_unicode() {
        let data = record_data([
            ("greeting", "héllo wörld".into()),
            ("emoji", "\u{1f4e6} \u{30b9}\u{30c8}\u{30ea}\u{30fc}\u{30e0}".into()),
        ]);
        assert_eq!(round_trip(&data), data);
    }

    /// Test: non-negative integers written as Int come back as Int.
    #[test]
    fn integers_canonicalize() {
        let data = record_data([("n", FieldValue::Int(7))]);
        assert_eq!(round_trip(&data), data);
    }

    /// Test: decimal coerces to its canonical string form.
    #[test]
    fn decimal_coerces_to_string() {
        let data = record_data([("price", Decimal::from_str("19.99").unwrap().into())]);
        let back = round_trip(&data);
        assert_eq!(back["price"], FieldValue::Str("19.99".into()));
    }

    /// Test: datetime coerces to ISO-8601 with a space separator.
    #[test]
    fn datetime_coerces_with_space_separator() {
        let dt = Utc.with_ymd_and_hms(2015, 7, 24, 9, 30, 5).unwrap();
        let data = record_data([("at", dt.into())]);
        let back = round_trip(&data);
        assert_eq!(back["at"], FieldValue::Str("2015-07-24 09:30:05".into()));
    }

    /// Test: date coerces to YYYY-MM-DD.
    #[test]
    fn date_coerces_to_ymd() {
        let d = NaiveDate::from_ymd_opt(2015, 7, 24).unwrap();
        let data = record_data([("day", d.into())]);
        let back = round_trip(&data);
        assert_eq!(back["day"], FieldValue::Str("2015-07-24".into()));
    }

    /// Test: a non-map top-level body is rejected as an unknown type.
    #[test]
    fn top_level_must_be_map() {
        let bytes = rmp_serde::to_vec(&17u32).unwrap();
        match decode(&bytes) {
            Err(CodecError::UnknownType(_)) => {}
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    /// Test: armoring round-trips.
    #[test]
    fn armor_round_trip() {
        let body = encode(&record_data([("value", true.into())])).unwrap();
        let armored = armor(&body);
        assert_eq!(unarmor(armored.as_bytes()).unwrap(), body);
    }
}
