//! Record model: the structured values that flow through streams.
//!
//! A record body is a mapping from textual keys to [`FieldValue`]s, the
//! same shape the MessagePack codec understands.  The native variants
//! round-trip through the codec unchanged; the extended variants
//! (decimal, datetime, date) are coerced to canonical strings on encode
//! and never come back out of a decode.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

/// A single field of a record body.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Nil,
    Bool(bool),
    Int(i64),
    /// Only used for values past `i64::MAX`; smaller unsigned values
    /// canonicalize to `Int` so round-trips compare equal.
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
    /// Encodes as a canonical decimal string.
    Decimal(Decimal),
    /// Encodes as ISO-8601 with a space separator.
    DateTime(DateTime<Utc>),
    /// Encodes as `YYYY-MM-DD`.
    Date(NaiveDate),
}

/// A record body: textual keys to field values.
pub type RecordData = BTreeMap<String, FieldValue>;

/// A decoded record as delivered by a shard iterator.
///
/// `seq_num` is opaque and comparable only within `shard_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub shard_id: String,
    pub seq_num: String,
    pub data: RecordData,
}

impl FieldValue {
    /// Canonicalize an unsigned value: `Int` when it fits, `UInt` past
    /// `i64::MAX`.  Decode uses this so `encode(Int(n))` round-trips.
    pub fn from_unsigned(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => FieldValue::Int(i),
            Err(_) => FieldValue::UInt(v),
        }
    }
}

impl std::fmt::Display for FieldValue {
    /// Textual coercion, used for partition-key derivation.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Nil => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::UInt(u) => write!(f, "{u}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Str(s) => write!(f, "{s}"),
            FieldValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            FieldValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            FieldValue::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            FieldValue::Decimal(d) => write!(f, "{d}"),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

// ---------------------------------------------------------------------------
// Mixed-primitive builder surface
// ---------------------------------------------------------------------------

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::from_unsigned(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::List(v)
    }
}

impl From<RecordData> for FieldValue {
    fn from(v: RecordData) -> Self {
        FieldValue::Map(v)
    }
}

impl From<Decimal> for FieldValue {
    fn from(v: Decimal) -> Self {
        FieldValue::Decimal(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::DateTime(v)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(v: NaiveDate) -> Self {
        FieldValue::Date(v)
    }
}

/// Build a [`RecordData`] from key/value pairs of mixed primitives.
///
/// ```
/// use triton::record::record_data;
/// let rec = record_data([("pkey", "user-1".into()), ("value", true.into())]);
/// assert_eq!(rec.len(), 2);
/// ```
pub fn record_data<const N: usize>(pairs: [(&str, FieldValue); N]) -> RecordData {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}
