//! # Value Type System
//!
//! Runtime values carried by vectors, literals and parameters. A value is
//! `(LogicalType, null?, payload)`; container payloads are recursive.
//!
//! Equality and hashing treat floats bitwise (NaN equals NaN) so that
//! values can key hash tables for grouping, distinct and joins. Ordering
//! for ORDER BY goes through [`Value::total_cmp`], with nulls sorted last.

pub mod arrow_convert;

use crate::types::{LogicalType, TableId};
use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Physical identity of a node or rel: owning table + row offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId {
    pub table_id: TableId,
    pub offset: u64,
}

impl InternalId {
    pub fn new(table_id: TableId, offset: u64) -> Self {
        InternalId { table_id, offset }
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.offset)
    }
}

/// A single runtime value
#[derive(Debug, Clone)]
pub enum Value {
    /// Typed null
    Null(LogicalType),
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    Float(f32),
    Double(f64),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    /// Interval in microseconds
    Interval(i64),
    String(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    InternalId(InternalId),
    List(LogicalType, Vec<Value>),
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Construct a string value from anything stringy
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// The logical type this value carries
    pub fn data_type(&self) -> LogicalType {
        match self {
            Value::Null(t) => t.clone(),
            Value::Bool(_) => LogicalType::Bool,
            Value::Int8(_) => LogicalType::Int8,
            Value::Int16(_) => LogicalType::Int16,
            Value::Int32(_) => LogicalType::Int32,
            Value::Int64(_) => LogicalType::Int64,
            Value::Int128(_) => LogicalType::Int128,
            Value::Float(_) => LogicalType::Float,
            Value::Double(_) => LogicalType::Double,
            Value::Date(_) => LogicalType::Date,
            Value::Timestamp(_) => LogicalType::Timestamp,
            Value::Interval(_) => LogicalType::Interval,
            Value::String(_) => LogicalType::String,
            Value::Blob(_) => LogicalType::Blob,
            Value::Uuid(_) => LogicalType::Uuid,
            Value::InternalId(_) => LogicalType::InternalId,
            Value::List(t, _) => LogicalType::List(Box::new(t.clone())),
            Value::Struct(fields) => LogicalType::Struct(
                fields
                    .iter()
                    .map(|(n, v)| (n.clone(), v.data_type()))
                    .collect(),
            ),
        }
    }

    /// Integer payload widened to i128, if this is an integer value
    pub fn as_int128(&self) -> Option<i128> {
        match self {
            Value::Int8(v) => Some(i128::from(*v)),
            Value::Int16(v) => Some(i128::from(*v)),
            Value::Int32(v) => Some(i128::from(*v)),
            Value::Int64(v) => Some(i128::from(*v)),
            Value::Int128(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric payload as f64, if numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            other => other.as_int128().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_internal_id(&self) -> Option<InternalId> {
        match self {
            Value::InternalId(id) => Some(*id),
            _ => None,
        }
    }

    /// Rebuild an integer value of the given width from an i128 payload.
    /// Fails on overflow of the target width.
    pub fn from_int128(v: i128, ty: &LogicalType) -> Option<Value> {
        match ty {
            LogicalType::Int8 => i8::try_from(v).ok().map(Value::Int8),
            LogicalType::Int16 => i16::try_from(v).ok().map(Value::Int16),
            LogicalType::Int32 => i32::try_from(v).ok().map(Value::Int32),
            LogicalType::Int64 => i64::try_from(v).ok().map(Value::Int64),
            LogicalType::Int128 => Some(Value::Int128(v)),
            _ => None,
        }
    }

    /// Total order over values of the same type; nulls sort last, NaN
    /// sorts after all other doubles. Cross-type numeric comparisons go
    /// through f64.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Interval(a), Value::Interval(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::InternalId(a), Value::InternalId(b)) => a.cmp(b),
            (Value::List(_, a), Value::List(_, b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Struct(a), Value::Struct(b)) => {
                for ((_, x), (_, y)) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => match (a.as_int128(), b.as_int128()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.total_cmp(&y),
                    _ => Ordering::Equal,
                },
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null(_), Value::Null(_)) => true,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self.total_cmp(other) == Ordering::Equal && !self.is_null() && !other.is_null(),
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null(_) => 0u8.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Date(d) => d.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Interval(v) => v.hash(state),
            Value::String(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::InternalId(id) => id.hash(state),
            Value::List(_, items) => {
                for item in items {
                    item.hash(state);
                }
            }
            Value::Struct(fields) => {
                for (_, v) in fields {
                    v.hash(state);
                }
            }
            other => {
                // Integers hash through their widened payload so that e.g.
                // Int32(1) and Int64(1) joined on equality collide.
                if let Some(v) = other.as_int128() {
                    v.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null(_) => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Int128(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.6f")),
            Value::Interval(us) => write!(f, "{us}us"),
            Value::String(s) => write!(f, "{s}"),
            Value::Blob(b) => {
                write!(f, "\\x")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            Value::Uuid(u) => write!(f, "{u}"),
            Value::InternalId(id) => write!(f, "{id}"),
            Value::List(_, items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type() {
        assert_eq!(Value::Int64(1).data_type(), LogicalType::Int64);
        assert_eq!(
            Value::Null(LogicalType::String).data_type(),
            LogicalType::String
        );
        assert_eq!(
            Value::List(LogicalType::Int64, vec![Value::Int64(1)]).data_type(),
            LogicalType::List(Box::new(LogicalType::Int64))
        );
    }

    #[test]
    fn test_null_sorts_last() {
        let null = Value::Null(LogicalType::Int64);
        let one = Value::Int64(1);
        assert_eq!(null.total_cmp(&one), Ordering::Greater);
        assert_eq!(one.total_cmp(&null), Ordering::Less);
        assert_eq!(null.total_cmp(&null), Ordering::Equal);
    }

    #[test]
    fn test_cross_width_integer_equality() {
        assert_eq!(Value::Int32(7), Value::Int64(7));
        assert_ne!(Value::Int32(7), Value::Int64(8));
    }

    #[test]
    fn test_float_bitwise_equality() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan, Value::Double(f64::NAN));
        assert_ne!(Value::Double(0.1), Value::Double(0.2));
    }

    #[test]
    fn test_hash_consistent_with_eq() {
        use std::collections::HashMap;
        let mut m: HashMap<Value, usize> = HashMap::new();
        m.insert(Value::Int32(5), 1);
        assert_eq!(m.get(&Value::Int64(5)), Some(&1));
        m.insert(Value::string("x"), 2);
        assert_eq!(m.get(&Value::String("x".into())), Some(&2));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int64(42).to_string(), "42");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Null(LogicalType::Int64).to_string(), "NULL");
        assert_eq!(
            Value::List(LogicalType::Int64, vec![Value::Int64(1), Value::Int64(2)]).to_string(),
            "[1,2]"
        );
    }

    #[test]
    fn test_from_int128_overflow() {
        assert_eq!(
            Value::from_int128(300, &LogicalType::Int8),
            None,
            "300 does not fit in i8"
        );
        assert_eq!(
            Value::from_int128(300, &LogicalType::Int64),
            Some(Value::Int64(300))
        );
    }
}
