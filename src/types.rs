//! Logical Type System
//!
//! Tagged sum over primitives, containers and graph references. Type
//! equality includes container element types. Arithmetic promotes to the
//! widest operand; `Any` left unresolved after binding is defaulted to
//! `String` by the binder's type solver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog identifier for node and rel tables
pub type TableId = u64;

/// Traversal direction over a rel table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtendDirection {
    Forward,
    Backward,
}

impl ExtendDirection {
    pub fn reverse(self) -> Self {
        match self {
            ExtendDirection::Forward => ExtendDirection::Backward,
            ExtendDirection::Backward => ExtendDirection::Forward,
        }
    }
}

impl fmt::Display for ExtendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtendDirection::Forward => write!(f, "FWD"),
            ExtendDirection::Backward => write!(f, "BWD"),
        }
    }
}

/// Logical data types for expressions, vectors and catalog properties
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    /// Unresolved type; only legal during binding
    Any,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Float,
    Double,
    Date,
    Timestamp,
    Interval,
    String,
    Blob,
    Uuid,
    /// Physical (table id, offset) reference
    InternalId,
    /// Variable-length list of a single element type
    List(Box<LogicalType>),
    /// Fixed-size array of a single element type
    Array(Box<LogicalType>, usize),
    Map(Box<LogicalType>, Box<LogicalType>),
    Struct(Vec<(String, LogicalType)>),
    Union(Vec<(String, LogicalType)>),
    /// A node binding backed by the given node table
    Node(TableId),
    /// A rel binding backed by the given rel table
    Rel(TableId),
}

impl LogicalType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            LogicalType::Int8
                | LogicalType::Int16
                | LogicalType::Int32
                | LogicalType::Int64
                | LogicalType::Int128
                | LogicalType::Float
                | LogicalType::Double
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            LogicalType::Int8
                | LogicalType::Int16
                | LogicalType::Int32
                | LogicalType::Int64
                | LogicalType::Int128
        )
    }

    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            LogicalType::List(_)
                | LogicalType::Array(_, _)
                | LogicalType::Map(_, _)
                | LogicalType::Struct(_)
                | LogicalType::Union(_)
        )
    }

    /// Rank used for numeric widening; wider wins
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            LogicalType::Int8 => Some(1),
            LogicalType::Int16 => Some(2),
            LogicalType::Int32 => Some(3),
            LogicalType::Int64 => Some(4),
            LogicalType::Int128 => Some(5),
            LogicalType::Float => Some(6),
            LogicalType::Double => Some(7),
            _ => None,
        }
    }

    /// Common type of two arithmetic operands, if one exists.
    ///
    /// `Any` defers to the other operand.
    pub fn promote(a: &LogicalType, b: &LogicalType) -> Option<LogicalType> {
        if a == b {
            return Some(a.clone());
        }
        if *a == LogicalType::Any {
            return Some(b.clone());
        }
        if *b == LogicalType::Any {
            return Some(a.clone());
        }
        match (a.numeric_rank(), b.numeric_rank()) {
            (Some(ra), Some(rb)) => Some(if ra >= rb { a.clone() } else { b.clone() }),
            _ => None,
        }
    }

    /// Cost of implicitly casting `from` into `self`.
    ///
    /// `None` means no implicit cast exists. Zero cost for an exact match,
    /// small costs for numeric widening, larger for lossy-ish jumps. `Any`
    /// parameters accept everything at a fixed penalty so that exact
    /// overloads always win.
    pub fn cast_cost(&self, from: &LogicalType) -> Option<u32> {
        if self == from {
            return Some(0);
        }
        if *self == LogicalType::Any {
            return Some(100);
        }
        if *from == LogicalType::Any {
            // Unresolved operand; resolved later by the type solver.
            return Some(1);
        }
        match (from.numeric_rank(), self.numeric_rank()) {
            (Some(rf), Some(rt)) if rt > rf => Some(u32::from(rt - rf)),
            (Some(_), Some(_)) => None,
            _ => match (from, self) {
                (LogicalType::String, LogicalType::Blob) => Some(10),
                (LogicalType::Date, LogicalType::Timestamp) => Some(2),
                (LogicalType::List(f), LogicalType::List(t)) => t.cast_cost(f),
                _ => None,
            },
        }
    }

    /// Whether a value of `from` may appear where `self` is required
    pub fn accepts(&self, from: &LogicalType) -> bool {
        self.cast_cost(from).is_some()
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Any => write!(f, "ANY"),
            LogicalType::Bool => write!(f, "BOOL"),
            LogicalType::Int8 => write!(f, "INT8"),
            LogicalType::Int16 => write!(f, "INT16"),
            LogicalType::Int32 => write!(f, "INT32"),
            LogicalType::Int64 => write!(f, "INT64"),
            LogicalType::Int128 => write!(f, "INT128"),
            LogicalType::Float => write!(f, "FLOAT"),
            LogicalType::Double => write!(f, "DOUBLE"),
            LogicalType::Date => write!(f, "DATE"),
            LogicalType::Timestamp => write!(f, "TIMESTAMP"),
            LogicalType::Interval => write!(f, "INTERVAL"),
            LogicalType::String => write!(f, "STRING"),
            LogicalType::Blob => write!(f, "BLOB"),
            LogicalType::Uuid => write!(f, "UUID"),
            LogicalType::InternalId => write!(f, "INTERNAL_ID"),
            LogicalType::List(t) => write!(f, "{t}[]"),
            LogicalType::Array(t, n) => write!(f, "{t}[{n}]"),
            LogicalType::Map(k, v) => write!(f, "MAP({k}, {v})"),
            LogicalType::Struct(fields) => {
                write!(f, "STRUCT(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} {ty}")?;
                }
                write!(f, ")")
            }
            LogicalType::Union(fields) => {
                write!(f, "UNION(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} {ty}")?;
                }
                write!(f, ")")
            }
            LogicalType::Node(_) => write!(f, "NODE"),
            LogicalType::Rel(_) => write!(f, "REL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_widest_wins() {
        assert_eq!(
            LogicalType::promote(&LogicalType::Int32, &LogicalType::Int64),
            Some(LogicalType::Int64)
        );
        assert_eq!(
            LogicalType::promote(&LogicalType::Int64, &LogicalType::Double),
            Some(LogicalType::Double)
        );
        assert_eq!(
            LogicalType::promote(&LogicalType::Int8, &LogicalType::Int8),
            Some(LogicalType::Int8)
        );
        assert_eq!(
            LogicalType::promote(&LogicalType::String, &LogicalType::Int64),
            None
        );
    }

    #[test]
    fn test_any_defers() {
        assert_eq!(
            LogicalType::promote(&LogicalType::Any, &LogicalType::Int64),
            Some(LogicalType::Int64)
        );
        assert_eq!(
            LogicalType::promote(&LogicalType::String, &LogicalType::Any),
            Some(LogicalType::String)
        );
    }

    #[test]
    fn test_cast_cost_ordering() {
        // Exact beats widening beats Any wildcard.
        let exact = LogicalType::Int64.cast_cost(&LogicalType::Int64);
        let widen = LogicalType::Int64.cast_cost(&LogicalType::Int32);
        let wild = LogicalType::Any.cast_cost(&LogicalType::Int32);
        assert_eq!(exact, Some(0));
        assert!(widen.expect("widening allowed") > 0);
        assert!(wild.expect("wildcard allowed") > widen.expect("widening allowed"));
    }

    #[test]
    fn test_no_narrowing_cast() {
        assert_eq!(LogicalType::Int32.cast_cost(&LogicalType::Int64), None);
        assert_eq!(LogicalType::Int8.cast_cost(&LogicalType::Double), None);
    }

    #[test]
    fn test_container_equality_is_deep() {
        let a = LogicalType::List(Box::new(LogicalType::Int64));
        let b = LogicalType::List(Box::new(LogicalType::Int32));
        assert_ne!(a, b);
        assert_eq!(a, LogicalType::List(Box::new(LogicalType::Int64)));
    }

    #[test]
    fn test_display() {
        assert_eq!(LogicalType::Int64.to_string(), "INT64");
        assert_eq!(
            LogicalType::List(Box::new(LogicalType::String)).to_string(),
            "STRING[]"
        );
        assert_eq!(
            LogicalType::Map(Box::new(LogicalType::String), Box::new(LogicalType::Int64))
                .to_string(),
            "MAP(STRING, INT64)"
        );
    }
}
