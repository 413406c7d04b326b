//! Primary-key hash index
//!
//! Maps primary-key values to node offsets. `reserve`, `append`, `lookup`
//! is the whole surface; appends of a duplicate key fail, which is what
//! makes COPY abort on key conflicts.

use crate::error::{QuiverError, QuiverResult};
use crate::value::Value;
use dashmap::DashMap;

/// Concurrent primary-key index for one node table
#[derive(Debug, Default)]
pub struct PrimaryKeyIndex {
    map: DashMap<Value, u64>,
}

impl PrimaryKeyIndex {
    pub fn new() -> Self {
        PrimaryKeyIndex::default()
    }

    /// Pre-size for an expected number of keys.
    ///
    /// The backing shards grow lazily; this is a sizing hint only.
    pub fn reserve(&self, _additional: usize) {}

    /// Register a key at an offset; a present key is a conflict
    pub fn append(&self, key: Value, offset: u64) -> QuiverResult<()> {
        if key.is_null() {
            return Err(QuiverError::runtime("primary key may not be null"));
        }
        match self.map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => Err(QuiverError::runtime(format!(
                "duplicated primary key: {}",
                e.key()
            ))),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(offset);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, key: &Value) -> Option<u64> {
        self.map.get(key).map(|v| *v)
    }

    pub fn remove(&self, key: &Value) {
        self.map.remove(key);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_lookup() {
        let index = PrimaryKeyIndex::new();
        index.reserve(2);
        index.append(Value::Int64(1), 0).expect("append");
        index.append(Value::Int64(2), 1).expect("append");
        assert_eq!(index.lookup(&Value::Int64(1)), Some(0));
        assert_eq!(index.lookup(&Value::Int64(3)), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_duplicate_key_conflicts() {
        let index = PrimaryKeyIndex::new();
        index.append(Value::Int64(1), 0).expect("append");
        let err = index.append(Value::Int64(1), 5).expect_err("duplicate");
        assert!(err.to_string().contains("duplicated primary key"));
        // The original mapping survives.
        assert_eq!(index.lookup(&Value::Int64(1)), Some(0));
    }

    #[test]
    fn test_null_key_rejected() {
        let index = PrimaryKeyIndex::new();
        let err = index
            .append(Value::Null(crate::types::LogicalType::Int64), 0)
            .expect_err("null");
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn test_string_keys() {
        let index = PrimaryKeyIndex::new();
        index.append(Value::string("alice"), 7).expect("append");
        assert_eq!(index.lookup(&Value::string("alice")), Some(7));
        index.remove(&Value::string("alice"));
        assert_eq!(index.lookup(&Value::string("alice")), None);
    }
}
