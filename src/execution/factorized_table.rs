//! Factorized tables
//!
//! The materialization unit between pipelines: sinks append rows, a
//! paired scan re-reads them in morsels. Build buffers are worker-local
//! and merged under a single-writer lock when each worker finishes.

use crate::types::LogicalType;
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A materialized table of flat rows, shared across pipelines
#[derive(Debug)]
pub struct FactorizedTable {
    types: Vec<LogicalType>,
    rows: Mutex<Vec<Vec<Value>>>,
    /// Morsel cursor for the paired scan
    cursor: AtomicU64,
}

impl FactorizedTable {
    pub fn new(types: Vec<LogicalType>) -> Arc<Self> {
        Arc::new(FactorizedTable {
            types,
            rows: Mutex::new(Vec::new()),
            cursor: AtomicU64::new(0),
        })
    }

    pub fn types(&self) -> &[LogicalType] {
        &self.types
    }

    pub fn num_columns(&self) -> usize {
        self.types.len()
    }

    /// Merge a worker's local buffer
    pub fn append(&self, mut batch: Vec<Vec<Value>>) {
        self.rows.lock().append(&mut batch);
    }

    pub fn push_row(&self, row: Vec<Value>) {
        self.rows.lock().push(row);
    }

    pub fn num_rows(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Claim the next morsel of up to `size` rows; `None` at the end
    pub fn next_morsel(&self, size: u64) -> Option<(u64, u64)> {
        let total = self.num_rows() as u64;
        loop {
            let start = self.cursor.load(Ordering::SeqCst);
            if start >= total {
                return None;
            }
            let end = (start + size).min(total);
            if self
                .cursor
                .compare_exchange(start, end, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some((start, end));
            }
        }
    }

    /// Reset the scan cursor so the table can be read again
    pub fn reset_cursor(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }

    /// Copy of the rows in `[start, end)`
    pub fn rows_in(&self, start: u64, end: u64) -> Vec<Vec<Value>> {
        let rows = self.rows.lock();
        rows[start as usize..(end as usize).min(rows.len())].to_vec()
    }

    /// Copy of all rows, in insertion order
    pub fn all_rows(&self) -> Vec<Vec<Value>> {
        self.rows.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<FactorizedTable> {
        let t = FactorizedTable::new(vec![LogicalType::Int64]);
        t.append((0..10).map(|i| vec![Value::Int64(i)]).collect());
        t
    }

    #[test]
    fn test_append_and_read() {
        let t = table();
        assert_eq!(t.num_rows(), 10);
        assert_eq!(t.rows_in(2, 4), vec![vec![Value::Int64(2)], vec![Value::Int64(3)]]);
    }

    #[test]
    fn test_morsels_partition_rows() {
        let t = table();
        let mut seen = 0;
        while let Some((start, end)) = t.next_morsel(3) {
            assert!(end > start);
            seen += end - start;
        }
        assert_eq!(seen, 10);
        assert_eq!(t.next_morsel(3), None);
        t.reset_cursor();
        assert_eq!(t.next_morsel(3), Some((0, 3)));
    }

    #[test]
    fn test_concurrent_morsels_are_disjoint() {
        let t = table();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let t = Arc::clone(&t);
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(range) = t.next_morsel(2) {
                    claimed.push(range);
                }
                claimed
            }));
        }
        let mut all: Vec<(u64, u64)> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("join"))
            .collect();
        all.sort_unstable();
        let total: u64 = all.iter().map(|(s, e)| e - s).sum();
        assert_eq!(total, 10);
        for pair in all.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlapping morsels: {all:?}");
        }
    }
}
