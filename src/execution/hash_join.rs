//! Hash join: build sink, probe operator, SIP semi-masker, cross
//! product, and the specialized intersect hash table
//!
//! Build is a sink appending key+payload rows into a shared table;
//! `finalize` indexes the rows by key hash once all workers are done.
//! Probe reads flat key vectors, looks up matches and emits payload rows
//! as a fresh unflat chunk, continuing across `next` calls when a probe
//! tuple matches more rows than one vector holds.

use super::context::ExecutionContext;
use super::factorized_table::FactorizedTable;
use super::scan::SemiMask;
use super::{batch_rows, PhysicalOperator};
use crate::error::{QuiverError, QuiverResult};
use crate::planner::JoinType;
use crate::types::TableId;
use crate::value::Value;
use crate::vector::{DataPos, ResultSet, ResultSetDescriptor, DEFAULT_VECTOR_CAPACITY};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared state of one hash join: rows during build, key index after
/// finalize
#[derive(Debug)]
pub struct JoinHashTable {
    num_keys: usize,
    rows: Mutex<Vec<Vec<Value>>>,
    index: Mutex<HashMap<Vec<Value>, Vec<usize>>>,
    finalized: AtomicBool,
}

impl JoinHashTable {
    pub fn new(num_keys: usize) -> Arc<Self> {
        Arc::new(JoinHashTable {
            num_keys,
            rows: Mutex::new(Vec::new()),
            index: Mutex::new(HashMap::new()),
            finalized: AtomicBool::new(false),
        })
    }

    pub fn append(&self, mut batch: Vec<Vec<Value>>) {
        self.rows.lock().append(&mut batch);
    }

    /// Index rows by key; runs once, on the last build worker out
    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let rows = self.rows.lock();
        let mut index = self.index.lock();
        for (row_idx, row) in rows.iter().enumerate() {
            // Null keys never match anything.
            if row[..self.num_keys].iter().any(Value::is_null) {
                continue;
            }
            index
                .entry(row[..self.num_keys].to_vec())
                .or_default()
                .push(row_idx);
        }
    }

    /// Payload rows (key columns stripped) matching the key
    pub fn probe(&self, key: &[Value]) -> Vec<Vec<Value>> {
        if key.iter().any(Value::is_null) {
            return Vec::new();
        }
        let index = self.index.lock();
        let Some(row_ids) = index.get(key) else {
            return Vec::new();
        };
        let rows = self.rows.lock();
        row_ids
            .iter()
            .map(|&idx| rows[idx][self.num_keys..].to_vec())
            .collect()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn num_payload_columns_of(&self, total_columns: usize) -> usize {
        total_columns - self.num_keys
    }
}

/// Build-side sink of a hash join
#[derive(Clone)]
pub struct HashJoinBuild {
    pub keys: Vec<DataPos>,
    pub payloads: Vec<DataPos>,
    pub descriptor: ResultSetDescriptor,
    pub table: Arc<JoinHashTable>,
    pub child: Box<PhysicalOperator>,
    local: Vec<Vec<Value>>,
}

impl HashJoinBuild {
    pub fn new(
        keys: Vec<DataPos>,
        payloads: Vec<DataPos>,
        descriptor: ResultSetDescriptor,
        table: Arc<JoinHashTable>,
        child: Box<PhysicalOperator>,
    ) -> Self {
        HashJoinBuild {
            keys,
            payloads,
            descriptor,
            table,
            child,
            local: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.local.clear();
    }

    pub fn execute(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        let positions: Vec<DataPos> = self
            .keys
            .iter()
            .chain(self.payloads.iter())
            .copied()
            .collect();
        while self.child.next(rs, ctx)? {
            self.local.extend(batch_rows(rs, &positions)?);
        }
        self.table.append(std::mem::take(&mut self.local));
        Ok(())
    }

    pub fn finalize(&self) {
        self.table.finalize();
    }
}

/// Probe side of a hash join
#[derive(Clone)]
pub struct HashJoinProbe {
    /// Flat probe-key slots
    pub keys: Vec<DataPos>,
    pub join_type: JoinType,
    /// Payload outputs, aligned with the build table's payload columns
    pub payload_out: Vec<DataPos>,
    /// Chunk holding the payload vectors
    pub out_chunk: Option<usize>,
    /// Mark output for mark joins; its chunk is flat
    pub mark_out: Option<DataPos>,
    pub table: Arc<JoinHashTable>,
    pub child: Box<PhysicalOperator>,
    /// Build-side sink, scheduled as its own upstream pipeline
    pub build: Box<PhysicalOperator>,
    matches: Vec<Vec<Value>>,
    cursor: usize,
}

impl HashJoinProbe {
    pub fn new(
        keys: Vec<DataPos>,
        join_type: JoinType,
        payload_out: Vec<DataPos>,
        out_chunk: Option<usize>,
        mark_out: Option<DataPos>,
        table: Arc<JoinHashTable>,
        child: Box<PhysicalOperator>,
        build: Box<PhysicalOperator>,
    ) -> Self {
        HashJoinProbe {
            keys,
            join_type,
            payload_out,
            out_chunk,
            mark_out,
            table,
            child,
            build,
            matches: Vec::new(),
            cursor: 0,
        }
    }

    pub fn reset(&mut self) {
        self.matches.clear();
        self.cursor = 0;
    }

    fn emit_matches(&mut self, rs: &mut ResultSet) -> bool {
        if self.cursor >= self.matches.len() {
            return false;
        }
        // Without a payload chunk each match re-emits the probe tuple.
        let n = match self.out_chunk {
            Some(_) => (self.matches.len() - self.cursor).min(DEFAULT_VECTOR_CAPACITY),
            None => 1,
        };
        for row in 0..n {
            for (col, pos) in self.payload_out.iter().enumerate() {
                rs.vector_mut(*pos)
                    .set_value(row, self.matches[self.cursor + row][col].clone());
            }
        }
        self.cursor += n;
        if let Some(chunk) = self.out_chunk {
            rs.state_mut(chunk).init_identity(n);
        }
        true
    }

    fn probe_key(&self, rs: &ResultSet) -> QuiverResult<Vec<Value>> {
        let mut key = Vec::with_capacity(self.keys.len());
        for pos in &self.keys {
            let state = rs.state(pos.chunk);
            if !state.is_flat() {
                return Err(QuiverError::internal("probe keys must be flat"));
            }
            key.push(rs.value(*pos, state.current_pos()).clone());
        }
        Ok(key)
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        loop {
            if self.emit_matches(rs) {
                return Ok(true);
            }
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let key = self.probe_key(rs)?;
            match self.join_type {
                JoinType::Inner => {
                    self.matches = self.table.probe(&key);
                    self.cursor = 0;
                }
                JoinType::LeftOuter => {
                    self.matches = self.table.probe(&key);
                    self.cursor = 0;
                    if self.matches.is_empty() {
                        // One all-null payload row keeps the probe tuple.
                        let nulls: Vec<Value> = self
                            .payload_out
                            .iter()
                            .map(|pos| Value::Null(rs.vector(*pos).data_type().clone()))
                            .collect();
                        self.matches = vec![nulls];
                    }
                }
                JoinType::Mark => {
                    let mark = !self.table.probe(&key).is_empty();
                    let pos = self.mark_out.ok_or_else(|| {
                        QuiverError::internal("mark join without a mark output")
                    })?;
                    let state = rs.state_mut(pos.chunk);
                    state.init_identity(1);
                    state.set_to_flat(0);
                    rs.vector_mut(pos).set_value(0, Value::Bool(mark));
                    return Ok(true);
                }
            }
        }
    }
}

/// SIP: marks the probe-side scan mask with every build key seen
#[derive(Clone)]
pub struct SemiMasker {
    pub key: DataPos,
    pub node_table: TableId,
    pub mask: Arc<SemiMask>,
    pub child: Box<PhysicalOperator>,
}

impl SemiMasker {
    pub fn init(&mut self, ctx: &ExecutionContext) -> QuiverResult<()> {
        if !self.mask.is_enabled() {
            let table = ctx.storage.node_table(self.node_table)?;
            let num_offsets = table.read().num_offsets();
            self.mask.enable(num_offsets);
        }
        Ok(())
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let state = rs.state(self.key.chunk);
        let positions = state.positions();
        for pos in positions {
            if let Some(id) = rs.value(self.key, pos).as_internal_id() {
                self.mask.mark(id.offset);
            }
        }
        Ok(true)
    }
}

/// Cross product: streams the probe side, re-reading the materialized
/// build table per probe batch
#[derive(Clone)]
pub struct CrossProduct {
    pub build: Arc<FactorizedTable>,
    pub outputs: Vec<DataPos>,
    pub out_chunk: usize,
    pub child: Box<PhysicalOperator>,
    /// Build-side collector, scheduled as its own upstream pipeline
    pub build_sink: Box<PhysicalOperator>,
    cursor: u64,
    active: bool,
}

impl CrossProduct {
    pub fn new(
        build: Arc<FactorizedTable>,
        outputs: Vec<DataPos>,
        out_chunk: usize,
        child: Box<PhysicalOperator>,
        build_sink: Box<PhysicalOperator>,
    ) -> Self {
        CrossProduct {
            build,
            outputs,
            out_chunk,
            child,
            build_sink,
            cursor: 0,
            active: false,
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.active = false;
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        loop {
            if self.active {
                let total = self.build.num_rows() as u64;
                if self.cursor < total {
                    let end = (self.cursor + DEFAULT_VECTOR_CAPACITY as u64).min(total);
                    let rows = self.build.rows_in(self.cursor, end);
                    for (row_idx, row) in rows.iter().enumerate() {
                        for (col, pos) in self.outputs.iter().enumerate() {
                            rs.vector_mut(*pos).set_value(row_idx, row[col].clone());
                        }
                    }
                    rs.state_mut(self.out_chunk).init_identity(rows.len());
                    self.cursor = end;
                    return Ok(true);
                }
                self.active = false;
            }
            if self.build.is_empty() {
                return Ok(false);
            }
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            self.cursor = 0;
            self.active = true;
        }
    }
}

/// Specialized hash table for single-key multi-way intersection: build
/// appends sorted neighbor lists, probe merges the lists of several
/// tables in key order emitting one entry per common value.
#[derive(Debug, Default)]
pub struct IntersectHashTable {
    lists: Mutex<HashMap<Value, Vec<u64>>>,
}

impl IntersectHashTable {
    pub fn new() -> Arc<Self> {
        Arc::new(IntersectHashTable::default())
    }

    /// Append neighbors for a key; the list is kept sorted
    pub fn append(&self, key: Value, mut neighbors: Vec<u64>) {
        let mut lists = self.lists.lock();
        let entry = lists.entry(key).or_default();
        entry.append(&mut neighbors);
        entry.sort_unstable();
        entry.dedup();
    }

    pub fn list(&self, key: &Value) -> Vec<u64> {
        self.lists.lock().get(key).cloned().unwrap_or_default()
    }
}

/// K-way sorted intersection of the per-table lists for one key
pub fn intersect_sorted(tables: &[Arc<IntersectHashTable>], key: &Value) -> Vec<u64> {
    let mut lists: Vec<Vec<u64>> = tables.iter().map(|t| t.list(key)).collect();
    let Some(mut out) = lists.pop() else {
        return Vec::new();
    };
    for list in lists {
        let mut merged = Vec::with_capacity(out.len().min(list.len()));
        let (mut i, mut j) = (0, 0);
        while i < out.len() && j < list.len() {
            match out[i].cmp(&list[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    merged.push(out[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        out = merged;
        if out.is_empty() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_table_build_probe() {
        let table = JoinHashTable::new(1);
        table.append(vec![
            vec![Value::Int64(1), Value::string("a")],
            vec![Value::Int64(1), Value::string("b")],
            vec![Value::Int64(2), Value::string("c")],
        ]);
        table.finalize();
        let matches = table.probe(&[Value::Int64(1)]);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0], vec![Value::string("a")]);
        assert!(table.probe(&[Value::Int64(9)]).is_empty());
    }

    #[test]
    fn test_null_keys_never_match() {
        let table = JoinHashTable::new(1);
        table.append(vec![vec![
            Value::Null(crate::types::LogicalType::Int64),
            Value::string("x"),
        ]]);
        table.finalize();
        assert!(table
            .probe(&[Value::Null(crate::types::LogicalType::Int64)])
            .is_empty());
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let table = JoinHashTable::new(1);
        table.append(vec![vec![Value::Int64(1), Value::Int64(10)]]);
        table.finalize();
        table.finalize();
        assert_eq!(table.probe(&[Value::Int64(1)]).len(), 1);
    }

    #[test]
    fn test_intersect_sorted_lists() {
        let a = IntersectHashTable::new();
        let b = IntersectHashTable::new();
        a.append(Value::Int64(1), vec![5, 1, 3, 9]);
        b.append(Value::Int64(1), vec![2, 3, 9, 10]);
        let out = intersect_sorted(&[Arc::clone(&a), Arc::clone(&b)], &Value::Int64(1));
        assert_eq!(out, vec![3, 9]);
        assert!(intersect_sorted(&[a, b], &Value::Int64(7)).is_empty());
    }

    #[test]
    fn test_intersect_dedups_buildside() {
        let a = IntersectHashTable::new();
        a.append(Value::Int64(1), vec![3, 3, 1]);
        a.append(Value::Int64(1), vec![2, 3]);
        assert_eq!(a.list(&Value::Int64(1)), vec![1, 2, 3]);
    }
}
