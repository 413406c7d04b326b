//! In-pipeline operators: filter, flatten, projection, limit/skip,
//! multiplicity reducer and unwind
//!
//! All of them preserve the pull protocol: `next` returns `true` with the
//! result set describing one batch, or `false` when this worker's share
//! of the input is exhausted.

use super::context::ExecutionContext;
use super::PhysicalOperator;
use crate::error::{QuiverError, QuiverResult};
use crate::evaluator::ExpressionEvaluator;
use crate::value::Value;
use crate::vector::{DataPos, ResultSet, DEFAULT_VECTOR_CAPACITY};
use parking_lot::Mutex;
use std::sync::Arc;

/// Predicate filter; rewrites the governing chunk's selection in place
#[derive(Clone)]
pub struct Filter {
    pub predicate: ExpressionEvaluator,
    pub child: Box<PhysicalOperator>,
}

impl Filter {
    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        loop {
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            self.predicate.evaluate(rs, ctx)?;
            match self.predicate.governing_chunk() {
                Some(chunk) => {
                    let selected: Vec<usize> = rs.state(chunk).selected_positions().collect();
                    let keep: Vec<u32> = selected
                        .iter()
                        .zip(self.predicate.values())
                        .filter_map(|(&pos, value)| {
                            (value.as_bool() == Some(true)).then_some(pos as u32)
                        })
                        .collect();
                    if keep.is_empty() {
                        continue;
                    }
                    rs.state_mut(chunk).set_selected(keep);
                    return Ok(true);
                }
                None => {
                    if self.predicate.values().first().and_then(Value::as_bool) == Some(true) {
                        return Ok(true);
                    }
                }
            }
        }
    }
}

/// Demotes an unflat chunk to flat by pinning one element at a time.
///
/// Returns `false` only when the current batch has no more elements and
/// the child has no more batches.
#[derive(Clone)]
pub struct Flatten {
    pub chunk: usize,
    pub child: Box<PhysicalOperator>,
    cur: usize,
    size: usize,
    active: bool,
}

impl Flatten {
    pub fn new(chunk: usize, child: Box<PhysicalOperator>) -> Self {
        Flatten {
            chunk,
            child,
            cur: 0,
            size: 0,
            active: false,
        }
    }

    pub fn reset(&mut self) {
        self.cur = 0;
        self.size = 0;
        self.active = false;
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        if self.active && self.cur < self.size {
            rs.state_mut(self.chunk).set_to_flat(self.cur);
            self.cur += 1;
            return Ok(true);
        }
        loop {
            // Pull the next source batch with the chunk back in its
            // unflat state.
            rs.state_mut(self.chunk).set_to_unflat();
            if !self.child.next(rs, ctx)? {
                self.active = false;
                return Ok(false);
            }
            let size = rs.state(self.chunk).selected_size();
            if size == 0 {
                continue;
            }
            self.size = size;
            self.cur = 1;
            self.active = true;
            rs.state_mut(self.chunk).set_to_flat(0);
            return Ok(true);
        }
    }
}

/// Evaluates expressions into their output slots
#[derive(Clone)]
pub struct Projection {
    /// (evaluator, output slot); pass-through columns carry no item
    pub items: Vec<(ExpressionEvaluator, DataPos)>,
    pub child: Box<PhysicalOperator>,
}

impl Projection {
    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        for (evaluator, pos) in &mut self.items {
            evaluator.evaluate(rs, ctx)?;
            let values: Vec<Value> = evaluator.values().to_vec();
            match evaluator.governing_chunk() {
                Some(chunk) => {
                    debug_assert_eq!(chunk, pos.chunk);
                    let positions: Vec<usize> = rs.state(chunk).selected_positions().collect();
                    let vector = rs.vector_mut(*pos);
                    for (value, p) in values.into_iter().zip(positions) {
                        vector.set_value(p, value);
                    }
                }
                None => {
                    // Constant chunks are lazily given their one-tuple
                    // state here.
                    let state = rs.state_mut(pos.chunk);
                    if state.selected_size() == 0 {
                        state.init_identity(1);
                        state.set_to_flat(0);
                    }
                    let value = values
                        .into_iter()
                        .next()
                        .ok_or_else(|| QuiverError::internal("empty evaluator output"))?;
                    if state.is_flat() {
                        let p = state.current_pos();
                        rs.vector_mut(*pos).set_value(p, value);
                    } else {
                        let positions: Vec<usize> =
                            rs.state(pos.chunk).selected_positions().collect();
                        let vector = rs.vector_mut(*pos);
                        for p in positions {
                            vector.set_value(p, value.clone());
                        }
                    }
                }
            }
        }
        Ok(true)
    }
}

/// Re-emits each batch `multiplicity` times with multiplicity reset to 1
#[derive(Clone)]
pub struct MultiplicityReducer {
    pub child: Box<PhysicalOperator>,
    remaining: u64,
}

impl MultiplicityReducer {
    pub fn new(child: Box<PhysicalOperator>) -> Self {
        MultiplicityReducer {
            child,
            remaining: 0,
        }
    }

    pub fn reset(&mut self) {
        self.remaining = 0;
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(true);
        }
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let multiplicity = rs.multiplicity.max(1);
        rs.multiplicity = 1;
        self.remaining = multiplicity - 1;
        Ok(true)
    }
}

/// Shared skip/limit counters; tuples are claimed across workers
#[derive(Debug, Default)]
pub struct LimitCounters {
    skipped: u64,
    returned: u64,
}

/// SKIP / LIMIT over the tuple stream
#[derive(Clone)]
pub struct Limit {
    pub skip: u64,
    pub limit: Option<u64>,
    /// The one unflat chunk whose selection carries the batch, if any
    pub target_chunk: Option<usize>,
    pub shared: Arc<Mutex<LimitCounters>>,
    pub child: Box<PhysicalOperator>,
}

impl Limit {
    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        loop {
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let n = match self.target_chunk {
                Some(chunk) => rs.state(chunk).effective_size() as u64,
                None => 1,
            };

            let (drop_front, take) = {
                let mut counters = self.shared.lock();
                let mut drop_front = 0u64;
                let mut take = n;
                if counters.skipped < self.skip {
                    let s = (self.skip - counters.skipped).min(n);
                    counters.skipped += s;
                    drop_front = s;
                    take = n - s;
                }
                if let Some(limit) = self.limit {
                    if counters.returned >= limit {
                        return Ok(false);
                    }
                    take = take.min(limit - counters.returned);
                }
                counters.returned += take;
                (drop_front, take)
            };
            if take == 0 {
                continue;
            }
            if let Some(chunk) = self.target_chunk {
                if drop_front > 0 || take < n {
                    let state = rs.state_mut(chunk);
                    if !state.is_flat() {
                        let keep: Vec<u32> = state
                            .selected_positions()
                            .skip(drop_front as usize)
                            .take(take as usize)
                            .map(|p| p as u32)
                            .collect();
                        state.set_selected(keep);
                    }
                }
            }
            return Ok(true);
        }
    }
}

/// `UNWIND list AS alias`: nests list elements into a fresh chunk
#[derive(Clone)]
pub struct Unwind {
    pub list: ExpressionEvaluator,
    pub out: DataPos,
    pub out_chunk: usize,
    pub child: Box<PhysicalOperator>,
    buffer: Vec<Value>,
    cursor: usize,
}

impl Unwind {
    pub fn new(
        list: ExpressionEvaluator,
        out: DataPos,
        out_chunk: usize,
        child: Box<PhysicalOperator>,
    ) -> Self {
        Unwind {
            list,
            out,
            out_chunk,
            child,
            buffer: Vec::new(),
            cursor: 0,
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        loop {
            if self.cursor < self.buffer.len() {
                let n = (self.buffer.len() - self.cursor).min(DEFAULT_VECTOR_CAPACITY);
                for row in 0..n {
                    rs.vector_mut(self.out)
                        .set_value(row, self.buffer[self.cursor + row].clone());
                }
                self.cursor += n;
                rs.state_mut(self.out_chunk).init_identity(n);
                return Ok(true);
            }
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            self.list.evaluate(rs, ctx)?;
            if self.list.governing_chunk().is_some() {
                return Err(QuiverError::internal(
                    "UNWIND list must come from a flat group",
                ));
            }
            self.buffer = match self.list.values().first() {
                Some(Value::List(_, items)) => items.clone(),
                Some(v) if v.is_null() => Vec::new(),
                Some(other) => vec![other.clone()],
                None => Vec::new(),
            };
            self.cursor = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::execution::factorized_table::FactorizedTable;
    use crate::execution::scan::FTableScan;
    use crate::function::FunctionRegistry;
    use crate::storage::{StorageManager, Transaction};
    use crate::types::LogicalType;
    use parking_lot::RwLock;

    fn test_context() -> ExecutionContext {
        let dir = std::env::temp_dir().join(format!("quiver-filter-test-{}", std::process::id()));
        ExecutionContext::new(
            Arc::new(StorageManager::new(dir, false).expect("storage")),
            Arc::new(RwLock::new(Catalog::new())),
            Arc::new(FunctionRegistry::with_builtins()),
            Transaction { id: 1 },
            1,
            None,
            30,
        )
    }

    #[test]
    fn test_multiplicity_reducer_repeats_then_ends() {
        let ctx = test_context();
        let table = FactorizedTable::new(vec![LogicalType::Int64]);
        table.push_row(vec![Value::Int64(7)]);
        let scan = PhysicalOperator::FTableScan(FTableScan {
            table,
            out_chunk: 0,
            columns: vec![Some(DataPos::new(0, 0))],
            ordered: false,
            dependencies: vec![],
        });
        let mut reducer = MultiplicityReducer::new(Box::new(scan));

        let mut rs = crate::vector::ResultSetDescriptor {
            chunk_types: vec![vec![LogicalType::Int64]],
        }
        .populate();
        rs.multiplicity = 3;

        // One input batch with multiplicity 3 emits three times, each
        // with multiplicity reset to 1, then ends.
        assert!(reducer.next(&mut rs, &ctx).expect("next"));
        assert_eq!(rs.multiplicity, 1);
        assert!(reducer.next(&mut rs, &ctx).expect("next"));
        assert!(reducer.next(&mut rs, &ctx).expect("next"));
        assert!(!reducer.next(&mut rs, &ctx).expect("next"));
    }

    #[test]
    fn test_limit_counters_claiming() {
        let shared = Arc::new(Mutex::new(LimitCounters::default()));
        // Simulate the claim logic directly: skip 3, limit 4 over batches
        // of 5 and 5.
        let claim = |n: u64| {
            let mut c = shared.lock();
            let mut drop_front = 0;
            let mut take = n;
            if c.skipped < 3 {
                let s = (3 - c.skipped).min(n);
                c.skipped += s;
                drop_front = s;
                take = n - s;
            }
            let room = 4u64.saturating_sub(c.returned);
            take = take.min(room);
            c.returned += take;
            (drop_front, take)
        };
        assert_eq!(claim(5), (3, 2));
        assert_eq!(claim(5), (0, 2));
        assert_eq!(claim(5), (0, 0));
    }
}
