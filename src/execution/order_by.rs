//! Order-by
//!
//! Each worker appends key+payload rows to a local run and sorts it on
//! exit (`LOCAL_APPEND`, `LOCAL_SORT`); the last worker merges the
//! sorted runs k-way into the output table (`GLOBAL_MERGE`), which the
//! paired ordered scan reads. Ties across runs break on run order, so
//! rows from one morsel keep their storage order.

use super::context::ExecutionContext;
use super::factorized_table::FactorizedTable;
use super::{batch_rows, PhysicalOperator};
use crate::error::QuiverResult;
use crate::value::Value;
use crate::vector::{DataPos, ResultSet, ResultSetDescriptor};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// (keys, payload) row during sorting
type SortRow = (Vec<Value>, Vec<Value>);

/// Shared order-by state: sorted runs in, merged table out
pub struct OrderByShared {
    runs: Mutex<Vec<Vec<SortRow>>>,
    pub output: Arc<FactorizedTable>,
    finalized: AtomicBool,
}

impl OrderByShared {
    pub fn new(output: Arc<FactorizedTable>) -> Arc<Self> {
        Arc::new(OrderByShared {
            runs: Mutex::new(Vec::new()),
            output,
            finalized: AtomicBool::new(false),
        })
    }
}

/// The order-by sink
#[derive(Clone)]
pub struct OrderBySink {
    /// (key slot, ascending)
    pub keys: Vec<(DataPos, bool)>,
    pub payloads: Vec<DataPos>,
    pub descriptor: ResultSetDescriptor,
    pub shared: Arc<OrderByShared>,
    pub child: Box<PhysicalOperator>,
    local: Vec<SortRow>,
}

impl OrderBySink {
    pub fn new(
        keys: Vec<(DataPos, bool)>,
        payloads: Vec<DataPos>,
        descriptor: ResultSetDescriptor,
        shared: Arc<OrderByShared>,
        child: Box<PhysicalOperator>,
    ) -> Self {
        OrderBySink {
            keys,
            payloads,
            descriptor,
            shared,
            child,
            local: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.local.clear();
    }

    fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (idx, (_, ascending)) in self.keys.iter().enumerate() {
            let ord = a[idx].total_cmp(&b[idx]);
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub fn execute(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        let positions: Vec<DataPos> = self
            .keys
            .iter()
            .map(|(pos, _)| *pos)
            .chain(self.payloads.iter().copied())
            .collect();
        let num_keys = self.keys.len();
        while self.child.next(rs, ctx)? {
            for row in batch_rows(rs, &positions)? {
                let payload = row[num_keys..].to_vec();
                let keys = row[..num_keys].to_vec();
                for _ in 0..rs.multiplicity.max(1) {
                    self.local.push((keys.clone(), payload.clone()));
                }
            }
        }
        let mut run = std::mem::take(&mut self.local);
        run.sort_by(|a, b| self.compare(&a.0, &b.0));
        self.shared.runs.lock().push(run);
        Ok(())
    }

    /// K-way merge of the sorted runs into the output table
    pub fn finalize(&self) {
        if self.shared.finalized.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let mut runs = std::mem::take(&mut *self.shared.runs.lock());
        let mut cursors = vec![0usize; runs.len()];
        loop {
            let mut best: Option<usize> = None;
            for (run_idx, run) in runs.iter().enumerate() {
                if cursors[run_idx] >= run.len() {
                    continue;
                }
                best = match best {
                    None => Some(run_idx),
                    Some(cur) => {
                        let ord = self.compare(
                            &run[cursors[run_idx]].0,
                            &runs[cur][cursors[cur]].0,
                        );
                        if ord == Ordering::Less {
                            Some(run_idx)
                        } else {
                            Some(cur)
                        }
                    }
                };
            }
            let Some(run_idx) = best else {
                break;
            };
            let (_, payload) = &runs[run_idx][cursors[run_idx]];
            self.shared.output.push_row(payload.clone());
            cursors[run_idx] += 1;
        }
        runs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogicalType;

    fn sink_for_keys(keys: Vec<bool>) -> OrderBySink {
        let output = FactorizedTable::new(vec![LogicalType::Int64]);
        OrderBySink::new(
            keys.into_iter()
                .enumerate()
                .map(|(i, asc)| (DataPos::new(0, i), asc))
                .collect(),
            vec![],
            ResultSetDescriptor::default(),
            OrderByShared::new(output),
            Box::new(super::super::PhysicalOperator::EmptyResult(
                super::super::scan::EmptyResult,
            )),
        )
    }

    #[test]
    fn test_merge_two_runs() {
        let sink = sink_for_keys(vec![true]);
        {
            let mut runs = sink.shared.runs.lock();
            runs.push(vec![
                (vec![Value::Int64(1)], vec![Value::Int64(10)]),
                (vec![Value::Int64(3)], vec![Value::Int64(30)]),
            ]);
            runs.push(vec![
                (vec![Value::Int64(2)], vec![Value::Int64(20)]),
                (vec![Value::Int64(4)], vec![Value::Int64(40)]),
            ]);
        }
        sink.finalize();
        let rows = sink.shared.output.all_rows();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int64(10)],
                vec![Value::Int64(20)],
                vec![Value::Int64(30)],
                vec![Value::Int64(40)],
            ]
        );
    }

    #[test]
    fn test_descending_merge() {
        let sink = sink_for_keys(vec![false]);
        {
            let mut runs = sink.shared.runs.lock();
            runs.push(vec![
                (vec![Value::Int64(9)], vec![Value::Int64(9)]),
                (vec![Value::Int64(1)], vec![Value::Int64(1)]),
            ]);
            runs.push(vec![(vec![Value::Int64(5)], vec![Value::Int64(5)])]);
        }
        sink.finalize();
        let rows = sink.shared.output.all_rows();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int64(9)],
                vec![Value::Int64(5)],
                vec![Value::Int64(1)],
            ]
        );
    }

    #[test]
    fn test_ties_keep_run_order() {
        let sink = sink_for_keys(vec![true]);
        {
            let mut runs = sink.shared.runs.lock();
            runs.push(vec![
                (vec![Value::Int64(1)], vec![Value::string("first")]),
                (vec![Value::Int64(1)], vec![Value::string("second")]),
            ]);
        }
        sink.finalize();
        let rows = sink.shared.output.all_rows();
        assert_eq!(rows[0], vec![Value::string("first")]);
        assert_eq!(rows[1], vec![Value::string("second")]);
    }

    #[test]
    fn test_finalize_idempotent() {
        let sink = sink_for_keys(vec![true]);
        sink.shared
            .runs
            .lock()
            .push(vec![(vec![Value::Int64(1)], vec![Value::Int64(1)])]);
        sink.finalize();
        sink.finalize();
        assert_eq!(sink.shared.output.num_rows(), 1);
    }
}
