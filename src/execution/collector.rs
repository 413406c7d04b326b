//! Result collector
//!
//! The plainest sink: reads logical rows out of the stream (honoring
//! multiplicity) into a worker-local buffer and merges buffers into the
//! shared factorized table. Serves both as the accumulate boundary and
//! as the final sink whose table becomes the query result.

use super::context::ExecutionContext;
use super::factorized_table::FactorizedTable;
use super::{batch_rows, PhysicalOperator};
use crate::error::QuiverResult;
use crate::value::Value;
use crate::vector::{DataPos, ResultSet, ResultSetDescriptor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct ResultCollector {
    pub payloads: Vec<DataPos>,
    pub descriptor: ResultSetDescriptor,
    pub table: Arc<FactorizedTable>,
    /// Left-outer accumulate: an empty input still yields one null tuple
    pub optional: bool,
    pub child: Box<PhysicalOperator>,
    finalized: Arc<AtomicBool>,
    local: Vec<Vec<Value>>,
}

impl ResultCollector {
    pub fn new(
        payloads: Vec<DataPos>,
        descriptor: ResultSetDescriptor,
        table: Arc<FactorizedTable>,
        optional: bool,
        child: Box<PhysicalOperator>,
    ) -> Self {
        ResultCollector {
            payloads,
            descriptor,
            table,
            optional,
            child,
            finalized: Arc::new(AtomicBool::new(false)),
            local: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.local.clear();
    }

    pub fn execute(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        while self.child.next(rs, ctx)? {
            let rows = batch_rows(rs, &self.payloads)?;
            let multiplicity = rs.multiplicity.max(1);
            for row in rows {
                for _ in 0..multiplicity {
                    self.local.push(row.clone());
                }
            }
        }
        self.table.append(std::mem::take(&mut self.local));
        Ok(())
    }

    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.optional && self.table.is_empty() {
            let nulls = self
                .table
                .types()
                .iter()
                .map(|t| Value::Null(t.clone()))
                .collect();
            self.table.push_row(nulls);
        }
    }
}
