//! # Physical Operators
//!
//! The vectorized execution engine: a tagged sum of operator structs
//! with a dispatch table in place of a virtual hierarchy. Operators are
//! sources (emit without a child), pipeline operators (transform the
//! result set in place) or sinks (consume the stream into a materialized
//! table). Sinks are the only pipeline breakers: the scheduler turns
//! each sink subtree into a task and runs tasks bottom-up.
//!
//! Every operator is `Clone`: workers clone their pipeline, sharing the
//! `Arc`ed shared states and owning their local state.

pub mod aggregate;
pub mod collector;
pub mod context;
pub mod copy;
pub mod ddl;
pub mod extend;
pub mod factorized_table;
pub mod filter;
pub mod hash_join;
pub mod order_by;
pub mod scan;

pub use context::{ExecutionContext, InterruptHandle};
pub use factorized_table::FactorizedTable;

use crate::error::{QuiverError, QuiverResult};
use crate::types::LogicalType;
use crate::value::Value;
use crate::vector::{read_row, DataPos, ResultSet, ResultSetDescriptor};
use std::sync::Arc;

/// The physical operator sum
#[derive(Clone)]
pub enum PhysicalOperator {
    // Sources
    ScanNodeTable(scan::ScanNodeTable),
    FTableScan(scan::FTableScan),
    DummyScan(scan::DummyScan),
    EmptyResult(scan::EmptyResult),
    TableFunctionCall(scan::TableFunctionCall),
    CopyFileScan(copy::CopyFileScan),
    // Pipeline operators
    Filter(filter::Filter),
    Flatten(filter::Flatten),
    Projection(filter::Projection),
    MultiplicityReducer(filter::MultiplicityReducer),
    Limit(filter::Limit),
    Unwind(filter::Unwind),
    Extend(extend::Extend),
    RecursiveExtend(extend::RecursiveExtend),
    HashJoinProbe(hash_join::HashJoinProbe),
    SemiMasker(hash_join::SemiMasker),
    CrossProduct(hash_join::CrossProduct),
    CreateNode(ddl::CreateNode),
    DeleteNode(ddl::DeleteNode),
    SetProperty(ddl::SetProperty),
    // Sinks
    ResultCollector(collector::ResultCollector),
    HashJoinBuild(hash_join::HashJoinBuild),
    AggregateSink(aggregate::AggregateSink),
    OrderBySink(order_by::OrderBySink),
    CopyNodeSink(copy::CopyNodeSink),
    CopyRelSink(copy::CopyRelSink),
    CopyToSink(copy::CopyToSink),
    DdlSink(ddl::DdlSink),
    DatabaseOpSink(ddl::DatabaseOpSink),
    StandingCallSink(ddl::StandingCallSink),
}

impl PhysicalOperator {
    pub fn is_sink(&self) -> bool {
        matches!(
            self,
            PhysicalOperator::ResultCollector(_)
                | PhysicalOperator::HashJoinBuild(_)
                | PhysicalOperator::AggregateSink(_)
                | PhysicalOperator::OrderBySink(_)
                | PhysicalOperator::CopyNodeSink(_)
                | PhysicalOperator::CopyRelSink(_)
                | PhysicalOperator::CopyToSink(_)
                | PhysicalOperator::DdlSink(_)
                | PhysicalOperator::DatabaseOpSink(_)
                | PhysicalOperator::StandingCallSink(_)
        )
    }

    pub fn is_source(&self) -> bool {
        matches!(
            self,
            PhysicalOperator::ScanNodeTable(_)
                | PhysicalOperator::FTableScan(_)
                | PhysicalOperator::DummyScan(_)
                | PhysicalOperator::EmptyResult(_)
                | PhysicalOperator::TableFunctionCall(_)
                | PhysicalOperator::CopyFileScan(_)
        )
    }

    /// All children, sink children included
    pub fn children(&self) -> Vec<&PhysicalOperator> {
        match self {
            PhysicalOperator::ScanNodeTable(_)
            | PhysicalOperator::DummyScan(_)
            | PhysicalOperator::EmptyResult(_)
            | PhysicalOperator::TableFunctionCall(_)
            | PhysicalOperator::CopyFileScan(_)
            | PhysicalOperator::DdlSink(_)
            | PhysicalOperator::DatabaseOpSink(_)
            | PhysicalOperator::StandingCallSink(_) => Vec::new(),
            PhysicalOperator::FTableScan(op) => op.dependencies.iter().collect(),
            PhysicalOperator::Filter(op) => vec![op.child.as_ref()],
            PhysicalOperator::Flatten(op) => vec![op.child.as_ref()],
            PhysicalOperator::Projection(op) => vec![op.child.as_ref()],
            PhysicalOperator::MultiplicityReducer(op) => vec![op.child.as_ref()],
            PhysicalOperator::Limit(op) => vec![op.child.as_ref()],
            PhysicalOperator::Unwind(op) => vec![op.child.as_ref()],
            PhysicalOperator::Extend(op) => vec![op.child.as_ref()],
            PhysicalOperator::RecursiveExtend(op) => vec![op.child.as_ref()],
            PhysicalOperator::HashJoinProbe(op) => vec![op.child.as_ref(), op.build.as_ref()],
            PhysicalOperator::SemiMasker(op) => vec![op.child.as_ref()],
            PhysicalOperator::CrossProduct(op) => vec![op.child.as_ref(), op.build_sink.as_ref()],
            PhysicalOperator::CreateNode(op) => vec![op.child.as_ref()],
            PhysicalOperator::DeleteNode(op) => vec![op.child.as_ref()],
            PhysicalOperator::SetProperty(op) => vec![op.child.as_ref()],
            PhysicalOperator::ResultCollector(op) => vec![op.child.as_ref()],
            PhysicalOperator::HashJoinBuild(op) => vec![op.child.as_ref()],
            PhysicalOperator::AggregateSink(op) => vec![op.child.as_ref()],
            PhysicalOperator::OrderBySink(op) => vec![op.child.as_ref()],
            PhysicalOperator::CopyNodeSink(op) => vec![op.child.as_ref()],
            PhysicalOperator::CopyRelSink(op) => vec![op.child.as_ref()],
            PhysicalOperator::CopyToSink(op) => vec![op.child.as_ref()],
        }
    }

    /// Per-worker initialization: resolve parameters, reset local state,
    /// size SIP masks. Recurses through the pipeline but not across sink
    /// boundaries (those ran in their own task).
    pub fn init(&mut self, ctx: &ExecutionContext) -> QuiverResult<()> {
        match self {
            PhysicalOperator::Filter(op) => {
                op.predicate.init(ctx)?;
                op.child.init(ctx)?;
            }
            PhysicalOperator::Flatten(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::Projection(op) => {
                for (evaluator, _) in &mut op.items {
                    evaluator.init(ctx)?;
                }
                op.child.init(ctx)?;
            }
            PhysicalOperator::MultiplicityReducer(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::Limit(op) => op.child.init(ctx)?,
            PhysicalOperator::Unwind(op) => {
                op.reset();
                op.list.init(ctx)?;
                op.child.init(ctx)?;
            }
            PhysicalOperator::Extend(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::RecursiveExtend(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::HashJoinProbe(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::SemiMasker(op) => {
                op.init(ctx)?;
                op.child.init(ctx)?;
            }
            PhysicalOperator::CrossProduct(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::CreateNode(op) => {
                for evaluator in &mut op.values {
                    evaluator.init(ctx)?;
                }
                op.child.init(ctx)?;
            }
            PhysicalOperator::DeleteNode(op) => op.child.init(ctx)?,
            PhysicalOperator::SetProperty(op) => {
                op.value.init(ctx)?;
                op.child.init(ctx)?;
            }
            PhysicalOperator::ResultCollector(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::HashJoinBuild(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::AggregateSink(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::OrderBySink(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::CopyNodeSink(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::CopyRelSink(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            PhysicalOperator::CopyToSink(op) => {
                op.reset();
                op.child.init(ctx)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Pull protocol for sources and pipeline operators
    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        match self {
            PhysicalOperator::ScanNodeTable(op) => op.next(rs, ctx),
            PhysicalOperator::FTableScan(op) => op.next(rs, ctx),
            PhysicalOperator::DummyScan(op) => op.next(rs, ctx),
            PhysicalOperator::EmptyResult(op) => op.next(rs, ctx),
            PhysicalOperator::TableFunctionCall(op) => op.next(rs, ctx),
            PhysicalOperator::CopyFileScan(op) => op.next(rs, ctx),
            PhysicalOperator::Filter(op) => op.next(rs, ctx),
            PhysicalOperator::Flatten(op) => op.next(rs, ctx),
            PhysicalOperator::Projection(op) => op.next(rs, ctx),
            PhysicalOperator::MultiplicityReducer(op) => op.next(rs, ctx),
            PhysicalOperator::Limit(op) => op.next(rs, ctx),
            PhysicalOperator::Unwind(op) => op.next(rs, ctx),
            PhysicalOperator::Extend(op) => op.next(rs, ctx),
            PhysicalOperator::RecursiveExtend(op) => op.next(rs, ctx),
            PhysicalOperator::HashJoinProbe(op) => op.next(rs, ctx),
            PhysicalOperator::SemiMasker(op) => op.next(rs, ctx),
            PhysicalOperator::CrossProduct(op) => op.next(rs, ctx),
            PhysicalOperator::CreateNode(op) => op.next(rs, ctx),
            PhysicalOperator::DeleteNode(op) => op.next(rs, ctx),
            PhysicalOperator::SetProperty(op) => op.next(rs, ctx),
            _ => Err(QuiverError::internal(
                "next() must not be called on a sink operator",
            )),
        }
    }

    /// Drive this sink's pipeline to completion for one worker
    pub fn sink_execute(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        match self {
            PhysicalOperator::ResultCollector(op) => op.execute(rs, ctx),
            PhysicalOperator::HashJoinBuild(op) => op.execute(rs, ctx),
            PhysicalOperator::AggregateSink(op) => op.execute(rs, ctx),
            PhysicalOperator::OrderBySink(op) => op.execute(rs, ctx),
            PhysicalOperator::CopyNodeSink(op) => op.execute(rs, ctx),
            PhysicalOperator::CopyRelSink(op) => op.execute(rs, ctx),
            PhysicalOperator::CopyToSink(op) => op.execute(rs, ctx),
            PhysicalOperator::DdlSink(op) => op.execute(ctx),
            PhysicalOperator::DatabaseOpSink(op) => op.execute(ctx),
            PhysicalOperator::StandingCallSink(op) => op.execute(ctx),
            _ => Err(QuiverError::internal(
                "sink_execute() called on a non-sink operator",
            )),
        }
    }

    /// Runs once per query after all workers of the sink's task exit
    pub fn sink_finalize(&mut self, ctx: &ExecutionContext) -> QuiverResult<()> {
        match self {
            PhysicalOperator::ResultCollector(op) => {
                op.finalize();
                Ok(())
            }
            PhysicalOperator::HashJoinBuild(op) => {
                op.finalize();
                Ok(())
            }
            PhysicalOperator::AggregateSink(op) => op.finalize(),
            PhysicalOperator::OrderBySink(op) => {
                op.finalize();
                Ok(())
            }
            PhysicalOperator::CopyNodeSink(op) => op.finalize(ctx),
            PhysicalOperator::CopyRelSink(op) => op.finalize(ctx),
            PhysicalOperator::CopyToSink(op) => op.finalize(ctx),
            _ => Ok(()),
        }
    }

    /// Layout for the per-worker result set of this sink's pipeline
    pub fn sink_descriptor(&self) -> ResultSetDescriptor {
        match self {
            PhysicalOperator::ResultCollector(op) => op.descriptor.clone(),
            PhysicalOperator::HashJoinBuild(op) => op.descriptor.clone(),
            PhysicalOperator::AggregateSink(op) => op.descriptor.clone(),
            PhysicalOperator::OrderBySink(op) => op.descriptor.clone(),
            PhysicalOperator::CopyNodeSink(op) => op.descriptor.clone(),
            PhysicalOperator::CopyRelSink(op) => op.descriptor.clone(),
            PhysicalOperator::CopyToSink(op) => op.descriptor.clone(),
            _ => ResultSetDescriptor::default(),
        }
    }

    /// The materialized table a statement surfaces as its result
    pub fn result_table(&self) -> Option<Arc<FactorizedTable>> {
        match self {
            PhysicalOperator::ResultCollector(op) => Some(Arc::clone(&op.table)),
            PhysicalOperator::CopyNodeSink(op) => Some(Arc::clone(&op.staging.result)),
            PhysicalOperator::CopyRelSink(op) => Some(Arc::clone(&op.staging.result)),
            PhysicalOperator::CopyToSink(op) => Some(Arc::clone(&op.staging.result)),
            PhysicalOperator::DdlSink(op) => Some(Arc::clone(&op.result)),
            PhysicalOperator::DatabaseOpSink(op) => Some(Arc::clone(&op.result)),
            PhysicalOperator::StandingCallSink(op) => Some(Arc::clone(&op.result)),
            _ => None,
        }
    }

    /// Worker-count ceiling for the pipeline rooted at this operator,
    /// not crossing sink boundaries
    pub fn max_parallelism(&self) -> usize {
        let own = match self {
            PhysicalOperator::DummyScan(_)
            | PhysicalOperator::TableFunctionCall(_)
            | PhysicalOperator::DdlSink(_)
            | PhysicalOperator::DatabaseOpSink(_)
            | PhysicalOperator::StandingCallSink(_)
            | PhysicalOperator::CreateNode(_)
            | PhysicalOperator::DeleteNode(_)
            | PhysicalOperator::SetProperty(_) => 1,
            PhysicalOperator::FTableScan(op) if op.ordered => 1,
            PhysicalOperator::CopyFileScan(op) if op.preserving_order => 1,
            PhysicalOperator::AggregateSink(op) if op.has_distinct() => 1,
            _ => usize::MAX,
        };
        self.children()
            .into_iter()
            .filter(|c| !c.is_sink())
            .map(PhysicalOperator::max_parallelism)
            .fold(own, usize::min)
    }

    /// Operator name for plan printouts and diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOperator::ScanNodeTable(_) => "SCAN_NODE_TABLE",
            PhysicalOperator::FTableScan(_) => "FTABLE_SCAN",
            PhysicalOperator::DummyScan(_) => "DUMMY_SCAN",
            PhysicalOperator::EmptyResult(_) => "EMPTY_RESULT",
            PhysicalOperator::TableFunctionCall(_) => "TABLE_FUNCTION_CALL",
            PhysicalOperator::CopyFileScan(_) => "COPY_FILE_SCAN",
            PhysicalOperator::Filter(_) => "FILTER",
            PhysicalOperator::Flatten(_) => "FLATTEN",
            PhysicalOperator::Projection(_) => "PROJECTION",
            PhysicalOperator::MultiplicityReducer(_) => "MULTIPLICITY_REDUCER",
            PhysicalOperator::Limit(_) => "LIMIT",
            PhysicalOperator::Unwind(_) => "UNWIND",
            PhysicalOperator::Extend(_) => "EXTEND",
            PhysicalOperator::RecursiveExtend(_) => "RECURSIVE_EXTEND",
            PhysicalOperator::HashJoinProbe(_) => "HASH_JOIN_PROBE",
            PhysicalOperator::SemiMasker(_) => "SEMI_MASKER",
            PhysicalOperator::CrossProduct(_) => "CROSS_PRODUCT",
            PhysicalOperator::CreateNode(_) => "CREATE_NODE",
            PhysicalOperator::DeleteNode(_) => "DELETE_NODE",
            PhysicalOperator::SetProperty(_) => "SET_PROPERTY",
            PhysicalOperator::ResultCollector(_) => "RESULT_COLLECTOR",
            PhysicalOperator::HashJoinBuild(_) => "HASH_JOIN_BUILD",
            PhysicalOperator::AggregateSink(_) => "AGGREGATE",
            PhysicalOperator::OrderBySink(_) => "ORDER_BY",
            PhysicalOperator::CopyNodeSink(_) => "COPY_NODE",
            PhysicalOperator::CopyRelSink(_) => "COPY_REL",
            PhysicalOperator::CopyToSink(_) => "COPY_TO",
            PhysicalOperator::DdlSink(_) => "DDL",
            PhysicalOperator::DatabaseOpSink(_) => "DATABASE_OP",
            PhysicalOperator::StandingCallSink(_) => "STANDING_CALL",
        }
    }
}

/// A mapped physical plan: a sink-rooted operator tree plus the table
/// its results land in
pub struct PhysicalPlan {
    pub root: PhysicalOperator,
    pub result_table: Arc<FactorizedTable>,
    pub result_columns: Vec<(String, LogicalType)>,
}

/// Read the logical rows of the current batch through the given slots.
///
/// At most one chunk among the slots may be unflat; each of its elements
/// produces one row, flat chunks contribute their pinned value.
pub(crate) fn batch_rows(rs: &ResultSet, positions: &[DataPos]) -> QuiverResult<Vec<Vec<Value>>> {
    if positions.is_empty() {
        return Ok(vec![Vec::new()]);
    }
    let mut unflat: Option<usize> = None;
    for pos in positions {
        if !rs.state(pos.chunk).is_flat() {
            match unflat {
                None => unflat = Some(pos.chunk),
                Some(c) if c == pos.chunk => {}
                Some(_) => {
                    return Err(QuiverError::internal(
                        "more than one unflat group feeds a row reader",
                    ))
                }
            }
        }
    }
    let count = unflat.map_or(1, |c| rs.state(c).selected_size());
    let mut rows = Vec::with_capacity(count);
    for row in 0..count {
        rows.push(read_row(rs, positions, row)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{DataChunk, ValueVector};

    fn two_chunk_rs() -> ResultSet {
        let mut rs = ResultSet::default();
        for _ in 0..2 {
            rs.chunks.push(DataChunk {
                state: Default::default(),
                vectors: vec![ValueVector::new(LogicalType::Int64)],
            });
        }
        rs.multiplicity = 1;
        rs
    }

    #[test]
    fn test_batch_rows_flat_times_unflat() {
        let mut rs = two_chunk_rs();
        rs.chunks[0].state.init_identity(1);
        rs.chunks[0].state.set_to_flat(0);
        rs.chunks[0].vectors[0].set_value(0, Value::Int64(7));
        rs.chunks[1].state.init_identity(3);
        for i in 0..3 {
            rs.chunks[1].vectors[0].set_value(i, Value::Int64(i as i64));
        }
        let rows = batch_rows(&rs, &[DataPos::new(0, 0), DataPos::new(1, 0)]).expect("rows");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec![Value::Int64(7), Value::Int64(1)]);
    }

    #[test]
    fn test_batch_rows_rejects_two_unflat() {
        let mut rs = two_chunk_rs();
        rs.chunks[0].state.init_identity(2);
        rs.chunks[1].state.init_identity(2);
        assert!(batch_rows(&rs, &[DataPos::new(0, 0), DataPos::new(1, 0)]).is_err());
    }

    #[test]
    fn test_empty_positions_single_row() {
        let rs = two_chunk_rs();
        let rows = batch_rows(&rs, &[]).expect("rows");
        assert_eq!(rows, vec![Vec::<Value>::new()]);
    }
}
