//! Hash aggregation
//!
//! The sink hashes flat group keys into per-worker partial tables,
//! merges them into the shared table as each worker finishes, and
//! materializes `(keys..., results...)` rows at finalize for the paired
//! factorized-table scan. Distinct aggregates dedupe through a seen-set;
//! the mapper runs such pipelines single-threaded so the set needs no
//! cross-worker merge.

use super::context::ExecutionContext;
use super::factorized_table::FactorizedTable;
use super::PhysicalOperator;
use crate::error::{QuiverError, QuiverResult};
use crate::function::aggregate::{AggregateKind, AggregateState};
use crate::function::AggregateDescriptor;
use crate::types::LogicalType;
use crate::value::Value;
use crate::vector::{DataPos, ResultSet, ResultSetDescriptor};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One aggregate column of the sink
#[derive(Clone)]
pub struct AggSpec {
    pub kind: AggregateKind,
    pub distinct: bool,
    /// Input slot; `None` for `count(*)`
    pub input: Option<DataPos>,
    pub out_ty: LogicalType,
}

/// Shared aggregation state across workers
pub struct AggregateSharedState {
    groups: Mutex<HashMap<Vec<Value>, Vec<AggregateState>>>,
    distinct_seen: Mutex<HashMap<(Vec<Value>, usize), HashSet<Value>>>,
    pub output: Arc<FactorizedTable>,
    finalized: AtomicBool,
}

impl AggregateSharedState {
    pub fn new(output: Arc<FactorizedTable>) -> Arc<Self> {
        Arc::new(AggregateSharedState {
            groups: Mutex::new(HashMap::new()),
            distinct_seen: Mutex::new(HashMap::new()),
            output,
            finalized: AtomicBool::new(false),
        })
    }
}

/// Hash-grouped aggregation sink; `Distinct` lowers to this with no
/// aggregate columns
#[derive(Clone)]
pub struct AggregateSink {
    /// Flat group-key slots
    pub keys: Vec<DataPos>,
    pub aggs: Vec<AggSpec>,
    /// Chunks whose effective sizes multiply into tuple counts
    pub scope_chunks: Vec<usize>,
    pub descriptor: ResultSetDescriptor,
    pub shared: Arc<AggregateSharedState>,
    pub child: Box<PhysicalOperator>,
    local: HashMap<Vec<Value>, Vec<AggregateState>>,
}

impl AggregateSink {
    pub fn new(
        keys: Vec<DataPos>,
        aggs: Vec<AggSpec>,
        scope_chunks: Vec<usize>,
        descriptor: ResultSetDescriptor,
        shared: Arc<AggregateSharedState>,
        child: Box<PhysicalOperator>,
    ) -> Self {
        AggregateSink {
            keys,
            aggs,
            scope_chunks,
            descriptor,
            shared,
            child,
            local: HashMap::new(),
        }
    }

    pub fn has_distinct(&self) -> bool {
        self.aggs.iter().any(|a| a.distinct)
    }

    pub fn reset(&mut self) {
        self.local.clear();
    }

    fn descriptors(&self) -> Vec<AggregateDescriptor> {
        self.aggs
            .iter()
            .map(|a| AggregateDescriptor {
                name: format!("{:?}", a.kind),
                kind: a.kind,
            })
            .collect()
    }

    fn read_flat_key(&self, rs: &ResultSet) -> QuiverResult<Vec<Value>> {
        let mut key = Vec::with_capacity(self.keys.len());
        for pos in &self.keys {
            let state = rs.state(pos.chunk);
            if !state.is_flat() {
                return Err(QuiverError::internal("aggregate keys must be flat"));
            }
            key.push(rs.value(*pos, state.current_pos()).clone());
        }
        Ok(key)
    }

    pub fn execute(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        let descriptors = self.descriptors();
        while self.child.next(rs, ctx)? {
            let key = self.read_flat_key(rs)?;

            // Gather (value, weight) inputs per aggregate before touching
            // the hash entry.
            let mut inputs: Vec<Vec<(Option<Value>, u64)>> =
                Vec::with_capacity(self.aggs.len());
            for agg in &self.aggs {
                match agg.input {
                    None => {
                        let m = multiplicity_excluding(&self.scope_chunks, rs, None);
                        inputs.push(vec![(None, m)]);
                    }
                    Some(pos) => {
                        let state = rs.state(pos.chunk);
                        let m = multiplicity_excluding(&self.scope_chunks, rs, Some(pos.chunk));
                        if state.is_flat() {
                            inputs.push(vec![(
                                Some(rs.value(pos, state.current_pos()).clone()),
                                m,
                            )]);
                        } else {
                            inputs.push(
                                state
                                    .positions()
                                    .into_iter()
                                    .map(|p| (Some(rs.value(pos, p).clone()), m))
                                    .collect(),
                            );
                        }
                    }
                }
            }

            let entry = self.local.entry(key.clone()).or_insert_with(|| {
                descriptors.iter().map(AggregateDescriptor::init_state).collect()
            });
            for (idx, agg) in self.aggs.iter().enumerate() {
                for (value, weight) in &inputs[idx] {
                    if agg.distinct {
                        if let Some(v) = value {
                            if seen_before(&self.shared, &key, idx, v) {
                                continue;
                            }
                            entry[idx].update(agg.kind, Some(v), 1)?;
                        }
                    } else {
                        entry[idx].update(agg.kind, value.as_ref(), *weight)?;
                    }
                }
            }
        }

        // Merge this worker's partial table under the single-writer lock.
        let mut groups = self.shared.groups.lock();
        for (key, states) in self.local.drain() {
            match groups.get_mut(&key) {
                Some(existing) => {
                    for (idx, state) in states.iter().enumerate() {
                        existing[idx].combine(state, self.aggs[idx].kind)?;
                    }
                }
                None => {
                    groups.insert(key, states);
                }
            }
        }
        Ok(())
    }

    /// Materialize `(keys..., results...)` rows; a key-less aggregate
    /// over an empty input still produces its one row.
    pub fn finalize(&self) -> QuiverResult<()> {
        if self.shared.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let descriptors = self.descriptors();
        let groups = self.shared.groups.lock();
        if groups.is_empty() && self.keys.is_empty() && !self.aggs.is_empty() {
            let mut row = Vec::with_capacity(self.aggs.len());
            for (idx, agg) in self.aggs.iter().enumerate() {
                row.push(descriptors[idx].init_state().finalize(&agg.out_ty)?);
            }
            self.shared.output.push_row(row);
            return Ok(());
        }
        for (key, states) in groups.iter() {
            let mut row = Vec::with_capacity(key.len() + states.len());
            row.extend(key.iter().cloned());
            for (idx, state) in states.iter().enumerate() {
                row.push(state.finalize(&self.aggs[idx].out_ty)?);
            }
            self.shared.output.push_row(row);
        }
        Ok(())
    }
}

/// Tuple weight: multiplicity times the effective sizes of the scope
/// chunks, excluding the aggregate's own input chunk
fn multiplicity_excluding(scope_chunks: &[usize], rs: &ResultSet, exclude: Option<usize>) -> u64 {
    let mut m = rs.multiplicity.max(1);
    for &chunk in scope_chunks {
        if Some(chunk) == exclude {
            continue;
        }
        m *= rs.state(chunk).effective_size() as u64;
    }
    m
}

fn seen_before(
    shared: &AggregateSharedState,
    key: &[Value],
    agg_idx: usize,
    value: &Value,
) -> bool {
    if value.is_null() {
        return true;
    }
    let mut seen = shared.distinct_seen.lock();
    !seen
        .entry((key.to_vec(), agg_idx))
        .or_default()
        .insert(value.clone())
}
