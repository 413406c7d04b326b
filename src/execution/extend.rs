//! Adjacency operators: extend and recursive extend
//!
//! Extend consumes a flat bound-node vector and emits neighbor ids (plus
//! rel ids and rel properties) as a fresh unflat chunk. Recursive extend
//! runs a BFS per source tuple with a visited set and a configured upper
//! bound, polling the cancel flag at every frontier level.

use super::context::ExecutionContext;
use super::PhysicalOperator;
use crate::ast::RecursiveKind;
use crate::error::{QuiverError, QuiverResult};
use crate::storage::AdjacencyEntry;
use crate::types::{ExtendDirection, TableId};
use crate::value::{InternalId, Value};
use crate::vector::{DataPos, ResultSet, DEFAULT_VECTOR_CAPACITY};
use std::collections::HashSet;

/// One-hop extend over a rel table
#[derive(Clone)]
pub struct Extend {
    pub rel_table: TableId,
    pub direction: ExtendDirection,
    pub bound: DataPos,
    pub out_nbr: DataPos,
    pub out_chunk: usize,
    /// Rel-variable internal id output
    pub rel_out: Option<DataPos>,
    /// (rel property column, output vector)
    pub properties: Vec<(usize, DataPos)>,
    /// (neighbor node property column, output vector)
    pub node_properties: Vec<(usize, DataPos)>,
    pub child: Box<PhysicalOperator>,
    buffer: Vec<AdjacencyEntry>,
    cursor: usize,
}

impl Extend {
    pub fn new(
        rel_table: TableId,
        direction: ExtendDirection,
        bound: DataPos,
        out_nbr: DataPos,
        out_chunk: usize,
        rel_out: Option<DataPos>,
        properties: Vec<(usize, DataPos)>,
        node_properties: Vec<(usize, DataPos)>,
        child: Box<PhysicalOperator>,
    ) -> Self {
        Extend {
            rel_table,
            direction,
            bound,
            out_nbr,
            out_chunk,
            rel_out,
            properties,
            node_properties,
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
                let rel = ctx.storage.rel_table(self.rel_table)?;
                let rel = rel.read();
                let nbr_table = rel.nbr_table(self.direction);
                let nbr_storage = if self.node_properties.is_empty() {
                    None
                } else {
                    Some(ctx.storage.node_table(nbr_table)?)
                };
                let nbr_storage = nbr_storage.as_ref().map(|t| t.read());
                let n = (self.buffer.len() - self.cursor).min(DEFAULT_VECTOR_CAPACITY);
                for row in 0..n {
                    let (nbr_offset, rel_row) = self.buffer[self.cursor + row];
                    rs.vector_mut(self.out_nbr).set_value(
                        row,
                        Value::InternalId(InternalId::new(nbr_table, nbr_offset)),
                    );
                    if let Some(rel_out) = self.rel_out {
                        rs.vector_mut(rel_out).set_value(
                            row,
                            Value::InternalId(InternalId::new(self.rel_table, rel_row)),
                        );
                    }
                    for &(column, pos) in &self.properties {
                        let value = rel.prop_value(rel_row, column).clone();
                        rs.vector_mut(pos).set_value(row, value);
                    }
                    if let Some(nodes) = nbr_storage.as_ref() {
                        for &(column, pos) in &self.node_properties {
                            let value = nodes.value(nbr_offset, column).clone();
                            rs.vector_mut(pos).set_value(row, value);
                        }
                    }
                }
                self.cursor += n;
                rs.state_mut(self.out_chunk).init_identity(n);
                return Ok(true);
            }

            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let state = rs.state(self.bound.chunk);
            if !state.is_flat() {
                return Err(QuiverError::internal(
                    "extend requires its bound node group flat",
                ));
            }
            let pos = state.current_pos();
            let Some(id) = rs.value(self.bound, pos).as_internal_id() else {
                continue;
            };
            let rel = ctx.storage.rel_table(self.rel_table)?;
            let rel = rel.read();
            self.buffer = rel.adjacency(id.offset, self.direction).to_vec();
            self.cursor = 0;
        }
    }
}

/// Variable-length / shortest-path extend
///
/// States: pull a source tuple, run the BFS (`LEVEL_K` until the frontier
/// empties or the upper bound is reached), then emit the collected
/// destinations in vector-sized batches.
#[derive(Clone)]
pub struct RecursiveExtend {
    pub rel_table: TableId,
    pub direction: ExtendDirection,
    pub bound: DataPos,
    pub out_nbr: DataPos,
    pub out_chunk: usize,
    pub kind: RecursiveKind,
    pub lower: u64,
    pub upper: u64,
    /// (neighbor node property column, output vector)
    pub node_properties: Vec<(usize, DataPos)>,
    pub child: Box<PhysicalOperator>,
    buffer: Vec<u64>,
    cursor: usize,
}

impl RecursiveExtend {
    pub fn new(
        rel_table: TableId,
        direction: ExtendDirection,
        bound: DataPos,
        out_nbr: DataPos,
        out_chunk: usize,
        kind: RecursiveKind,
        lower: u64,
        upper: u64,
        node_properties: Vec<(usize, DataPos)>,
        child: Box<PhysicalOperator>,
    ) -> Self {
        RecursiveExtend {
            rel_table,
            direction,
            bound,
            out_nbr,
            out_chunk,
            kind,
            lower,
            upper,
            node_properties,
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
                let rel = ctx.storage.rel_table(self.rel_table)?;
                let nbr_table = rel.read().nbr_table(self.direction);
                let nbr_storage = if self.node_properties.is_empty() {
                    None
                } else {
                    Some(ctx.storage.node_table(nbr_table)?)
                };
                let nbr_storage = nbr_storage.as_ref().map(|t| t.read());
                let n = (self.buffer.len() - self.cursor).min(DEFAULT_VECTOR_CAPACITY);
                for row in 0..n {
                    let offset = self.buffer[self.cursor + row];
                    rs.vector_mut(self.out_nbr).set_value(
                        row,
                        Value::InternalId(InternalId::new(nbr_table, offset)),
                    );
                    if let Some(nodes) = nbr_storage.as_ref() {
                        for &(column, pos) in &self.node_properties {
                            let value = nodes.value(offset, column).clone();
                            rs.vector_mut(pos).set_value(row, value);
                        }
                    }
                }
                self.cursor += n;
                rs.state_mut(self.out_chunk).init_identity(n);
                return Ok(true);
            }

            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let state = rs.state(self.bound.chunk);
            if !state.is_flat() {
                return Err(QuiverError::internal(
                    "recursive extend requires its bound node group flat",
                ));
            }
            let pos = state.current_pos();
            let Some(id) = rs.value(self.bound, pos).as_internal_id() else {
                continue;
            };
            self.buffer = self.traverse(id.offset, ctx)?;
            self.cursor = 0;
        }
    }

    /// BFS from one source; distinct destinations whose path length falls
    /// within `[lower, upper]`
    fn traverse(&self, source: u64, ctx: &ExecutionContext) -> QuiverResult<Vec<u64>> {
        let upper = self.upper.min(ctx.max_recursive_depth);
        let rel = ctx.storage.rel_table(self.rel_table)?;
        let rel = rel.read();
        let mut reached: Vec<u64> = Vec::new();
        let mut collected: HashSet<u64> = HashSet::new();

        match self.kind {
            RecursiveKind::Shortest | RecursiveKind::AllShortest => {
                // First-reach levels only.
                let mut visited: HashSet<u64> = HashSet::from([source]);
                let mut frontier: Vec<u64> = vec![source];
                for level in 1..=upper {
                    ctx.check_interrupted()?;
                    let mut next: Vec<u64> = Vec::new();
                    for &node in &frontier {
                        for &(nbr, _) in rel.adjacency(node, self.direction) {
                            if visited.insert(nbr) {
                                next.push(nbr);
                                if level >= self.lower && collected.insert(nbr) {
                                    reached.push(nbr);
                                }
                            }
                        }
                    }
                    if next.is_empty() {
                        break;
                    }
                    frontier = next;
                }
            }
            RecursiveKind::VariableLength => {
                // Any walk length in range reaches the destination; track
                // the reachable set per level.
                let mut frontier: HashSet<u64> = HashSet::from([source]);
                for level in 1..=upper {
                    ctx.check_interrupted()?;
                    let mut next: HashSet<u64> = HashSet::new();
                    for &node in &frontier {
                        for &(nbr, _) in rel.adjacency(node, self.direction) {
                            next.insert(nbr);
                        }
                    }
                    if level >= self.lower {
                        for &node in &next {
                            if collected.insert(node) {
                                reached.push(node);
                            }
                        }
                    }
                    if next.is_empty() {
                        break;
                    }
                    frontier = next;
                }
            }
        }
        reached.sort_unstable();
        Ok(reached)
    }
}
