//! Source operators
//!
//! Sources populate chunks from shared, mutex-guarded cursors: node
//! table scans over offset ranges, factorized-table scans over
//! materialized rows, the one-tuple dummy scan, and table-function
//! calls. Morsel boundaries are the only suspension points, so every
//! source polls the cancel flag before claiming work.

use super::context::ExecutionContext;
use super::factorized_table::FactorizedTable;
use super::PhysicalOperator;
use crate::error::QuiverResult;
use crate::function::TableFnInput;
use crate::types::TableId;
use crate::value::{InternalId, Value};
use crate::vector::{DataPos, ResultSet, DEFAULT_VECTOR_CAPACITY};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Semi-join filter over a node table's offsets, fed by a SIP masker
#[derive(Debug, Default)]
pub struct SemiMask {
    enabled: AtomicBool,
    bits: RwLock<Vec<bool>>,
}

impl SemiMask {
    pub fn new() -> Arc<Self> {
        Arc::new(SemiMask::default())
    }

    /// Size the mask and start filtering
    pub fn enable(&self, num_offsets: u64) {
        *self.bits.write() = vec![false; num_offsets as usize];
        self.enabled.store(true, Ordering::Release);
    }

    pub fn mark(&self, offset: u64) {
        let mut bits = self.bits.write();
        if (offset as usize) < bits.len() {
            bits[offset as usize] = true;
        }
    }

    /// Everything passes until the mask is enabled
    pub fn allows(&self, offset: u64) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return true;
        }
        self.bits
            .read()
            .get(offset as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Shared morsel cursor over a node table
#[derive(Debug)]
pub struct ScanSharedState {
    /// (next offset, total offsets); total bound lazily from storage
    cursor: Mutex<Option<(u64, u64)>>,
    morsel_size: u64,
}

impl ScanSharedState {
    pub fn new(morsel_size: u64) -> Arc<Self> {
        Arc::new(ScanSharedState {
            cursor: Mutex::new(None),
            morsel_size,
        })
    }

    fn next_morsel(&self, total: u64) -> Option<(u64, u64)> {
        let mut cursor = self.cursor.lock();
        let (next, bound) = cursor.get_or_insert((0, total));
        if *next >= *bound {
            return None;
        }
        let start = *next;
        let end = (start + self.morsel_size).min(*bound);
        *next = end;
        Some((start, end))
    }
}

/// Morsel-parallel scan over one node table
#[derive(Clone)]
pub struct ScanNodeTable {
    pub table: TableId,
    pub out_chunk: usize,
    pub out_id: DataPos,
    /// (storage column, output vector)
    pub properties: Vec<(usize, DataPos)>,
    pub shared: Arc<ScanSharedState>,
    pub mask: Option<Arc<SemiMask>>,
}

impl ScanNodeTable {
    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        loop {
            ctx.check_interrupted()?;
            let table = ctx.storage.node_table(self.table)?;
            let table = table.read();
            let Some((start, end)) = self.shared.next_morsel(table.num_offsets()) else {
                return Ok(false);
            };

            let mut offsets: Vec<u64> = Vec::with_capacity((end - start) as usize);
            for offset in start..end {
                if table.is_deleted(offset) {
                    continue;
                }
                if let Some(mask) = &self.mask {
                    if !mask.allows(offset) {
                        continue;
                    }
                }
                offsets.push(offset);
            }
            if offsets.is_empty() {
                continue;
            }

            for (row, &offset) in offsets.iter().enumerate() {
                rs.vector_mut(self.out_id)
                    .set_value(row, Value::InternalId(InternalId::new(self.table, offset)));
                for &(column, pos) in &self.properties {
                    let value = table.value(offset, column).clone();
                    rs.vector_mut(pos).set_value(row, value);
                }
            }
            rs.state_mut(self.out_chunk).init_identity(offsets.len());
            return Ok(true);
        }
    }
}

/// Paired scan over a materialized factorized table
#[derive(Clone)]
pub struct FTableScan {
    pub table: Arc<FactorizedTable>,
    pub out_chunk: usize,
    /// Output slot per table column; `None` drops the column
    pub columns: Vec<Option<DataPos>>,
    /// Row order is a guarantee (order-by output); forces one worker
    pub ordered: bool,
    /// Upstream sinks that must have filled the table (result collector,
    /// aggregate, order-by, one per union branch)
    pub dependencies: Vec<PhysicalOperator>,
}

impl FTableScan {
    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        ctx.check_interrupted()?;
        let Some((start, end)) = self.table.next_morsel(DEFAULT_VECTOR_CAPACITY as u64) else {
            return Ok(false);
        };
        let rows = self.table.rows_in(start, end);
        for (row_idx, row) in rows.iter().enumerate() {
            for (col, slot) in self.columns.iter().enumerate() {
                if let Some(pos) = slot {
                    rs.vector_mut(*pos).set_value(row_idx, row[col].clone());
                }
            }
        }
        rs.state_mut(self.out_chunk).init_identity(rows.len());
        Ok(true)
    }
}

/// Emits a single empty tuple, once per query
#[derive(Clone)]
pub struct DummyScan {
    pub out_chunk: usize,
    pub fired: Arc<AtomicBool>,
}

impl DummyScan {
    pub fn new(out_chunk: usize) -> Self {
        DummyScan {
            out_chunk,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        ctx.check_interrupted()?;
        if self.fired.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let state = rs.state_mut(self.out_chunk);
        state.init_identity(1);
        state.set_to_flat(0);
        Ok(true)
    }
}

/// Emits nothing; plans proven empty
#[derive(Clone)]
pub struct EmptyResult;

impl EmptyResult {
    pub fn next(&mut self, _rs: &mut ResultSet, _ctx: &ExecutionContext) -> QuiverResult<bool> {
        Ok(false)
    }
}

/// `CALL fn(...)` source; rows computed once, then scanned in morsels
#[derive(Clone)]
pub struct TableFunctionCall {
    pub function: String,
    pub args: Vec<Value>,
    pub out_chunk: usize,
    pub outputs: Vec<DataPos>,
    pub shared: Arc<TableFnShared>,
}

#[derive(Debug, Default)]
pub struct TableFnShared {
    rows: Mutex<Option<Arc<Vec<Vec<Value>>>>>,
    cursor: Mutex<u64>,
}

impl TableFunctionCall {
    fn rows(&self, ctx: &ExecutionContext) -> QuiverResult<Arc<Vec<Vec<Value>>>> {
        let mut slot = self.shared.rows.lock();
        if let Some(rows) = slot.as_ref() {
            return Ok(Arc::clone(rows));
        }
        let function = ctx.functions.table_function(&self.function)?;
        let catalog = ctx.catalog.read();
        let input = TableFnInput {
            args: self.args.clone(),
            catalog: &catalog,
            settings: ctx.settings.clone(),
        };
        let rows = Arc::new((function.exec)(&input)?);
        *slot = Some(Arc::clone(&rows));
        Ok(rows)
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        ctx.check_interrupted()?;
        let rows = self.rows(ctx)?;
        let (start, end) = {
            let mut cursor = self.shared.cursor.lock();
            let start = *cursor;
            if start >= rows.len() as u64 {
                return Ok(false);
            }
            let end = (start + DEFAULT_VECTOR_CAPACITY as u64).min(rows.len() as u64);
            *cursor = end;
            (start, end)
        };
        for (row_idx, row) in rows[start as usize..end as usize].iter().enumerate() {
            for (col, pos) in self.outputs.iter().enumerate() {
                rs.vector_mut(*pos).set_value(row_idx, row[col].clone());
            }
        }
        rs.state_mut(self.out_chunk)
            .init_identity((end - start) as usize);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semi_mask_defaults_open() {
        let mask = SemiMask::new();
        assert!(mask.allows(5));
        mask.enable(10);
        assert!(!mask.allows(5));
        mask.mark(5);
        assert!(mask.allows(5));
        assert!(!mask.allows(11));
    }

    #[test]
    fn test_scan_shared_state_morsels() {
        let shared = ScanSharedState::new(4);
        assert_eq!(shared.next_morsel(10), Some((0, 4)));
        assert_eq!(shared.next_morsel(10), Some((4, 8)));
        assert_eq!(shared.next_morsel(10), Some((8, 10)));
        assert_eq!(shared.next_morsel(10), None);
    }
}
