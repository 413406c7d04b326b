//! # Storage Manager
//!
//! In-memory columnar node and rel tables behind the narrow interface
//! the executor consumes: offset-range table scans into vectors, property
//! scans by node-id vector, adjacency scans by direction, a primary-key
//! hash index, and a transaction service writing WAL records.
//!
//! Deletes are tombstones; scans skip them. Rel storage keeps forward and
//! backward adjacency lists per source offset plus columnar rel
//! properties addressed by rel row.

pub mod index;
pub mod wal;

pub use index::PrimaryKeyIndex;
pub use wal::{Wal, WalRecord};

use crate::catalog::{NodeTableEntry, RelTableEntry};
use crate::error::{QuiverError, QuiverResult};
use crate::planner::StatisticsProvider;
use crate::types::{ExtendDirection, LogicalType, TableId};
use crate::value::{InternalId, Value};
use crate::vector::ValueVector;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One neighbor entry: (neighbor node offset, rel row)
pub type AdjacencyEntry = (u64, u64);

/// Columnar storage for one node table
#[derive(Debug)]
pub struct NodeTable {
    pub id: TableId,
    pub types: Vec<LogicalType>,
    pub pk_column: usize,
    columns: Vec<Vec<Value>>,
    deleted: Vec<bool>,
    pub index: PrimaryKeyIndex,
}

impl NodeTable {
    pub fn new(entry: &NodeTableEntry) -> Self {
        NodeTable {
            id: entry.id,
            types: entry.properties.iter().map(|p| p.ty.clone()).collect(),
            pk_column: entry.primary_key_idx(),
            columns: entry.properties.iter().map(|_| Vec::new()).collect(),
            deleted: Vec::new(),
            index: PrimaryKeyIndex::new(),
        }
    }

    /// Total offsets, deleted ones included: the scan cursor's bound
    pub fn num_offsets(&self) -> u64 {
        self.deleted.len() as u64
    }

    pub fn num_live_rows(&self) -> u64 {
        self.deleted.iter().filter(|d| !**d).count() as u64
    }

    pub fn is_deleted(&self, offset: u64) -> bool {
        self.deleted
            .get(offset as usize)
            .copied()
            .unwrap_or(true)
    }

    /// Append one row; the primary key must be fresh
    pub fn insert(&mut self, row: Vec<Value>) -> QuiverResult<u64> {
        if row.len() != self.columns.len() {
            return Err(QuiverError::internal(format!(
                "node row arity {} does not match table arity {}",
                row.len(),
                self.columns.len()
            )));
        }
        let offset = self.deleted.len() as u64;
        self.index.append(row[self.pk_column].clone(), offset)?;
        for (col, value) in self.columns.iter_mut().zip(row) {
            col.push(value);
        }
        self.deleted.push(false);
        Ok(offset)
    }

    pub fn delete(&mut self, offset: u64) -> QuiverResult<()> {
        let idx = offset as usize;
        if idx >= self.deleted.len() || self.deleted[idx] {
            return Err(QuiverError::runtime(format!(
                "node offset {offset} does not exist"
            )));
        }
        self.index.remove(&self.columns[self.pk_column][idx]);
        self.deleted[idx] = true;
        Ok(())
    }

    pub fn set_value(&mut self, offset: u64, column: usize, value: Value) -> QuiverResult<()> {
        let idx = offset as usize;
        if idx >= self.deleted.len() || self.deleted[idx] {
            return Err(QuiverError::runtime(format!(
                "node offset {offset} does not exist"
            )));
        }
        if column == self.pk_column {
            return Err(QuiverError::runtime("cannot update a primary key"));
        }
        self.columns[column][idx] = value;
        Ok(())
    }

    pub fn value(&self, offset: u64, column: usize) -> &Value {
        &self.columns[column][offset as usize]
    }

    /// Fill `out[0..]` with internal ids for the live offsets in
    /// `[start, end)`; returns the number written.
    pub fn scan_ids(&self, start: u64, end: u64, out: &mut ValueVector) -> usize {
        let mut n = 0;
        for offset in start..end.min(self.num_offsets()) {
            if self.deleted[offset as usize] {
                continue;
            }
            out.set_value(n, Value::InternalId(InternalId::new(self.id, offset)));
            n += 1;
        }
        n
    }

    /// Property scan: one output value per id in `ids[0..n]`
    pub fn scan_property(
        &self,
        ids: &ValueVector,
        positions: &[usize],
        column: usize,
        out: &mut ValueVector,
    ) -> QuiverResult<()> {
        for &pos in positions {
            let value = match ids.value(pos).as_internal_id() {
                Some(id) => self.columns[column][id.offset as usize].clone(),
                None => Value::Null(self.types[column].clone()),
            };
            out.set_value(pos, value);
        }
        Ok(())
    }
}

/// Adjacency + property storage for one rel table
#[derive(Debug)]
pub struct RelTable {
    pub id: TableId,
    pub src_table: TableId,
    pub dst_table: TableId,
    pub types: Vec<LogicalType>,
    fwd: Vec<Vec<AdjacencyEntry>>,
    bwd: Vec<Vec<AdjacencyEntry>>,
    prop_columns: Vec<Vec<Value>>,
    num_rels: u64,
}

impl RelTable {
    pub fn new(entry: &RelTableEntry) -> Self {
        RelTable {
            id: entry.id,
            src_table: entry.src_table,
            dst_table: entry.dst_table,
            types: entry.properties.iter().map(|p| p.ty.clone()).collect(),
            fwd: Vec::new(),
            bwd: Vec::new(),
            prop_columns: entry.properties.iter().map(|_| Vec::new()).collect(),
            num_rels: 0,
        }
    }

    pub fn num_rels(&self) -> u64 {
        self.num_rels
    }

    /// Append one rel with its property row; returns the rel row id
    pub fn insert(&mut self, src: u64, dst: u64, props: Vec<Value>) -> QuiverResult<u64> {
        if props.len() != self.prop_columns.len() {
            return Err(QuiverError::internal(format!(
                "rel row arity {} does not match table arity {}",
                props.len(),
                self.prop_columns.len()
            )));
        }
        let row = self.num_rels;
        grow_to(&mut self.fwd, src as usize + 1);
        grow_to(&mut self.bwd, dst as usize + 1);
        self.fwd[src as usize].push((dst, row));
        self.bwd[dst as usize].push((src, row));
        for (col, v) in self.prop_columns.iter_mut().zip(props) {
            col.push(v);
        }
        self.num_rels += 1;
        Ok(row)
    }

    /// Neighbors of a node offset in the given direction
    pub fn adjacency(&self, offset: u64, direction: ExtendDirection) -> &[AdjacencyEntry] {
        let lists = match direction {
            ExtendDirection::Forward => &self.fwd,
            ExtendDirection::Backward => &self.bwd,
        };
        lists
            .get(offset as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Table the neighbor ids belong to when traversing `direction`
    pub fn nbr_table(&self, direction: ExtendDirection) -> TableId {
        match direction {
            ExtendDirection::Forward => self.dst_table,
            ExtendDirection::Backward => self.src_table,
        }
    }

    pub fn prop_value(&self, rel_row: u64, column: usize) -> &Value {
        &self.prop_columns[column][rel_row as usize]
    }
}

fn grow_to(lists: &mut Vec<Vec<AdjacencyEntry>>, len: usize) {
    if lists.len() < len {
        lists.resize_with(len, Vec::new);
    }
}

/// A transaction handle from the storage's transaction service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub id: u64,
}

/// The storage manager: all tables of one database plus WAL and the
/// transaction counter
pub struct StorageManager {
    node_tables: RwLock<HashMap<TableId, Arc<RwLock<NodeTable>>>>,
    rel_tables: RwLock<HashMap<TableId, Arc<RwLock<RelTable>>>>,
    wal: Mutex<Wal>,
    next_tx: AtomicU64,
}

impl StorageManager {
    pub fn new(data_dir: PathBuf, wal_immediate_sync: bool) -> QuiverResult<Self> {
        Ok(StorageManager {
            node_tables: RwLock::new(HashMap::new()),
            rel_tables: RwLock::new(HashMap::new()),
            wal: Mutex::new(Wal::new(data_dir.join("wal"), wal_immediate_sync)?),
            next_tx: AtomicU64::new(1),
        })
    }

    pub fn create_node_table(&self, entry: &NodeTableEntry) {
        self.node_tables
            .write()
            .insert(entry.id, Arc::new(RwLock::new(NodeTable::new(entry))));
    }

    pub fn create_rel_table(&self, entry: &RelTableEntry) {
        self.rel_tables
            .write()
            .insert(entry.id, Arc::new(RwLock::new(RelTable::new(entry))));
    }

    pub fn drop_table(&self, id: TableId) {
        self.node_tables.write().remove(&id);
        self.rel_tables.write().remove(&id);
    }

    pub fn node_table(&self, id: TableId) -> QuiverResult<Arc<RwLock<NodeTable>>> {
        self.node_tables
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| QuiverError::internal(format!("node table {id} has no storage")))
    }

    pub fn rel_table(&self, id: TableId) -> QuiverResult<Arc<RwLock<RelTable>>> {
        self.rel_tables
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| QuiverError::internal(format!("rel table {id} has no storage")))
    }

    /// Begin a transaction, logging it
    pub fn begin_transaction(&self) -> QuiverResult<Transaction> {
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        self.wal.lock().append(&WalRecord::BeginTransaction { id })?;
        Ok(Transaction { id })
    }

    pub fn commit(&self, tx: Transaction) -> QuiverResult<()> {
        self.wal.lock().append(&WalRecord::Commit { id: tx.id })
    }

    pub fn rollback(&self, tx: Transaction) -> QuiverResult<()> {
        self.wal.lock().append(&WalRecord::Rollback { id: tx.id })
    }

    pub fn log(&self, record: &WalRecord) -> QuiverResult<()> {
        self.wal.lock().append(record)
    }

    pub fn checkpoint(&self) -> QuiverResult<()> {
        let mut wal = self.wal.lock();
        wal.append(&WalRecord::Checkpoint)?;
        wal.clear()
    }
}

impl StatisticsProvider for StorageManager {
    fn node_count(&self, table: TableId) -> u64 {
        self.node_tables
            .read()
            .get(&table)
            .map(|t| t.read().num_live_rows())
            .unwrap_or(0)
    }

    fn rel_count(&self, table: TableId) -> u64 {
        self.rel_tables
            .read()
            .get(&table)
            .map(|t| t.read().num_rels())
            .unwrap_or(0)
    }

    fn avg_degree(&self, rel_table: TableId, direction: ExtendDirection) -> f64 {
        let Some(rel) = self.rel_tables.read().get(&rel_table).cloned() else {
            return 1.0;
        };
        let rel = rel.read();
        let side = match direction {
            ExtendDirection::Forward => rel.src_table,
            ExtendDirection::Backward => rel.dst_table,
        };
        let nodes = self.node_count(side).max(1);
        rel.num_rels() as f64 / nodes as f64
    }
}
