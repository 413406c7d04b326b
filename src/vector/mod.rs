//! # Vectorized Result Sets
//!
//! The unit of dataflow between physical operators. A `ResultSet` is an
//! ordered sequence of `DataChunk`s; a chunk owns one selection state
//! shared by all of its `ValueVector`s; a vector holds up to
//! [`DEFAULT_VECTOR_CAPACITY`] values of one logical type.
//!
//! A chunk is *flat* when its state pins a single selected position
//! (`curr_idx >= 0`) and *unflat* when all selected positions are live.
//! Factorized execution keeps several chunks side by side: the stream
//! cardinality is the product of the chunks' effective sizes times the
//! result set's `multiplicity`.

use crate::error::{QuiverError, QuiverResult};
use crate::types::LogicalType;
use crate::value::Value;

/// Tuples per vector; also the default morsel granularity
pub const DEFAULT_VECTOR_CAPACITY: usize = 2048;

/// Selection state shared by every vector of one chunk
#[derive(Debug, Clone)]
pub struct ChunkState {
    /// Selected physical positions, `size` of them live
    selected: Vec<u32>,
    size: usize,
    /// `-1` when unflat; otherwise an index into `selected` pinning the
    /// single live element
    curr_idx: i64,
}

impl ChunkState {
    pub fn new() -> Self {
        ChunkState {
            selected: Vec::new(),
            size: 0,
            curr_idx: -1,
        }
    }

    /// Select positions `0..n` in storage order
    pub fn init_identity(&mut self, n: usize) {
        self.selected.clear();
        self.selected.extend(0..n as u32);
        self.size = n;
        self.curr_idx = -1;
    }

    pub fn is_flat(&self) -> bool {
        self.curr_idx >= 0
    }

    /// Pin a single element; the chunk becomes flat
    pub fn set_to_flat(&mut self, idx: usize) {
        self.curr_idx = idx as i64;
    }

    pub fn set_to_unflat(&mut self) {
        self.curr_idx = -1;
    }

    /// Index into `selected` of the pinned element of a flat chunk
    pub fn curr_idx(&self) -> usize {
        debug_assert!(self.is_flat());
        self.curr_idx as usize
    }

    /// Physical position of the pinned element of a flat chunk
    pub fn current_pos(&self) -> usize {
        self.selected[self.curr_idx()] as usize
    }

    /// Number of selected positions, ignoring flatness
    pub fn selected_size(&self) -> usize {
        self.size
    }

    /// 1 for a flat chunk, selected size otherwise
    pub fn effective_size(&self) -> usize {
        if self.is_flat() {
            1
        } else {
            self.size
        }
    }

    /// Physical positions currently live
    pub fn positions(&self) -> Vec<usize> {
        if self.is_flat() {
            vec![self.current_pos()]
        } else {
            self.selected[..self.size]
                .iter()
                .map(|p| *p as usize)
                .collect()
        }
    }

    /// All selected positions regardless of flatness
    pub fn selected_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.selected[..self.size].iter().map(|p| *p as usize)
    }

    /// Replace the selection with the given positions; unflattens
    pub fn set_selected(&mut self, positions: Vec<u32>) {
        self.size = positions.len();
        self.selected = positions;
        self.curr_idx = -1;
    }
}

impl Default for ChunkState {
    fn default() -> Self {
        Self::new()
    }
}

/// A column of values sharing its chunk's selection state.
///
/// Nulls are represented in-band as [`Value::Null`]; `is_null` and
/// `set_null` are the mask view over that representation.
#[derive(Debug, Clone)]
pub struct ValueVector {
    ty: LogicalType,
    values: Vec<Value>,
}

impl ValueVector {
    pub fn new(ty: LogicalType) -> Self {
        let values = vec![Value::Null(ty.clone()); DEFAULT_VECTOR_CAPACITY];
        ValueVector { ty, values }
    }

    pub fn data_type(&self) -> &LogicalType {
        &self.ty
    }

    pub fn value(&self, pos: usize) -> &Value {
        &self.values[pos]
    }

    pub fn set_value(&mut self, pos: usize, v: Value) {
        self.values[pos] = v;
    }

    pub fn is_null(&self, pos: usize) -> bool {
        self.values[pos].is_null()
    }

    pub fn set_null(&mut self, pos: usize) {
        self.values[pos] = Value::Null(self.ty.clone());
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }
}

/// One group of co-resident vectors plus their shared selection state
#[derive(Debug, Clone, Default)]
pub struct DataChunk {
    pub state: ChunkState,
    pub vectors: Vec<ValueVector>,
}

impl DataChunk {
    pub fn new(types: &[LogicalType]) -> Self {
        DataChunk {
            state: ChunkState::new(),
            vectors: types.iter().cloned().map(ValueVector::new).collect(),
        }
    }
}

/// Position of an operand inside a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataPos {
    pub chunk: usize,
    pub vector: usize,
}

impl DataPos {
    pub fn new(chunk: usize, vector: usize) -> Self {
        DataPos { chunk, vector }
    }
}

/// Thread-local dataflow buffer; one per worker per pipeline
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub chunks: Vec<DataChunk>,
    /// Scalar repetition factor carried alongside the vectors
    pub multiplicity: u64,
}

impl ResultSet {
    pub fn vector(&self, pos: DataPos) -> &ValueVector {
        &self.chunks[pos.chunk].vectors[pos.vector]
    }

    pub fn vector_mut(&mut self, pos: DataPos) -> &mut ValueVector {
        &mut self.chunks[pos.chunk].vectors[pos.vector]
    }

    pub fn state(&self, chunk: usize) -> &ChunkState {
        &self.chunks[chunk].state
    }

    pub fn state_mut(&mut self, chunk: usize) -> &mut ChunkState {
        &mut self.chunks[chunk].state
    }

    /// Value at a physical position, through the vector at `pos`
    pub fn value(&self, pos: DataPos, row: usize) -> &Value {
        self.vector(pos).value(row)
    }

    /// Mutable access to two distinct chunks at once
    pub fn chunk_pair_mut(&mut self, a: usize, b: usize) -> (&mut DataChunk, &mut DataChunk) {
        debug_assert!(a != b);
        if a < b {
            let (lo, hi) = self.chunks.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.chunks.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    /// Product of effective chunk sizes times multiplicity, counting only
    /// the given chunks
    pub fn cardinality_of(&self, chunks: &[usize]) -> u64 {
        let mut card = self.multiplicity;
        for &c in chunks {
            card *= self.chunks[c].state.effective_size() as u64;
        }
        card
    }
}

/// Layout blueprint used by sources and the scheduler to populate
/// per-worker result sets
#[derive(Debug, Clone, Default)]
pub struct ResultSetDescriptor {
    /// Vector types per chunk, in chunk order
    pub chunk_types: Vec<Vec<LogicalType>>,
}

impl ResultSetDescriptor {
    pub fn populate(&self) -> ResultSet {
        ResultSet {
            chunks: self
                .chunk_types
                .iter()
                .map(|types| DataChunk::new(types))
                .collect(),
            multiplicity: 1,
        }
    }

    pub fn num_chunks(&self) -> usize {
        self.chunk_types.len()
    }
}

/// Read one logical row out of the vectors at `positions`.
///
/// Rows of flat chunks contribute their pinned element; the at-most-one
/// unflat chunk contributes the element at `unflat_row`. Returns an
/// `Internal` error if more than one unflat chunk backs the positions.
pub fn read_row(
    rs: &ResultSet,
    positions: &[DataPos],
    unflat_row: usize,
) -> QuiverResult<Vec<Value>> {
    let mut unflat_chunk: Option<usize> = None;
    for pos in positions {
        if !rs.state(pos.chunk).is_flat() {
            match unflat_chunk {
                None => unflat_chunk = Some(pos.chunk),
                Some(c) if c == pos.chunk => {}
                Some(_) => {
                    return Err(QuiverError::internal(
                        "more than one unflat group in a row read",
                    ))
                }
            }
        }
    }
    let mut row = Vec::with_capacity(positions.len());
    for pos in positions {
        let state = rs.state(pos.chunk);
        let phys = if state.is_flat() {
            state.current_pos()
        } else {
            state.positions()[unflat_row]
        };
        row.push(rs.value(*pos, phys).clone());
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_flat_unflat() {
        let mut state = ChunkState::new();
        state.init_identity(4);
        assert!(!state.is_flat());
        assert_eq!(state.effective_size(), 4);
        assert_eq!(state.positions(), vec![0, 1, 2, 3]);

        state.set_to_flat(2);
        assert!(state.is_flat());
        assert_eq!(state.effective_size(), 1);
        assert_eq!(state.current_pos(), 2);
        assert_eq!(state.positions(), vec![2]);

        state.set_to_unflat();
        assert_eq!(state.effective_size(), 4);
    }

    #[test]
    fn test_selection_rewrite() {
        let mut state = ChunkState::new();
        state.init_identity(5);
        state.set_selected(vec![1, 3]);
        assert_eq!(state.selected_size(), 2);
        assert_eq!(state.positions(), vec![1, 3]);
    }

    #[test]
    fn test_flat_position_goes_through_selection() {
        let mut state = ChunkState::new();
        state.init_identity(5);
        state.set_selected(vec![2, 4]);
        state.set_to_flat(1);
        assert_eq!(state.current_pos(), 4);
    }

    #[test]
    fn test_descriptor_populates_layout() {
        let descriptor = ResultSetDescriptor {
            chunk_types: vec![
                vec![LogicalType::InternalId, LogicalType::String],
                vec![LogicalType::Int64],
            ],
        };
        let rs = descriptor.populate();
        assert_eq!(rs.chunks.len(), 2);
        assert_eq!(rs.chunks[0].vectors.len(), 2);
        assert_eq!(rs.chunks[1].vectors.len(), 1);
        assert_eq!(rs.multiplicity, 1);
    }

    #[test]
    fn test_cardinality_product() {
        let descriptor = ResultSetDescriptor {
            chunk_types: vec![vec![LogicalType::Int64], vec![LogicalType::Int64]],
        };
        let mut rs = descriptor.populate();
        rs.chunks[0].state.init_identity(3);
        rs.chunks[1].state.init_identity(4);
        assert_eq!(rs.cardinality_of(&[0, 1]), 12);

        rs.chunks[0].state.set_to_flat(0);
        assert_eq!(rs.cardinality_of(&[0, 1]), 4);

        rs.multiplicity = 2;
        assert_eq!(rs.cardinality_of(&[0, 1]), 8);
    }

    #[test]
    fn test_read_row_rejects_two_unflat() {
        let descriptor = ResultSetDescriptor {
            chunk_types: vec![vec![LogicalType::Int64], vec![LogicalType::Int64]],
        };
        let mut rs = descriptor.populate();
        rs.chunks[0].state.init_identity(2);
        rs.chunks[1].state.init_identity(2);
        let positions = [DataPos::new(0, 0), DataPos::new(1, 0)];
        assert!(read_row(&rs, &positions, 0).is_err());

        rs.chunks[0].state.set_to_flat(0);
        assert!(read_row(&rs, &positions, 1).is_ok());
    }
}
