//! COPY FROM / COPY TO
//!
//! Copy-from is a pipeline: a file scan source pulls record batches
//! (CSV or Parquet) from a shared reader in morsels, and a sink stages
//! rows. Finalize validates primary keys against the staged set and the
//! existing index before anything touches the table, so a conflict
//! aborts the whole copy with the table untouched. Rel copy resolves
//! endpoint primary keys through the node tables' indexes.

use super::context::ExecutionContext;
use super::factorized_table::FactorizedTable;
use super::{batch_rows, PhysicalOperator};
use crate::ast::{CopyOptions, FileFormat};
use crate::error::{QuiverError, QuiverResult};
use crate::storage::WalRecord;
use crate::types::{LogicalType, TableId};
use crate::value::arrow_convert::{record_batch_to_rows, rows_to_record_batch, to_arrow_schema};
use crate::value::Value;
use crate::vector::{DataPos, ResultSet, ResultSetDescriptor, DEFAULT_VECTOR_CAPACITY};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

enum BatchReader {
    Csv(arrow::csv::Reader<File>),
    Parquet(parquet::arrow::arrow_reader::ParquetRecordBatchReader),
}

impl BatchReader {
    fn next_batch(&mut self) -> QuiverResult<Option<arrow::record_batch::RecordBatch>> {
        let batch = match self {
            BatchReader::Csv(reader) => reader.next(),
            BatchReader::Parquet(reader) => reader.next(),
        };
        batch.transpose().map_err(Into::into)
    }
}

/// Shared file reader; workers pull batches under the mutex
pub struct CopyReaderShared {
    reader: Mutex<Option<BatchReader>>,
    opened: AtomicBool,
}

impl CopyReaderShared {
    pub fn new() -> Arc<Self> {
        Arc::new(CopyReaderShared {
            reader: Mutex::new(None),
            opened: AtomicBool::new(false),
        })
    }
}

/// Source reading a data file as record batches
#[derive(Clone)]
pub struct CopyFileScan {
    pub path: String,
    pub format: FileFormat,
    pub options: CopyOptions,
    pub column_types: Vec<LogicalType>,
    pub out_chunk: usize,
    pub outputs: Vec<DataPos>,
    /// Sequential batch hand-out preserves file order per worker claim
    pub preserving_order: bool,
    pub shared: Arc<CopyReaderShared>,
}

impl CopyFileScan {
    fn open(&self) -> QuiverResult<BatchReader> {
        let file = File::open(&self.path)
            .map_err(|e| QuiverError::runtime(format!("cannot open {}: {e}", self.path)))?;
        match self.format {
            FileFormat::Csv => {
                let columns: Vec<(String, LogicalType)> = self
                    .column_types
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (format!("column{i}"), t.clone()))
                    .collect();
                let schema = Arc::new(to_arrow_schema(&columns)?);
                let reader = arrow::csv::ReaderBuilder::new(schema)
                    .with_header(self.options.header)
                    .with_delimiter(self.options.delimiter)
                    .with_batch_size(DEFAULT_VECTOR_CAPACITY)
                    .build(file)?;
                Ok(BatchReader::Csv(reader))
            }
            FileFormat::Parquet => {
                let reader =
                    parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)?
                        .with_batch_size(DEFAULT_VECTOR_CAPACITY)
                        .build()?;
                Ok(BatchReader::Parquet(reader))
            }
        }
    }

    pub fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<bool> {
        ctx.check_interrupted()?;
        let mut guard = self.shared.reader.lock();
        if guard.is_none() {
            if self.shared.opened.swap(true, Ordering::SeqCst) {
                // Another worker drained the file already.
                return Ok(false);
            }
            *guard = Some(self.open()?);
        }
        let Some(reader) = guard.as_mut() else {
            return Ok(false);
        };
        let Some(batch) = reader.next_batch()? else {
            *guard = None;
            return Ok(false);
        };
        drop(guard);

        let rows = record_batch_to_rows(&batch, &self.column_types)?;
        for (row_idx, row) in rows.iter().enumerate() {
            for (col, pos) in self.outputs.iter().enumerate() {
                rs.vector_mut(*pos).set_value(row_idx, row[col].clone());
            }
        }
        rs.state_mut(self.out_chunk).init_identity(rows.len());
        Ok(true)
    }
}

/// Staged rows shared by copy sinks
pub struct CopyStaging {
    rows: Mutex<Vec<Vec<Value>>>,
    pub result: Arc<FactorizedTable>,
    finalized: AtomicBool,
}

impl CopyStaging {
    pub fn new() -> Arc<Self> {
        Arc::new(CopyStaging {
            rows: Mutex::new(Vec::new()),
            result: FactorizedTable::new(vec![LogicalType::String]),
            finalized: AtomicBool::new(false),
        })
    }
}

/// Copy-from sink for node tables
#[derive(Clone)]
pub struct CopyNodeSink {
    pub table_id: TableId,
    pub inputs: Vec<DataPos>,
    pub descriptor: ResultSetDescriptor,
    pub staging: Arc<CopyStaging>,
    pub child: Box<PhysicalOperator>,
    local: Vec<Vec<Value>>,
}

impl CopyNodeSink {
    pub fn new(
        table_id: TableId,
        inputs: Vec<DataPos>,
        descriptor: ResultSetDescriptor,
        staging: Arc<CopyStaging>,
        child: Box<PhysicalOperator>,
    ) -> Self {
        CopyNodeSink {
            table_id,
            inputs,
            descriptor,
            staging,
            child,
            local: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.local.clear();
    }

    pub fn execute(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        while self.child.next(rs, ctx)? {
            self.local.extend(batch_rows(rs, &self.inputs)?);
        }
        self.staging.rows.lock().append(&mut self.local);
        Ok(())
    }

    pub fn finalize(&self, ctx: &ExecutionContext) -> QuiverResult<()> {
        if self.staging.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let staged = std::mem::take(&mut *self.staging.rows.lock());
        let table = ctx.storage.node_table(self.table_id)?;
        let mut table = table.write();
        let pk = table.pk_column;

        // All-or-nothing: conflicts must surface before any row lands.
        let mut seen: HashSet<Value> = HashSet::with_capacity(staged.len());
        for row in &staged {
            let key = &row[pk];
            if key.is_null() {
                return Err(QuiverError::runtime("primary key may not be null"));
            }
            if !seen.insert(key.clone()) || table.index.lookup(key).is_some() {
                return Err(QuiverError::runtime(format!(
                    "duplicated primary key: {key}"
                )));
            }
        }

        let num_rows = staged.len() as u64;
        table.index.reserve(staged.len());
        for row in staged {
            table.insert(row)?;
        }
        drop(table);

        ctx.storage.log(&WalRecord::CopyCommitted {
            table_id: self.table_id,
            num_rows,
        })?;
        self.staging.result.push_row(vec![Value::string(format!(
            "{num_rows} tuples have been copied."
        ))]);
        Ok(())
    }
}

/// Copy-from sink for rel tables; resolves endpoint primary keys
#[derive(Clone)]
pub struct CopyRelSink {
    pub table_id: TableId,
    pub src_table: TableId,
    pub dst_table: TableId,
    pub inputs: Vec<DataPos>,
    pub descriptor: ResultSetDescriptor,
    pub staging: Arc<CopyStaging>,
    pub child: Box<PhysicalOperator>,
    local: Vec<Vec<Value>>,
}

impl CopyRelSink {
    pub fn new(
        table_id: TableId,
        src_table: TableId,
        dst_table: TableId,
        inputs: Vec<DataPos>,
        descriptor: ResultSetDescriptor,
        staging: Arc<CopyStaging>,
        child: Box<PhysicalOperator>,
    ) -> Self {
        CopyRelSink {
            table_id,
            src_table,
            dst_table,
            inputs,
            descriptor,
            staging,
            child,
            local: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.local.clear();
    }

    pub fn execute(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        while self.child.next(rs, ctx)? {
            self.local.extend(batch_rows(rs, &self.inputs)?);
        }
        self.staging.rows.lock().append(&mut self.local);
        Ok(())
    }

    pub fn finalize(&self, ctx: &ExecutionContext) -> QuiverResult<()> {
        if self.staging.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let staged = std::mem::take(&mut *self.staging.rows.lock());
        let src = ctx.storage.node_table(self.src_table)?;
        let dst = ctx.storage.node_table(self.dst_table)?;
        let rel = ctx.storage.rel_table(self.table_id)?;
        let src = src.read();
        let dst = dst.read();
        let mut rel = rel.write();

        let num_rows = staged.len() as u64;
        for row in staged {
            let src_offset = src.index.lookup(&row[0]).ok_or_else(|| {
                QuiverError::runtime(format!("unmatched source key: {}", row[0]))
            })?;
            let dst_offset = dst.index.lookup(&row[1]).ok_or_else(|| {
                QuiverError::runtime(format!("unmatched destination key: {}", row[1]))
            })?;
            rel.insert(src_offset, dst_offset, row[2..].to_vec())?;
        }
        drop(rel);

        ctx.storage.log(&WalRecord::CopyCommitted {
            table_id: self.table_id,
            num_rows,
        })?;
        self.staging.result.push_row(vec![Value::string(format!(
            "{num_rows} tuples have been copied."
        ))]);
        Ok(())
    }
}

/// `COPY (query) TO file` sink
#[derive(Clone)]
pub struct CopyToSink {
    pub path: String,
    pub format: FileFormat,
    pub columns: Vec<(String, LogicalType)>,
    pub inputs: Vec<DataPos>,
    pub descriptor: ResultSetDescriptor,
    pub staging: Arc<CopyStaging>,
    pub child: Box<PhysicalOperator>,
    local: Vec<Vec<Value>>,
}

impl CopyToSink {
    pub fn new(
        path: String,
        format: FileFormat,
        columns: Vec<(String, LogicalType)>,
        inputs: Vec<DataPos>,
        descriptor: ResultSetDescriptor,
        staging: Arc<CopyStaging>,
        child: Box<PhysicalOperator>,
    ) -> Self {
        CopyToSink {
            path,
            format,
            columns,
            inputs,
            descriptor,
            staging,
            child,
            local: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.local.clear();
    }

    pub fn execute(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        while self.child.next(rs, ctx)? {
            let rows = batch_rows(rs, &self.inputs)?;
            let multiplicity = rs.multiplicity.max(1);
            for row in rows {
                for _ in 0..multiplicity {
                    self.local.push(row.clone());
                }
            }
        }
        self.staging.rows.lock().append(&mut self.local);
        Ok(())
    }

    pub fn finalize(&self, _ctx: &ExecutionContext) -> QuiverResult<()> {
        if self.staging.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let rows = std::mem::take(&mut *self.staging.rows.lock());
        let batch = rows_to_record_batch(&rows, &self.columns)?;
        let file = File::create(&self.path)
            .map_err(|e| QuiverError::runtime(format!("cannot create {}: {e}", self.path)))?;
        match self.format {
            FileFormat::Csv => {
                let mut writer = arrow::csv::WriterBuilder::new()
                    .with_header(true)
                    .build(file);
                writer.write(&batch)?;
            }
            FileFormat::Parquet => {
                let mut writer =
                    parquet::arrow::ArrowWriter::try_new(file, batch.schema(), None)?;
                writer.write(&batch)?;
                writer.close()?;
            }
        }
        self.staging.result.push_row(vec![Value::string(format!(
            "{} tuples have been exported to {}.",
            rows.len(),
            self.path
        ))]);
        Ok(())
    }
}
