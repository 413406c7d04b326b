//! Write-Ahead Log
//!
//! Append-only record log for catalog mutations and transaction
//! boundaries. Records are bincode-encoded and framed as
//! `[len: u32][crc32: u32][payload]`; a torn tail is truncated on
//! recovery rather than reported as corruption.

use crate::error::{QuiverError, QuiverResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

/// WAL record payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WalRecord {
    BeginTransaction { id: u64 },
    Commit { id: u64 },
    Rollback { id: u64 },
    /// Catalog mutation, stored as its statement message
    Ddl { message: String },
    /// A committed bulk load
    CopyCommitted { table_id: u64, num_rows: u64 },
    Checkpoint,
}

/// Write-ahead log for one database
pub struct Wal {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    immediate_sync: bool,
}

impl Wal {
    pub fn new(dir: PathBuf, immediate_sync: bool) -> QuiverResult<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Wal {
            path: dir.join("quiver.wal"),
            writer: None,
            immediate_sync,
        })
    }

    fn ensure_writer(&mut self) -> QuiverResult<&mut BufWriter<File>> {
        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        Ok(self.writer.as_mut().expect("writer just ensured"))
    }

    /// Append one record; flushes, and fsyncs when immediate sync is on
    pub fn append(&mut self, record: &WalRecord) -> QuiverResult<()> {
        let immediate_sync = self.immediate_sync;
        let writer = self.ensure_writer()?;
        let payload = bincode::serialize(record)
            .map_err(|e| QuiverError::runtime(format!("WAL encode failed: {e}")))?;
        let crc = crc32fast::hash(&payload);
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(&crc.to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;
        if immediate_sync {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Read every intact record; stops quietly at a torn tail
    pub fn read_all(&self) -> QuiverResult<Vec<WalRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut bytes = Vec::new();
        File::open(&self.path)?.read_to_end(&mut bytes)?;
        let mut records = Vec::new();
        let mut at = 0usize;
        while at + 8 <= bytes.len() {
            let len = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
                as usize;
            let crc = u32::from_le_bytes([
                bytes[at + 4],
                bytes[at + 5],
                bytes[at + 6],
                bytes[at + 7],
            ]);
            let start = at + 8;
            if start + len > bytes.len() {
                break;
            }
            let payload = &bytes[start..start + len];
            if crc32fast::hash(payload) != crc {
                return Err(QuiverError::runtime(format!(
                    "WAL corruption at offset {at}: checksum mismatch"
                )));
            }
            let record: WalRecord = bincode::deserialize(payload)
                .map_err(|e| QuiverError::runtime(format!("WAL decode failed: {e}")))?;
            records.push(record);
            at = start + len;
        }
        Ok(records)
    }

    /// Truncate after a checkpoint has made the log redundant
    pub fn clear(&mut self) -> QuiverResult<()> {
        self.writer = None;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
