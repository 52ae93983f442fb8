//! Write-ahead log file.
//!
//! Before a committed page is written to its heap file the buffer pool
//! appends an update record with the page's before- and after-image, then
//! forces the log.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{Error, PageId, Result, TransactionId};

/// Log operations the buffer pool depends on.
pub trait LogService: Send + Sync {
    /// Append an update record for one page.
    fn log_write(
        &self,
        tid: TransactionId,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<()>;

    /// Make every appended record durable.
    fn force(&self) -> Result<()>;
}

/// Discards every record. For pools that don't need a log.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLog;

impl LogService for NoLog {
    fn log_write(&self, _: TransactionId, _: PageId, _: &[u8], _: &[u8]) -> Result<()> {
        Ok(())
    }

    fn force(&self) -> Result<()> {
        Ok(())
    }
}

const UPDATE_RECORD: u8 = 1;
/// kind + tid + table id + page number + image length
const HEADER_LEN: usize = 1 + 8 + 4 + 4 + 4;
const CRC_LEN: usize = 4;

/// One decoded update record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub tid: TransactionId,
    pub page_id: PageId,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

/// Append-only log file.
///
/// # Record Format
/// All integers little-endian:
/// ```text
/// ┌──────┬─────────┬──────────┬─────────┬─────────┬────────────┬───────────┬───────┐
/// │ kind │   tid   │ table id │ page no │   len   │ before[len]│ after[len]│ crc32 │
/// │  u8  │   u64   │   u32    │   u32   │   u32   │            │           │  u32  │
/// └──────┴─────────┴──────────┴─────────┴─────────┴────────────┴───────────┴───────┘
/// ```
/// The CRC covers every preceding byte of the record.
pub struct LogFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl LogFile {
    /// Open a log file for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back and verify every record in the file.
    ///
    /// Buffered records are flushed first.
    ///
    /// # Errors
    /// `Error::Corrupted` on a truncated record, an unknown record kind or a
    /// checksum mismatch.
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        self.writer.lock().flush()?;
        let bytes = std::fs::read(&self.path)?;
        decode_records(&bytes)
    }
}

impl LogService for LogFile {
    fn log_write(
        &self,
        tid: TransactionId,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<()> {
        if before.len() != after.len() {
            return Err(Error::corrupted(format!(
                "image lengths differ for {}: {} vs {}",
                page_id,
                before.len(),
                after.len()
            )));
        }

        let record = encode_record(tid, page_id, before, after)?;
        self.writer.lock().write_all(&record)?;
        trace!(%tid, table = page_id.table_id, page = page_id.page_number, "log.write");
        Ok(())
    }

    fn force(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        debug!(path = %self.path.display(), "log.force");
        Ok(())
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile").field("path", &self.path).finish()
    }
}

fn encode_record(
    tid: TransactionId,
    page_id: PageId,
    before: &[u8],
    after: &[u8],
) -> Result<Vec<u8>> {
    let len = u32::try_from(before.len())
        .map_err(|_| Error::corrupted(format!("page image of {} bytes", before.len())))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + before.len() * 2 + CRC_LEN);
    buf.push(UPDATE_RECORD);
    buf.extend_from_slice(&tid.as_u64().to_le_bytes());
    buf.extend_from_slice(&page_id.table_id.to_le_bytes());
    buf.extend_from_slice(&page_id.page_number.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(before);
    buf.extend_from_slice(after);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

fn decode_records(bytes: &[u8]) -> Result<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let kind = bytes[pos];
        if kind != UPDATE_RECORD {
            return Err(Error::corrupted(format!(
                "unknown record kind {} at offset {}",
                kind, start
            )));
        }

        let tid = u64::from_le_bytes(take(bytes, pos + 1, start)?);
        let table_id = u32::from_le_bytes(take(bytes, pos + 9, start)?);
        let page_number = u32::from_le_bytes(take(bytes, pos + 13, start)?);
        let len = u32::from_le_bytes(take(bytes, pos + 17, start)?) as usize;
        pos += HEADER_LEN;

        let images_end = pos + len * 2;
        let before = bytes.get(pos..pos + len).ok_or_else(|| truncated(start))?;
        let after = bytes.get(pos + len..images_end).ok_or_else(|| truncated(start))?;
        let stored_crc = u32::from_le_bytes(take(bytes, images_end, start)?);

        if crc32fast::hash(&bytes[start..images_end]) != stored_crc {
            return Err(Error::corrupted(format!(
                "checksum mismatch in record at offset {}",
                start
            )));
        }

        records.push(LogRecord {
            tid: TransactionId::new(tid),
            page_id: PageId::new(table_id, page_number),
            before: before.to_vec(),
            after: after.to_vec(),
        });
        pos = images_end + CRC_LEN;
    }

    Ok(records)
}

fn take<const N: usize>(bytes: &[u8], pos: usize, record_start: usize) -> Result<[u8; N]> {
    bytes
        .get(pos..pos + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| truncated(record_start))
}

fn truncated(record_start: usize) -> Error {
    Error::corrupted(format!("truncated record at offset {}", record_start))
}
