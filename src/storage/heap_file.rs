//! Heap file - the on-disk page store of one table.
//!
//! The [`HeapFile`] owns the raw file I/O for a table:
//! - Reading and writing whole pages
//! - Extending the file with empty pages
//! - Inserting, deleting and scanning tuples through the buffer pool

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{BufferPool, SharedPage};
use crate::common::{Error, PageId, Permissions, Result, TransactionId};
use crate::storage::page::{HeapPage, Tuple};

/// Page store for a single table.
///
/// # File Layout
/// Pages are laid out back to back with no header page:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      P       2P      ...       N×P
/// ```
/// Page N is located at file offset `N × page_size`, and the page count is
/// `ceil(file_len / page_size)`.
///
/// # Thread Safety
/// Reads and writes are serialized on the file handle. Extending the file
/// takes a separate mutex so two transactions racing to allocate the same
/// page number write it only once.
///
/// # Durability
/// Every write is followed by `sync_data()`. Only committed pages and fresh
/// empty pages are ever written.
pub struct HeapFile {
    path: PathBuf,
    table_id: u32,
    tuple_size: usize,
    page_size: usize,
    file: Mutex<File>,
    extend: Mutex<()>,
}

impl HeapFile {
    /// Open a heap file, creating it if it doesn't exist.
    ///
    /// # Errors
    /// `Error::Config` if a `tuple_size` tuple doesn't fit a page, or an
    /// I/O error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, tuple_size: usize, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        Self::from_file(path.as_ref(), file, tuple_size, page_size)
    }

    /// Create a new, empty heap file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, tuple_size: usize, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        Self::from_file(path.as_ref(), file, tuple_size, page_size)
    }

    fn from_file(path: &Path, file: File, tuple_size: usize, page_size: usize) -> Result<Self> {
        if HeapPage::slots_per_page(page_size, tuple_size) == 0 {
            return Err(Error::config(format!(
                "tuple size {} does not fit a {} byte page",
                tuple_size, page_size
            )));
        }

        let path = std::fs::canonicalize(path)?;
        let table_id = crc32fast::hash(path.to_string_lossy().as_bytes());

        Ok(Self {
            path,
            table_id,
            tuple_size,
            page_size,
            file: Mutex::new(file),
            extend: Mutex::new(()),
        })
    }

    /// Table id: CRC-32 of the file's absolute path.
    #[inline]
    pub fn id(&self) -> u32 {
        self.table_id
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the file. A trailing partial page counts.
    pub fn page_count(&self) -> Result<u32> {
        let len = self.file.lock().metadata()?.len();
        Ok(len.div_ceil(self.page_size as u64) as u32)
    }

    // ========================================================================
    // Page I/O
    // ========================================================================

    /// Read a page from disk.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page belongs to another table or
    /// lies past the end of the file.
    pub fn read_page(&self, page_id: PageId) -> Result<HeapPage> {
        let data = self.read_page_data(page_id)?;
        HeapPage::new(page_id, data, self.tuple_size)
    }

    /// Read the raw bytes of a page.
    pub fn read_page_data(&self, page_id: PageId) -> Result<Vec<u8>> {
        if page_id.table_id != self.table_id {
            return Err(Error::PageNotFound { page_id });
        }

        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        let offset = page_id.offset(self.page_size);
        if offset >= len {
            return Err(Error::PageNotFound { page_id });
        }

        let mut data = HeapPage::empty_page_data(self.page_size);
        let available = ((len - offset) as usize).min(self.page_size);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data[..available])?;
        Ok(data)
    }

    /// Write a page to disk at its offset and sync.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page belongs to another table.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let page_id = page.page_id();
        if page_id.table_id != self.table_id {
            return Err(Error::PageNotFound { page_id });
        }
        if page.page_size() != self.page_size {
            return Err(Error::config(format!(
                "{} is {} bytes, file pages are {}",
                page_id,
                page.page_size(),
                self.page_size
            )));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.offset(self.page_size)))?;
        file.write_all(page.page_data())?;
        file.sync_data()?;
        Ok(())
    }

    /// Write an empty page at `page_number` if the file doesn't reach it yet.
    ///
    /// Returns whether the file was extended. A page that already exists is
    /// left untouched.
    pub fn allocate_page(&self, page_number: u32) -> Result<bool> {
        let _extend = self.extend.lock();
        if page_number < self.page_count()? {
            return Ok(false);
        }

        let page_id = PageId::new(self.table_id, page_number);
        let page = HeapPage::new(
            page_id,
            HeapPage::empty_page_data(self.page_size),
            self.tuple_size,
        )?;
        self.write_page(&page)?;
        debug!(table = self.table_id, page = page_number, "heap_file.allocate");
        Ok(true)
    }

    // ========================================================================
    // Tuple operations
    // ========================================================================

    /// Store `tuple` in the first page with a free slot, extending the file
    /// when every page is full.
    ///
    /// Sets the tuple's record id and returns the one page it modified.
    ///
    /// # Errors
    /// `Error::TupleSizeMismatch` for a payload of the wrong size, or
    /// whatever fetching a page through the pool fails with.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<SharedPage>> {
        if tuple.len() != self.tuple_size {
            return Err(Error::TupleSizeMismatch {
                expected: self.tuple_size,
                actual: tuple.len(),
            });
        }

        let mut page_number = 0u32;
        loop {
            let page_id = PageId::new(self.table_id, page_number);
            let held_before = pool.holds_lock(tid, page_id);

            let page = match pool.get_page(tid, page_id, Permissions::ReadWrite) {
                Ok(page) => page,
                Err(Error::PageNotFound { .. }) => {
                    self.allocate_page(page_number)?;
                    pool.get_page(tid, page_id, Permissions::ReadWrite)?
                }
                Err(e) => return Err(e),
            };

            {
                let mut guard = page.write();
                if guard.num_empty_slots() > 0 {
                    let rid = guard.insert_tuple(tuple)?;
                    // Marked under the latch so eviction never sees the page
                    // clean but modified.
                    guard.mark_dirty(Some(tid));
                    drop(guard);
                    tuple.set_record_id(Some(rid));
                    return Ok(vec![page]);
                }
            }

            // Full and never read by this transaction.
            if !held_before {
                pool.unsafe_release_page(tid, page_id);
            }
            page_number += 1;
        }
    }

    /// Remove a stored tuple from its page. Returns the page modified.
    ///
    /// # Errors
    /// - `Error::MissingRecordId` if the tuple was never stored
    /// - `Error::WrongTable` if it belongs to another table
    /// - `Error::TupleNotFound` if its slot is empty
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<SharedPage>> {
        let rid = tuple.record_id().ok_or(Error::MissingRecordId)?;
        if rid.page_id.table_id != self.table_id {
            return Err(Error::WrongTable {
                expected: self.table_id,
                actual: rid.page_id.table_id,
            });
        }

        let page = pool.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        {
            let mut guard = page.write();
            guard.delete_tuple(tuple)?;
            guard.mark_dirty(Some(tid));
        }
        Ok(vec![page])
    }

    /// Scan every tuple of the file on behalf of `tid`.
    ///
    /// Pages are fetched read-only through the pool, one at a time, in page
    /// order.
    pub fn iter<'a>(&'a self, pool: &'a BufferPool, tid: TransactionId) -> HeapFileIterator<'a> {
        HeapFileIterator {
            file: self,
            pool,
            tid,
            next_page: 0,
            page_count: None,
            current: VecDeque::new(),
            open: true,
        }
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("path", &self.path)
            .field("table_id", &self.table_id)
            .field("tuple_size", &self.tuple_size)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Lazy scan over a heap file's tuples.
///
/// Once a page fetch fails the error is yielded and the iterator stays
/// exhausted until [`rewind`](HeapFileIterator::rewind).
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    tid: TransactionId,
    next_page: u32,
    page_count: Option<u32>,
    current: VecDeque<Tuple>,
    open: bool,
}

impl HeapFileIterator<'_> {
    /// Restart the scan from page 0.
    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.page_count = None;
        self.current.clear();
        self.open = true;
    }

    /// Drop the buffered page. Locks taken so far stay held.
    pub fn close(&mut self) {
        self.current.clear();
        self.open = false;
    }
}

impl Iterator for HeapFileIterator<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Result<Tuple>> {
        if !self.open {
            return None;
        }

        loop {
            if let Some(tuple) = self.current.pop_front() {
                return Some(Ok(tuple));
            }

            // Refreshed at the last known page: the scan sees pages appended
            // while it runs.
            let known = self.page_count.filter(|&count| self.next_page < count);
            let page_count = match known {
                Some(count) => count,
                None => match self.file.page_count() {
                    Ok(count) => *self.page_count.insert(count),
                    Err(e) => {
                        self.open = false;
                        return Some(Err(e));
                    }
                },
            };
            if self.next_page >= page_count {
                return None;
            }

            let page_id = PageId::new(self.file.id(), self.next_page);
            self.next_page += 1;
            match self.pool.get_page(self.tid, page_id, Permissions::ReadOnly) {
                Ok(page) => self.current = page.read().tuples().collect(),
                Err(e) => {
                    self.open = false;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: usize = 256;

    #[test]
    fn test_create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");

        let hf = HeapFile::create(&path, 8, PAGE).unwrap();
        assert_eq!(hf.page_count().unwrap(), 0);
        assert_eq!(hf.tuple_size(), 8);
        assert_eq!(hf.page_size(), PAGE);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");

        HeapFile::create(&path, 8, PAGE).unwrap();
        assert!(HeapFile::create(&path, 8, PAGE).is_err());
        assert!(HeapFile::open(&path, 8, PAGE).is_ok());
    }

    #[test]
    fn test_tuple_too_large_rejected() {
        let dir = tempdir().unwrap();
        let err = HeapFile::open(dir.path().join("t.dat"), PAGE, PAGE).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_table_id_stable_per_path() {
        let dir = tempdir().unwrap();
        let a = HeapFile::open(dir.path().join("a.dat"), 8, PAGE).unwrap();
        let a2 = HeapFile::open(dir.path().join("a.dat"), 8, PAGE).unwrap();
        let b = HeapFile::open(dir.path().join("b.dat"), 8, PAGE).unwrap();

        assert_eq!(a.id(), a2.id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_allocate_and_read_page() {
        let dir = tempdir().unwrap();
        let hf = HeapFile::open(dir.path().join("t.dat"), 8, PAGE).unwrap();

        assert!(hf.allocate_page(0).unwrap());
        assert!(!hf.allocate_page(0).unwrap());
        assert_eq!(hf.page_count().unwrap(), 1);

        let page = hf.read_page(PageId::new(hf.id(), 0)).unwrap();
        assert_eq!(page.num_empty_slots(), page.num_slots());
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_write_and_read_page() {
        let dir = tempdir().unwrap();
        let hf = HeapFile::open(dir.path().join("t.dat"), 8, PAGE).unwrap();
        hf.allocate_page(0).unwrap();

        let pid = PageId::new(hf.id(), 0);
        let mut page = hf.read_page(pid).unwrap();
        page.insert_tuple(&Tuple::from_i32s(&[1, 2])).unwrap();
        hf.write_page(&page).unwrap();

        let read_back = hf.read_page(pid).unwrap();
        assert_eq!(read_back.page_data(), page.page_data());
        assert_eq!(read_back.tuple_at(0).unwrap().i32_at(1), Some(2));
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");

        {
            let hf = HeapFile::open(&path, 8, PAGE).unwrap();
            hf.allocate_page(0).unwrap();
            let mut page = hf.read_page(PageId::new(hf.id(), 0)).unwrap();
            page.insert_tuple(&Tuple::from_i32s(&[42, 0])).unwrap();
            hf.write_page(&page).unwrap();
        }

        {
            let hf = HeapFile::open(&path, 8, PAGE).unwrap();
            assert_eq!(hf.page_count().unwrap(), 1);
            let page = hf.read_page(PageId::new(hf.id(), 0)).unwrap();
            assert_eq!(page.tuple_at(0).unwrap().i32_at(0), Some(42));
        }
    }

    #[test]
    fn test_read_past_end() {
        let dir = tempdir().unwrap();
        let hf = HeapFile::open(dir.path().join("t.dat"), 8, PAGE).unwrap();
        hf.allocate_page(0).unwrap();

        let err = hf.read_page(PageId::new(hf.id(), 1)).unwrap_err();
        assert!(err.is_page_not_found());
    }

    #[test]
    fn test_read_other_table_page() {
        let dir = tempdir().unwrap();
        let hf = HeapFile::open(dir.path().join("t.dat"), 8, PAGE).unwrap();
        hf.allocate_page(0).unwrap();

        let err = hf.read_page(PageId::new(hf.id().wrapping_add(1), 0)).unwrap_err();
        assert!(err.is_page_not_found());
    }

    #[test]
    fn test_partial_trailing_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");
        std::fs::write(&path, vec![0u8; PAGE + 10]).unwrap();

        let hf = HeapFile::open(&path, 8, PAGE).unwrap();
        assert_eq!(hf.page_count().unwrap(), 2);

        let data = hf.read_page_data(PageId::new(hf.id(), 1)).unwrap();
        assert_eq!(data.len(), PAGE);
    }
}
