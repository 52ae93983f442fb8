//! HeapPage - a fixed-size page of fixed-size tuple slots.
//!
//! A [`HeapPage`] is the unit of I/O between a heap file and the buffer
//! pool. Besides its bytes it carries the transaction that dirtied it and
//! the before-image used for rollback and for log records.

use crate::common::{Error, PageId, Result, TransactionId};

use super::tuple::{RecordId, Tuple};

/// A heap page.
///
/// # Memory Layout
/// ```text
/// ┌──────────────┬─────────┬─────────┬─────┬─────────────┬─────────┐
/// │ slot bitmap  │ slot 0  │ slot 1  │ ... │ slot N-1    │ padding │
/// │ ceil(N/8) B  │ T bytes │ T bytes │     │ T bytes     │ zeros   │
/// └──────────────┴─────────┴─────────┴─────┴─────────────┴─────────┘
/// ```
/// With page size `P` and tuple size `T`, `N = floor(P × 8 / (T × 8 + 1))`:
/// every slot costs its bytes plus one bitmap bit. Bit `i` of the bitmap is
/// bit `i % 8` (least significant first) of byte `i / 8`. An all-zero page
/// is a valid empty page.
///
/// # Before-image
/// The last clean contents are captured copy-on-write the first time a
/// clean page is mutated, and dropped again by [`HeapPage::set_before_image`]
/// once the current contents are durable.
///
/// # Example
/// ```
/// use heapstore::storage::page::{HeapPage, Tuple};
/// use heapstore::PageId;
///
/// let data = HeapPage::empty_page_data(256);
/// let mut page = HeapPage::new(PageId::new(1, 0), data, 8).unwrap();
/// let rid = page.insert_tuple(&Tuple::from_i32s(&[7, 8])).unwrap();
/// assert_eq!(rid.slot, 0);
/// assert_eq!(page.tuple_at(0).unwrap().i32_at(1), Some(8));
/// ```
pub struct HeapPage {
    page_id: PageId,
    tuple_size: usize,
    num_slots: usize,
    data: Box<[u8]>,
    dirtier: Option<TransactionId>,
    before_image: Option<Box<[u8]>>,
}

impl HeapPage {
    /// Build a page over `data`, whose length is the page size.
    ///
    /// # Errors
    /// `Error::Config` if not even one tuple of `tuple_size` fits.
    pub fn new(page_id: PageId, data: Vec<u8>, tuple_size: usize) -> Result<Self> {
        let num_slots = Self::slots_per_page(data.len(), tuple_size);
        if tuple_size == 0 || num_slots == 0 {
            return Err(Error::config(format!(
                "tuple size {} does not fit a {} byte page",
                tuple_size,
                data.len()
            )));
        }

        Ok(Self {
            page_id,
            tuple_size,
            num_slots: num_slots.min(u16::MAX as usize),
            data: data.into_boxed_slice(),
            dirtier: None,
            before_image: None,
        })
    }

    /// Number of tuple slots on a page.
    pub fn slots_per_page(page_size: usize, tuple_size: usize) -> usize {
        if tuple_size == 0 {
            return 0;
        }
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    /// Bytes of slot bitmap on a page with `num_slots` slots.
    #[inline]
    pub fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Bytes of an empty page.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    #[inline]
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Raw page bytes, exactly `page_size` long.
    #[inline]
    pub fn page_data(&self) -> &[u8] {
        &self.data
    }

    // ========================================================================
    // Slots
    // ========================================================================

    /// Check whether a slot holds a tuple.
    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots && self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.data[slot / 8] |= mask;
        } else {
            self.data[slot / 8] &= !mask;
        }
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = Self::header_size(self.num_slots) + slot * self.tuple_size;
        start..start + self.tuple_size
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots).filter(|&s| !self.is_slot_used(s)).count()
    }

    /// Store a tuple in the lowest free slot.
    ///
    /// # Errors
    /// - `Error::TupleSizeMismatch` if the payload is not `tuple_size` bytes
    /// - `Error::PageFull` if no slot is free
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Result<RecordId> {
        if tuple.len() != self.tuple_size {
            return Err(Error::TupleSizeMismatch {
                expected: self.tuple_size,
                actual: tuple.len(),
            });
        }

        let slot = (0..self.num_slots)
            .find(|&s| !self.is_slot_used(s))
            .ok_or(Error::PageFull {
                page_id: self.page_id,
            })?;

        self.capture_before_image();
        let range = self.slot_range(slot);
        self.data[range].copy_from_slice(tuple.data());
        self.set_slot(slot, true);

        Ok(RecordId::new(self.page_id, slot as u16))
    }

    /// Clear the slot a stored tuple occupies.
    ///
    /// # Errors
    /// - `Error::MissingRecordId` if the tuple was never stored
    /// - `Error::TupleNotFound` if it points at another page or an empty slot
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(Error::MissingRecordId)?;
        let slot = rid.slot as usize;
        if rid.page_id != self.page_id || !self.is_slot_used(slot) {
            return Err(Error::TupleNotFound {
                page_id: rid.page_id,
                slot: rid.slot,
            });
        }

        self.capture_before_image();
        let range = self.slot_range(slot);
        self.data[range].fill(0);
        self.set_slot(slot, false);
        Ok(())
    }

    /// Read the tuple stored in `slot`.
    pub fn tuple_at(&self, slot: usize) -> Option<Tuple> {
        if !self.is_slot_used(slot) {
            return None;
        }
        let mut tuple = Tuple::new(&self.data[self.slot_range(slot)]);
        tuple.set_record_id(Some(RecordId::new(self.page_id, slot as u16)));
        Some(tuple)
    }

    /// Stored tuples in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = Tuple> + '_ {
        (0..self.num_slots).filter_map(move |slot| self.tuple_at(slot))
    }

    // ========================================================================
    // Dirty tracking and before-image
    // ========================================================================

    /// Mark the page dirtied by `tid`, or clean with `None`.
    #[inline]
    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtier = tid;
    }

    /// Transaction that dirtied the page, if any.
    #[inline]
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirtier.is_some()
    }

    /// Bytes of the page as of its last clean state.
    pub fn before_image_data(&self) -> &[u8] {
        self.before_image.as_deref().unwrap_or(&self.data)
    }

    /// The page as of its last clean state.
    pub fn before_image(&self) -> HeapPage {
        HeapPage {
            page_id: self.page_id,
            tuple_size: self.tuple_size,
            num_slots: self.num_slots,
            data: self.before_image_data().into(),
            dirtier: None,
            before_image: None,
        }
    }

    /// Declare the current contents the new clean state.
    pub fn set_before_image(&mut self) {
        self.before_image = None;
    }

    /// Replace the contents with durable bytes and forget any local changes.
    pub fn restore(&mut self, data: &[u8]) {
        self.data.copy_from_slice(data);
        self.before_image = None;
        self.dirtier = None;
    }

    fn capture_before_image(&mut self) {
        if self.before_image.is_none() {
            self.before_image = Some(self.data.clone());
        }
    }
}

impl std::fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapPage")
            .field("page_id", &self.page_id)
            .field("num_slots", &self.num_slots)
            .field("empty_slots", &self.num_empty_slots())
            .field("dirtier", &self.dirtier)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_page(page_size: usize, tuple_size: usize) -> HeapPage {
        HeapPage::new(
            PageId::new(1, 0),
            HeapPage::empty_page_data(page_size),
            tuple_size,
        )
        .unwrap()
    }

    #[test]
    fn test_slot_math() {
        // 4096 * 8 / (8 * 8 + 1) = 504 slots, 63 bitmap bytes
        assert_eq!(HeapPage::slots_per_page(4096, 8), 504);
        assert_eq!(HeapPage::header_size(504), 63);
        assert_eq!(HeapPage::header_size(9), 2);
        assert_eq!(HeapPage::slots_per_page(4096, 0), 0);

        let page = empty_page(4096, 8);
        assert_eq!(page.num_slots(), 504);
        assert_eq!(page.num_empty_slots(), 504);
        assert!(HeapPage::header_size(504) + 504 * 8 <= 4096);
    }

    #[test]
    fn test_tuple_too_big_for_page() {
        let result = HeapPage::new(PageId::new(1, 0), vec![0; 64], 64);
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_uses_lowest_free_slot() {
        let mut page = empty_page(128, 4);
        let r0 = page.insert_tuple(&Tuple::from_i32s(&[10])).unwrap();
        let r1 = page.insert_tuple(&Tuple::from_i32s(&[11])).unwrap();
        assert_eq!((r0.slot, r1.slot), (0, 1));

        let stored = page.tuple_at(0).unwrap();
        assert_eq!(stored.i32_at(0), Some(10));
        page.delete_tuple(&stored).unwrap();

        let r2 = page.insert_tuple(&Tuple::from_i32s(&[12])).unwrap();
        assert_eq!(r2.slot, 0);
        assert_eq!(page.tuples().count(), 2);
    }

    #[test]
    fn test_bitmap_layout() {
        let mut page = empty_page(128, 4);
        for v in 0..9 {
            page.insert_tuple(&Tuple::from_i32s(&[v])).unwrap();
        }
        // Slots 0..8 in byte 0, slot 8 is the low bit of byte 1.
        assert_eq!(page.page_data()[0], 0xFF);
        assert_eq!(page.page_data()[1], 0x01);
    }

    #[test]
    fn test_page_full() {
        let mut page = empty_page(64, 8);
        let slots = page.num_slots();
        for v in 0..slots {
            page.insert_tuple(&Tuple::from_i32s(&[v as i32, 0])).unwrap();
        }
        assert_eq!(page.num_empty_slots(), 0);
        assert!(matches!(
            page.insert_tuple(&Tuple::from_i32s(&[0, 0])),
            Err(Error::PageFull { .. })
        ));
    }

    #[test]
    fn test_size_mismatch() {
        let mut page = empty_page(128, 8);
        assert!(matches!(
            page.insert_tuple(&Tuple::from_i32s(&[1])),
            Err(Error::TupleSizeMismatch { expected: 8, actual: 4 })
        ));
    }

    #[test]
    fn test_delete_errors() {
        let mut page = empty_page(128, 4);
        assert!(matches!(
            page.delete_tuple(&Tuple::from_i32s(&[1])),
            Err(Error::MissingRecordId)
        ));

        let mut ghost = Tuple::from_i32s(&[1]);
        ghost.set_record_id(Some(RecordId::new(PageId::new(1, 0), 3)));
        assert!(matches!(
            page.delete_tuple(&ghost),
            Err(Error::TupleNotFound { slot: 3, .. })
        ));

        ghost.set_record_id(Some(RecordId::new(PageId::new(1, 9), 0)));
        assert!(page.delete_tuple(&ghost).is_err());
    }

    #[test]
    fn test_before_image_copy_on_write() {
        let mut page = empty_page(128, 4);
        page.insert_tuple(&Tuple::from_i32s(&[1])).unwrap();
        page.set_before_image();

        let committed = page.page_data().to_vec();
        assert_eq!(page.before_image_data(), &committed[..]);

        page.insert_tuple(&Tuple::from_i32s(&[2])).unwrap();
        page.insert_tuple(&Tuple::from_i32s(&[3])).unwrap();
        assert_eq!(page.before_image_data(), &committed[..]);
        assert_ne!(page.page_data(), &committed[..]);

        let before = page.before_image();
        assert_eq!(before.tuples().count(), 1);
        assert!(!before.is_dirty());

        page.set_before_image();
        assert_eq!(page.before_image_data(), page.page_data());
    }

    #[test]
    fn test_dirty_and_restore() {
        let mut page = empty_page(128, 4);
        let clean = page.page_data().to_vec();
        let tid = TransactionId::new(3);

        page.insert_tuple(&Tuple::from_i32s(&[1])).unwrap();
        page.mark_dirty(Some(tid));
        assert_eq!(page.dirtier(), Some(tid));
        assert!(page.is_dirty());

        page.restore(&clean);
        assert!(!page.is_dirty());
        assert_eq!(page.tuples().count(), 0);
        assert_eq!(page.page_data(), &clean[..]);
    }
}
