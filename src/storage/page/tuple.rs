//! Tuples and record ids.

use std::fmt;

use crate::common::PageId;

/// Where a stored tuple lives: a page and a slot on that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

impl RecordId {
    #[inline]
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

/// A fixed-size row payload.
///
/// Every tuple of a table has the same length (the table's tuple size).
/// The engine does not interpret the bytes; [`Tuple::from_i32s`] and
/// [`Tuple::i32_at`] are conveniences for rows made of 4-byte integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Create an unstored tuple from raw bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            record_id: None,
        }
    }

    /// Create a tuple of big-endian 4-byte integer fields.
    pub fn from_i32s(fields: &[i32]) -> Self {
        let data = fields.iter().flat_map(|v| v.to_be_bytes()).collect::<Vec<u8>>();
        Self::new(data)
    }

    /// Read the `index`-th 4-byte integer field.
    pub fn i32_at(&self, index: usize) -> Option<i32> {
        let start = index.checked_mul(4)?;
        let bytes = self.data.get(start..start + 4)?;
        Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Location of the tuple, if it has been stored.
    #[inline]
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_fields() {
        let t = Tuple::from_i32s(&[1, -2, 300]);
        assert_eq!(t.len(), 12);
        assert_eq!(t.i32_at(0), Some(1));
        assert_eq!(t.i32_at(1), Some(-2));
        assert_eq!(t.i32_at(2), Some(300));
        assert_eq!(t.i32_at(3), None);
    }

    #[test]
    fn test_record_id() {
        let mut t = Tuple::new(vec![1, 2, 3]);
        assert!(t.record_id().is_none());

        let rid = RecordId::new(PageId::new(4, 5), 6);
        t.set_record_id(Some(rid));
        assert_eq!(t.record_id(), Some(rid));
        assert_eq!(format!("{}", rid), "Page(4:5)#6");
    }
}
