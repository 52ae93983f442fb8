//! Page identifier type.

use std::fmt;

/// Identifies a page of a specific table's heap file.
///
/// Using `u32` page numbers allows for 4 billion pages per table.
/// Ordering is by table, then page number, which is also the order
/// a heap file scan visits pages.
///
/// # Example
/// ```
/// use heapstore::PageId;
///
/// let page_id = PageId::new(3, 42);
/// assert_eq!(page_id.table_id, 3);
/// assert_eq!(page_id.page_number, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    /// Table (heap file) the page belongs to.
    pub table_id: u32,
    /// Position of the page within its heap file.
    pub page_number: u32,
}

impl PageId {
    /// Create a new PageId.
    #[inline]
    pub fn new(table_id: u32, page_number: u32) -> Self {
        PageId {
            table_id,
            page_number,
        }
    }

    /// Byte offset of this page within its heap file.
    #[inline]
    pub fn offset(&self, page_size: usize) -> u64 {
        (self.page_number as u64) * (page_size as u64)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({}:{})", self.table_id, self.page_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_page_id_new() {
        let pid = PageId::new(1, 42);
        assert_eq!(pid.table_id, 1);
        assert_eq!(pid.page_number, 42);
    }

    #[test]
    fn test_page_id_equality_uses_both_fields() {
        assert_eq!(PageId::new(1, 2), PageId::new(1, 2));
        assert_ne!(PageId::new(1, 2), PageId::new(2, 2));
        assert_ne!(PageId::new(1, 2), PageId::new(1, 3));

        let set: HashSet<PageId> = [PageId::new(1, 2), PageId::new(2, 1)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId::new(1, 9) < PageId::new(2, 0));
        assert!(PageId::new(1, 5) > PageId::new(1, 3));
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(PageId::new(0, 0).offset(4096), 0);
        assert_eq!(PageId::new(0, 3).offset(4096), 3 * 4096);
        assert_eq!(PageId::new(0, u32::MAX).offset(4096), u32::MAX as u64 * 4096);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(format!("{}", PageId::new(7, 42)), "Page(7:42)");
    }
}
