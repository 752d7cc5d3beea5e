//! Fixed-size page buffer with identity and bounds-checked access (component C2).

use common::{DbError, DbResult, PageId};

/// Fixed size of every page on disk and in the buffer pool, in bytes.
pub const PAGE_SIZE: usize = 8192;

/// A fixed-size byte buffer identified by a `PageId`.
///
/// A freshly constructed page has all-zero data. `Page` is a value type: it is
/// owned by exactly one holder at a time (a cache frame, the WAL's recovery
/// scratch space, or a caller building a page before it's cached).
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: Vec<u8>,
}

impl Page {
    /// A page with an invalid id and zeroed data, as produced by a default
    /// constructor in the source system.
    pub fn new() -> Self {
        Self {
            id: PageId::INVALID,
            data: vec![0u8; PAGE_SIZE],
        }
    }

    /// A zeroed page with the given id.
    pub fn with_id(id: PageId) -> Self {
        Self {
            id,
            data: vec![0u8; PAGE_SIZE],
        }
    }

    /// Copy `src` into the page at `offset`.
    ///
    /// Fails with `PageBounds` if `offset + src.len() > PAGE_SIZE`.
    pub fn write_data(&mut self, offset: usize, src: &[u8]) -> DbResult<()> {
        let end = offset
            .checked_add(src.len())
            .ok_or_else(|| DbError::PageBounds("offset + len overflowed".into()))?;
        if end > PAGE_SIZE {
            return Err(DbError::PageBounds(format!(
                "write out of bounds: offset={offset} len={} page_size={PAGE_SIZE}",
                src.len()
            )));
        }
        self.data[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the page.
    ///
    /// Fails with `PageBounds` if `offset + dst.len() > PAGE_SIZE`.
    pub fn read_data(&self, offset: usize, dst: &mut [u8]) -> DbResult<()> {
        let end = offset
            .checked_add(dst.len())
            .ok_or_else(|| DbError::PageBounds("offset + len overflowed".into()))?;
        if end > PAGE_SIZE {
            return Err(DbError::PageBounds(format!(
                "read out of bounds: offset={offset} len={} page_size={PAGE_SIZE}",
                dst.len()
            )));
        }
        dst.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_page_is_invalid_and_zeroed() {
        let page = Page::new();
        assert!(!page.id.is_valid());
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut page = Page::with_id(PageId(3));
        page.write_data(10, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        page.read_data(10, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn write_rejects_out_of_bounds() {
        let mut page = Page::with_id(PageId(0));
        let err = page.write_data(PAGE_SIZE - 2, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DbError::PageBounds(_)));
    }

    #[test]
    fn read_rejects_out_of_bounds() {
        let page = Page::with_id(PageId(0));
        let mut buf = vec![0u8; 10];
        let err = page.read_data(PAGE_SIZE - 5, &mut buf).unwrap_err();
        assert!(matches!(err, DbError::PageBounds(_)));
    }

    #[test]
    fn write_at_exact_boundary_succeeds() {
        let mut page = Page::with_id(PageId(0));
        page.write_data(PAGE_SIZE - 4, &[9, 9, 9, 9]).unwrap();
        assert_eq!(&page.data[PAGE_SIZE - 4..], &[9, 9, 9, 9]);
    }
}
