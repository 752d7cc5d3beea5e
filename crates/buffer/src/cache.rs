//! Shared cache-entry bookkeeping used by both buffer pool variants.

use std::sync::Arc;

use common::PageId;
use lru::LruCache;
use parking_lot::Mutex;
use storage::Page;

/// An in-cache page plus the bookkeeping the pool needs around it.
///
/// The page bytes live behind their own mutex so a caller can hold a fetched
/// page across an arbitrarily long critical section without holding the
/// pool's latch; the latch only ever protects `pin_count`/`dirty`/LRU order.
pub(crate) struct CachedPage {
    pub(crate) page: Arc<Mutex<Page>>,
    pub(crate) pin_count: u32,
    pub(crate) dirty: bool,
}

impl CachedPage {
    pub(crate) fn fresh(page: Page, dirty: bool) -> Self {
        Self {
            page: Arc::new(Mutex::new(page)),
            pin_count: 1,
            dirty,
        }
    }
}

/// Scan the LRU tail (least-recently-used end) for the first unpinned entry.
///
/// `lru::LruCache::iter` walks most-recently-used first, so the victim scan
/// walks it in reverse.
pub(crate) fn find_victim(table: &LruCache<PageId, CachedPage>) -> Option<PageId> {
    // `LruCache::iter` walks most-recently-used first; collect then walk
    // backwards to scan from the LRU tail without depending on the
    // iterator being double-ended.
    let entries: Vec<(PageId, u32)> = table.iter().map(|(id, c)| (*id, c.pin_count)).collect();
    entries
        .into_iter()
        .rev()
        .find(|(_, pin_count)| *pin_count == 0)
        .map(|(id, _)| id)
}
