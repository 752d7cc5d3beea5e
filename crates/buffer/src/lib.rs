//! In-memory page cache sitting between the executor and the page store.
//!
//! Two interchangeable layouts implement [`Pager`]: [`BufferPool`], an exact
//! global LRU behind one latch, and [`BufferPoolSharded`], a set of
//! independent partitions that trade global LRU accuracy for lock-free
//! inter-shard concurrency. See each module for its specific contract.

mod cache;
mod pool;
mod sharded;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::PageId;
use storage::Page;

pub use pool::BufferPool;
pub use sharded::BufferPoolSharded;

/// A snapshot of cache effectiveness counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BufferPoolMetrics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub evictions: u64,
}

impl BufferPoolMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }
}

#[derive(Default)]
pub(crate) struct AtomicMetrics {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    evictions: AtomicU64,
}

impl AtomicMetrics {
    pub(crate) fn record_request(&self, hit: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BufferPoolMetrics {
        BufferPoolMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// The capability set shared by every buffer-pool layout, so upper layers
/// can stay polymorphic over which one backs them.
pub trait Pager: Send + Sync {
    /// Fetch and pin a page, loading it from disk on a cache miss.
    /// Returns `None` on read failure, pool exhaustion, or latch timeout.
    fn fetch_page(&self, id: PageId) -> Option<Arc<parking_lot::Mutex<Page>>>;

    /// Allocate a new page id, install a pinned empty page, evicting if
    /// necessary. Returns `None` on exhaustion or latch timeout.
    fn new_page(&self) -> Option<(PageId, Arc<parking_lot::Mutex<Page>>)>;

    /// Decrement the pin count (floor at zero) and OR in `dirty`. Returns
    /// `false` if the page isn't cached.
    fn unpin_page(&self, id: PageId, dirty: bool) -> bool;

    /// Write the page back to disk if dirty and clear the dirty bit.
    fn flush_page(&self, id: PageId) -> bool;

    /// Flush every dirty entry; per-page failures are logged, not fatal.
    fn flush_all_pages(&self);

    /// Remove a page from the cache and free its id. Fails if pinned.
    fn delete_page(&self, id: PageId) -> bool;

    /// Change the target capacity, evicting unpinned clean pages if shrinking.
    fn resize(&self, new_capacity: usize);

    /// Advisory prefetch hint, passed straight through to the page store.
    /// A no-op returning `false` when `buffer_pool.enable_prefetch` is off.
    fn prefetch_page(&self, id: PageId) -> bool;

    /// Advisory prefetch for several pages. Same `enable_prefetch` gating.
    fn batch_prefetch_pages(&self, ids: &[PageId]) -> bool;

    fn is_page_in_buffer(&self, id: PageId) -> bool;
    fn used_pages(&self) -> usize;
    fn metrics(&self) -> BufferPoolMetrics;
}

/// Small callback-style handle a `BufferPool` can be given so the WAL layer
/// can demand durability before a dirty page is written back, without the
/// two components holding cyclic references to each other.
pub trait WalDurability: Send + Sync {
    /// Block until every previously assigned LSN is durable on disk.
    fn force_flush(&self) -> bool;
}
